use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use sandbox_protocol::runtime::spawn_serve;
use sandbox_protocol::{Direction, Envelope, ServeHandle, ToolInterpreter, WorkerStatus};
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::BridgeError;

/// How a worker comes to life.
#[derive(Clone)]
pub enum WorkerLaunch {
    /// A child process speaking envelopes on stdin/stdout.
    Process { exe: PathBuf, args: Vec<String> },
    /// An interpreter served on an in-memory pipe inside this process.
    InProcess(Arc<dyn ToolInterpreter>),
}

impl std::fmt::Debug for WorkerLaunch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkerLaunch::Process { exe, args } => f
                .debug_struct("Process")
                .field("exe", exe)
                .field("args", args)
                .finish(),
            WorkerLaunch::InProcess(interpreter) => {
                f.debug_tuple("InProcess").field(&interpreter.name()).finish()
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
    Message { generation: u64, envelope: Envelope },
    Exited { generation: u64, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum WorkerHealth {
    NotStarted,
    Running {
        generation: u64,
        status: Option<WorkerStatus>,
    },
    Stopped {
        generation: u64,
    },
}

struct WorkerHandle {
    generation: u64,
    outbound: UnboundedSender<Envelope>,
    alive: Arc<AtomicBool>,
    status: Option<WorkerStatus>,
    tasks: Vec<JoinHandle<()>>,
    child: Option<Child>,
    serve: Option<ServeHandle>,
}

impl WorkerHandle {
    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Stops the worker. Returns the in-process loop, if any, so callers
    /// can wait for it to wind down.
    fn kill(mut self) -> Option<ServeHandle> {
        self.alive.store(false, Ordering::SeqCst);
        for task in &self.tasks {
            task.abort();
        }
        if let Some(child) = self.child.as_mut() {
            if let Err(e) = child.start_kill() {
                warn!(generation = self.generation, "could not kill worker: {e}");
            }
        }
        let serve = self.serve.take();
        if let Some(serve) = &serve {
            serve.stop();
        }
        serve
    }
}

#[derive(Default)]
struct ManagerState {
    current: Option<WorkerHandle>,
    last_generation: u64,
}

/// Owns the single live worker and replaces it when it dies or on request.
///
/// Each worker gets a fresh generation number; everything it sends is
/// tagged with it so late messages from a dead worker can be told apart.
pub struct SandboxWorkerManager {
    launch: WorkerLaunch,
    events: UnboundedSender<WorkerEvent>,
    state: Mutex<ManagerState>,
}

impl SandboxWorkerManager {
    pub fn new(launch: WorkerLaunch, events: UnboundedSender<WorkerEvent>) -> Self {
        Self {
            launch,
            events,
            state: Mutex::new(ManagerState::default()),
        }
    }

    /// The live worker's generation and input, starting one if needed.
    pub async fn acquire(&self) -> Result<(u64, UnboundedSender<Envelope>), BridgeError> {
        let mut state = self.state.lock().await;
        if let Some(current) = &state.current {
            if current.is_alive() {
                return Ok((current.generation, current.outbound.clone()));
            }
        }
        if let Some(dead) = state.current.take() {
            dead.kill();
        }
        let handle = self.spawn(state.last_generation + 1)?;
        state.last_generation = handle.generation;
        let acquired = (handle.generation, handle.outbound.clone());
        state.current = Some(handle);
        Ok(acquired)
    }

    /// Kills the live worker, if any, and starts a new one.
    pub async fn restart(&self) -> Result<u64, BridgeError> {
        let mut state = self.state.lock().await;
        if let Some(old) = state.current.take() {
            self.retire(old, "worker restarted");
        }
        let handle = self.spawn(state.last_generation + 1)?;
        let generation = handle.generation;
        state.last_generation = generation;
        state.current = Some(handle);
        info!(generation, "sandbox worker restarted");
        Ok(generation)
    }

    /// Stops the live worker and waits for an in-process one to wind down.
    pub async fn shutdown(&self) {
        let old = self.state.lock().await.current.take();
        if let Some(serve) = old.and_then(|old| self.retire(old, "worker shut down")) {
            if let Err(e) = serve.join().await {
                warn!("in-process worker stopped with an error: {e}");
            }
        }
    }

    /// Drops the worker of `generation` if it is still current, e.g. after
    /// its input was found closed.
    pub async fn discard(&self, generation: u64) {
        let mut state = self.state.lock().await;
        if state.current.as_ref().map(|h| h.generation) == Some(generation) {
            if let Some(old) = state.current.take() {
                self.retire(old, "worker input closed");
            }
        }
    }

    pub async fn health(&self) -> WorkerHealth {
        let state = self.state.lock().await;
        match &state.current {
            Some(handle) if handle.is_alive() => WorkerHealth::Running {
                generation: handle.generation,
                status: handle.status,
            },
            Some(handle) => WorkerHealth::Stopped {
                generation: handle.generation,
            },
            None if state.last_generation == 0 => WorkerHealth::NotStarted,
            None => WorkerHealth::Stopped {
                generation: state.last_generation,
            },
        }
    }

    /// Whether the worker of `generation` is the current one and running.
    pub async fn is_live(&self, generation: u64) -> bool {
        let state = self.state.lock().await;
        state
            .current
            .as_ref()
            .is_some_and(|h| h.generation == generation && h.is_alive())
    }

    pub async fn note_status(&self, generation: u64, status: WorkerStatus) {
        let mut state = self.state.lock().await;
        if let Some(handle) = state.current.as_mut().filter(|h| h.generation == generation) {
            handle.status = Some(status);
        }
    }

    /// Sends to the worker of `generation`; `false` if that worker is gone.
    pub async fn send_to(&self, generation: u64, envelope: Envelope) -> bool {
        let state = self.state.lock().await;
        match &state.current {
            Some(handle) if handle.generation == generation && handle.is_alive() => {
                handle.outbound.send(envelope).is_ok()
            }
            _ => false,
        }
    }

    fn retire(&self, handle: WorkerHandle, reason: &str) -> Option<ServeHandle> {
        let generation = handle.generation;
        let was_alive = handle.is_alive();
        let serve = handle.kill();
        if was_alive {
            let _ = self.events.send(WorkerEvent::Exited {
                generation,
                reason: reason.to_string(),
            });
        }
        serve
    }

    fn spawn(&self, generation: u64) -> Result<WorkerHandle, BridgeError> {
        match &self.launch {
            WorkerLaunch::Process { exe, args } => {
                let mut child = Command::new(exe)
                    .args(args)
                    .stdin(Stdio::piped())
                    .stdout(Stdio::piped())
                    .stderr(Stdio::inherit())
                    .kill_on_drop(true)
                    .spawn()
                    .map_err(|e| {
                        BridgeError::WorkerUnavailable(format!("could not start {}: {e}", exe.display()))
                    })?;
                let stdin = child
                    .stdin
                    .take()
                    .ok_or_else(|| BridgeError::WorkerUnavailable("worker stdin unavailable".into()))?;
                let stdout = child
                    .stdout
                    .take()
                    .ok_or_else(|| BridgeError::WorkerUnavailable("worker stdout unavailable".into()))?;
                info!(generation, exe = %exe.display(), pid = child.id(), "sandbox worker started");
                let mut handle = wire(generation, stdout, stdin, self.events.clone());
                handle.child = Some(child);
                Ok(handle)
            }
            WorkerLaunch::InProcess(interpreter) => {
                let (host_side, worker_side) = tokio::io::duplex(64 * 1024);
                let (worker_read, worker_write) = tokio::io::split(worker_side);
                let serve = spawn_serve(interpreter.clone(), worker_read, worker_write);
                let (host_read, host_write) = tokio::io::split(host_side);
                info!(generation, "in-process sandbox worker started");
                let mut handle = wire(generation, host_read, host_write, self.events.clone());
                handle.serve = Some(serve);
                Ok(handle)
            }
        }
    }
}

impl Drop for SandboxWorkerManager {
    fn drop(&mut self) {
        if let Some(handle) = self.state.get_mut().current.take() {
            handle.kill();
        }
    }
}

/// Connects a worker's byte streams: envelopes sent on the returned handle
/// are written one per line, and every line read back becomes a
/// [`WorkerEvent`] until EOF, which is reported as [`WorkerEvent::Exited`].
fn wire<R, W>(generation: u64, reader: R, writer: W, events: UnboundedSender<WorkerEvent>) -> WorkerHandle
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let alive = Arc::new(AtomicBool::new(true));
    let (outbound, mut rx) = mpsc::unbounded_channel::<Envelope>();

    // ── envelopes → worker input ─────────────────────────────────────────
    let writer_task = tokio::spawn(async move {
        let mut w = BufWriter::new(writer);
        while let Some(env) = rx.recv().await {
            let line = match env.encode_line() {
                Ok(line) => line,
                Err(e) => {
                    error!(generation, "could not encode {} envelope: {e}", env.kind());
                    continue;
                }
            };
            if w.write_all(line.as_bytes()).await.is_err() || w.flush().await.is_err() {
                warn!(generation, "worker input closed");
                break;
            }
        }
    });

    // ── worker output → events ───────────────────────────────────────────
    let reader_task = {
        let alive = alive.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(reader).lines();
            let reason = loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        match Envelope::decode_line(&line).and_then(|e| e.expect_direction(Direction::ToHost)) {
                            Ok(envelope) => {
                                debug!(generation, kind = envelope.kind(), "worker envelope");
                                let _ = events.send(WorkerEvent::Message { generation, envelope });
                            }
                            Err(e) => warn!(generation, "dropping worker output: {e}"),
                        }
                    }
                    Ok(None) => break "worker exited".to_string(),
                    Err(e) => break format!("worker output failed: {e}"),
                }
            };
            if alive.swap(false, Ordering::SeqCst) {
                warn!(generation, "{reason}");
                let _ = events.send(WorkerEvent::Exited { generation, reason });
            }
        })
    };

    WorkerHandle {
        generation,
        outbound,
        alive,
        status: None,
        tasks: vec![writer_task, reader_task],
        child: None,
        serve: None,
    }
}
