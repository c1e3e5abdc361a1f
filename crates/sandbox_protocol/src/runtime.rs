//! Worker-side runtime that wires a line-delimited envelope stream to a
//! user-supplied [`ToolInterpreter`].
//!
//! * `run_tool` jobs execute strictly one at a time on a blocking thread.
//! * While a tool runs, the reader keeps routing `host_result` envelopes to
//!   the tool's blocked [`HostLink::call_blocking`] calls.
//! * On EOF the link is closed, which fails every host call still waiting.
//!
//! Usage:
//! ```ignore
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     sandbox_protocol::runtime::run_stdio(Arc::new(MyInterpreter::default())).await?;
//!     Ok(())
//! }
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;
use serde_json::Value;
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, BufWriter},
    sync::{
        mpsc::{self, UnboundedReceiver, UnboundedSender},
        oneshot,
    },
    task::JoinHandle,
};
use tracing::{debug, error, warn};

use crate::envelope::{CallId, Direction, Envelope, WorkerStatus};
use crate::error::ProtocolError;

const LINK_CLOSED: &str = "host link closed";

/// An embedded interpreter able to run one named tool from a source file.
pub trait ToolInterpreter: Send + Sync + 'static {
    /// Short human readable name, used in status messages.
    fn name(&self) -> &str;

    /// Called once before the worker reports `ready`.
    fn warm_up(&self) -> Result<(), String> {
        Ok(())
    }

    /// Runs `tool_name` defined in `source` with `input`.
    ///
    /// Called on a blocking thread; errors are reported to the host verbatim.
    fn run_tool(
        &self,
        source: &str,
        tool_name: &str,
        input: Value,
        host: &HostLink,
    ) -> Result<Value, String>;
}

/// Handle through which interpreted code reaches host functions.
#[derive(Clone)]
pub struct HostLink {
    outbound: UnboundedSender<Envelope>,
    pending: Arc<DashMap<CallId, oneshot::Sender<Result<Value, String>>>>,
    closed: Arc<AtomicBool>,
}

impl HostLink {
    pub fn new(outbound: UnboundedSender<Envelope>) -> Self {
        Self {
            outbound,
            pending: Arc::new(DashMap::new()),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Fire-and-forget host call; the host never replies.
    pub fn notify(&self, func: &str, args: Vec<Value>) -> Result<(), String> {
        self.outbound
            .send(Envelope::HostCall {
                call_id: None,
                func: func.to_string(),
                args,
            })
            .map_err(|_| LINK_CLOSED.to_string())
    }

    /// Correlated host call that parks the current thread until the matching
    /// `host_result` arrives.
    ///
    /// Must not be called from inside an async task.
    pub fn call_blocking(&self, func: &str, args: Vec<Value>) -> Result<Value, String> {
        let call_id = CallId::mint("host");
        let (tx, rx) = oneshot::channel();
        self.pending.insert(call_id.clone(), tx);
        if self.is_closed() {
            self.pending.remove(&call_id);
            return Err(LINK_CLOSED.to_string());
        }

        let sent = self.outbound.send(Envelope::HostCall {
            call_id: Some(call_id.clone()),
            func: func.to_string(),
            args,
        });
        if sent.is_err() {
            self.pending.remove(&call_id);
            return Err(LINK_CLOSED.to_string());
        }

        rx.blocking_recv().map_err(|_| LINK_CLOSED.to_string())?
    }

    /// Settles a waiting host call. Returns `false` when nothing waits on `call_id`.
    pub fn resolve(&self, call_id: &CallId, outcome: Result<Value, String>) -> bool {
        match self.pending.remove(call_id) {
            Some((_, tx)) => {
                let _ = tx.send(outcome);
                true
            }
            None => false,
        }
    }

    /// Fails every host call still waiting, and every later one.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.pending.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

struct Job {
    call_id: CallId,
    tool_source: String,
    tool_name: String,
    input: Value,
}

/// Runs the envelope loop over stdin/stdout until EOF.
pub async fn run_stdio(interpreter: Arc<dyn ToolInterpreter>) -> Result<(), ProtocolError> {
    serve(interpreter, tokio::io::stdin(), tokio::io::stdout()).await
}

/// Runs the envelope loop over any byte stream pair until `reader` hits EOF.
pub async fn serve<R, W>(
    interpreter: Arc<dyn ToolInterpreter>,
    reader: R,
    writer: W,
) -> Result<(), ProtocolError>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel::<Envelope>();
    let host = HostLink::new(tx.clone());
    drive(interpreter, reader, writer, host, tx, rx).await
}

/// A [`serve`] loop running on its own task.
pub struct ServeHandle {
    host: HostLink,
    task: JoinHandle<Result<(), ProtocolError>>,
}

impl ServeHandle {
    /// Stops the loop without waiting for EOF. Host calls parked on a
    /// blocking thread fail at once, so the thread can finish.
    pub fn stop(&self) {
        self.host.close();
        self.task.abort();
    }

    /// Waits for the loop to end; a stopped loop yields `Ok(())`.
    pub async fn join(self) -> Result<(), ProtocolError> {
        match self.task.await {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => Ok(()),
            Err(e) => Err(ProtocolError::Task(e.to_string())),
        }
    }
}

/// Spawns [`serve`] on the current runtime and returns a handle that can
/// stop it.
pub fn spawn_serve<R, W>(interpreter: Arc<dyn ToolInterpreter>, reader: R, writer: W) -> ServeHandle
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel::<Envelope>();
    let host = HostLink::new(tx.clone());
    let task = tokio::spawn(drive(interpreter, reader, writer, host.clone(), tx, rx));
    ServeHandle { host, task }
}

async fn drive<R, W>(
    interpreter: Arc<dyn ToolInterpreter>,
    reader: R,
    writer: W,
    host: HostLink,
    tx: UnboundedSender<Envelope>,
    mut rx: UnboundedReceiver<Envelope>,
) -> Result<(), ProtocolError>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    // ── 1. writer task: one envelope per line ────────────────────────────
    let writer_task = tokio::spawn(async move {
        let mut w = BufWriter::new(writer);
        while let Some(env) = rx.recv().await {
            let line = match env.encode_line() {
                Ok(line) => line,
                Err(e) => {
                    error!(error = %e, "could not encode {} envelope", env.kind());
                    continue;
                }
            };
            if let Err(e) = w.write_all(line.as_bytes()).await {
                error!(error = %e, "write to host failed");
                break;
            }
            if let Err(e) = w.flush().await {
                error!(error = %e, "flush to host failed");
                break;
            }
        }
    });

    let name = interpreter.name().to_string();

    // ── 2. warm up ───────────────────────────────────────────────────────
    let _ = tx.send(Envelope::status(
        WorkerStatus::Loading,
        format!("Loading {name} interpreter..."),
    ));
    let warm = {
        let interpreter = interpreter.clone();
        tokio::task::spawn_blocking(move || interpreter.warm_up())
            .await
            .unwrap_or_else(|e| Err(e.to_string()))
    };
    if let Err(e) = warm {
        let _ = tx.send(Envelope::status(
            WorkerStatus::Error,
            format!("Failed to load {name} interpreter: {e}"),
        ));
        drop(host);
        drop(tx);
        let _ = writer_task.await;
        return Err(ProtocolError::InterpreterInit(e));
    }
    let _ = tx.send(Envelope::status(
        WorkerStatus::Ready,
        format!("{name} interpreter ready"),
    ));

    // ── 3. serial executor ───────────────────────────────────────────────
    let (job_tx, mut job_rx) = mpsc::unbounded_channel::<Job>();
    let executor = {
        let tx = tx.clone();
        let host = host.clone();
        tokio::spawn(async move {
            while let Some(job) = job_rx.recv().await {
                let interpreter = interpreter.clone();
                let host = host.clone();
                let call_id = job.call_id.clone();
                let outcome = tokio::task::spawn_blocking(move || {
                    interpreter.run_tool(&job.tool_source, &job.tool_name, job.input, &host)
                })
                .await
                .unwrap_or_else(|e| Err(format!("tool panicked: {e}")));
                if tx.send(Envelope::outcome(call_id, outcome)).is_err() {
                    break;
                }
            }
        })
    };

    // ── 4. read envelopes until EOF ──────────────────────────────────────
    let mut lines = BufReader::new(reader).lines();
    let result = loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break Ok(()),
            Err(e) => break Err(ProtocolError::Io(e)),
        };
        if line.trim().is_empty() {
            continue;
        }

        let env = match Envelope::decode_line(&line)
            .and_then(|env| env.expect_direction(Direction::ToWorker))
        {
            Ok(env) => env,
            Err(e) => {
                warn!(error = %e, "dropping envelope from host");
                continue;
            }
        };

        match env {
            Envelope::RunTool {
                call_id,
                tool_source,
                tool_name,
                input,
            } => {
                debug!(%call_id, %tool_name, "queued tool call");
                let job = Job {
                    call_id,
                    tool_source,
                    tool_name,
                    input,
                };
                if job_tx.send(job).is_err() {
                    break Err(ProtocolError::ChannelClosed);
                }
            }
            Envelope::HostResult {
                call_id,
                result,
                error,
            } => {
                let outcome = match error {
                    Some(e) => Err(e),
                    None => Ok(result.unwrap_or(Value::Null)),
                };
                if !host.resolve(&call_id, outcome) {
                    warn!(%call_id, "host_result for a call nobody waits on");
                }
            }
            other => warn!("ignoring `{}` envelope", other.kind()),
        }
    };

    // ── 5. shut down: fail parked host calls, drain executor, flush writer
    host.close();
    drop(job_tx);
    let _ = executor.await;
    drop(host);
    drop(tx);
    let _ = writer_task.await;
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::{DuplexStream, Lines, ReadHalf, WriteHalf};

    struct Echo;

    impl ToolInterpreter for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        fn run_tool(
            &self,
            _source: &str,
            tool_name: &str,
            input: Value,
            host: &HostLink,
        ) -> Result<Value, String> {
            match tool_name {
                "echo" => Ok(input),
                "fail" => Err("tool blew up".into()),
                "ask" => host.call_blocking("lookup", vec![input]),
                "shout" => {
                    host.notify("sendMessageToChat", vec![input])?;
                    Ok(json!("sent"))
                }
                other => Err(format!("tool \"{other}\" not found")),
            }
        }
    }

    struct Harness {
        lines: Lines<BufReader<ReadHalf<DuplexStream>>>,
        write: WriteHalf<DuplexStream>,
        worker: tokio::task::JoinHandle<Result<(), ProtocolError>>,
    }

    impl Harness {
        fn start() -> Self {
            let (host_side, worker_side) = tokio::io::duplex(64 * 1024);
            let (worker_read, worker_write) = tokio::io::split(worker_side);
            let worker = tokio::spawn(serve(Arc::new(Echo), worker_read, worker_write));
            let (read, write) = tokio::io::split(host_side);
            Self {
                lines: BufReader::new(read).lines(),
                write,
                worker,
            }
        }

        async fn send(&mut self, env: Envelope) {
            let line = env.encode_line().unwrap();
            self.write.write_all(line.as_bytes()).await.unwrap();
        }

        async fn next(&mut self) -> Envelope {
            let line = self.lines.next_line().await.unwrap().expect("worker closed");
            Envelope::decode_line(&line).unwrap()
        }

        async fn ready(&mut self) {
            assert!(matches!(
                self.next().await,
                Envelope::Status { status: WorkerStatus::Loading, .. }
            ));
            assert!(matches!(
                self.next().await,
                Envelope::Status { status: WorkerStatus::Ready, .. }
            ));
        }
    }

    fn run(call_id: &str, tool: &str, input: Value) -> Envelope {
        Envelope::RunTool {
            call_id: CallId::from(call_id),
            tool_source: String::new(),
            tool_name: tool.into(),
            input,
        }
    }

    #[tokio::test]
    async fn reports_status_then_completes_calls_in_order() {
        let mut h = Harness::start();
        h.ready().await;

        h.send(run("c1", "echo", json!({"x": 1}))).await;
        h.send(run("c2", "fail", json!(null))).await;

        assert_eq!(
            h.next().await,
            Envelope::Complete { call_id: "c1".into(), result: json!({"x": 1}) }
        );
        assert_eq!(
            h.next().await,
            Envelope::Error { call_id: "c2".into(), error: "tool blew up".into() }
        );
    }

    #[tokio::test]
    async fn correlated_host_call_round_trips() {
        let mut h = Harness::start();
        h.ready().await;

        h.send(run("c1", "ask", json!("key"))).await;
        let host_call_id = match h.next().await {
            Envelope::HostCall { call_id: Some(id), func, args } => {
                assert_eq!(func, "lookup");
                assert_eq!(args, vec![json!("key")]);
                id
            }
            other => panic!("expected host_call, got {other:?}"),
        };
        h.send(Envelope::host_result(host_call_id, Ok(json!({"answer": [4, 2]})))).await;

        assert_eq!(
            h.next().await,
            Envelope::Complete { call_id: "c1".into(), result: json!({"answer": [4, 2]}) }
        );
    }

    #[tokio::test]
    async fn notify_does_not_wait_for_host() {
        let mut h = Harness::start();
        h.ready().await;

        h.send(run("c1", "shout", json!({"content": "hello"}))).await;
        assert_eq!(
            h.next().await,
            Envelope::HostCall {
                call_id: None,
                func: "sendMessageToChat".into(),
                args: vec![json!({"content": "hello"})],
            }
        );
        assert_eq!(
            h.next().await,
            Envelope::Complete { call_id: "c1".into(), result: json!("sent") }
        );
    }

    #[tokio::test]
    async fn eof_fails_parked_host_calls_and_stops() {
        let mut h = Harness::start();
        h.ready().await;

        h.send(run("c1", "ask", json!(1))).await;
        assert!(matches!(h.next().await, Envelope::HostCall { .. }));

        let Harness { lines, write, worker } = h;
        drop(write);
        drop(lines);
        assert!(worker.await.unwrap().is_ok());
    }

    async fn next(lines: &mut Lines<BufReader<ReadHalf<DuplexStream>>>) -> Envelope {
        let line = lines.next_line().await.unwrap().expect("worker closed");
        Envelope::decode_line(&line).unwrap()
    }

    #[tokio::test]
    async fn stopping_fails_parked_host_calls_without_eof() {
        let (host_side, worker_side) = tokio::io::duplex(64 * 1024);
        let (worker_read, worker_write) = tokio::io::split(worker_side);
        let handle = spawn_serve(Arc::new(Echo), worker_read, worker_write);
        let (read, mut write) = tokio::io::split(host_side);
        let mut lines = BufReader::new(read).lines();

        assert!(matches!(next(&mut lines).await, Envelope::Status { status: WorkerStatus::Loading, .. }));
        assert!(matches!(next(&mut lines).await, Envelope::Status { status: WorkerStatus::Ready, .. }));
        write
            .write_all(run("c1", "ask", json!(1)).encode_line().unwrap().as_bytes())
            .await
            .unwrap();
        assert!(matches!(next(&mut lines).await, Envelope::HostCall { .. }));

        // The host side of the pipe stays open; only stop() releases the tool.
        handle.stop();
        assert_eq!(
            next(&mut lines).await,
            Envelope::Error { call_id: "c1".into(), error: LINK_CLOSED.into() }
        );
        assert!(handle.join().await.is_ok());
    }

    #[test]
    fn closed_link_refuses_new_host_calls() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let link = HostLink::new(tx);
        link.close();
        assert_eq!(link.call_blocking("lookup", vec![]), Err(LINK_CLOSED.to_string()));
        assert_eq!(link.pending(), 0);
    }
}
