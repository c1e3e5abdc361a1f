use std::sync::Arc;

use async_trait::async_trait;
use sandbox_protocol::{CallId, Envelope, LogLevel};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::calls::{CallTable, ForgetOnDrop};
use super::worker::{SandboxWorkerManager, WorkerEvent, WorkerHealth, WorkerLaunch};
use crate::logger::Logger;
use crate::plugins::PluginSource;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BridgeError {
    /// The tool itself failed; the worker's message, verbatim.
    #[error("{0}")]
    Tool(String),

    #[error("sandbox worker unavailable: {0}")]
    WorkerUnavailable(String),

    #[error("sandbox worker exited before answering: {0}")]
    WorkerExited(String),

    #[error("{0}")]
    Plugin(String),

    #[error("tool call was dropped")]
    CallDropped,
}

/// Host functions a sandboxed tool may call by name.
#[async_trait]
pub trait HostFunctions: Send + Sync {
    async fn call(&self, func: &str, args: Vec<Value>) -> Result<Value, String>;
}

/// Runs a plugin's tool in isolation.
#[async_trait]
pub trait SandboxRunner: Send + Sync {
    async fn run_tool(&self, plugin_id: &str, tool_name: &str, input: Value) -> Result<Value, BridgeError>;
}

/// Forwards tool calls to the sandbox worker and answers its host calls.
pub struct SandboxBridge {
    manager: Arc<SandboxWorkerManager>,
    calls: Arc<CallTable>,
    plugins: Arc<dyn PluginSource>,
    dispatcher: JoinHandle<()>,
}

impl SandboxBridge {
    pub fn new(
        launch: WorkerLaunch,
        plugins: Arc<dyn PluginSource>,
        host: Arc<dyn HostFunctions>,
        logger: Logger,
    ) -> Arc<Self> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let manager = Arc::new(SandboxWorkerManager::new(launch, events_tx));
        let calls = Arc::new(CallTable::new());
        let dispatcher = tokio::spawn(dispatch(events_rx, manager.clone(), calls.clone(), host, logger));
        Arc::new(Self {
            manager,
            calls,
            plugins,
            dispatcher,
        })
    }

    /// Runs `tool_name` from the plugin's tool source inside the worker.
    pub async fn run_tool(&self, plugin_id: &str, tool_name: &str, input: Value) -> Result<Value, BridgeError> {
        let tool_source = self
            .plugins
            .tool_source(plugin_id)
            .await
            .map_err(|e| BridgeError::Plugin(e.to_string()))?;

        let (generation, outbound) = self.manager.acquire().await?;
        let (call_id, rx) = self.calls.register(plugin_id, tool_name, generation);
        let _forget = ForgetOnDrop {
            table: self.calls.clone(),
            call_id: call_id.clone(),
        };
        if !self.manager.is_live(generation).await {
            return Err(BridgeError::WorkerExited("worker exited".into()));
        }

        debug!(%call_id, plugin_id, tool_name, generation, "sending tool call");
        let sent = outbound.send(Envelope::RunTool {
            call_id,
            tool_source,
            tool_name: tool_name.to_string(),
            input,
        });
        if sent.is_err() {
            self.manager.discard(generation).await;
            return Err(BridgeError::WorkerUnavailable("worker input closed".into()));
        }

        rx.await.map_err(|_| BridgeError::CallDropped)?
    }

    /// Replaces the worker; calls still waiting on the old one fail.
    pub async fn restart(&self) -> Result<u64, BridgeError> {
        self.manager.restart().await
    }

    pub async fn health(&self) -> WorkerHealth {
        self.manager.health().await
    }

    pub fn pending_calls(&self) -> usize {
        self.calls.len()
    }

    pub fn manager(&self) -> &Arc<SandboxWorkerManager> {
        &self.manager
    }

    pub async fn shutdown(&self) {
        self.manager.shutdown().await;
    }
}

impl Drop for SandboxBridge {
    fn drop(&mut self) {
        self.dispatcher.abort();
    }
}

#[async_trait]
impl SandboxRunner for SandboxBridge {
    async fn run_tool(&self, plugin_id: &str, tool_name: &str, input: Value) -> Result<Value, BridgeError> {
        SandboxBridge::run_tool(self, plugin_id, tool_name, input).await
    }
}

async fn dispatch(
    mut events: UnboundedReceiver<WorkerEvent>,
    manager: Arc<SandboxWorkerManager>,
    calls: Arc<CallTable>,
    host: Arc<dyn HostFunctions>,
    logger: Logger,
) {
    while let Some(event) = events.recv().await {
        match event {
            WorkerEvent::Message { generation, envelope } => match envelope {
                Envelope::Complete { call_id, result } => settle(&calls, &call_id, Ok(result)),
                Envelope::Error { call_id, error } => settle(&calls, &call_id, Err(BridgeError::Tool(error))),
                Envelope::HostCall { call_id, func, args } => {
                    let host = host.clone();
                    let manager = manager.clone();
                    tokio::spawn(answer_host_call(generation, call_id, func, args, host, manager));
                }
                Envelope::Status { status, message } => {
                    logger.log(status.log_level(), "SANDBOX", &message);
                    manager.note_status(generation, status).await;
                }
                other => warn!(generation, "unexpected `{}` envelope from worker", other.kind()),
            },
            WorkerEvent::Exited { generation, reason } => {
                let rejected = calls.reject_generation(generation, BridgeError::WorkerExited(reason.clone()));
                let level = if rejected > 0 { LogLevel::Error } else { LogLevel::Warn };
                logger.log(
                    level,
                    "SANDBOX",
                    &format!("Sandbox worker {generation} stopped ({reason}); {rejected} pending call(s) failed"),
                );
            }
        }
    }
}

fn settle(calls: &CallTable, call_id: &CallId, outcome: Result<Value, BridgeError>) {
    if !calls.settle(call_id, outcome) {
        warn!(%call_id, "reply for a call nobody waits on");
    }
}

async fn answer_host_call(
    generation: u64,
    call_id: Option<CallId>,
    func: String,
    args: Vec<Value>,
    host: Arc<dyn HostFunctions>,
    manager: Arc<SandboxWorkerManager>,
) {
    let outcome = host.call(&func, args).await;
    match call_id {
        Some(call_id) => {
            if !manager.send_to(generation, Envelope::host_result(call_id, outcome)).await {
                debug!(generation, %func, "worker gone before host call was answered");
            }
        }
        None => {
            if let Err(e) = outcome {
                warn!(%func, "fire-and-forget host call failed: {e}");
            }
        }
    }
}
