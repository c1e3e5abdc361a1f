use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use sandbox_protocol::CallId;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::debug;

use super::BridgeError;

pub type CallOutcome = Result<Value, BridgeError>;

struct PendingCall {
    plugin_id: String,
    tool_name: String,
    generation: u64,
    started: Instant,
    tx: oneshot::Sender<CallOutcome>,
}

/// Tool calls sent to a worker and not yet answered.
///
/// Every entry is settled exactly once: by the worker's reply, by the death
/// of the worker generation it was sent to, or by the caller giving up.
#[derive(Default)]
pub struct CallTable {
    calls: DashMap<CallId, PendingCall>,
}

impl CallTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &self,
        plugin_id: &str,
        tool_name: &str,
        generation: u64,
    ) -> (CallId, oneshot::Receiver<CallOutcome>) {
        let call_id = CallId::mint("call");
        let (tx, rx) = oneshot::channel();
        self.calls.insert(
            call_id.clone(),
            PendingCall {
                plugin_id: plugin_id.to_string(),
                tool_name: tool_name.to_string(),
                generation,
                started: Instant::now(),
                tx,
            },
        );
        (call_id, rx)
    }

    /// Delivers `outcome` to the waiting caller. Returns `false` for ids that
    /// are unknown or already settled.
    pub fn settle(&self, call_id: &CallId, outcome: CallOutcome) -> bool {
        match self.calls.remove(call_id) {
            Some((_, call)) => {
                debug!(
                    %call_id,
                    plugin_id = %call.plugin_id,
                    tool = %call.tool_name,
                    elapsed_ms = call.started.elapsed().as_millis() as u64,
                    ok = outcome.is_ok(),
                    "tool call settled"
                );
                let _ = call.tx.send(outcome);
                true
            }
            None => false,
        }
    }

    pub fn forget(&self, call_id: &CallId) -> bool {
        self.calls.remove(call_id).is_some()
    }

    /// Fails every call that was sent to worker `generation`.
    pub fn reject_generation(&self, generation: u64, error: BridgeError) -> usize {
        let doomed: Vec<CallId> = self
            .calls
            .iter()
            .filter(|entry| entry.generation == generation)
            .map(|entry| entry.key().clone())
            .collect();
        doomed
            .iter()
            .filter(|call_id| self.settle(call_id, Err(error.clone())))
            .count()
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }
}

/// Removes the entry when the waiting caller goes away first.
pub(crate) struct ForgetOnDrop {
    pub(crate) table: Arc<CallTable>,
    pub(crate) call_id: CallId,
}

impl Drop for ForgetOnDrop {
    fn drop(&mut self) {
        self.table.forget(&self.call_id);
    }
}
