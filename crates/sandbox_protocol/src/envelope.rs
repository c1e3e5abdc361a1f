//! Envelope types exchanged between the host and the sandbox worker over a
//! line-delimited JSON stream (one envelope per line).
//!
//! The wire shape is flat and tagged by `type`, with camelCase fields:
//! ```text
//! {"type":"run_tool","callId":"call_…","toolSource":"…","toolName":"summarize","input":{…}}
//! {"type":"complete","callId":"call_…","result":{…}}
//! {"type":"host_call","func":"sendMessageToChat","args":[{"content":"hi"}]}
//! ```
//!
//! A `host_call` without a `callId` is fire-and-forget: the host never replies.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum_macros::{Display, EnumString};
use uuid::Uuid;

use crate::error::ProtocolError;

/// Correlation token pairing a request with its eventual response.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallId(String);

impl CallId {
    /// Mints a fresh, globally unique id (`<prefix>_<uuid>`).
    pub fn mint(prefix: &str) -> Self {
        Self(format!("{prefix}_{}", Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CallId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CallId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for CallId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Severity shared by both sides of the bridge.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum LogLevel {
    Trace = 0,
    Debug = 1,
    Info = 2,
    Warn = 3,
    Error = 4,
    Critical = 5,
}

/// Lifecycle state reported by the worker through `status` envelopes.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum WorkerStatus {
    Loading,
    Ready,
    Error,
}

impl WorkerStatus {
    /// `loading` and `ready` are informational, `error` is not.
    pub fn log_level(&self) -> LogLevel {
        match self {
            WorkerStatus::Loading | WorkerStatus::Ready => LogLevel::Info,
            WorkerStatus::Error => LogLevel::Error,
        }
    }
}

/// Which way an envelope is allowed to travel.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Display)]
pub enum Direction {
    #[strum(serialize = "host→worker")]
    ToWorker,
    #[strum(serialize = "worker→host")]
    ToHost,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum Envelope {
    RunTool {
        call_id: CallId,
        tool_source: String,
        tool_name: String,
        #[serde(default)]
        input: Value,
    },
    Complete {
        call_id: CallId,
        #[serde(default)]
        result: Value,
    },
    Error {
        call_id: CallId,
        error: String,
    },
    HostCall {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        call_id: Option<CallId>,
        func: String,
        #[serde(default)]
        args: Vec<Value>,
    },
    HostResult {
        call_id: CallId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Status {
        status: WorkerStatus,
        #[serde(default)]
        message: String,
    },
}

impl Envelope {
    pub fn status(status: WorkerStatus, message: impl Into<String>) -> Self {
        Envelope::Status {
            status,
            message: message.into(),
        }
    }

    /// Builds the `complete`/`error` reply for a finished tool call.
    pub fn outcome(call_id: CallId, outcome: Result<Value, String>) -> Self {
        match outcome {
            Ok(result) => Envelope::Complete { call_id, result },
            Err(error) => Envelope::Error { call_id, error },
        }
    }

    /// Builds the `host_result` reply for a correlated host call.
    pub fn host_result(call_id: CallId, outcome: Result<Value, String>) -> Self {
        match outcome {
            Ok(result) => Envelope::HostResult {
                call_id,
                result: Some(result),
                error: None,
            },
            Err(error) => Envelope::HostResult {
                call_id,
                result: None,
                error: Some(error),
            },
        }
    }

    /// The `type` tag as it appears on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            Envelope::RunTool { .. } => "run_tool",
            Envelope::Complete { .. } => "complete",
            Envelope::Error { .. } => "error",
            Envelope::HostCall { .. } => "host_call",
            Envelope::HostResult { .. } => "host_result",
            Envelope::Status { .. } => "status",
        }
    }

    pub fn direction(&self) -> Direction {
        match self {
            Envelope::RunTool { .. } | Envelope::HostResult { .. } => Direction::ToWorker,
            _ => Direction::ToHost,
        }
    }

    /// Rejects an envelope that arrived travelling the wrong way.
    pub fn expect_direction(self, expected: Direction) -> Result<Self, ProtocolError> {
        if self.direction() == expected {
            Ok(self)
        } else {
            Err(ProtocolError::UnexpectedDirection {
                kind: self.kind(),
                expected,
            })
        }
    }

    /// Serializes the envelope as one newline-terminated line.
    pub fn encode_line(&self) -> Result<String, ProtocolError> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }

    pub fn decode_line(line: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(trim_newlines(line))?)
    }
}

pub(crate) fn trim_newlines(s: &str) -> &str {
    s.trim_end_matches(['\n', '\r'])
}
