use thiserror::Error;

use crate::envelope::Direction;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed envelope: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("`{kind}` envelope is not allowed {expected}")]
    UnexpectedDirection {
        kind: &'static str,
        expected: Direction,
    },

    #[error("channel to the other side is closed")]
    ChannelClosed,

    #[error("interpreter failed to start: {0}")]
    InterpreterInit(String),

    #[error("worker task failed: {0}")]
    Task(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
