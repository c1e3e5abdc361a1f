pub mod envelope;
pub mod error;
pub mod runtime;

pub use envelope::{CallId, Direction, Envelope, LogLevel, WorkerStatus};
pub use error::ProtocolError;
pub use runtime::{HostLink, ServeHandle, ToolInterpreter};
