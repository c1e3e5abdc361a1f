//! Host side of the sandbox bridge: one worker process at a time, calls
//! correlated by id, host calls answered on the worker's behalf.

mod bridge;
mod calls;
mod worker;

pub use bridge::{BridgeError, HostFunctions, SandboxBridge, SandboxRunner};
pub use calls::CallTable;
pub use worker::{SandboxWorkerManager, WorkerEvent, WorkerHealth, WorkerLaunch};
