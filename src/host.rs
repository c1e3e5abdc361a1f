//! Privileged operations only the host side may perform.

pub mod fetch;
pub mod page;
pub mod router;
pub mod stats;

use thiserror::Error;

pub use fetch::{AdaptiveRetryFetcher, FetchError, FetchOptions, RetryPolicy};
pub use page::{BrowserTabs, ElementInfo, SnapshotTabs, TabInfo};
pub use router::{HostCapabilityRouter, HostTool};
pub use stats::{HostStatsStore, InMemoryHostStats, JsonFileHostStats};

#[derive(Debug, Error)]
pub enum HostError {
    #[error("no suitable tab to analyse: open any http(s) page in this window")]
    NoEligibleTab,

    #[error("invalid selector {selector:?}: {reason}")]
    InvalidSelector { selector: String, reason: String },

    #[error("host function {0:?} not found")]
    UnknownFunction(String),

    #[error("invalid arguments for {func}: {reason}")]
    InvalidArguments { func: String, reason: String },

    #[error("{0}")]
    Tabs(String),

    #[error(transparent)]
    Fetch(#[from] FetchError),
}
