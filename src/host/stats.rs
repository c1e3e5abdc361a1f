use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::warn;

pub const DEFAULT_RETENTION: usize = 50;

#[derive(Debug, Error)]
pub enum StatsError {
    #[error("could not persist host stats to {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not encode host stats: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Per-hostname history of the attempt number on which a fetch succeeded.
#[async_trait]
pub trait HostStatsStore: Send + Sync {
    async fn history(&self, host: &str) -> Vec<u32>;

    /// Appends `attempt`, keeping only the most recent entries.
    async fn record_success(&self, host: &str, attempt: u32) -> Result<(), StatsError>;
}

fn push_bounded(history: &mut Vec<u32>, attempt: u32, retention: usize) {
    history.push(attempt);
    if history.len() > retention {
        let excess = history.len() - retention;
        history.drain(..excess);
    }
}

#[derive(Debug)]
pub struct InMemoryHostStats {
    retention: usize,
    entries: DashMap<String, Vec<u32>>,
}

impl Default for InMemoryHostStats {
    fn default() -> Self {
        Self::new(DEFAULT_RETENTION)
    }
}

impl InMemoryHostStats {
    pub fn new(retention: usize) -> Self {
        Self {
            retention: retention.max(1),
            entries: DashMap::new(),
        }
    }

    /// Seeds the history of `host`, e.g. in tests.
    pub fn with_history(self, host: &str, history: Vec<u32>) -> Self {
        self.entries.insert(host.to_string(), history);
        self
    }
}

#[async_trait]
impl HostStatsStore for InMemoryHostStats {
    async fn history(&self, host: &str) -> Vec<u32> {
        self.entries.get(host).map(|h| h.clone()).unwrap_or_default()
    }

    async fn record_success(&self, host: &str, attempt: u32) -> Result<(), StatsError> {
        let mut history = self.entries.entry(host.to_string()).or_default();
        push_bounded(&mut history, attempt, self.retention);
        Ok(())
    }
}

/// Histories kept in one JSON document, rewritten on every record.
pub struct JsonFileHostStats {
    path: PathBuf,
    retention: usize,
    entries: Mutex<HashMap<String, Vec<u32>>>,
}

impl JsonFileHostStats {
    /// Opens `path`; a missing or unreadable file starts empty.
    pub async fn open(path: PathBuf, retention: usize) -> Self {
        let entries = match tokio::fs::read_to_string(&path).await {
            Ok(text) => serde_json::from_str(&text).unwrap_or_else(|e| {
                warn!("ignoring corrupt host stats at {}: {e}", path.display());
                HashMap::new()
            }),
            Err(_) => HashMap::new(),
        };
        Self {
            path,
            retention: retention.max(1),
            entries: Mutex::new(entries),
        }
    }
}

#[async_trait]
impl HostStatsStore for JsonFileHostStats {
    async fn history(&self, host: &str) -> Vec<u32> {
        self.entries.lock().await.get(host).cloned().unwrap_or_default()
    }

    async fn record_success(&self, host: &str, attempt: u32) -> Result<(), StatsError> {
        let mut entries = self.entries.lock().await;
        push_bounded(entries.entry(host.to_string()).or_default(), attempt, self.retention);
        let text = serde_json::to_string_pretty(&*entries)?;

        if let Some(dir) = self.path.parent() {
            tokio::fs::create_dir_all(dir).await.map_err(|source| StatsError::Io {
                path: self.path.clone(),
                source,
            })?;
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, text).await.map_err(|source| StatsError::Io {
            path: tmp.clone(),
            source,
        })?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(|source| StatsError::Io {
            path: self.path.clone(),
            source,
        })
    }
}
