use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::{env, fmt::Display, path::PathBuf, str::FromStr, time::Duration};
use thiserror::Error;
use tracing::{debug, info};

/// Key/value source the platform configuration is read from.
pub trait ConfigSource: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn describe(&self) -> String;
}

/// Process environment, optionally seeded from a `.env` file.
#[derive(Clone, Debug)]
pub struct EnvConfig {
    env_file: PathBuf,
}

impl EnvConfig {
    pub fn new(env_file: PathBuf) -> Self {
        if env_file.exists() {
            dotenvy::from_path(&env_file).ok();
            info!("Loaded .env from {}", env_file.display());
        } else {
            debug!("no .env at {}, using process environment", env_file.display())
        }
        Self { env_file }
    }
}

impl ConfigSource for EnvConfig {
    fn get(&self, key: &str) -> Option<String> {
        env::var(key).ok()
    }

    fn describe(&self) -> String {
        format!("EnvConfig({})", self.env_file.display())
    }
}

#[derive(Debug, Default, Clone)]
pub struct MapConfig {
    map: DashMap<String, String>,
}

impl MapConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, key: &str, value: &str) -> &Self {
        self.map.insert(key.to_string(), value.to_string());
        self
    }
}

impl ConfigSource for MapConfig {
    fn get(&self, key: &str) -> Option<String> {
        self.map.get(key).map(|v| v.clone())
    }

    fn describe(&self) -> String {
        format!("MapConfig({} entries)", self.map.len())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: String,
        value: String,
        reason: String,
    },
}

/// Retry behaviour of the adaptive fetcher.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FetchSettings {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub probe_url: String,
    /// Successful-attempt numbers kept per host.
    pub history_retention: usize,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            initial_delay_ms: 500,
            max_delay_ms: 30_000,
            probe_url: "https://www.google.com/generate_204".to_string(),
            history_retention: 50,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatSettings {
    pub lru_capacity: usize,
    pub draft_debounce_ms: u64,
    pub draft_min_length: usize,
    pub draft_max_length: usize,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            lru_capacity: 50,
            draft_debounce_ms: 1_000,
            draft_min_length: 10,
            draft_max_length: 1_000,
        }
    }
}

impl ChatSettings {
    pub fn draft_debounce(&self) -> Duration {
        Duration::from_millis(self.draft_debounce_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlatformConfig {
    pub root: PathBuf,
    pub plugins_dir: PathBuf,
    pub data_dir: PathBuf,
    pub log_level: String,
    /// URL of the platform's own page; never treated as a target tab.
    pub self_url: String,
    /// `None` runs the sandbox worker in-process.
    pub worker_exe: Option<PathBuf>,
    pub prefetch_page: bool,
    pub fetch: FetchSettings,
    pub chat: ChatSettings,
}

impl PlatformConfig {
    /// Defaults rooted at `root`, without consulting any source.
    pub fn defaults(root: PathBuf) -> Self {
        Self {
            plugins_dir: root.join("plugins"),
            data_dir: root.join("data"),
            root,
            log_level: "info".to_string(),
            self_url: "platform://index.html".to_string(),
            worker_exe: None,
            prefetch_page: false,
            fetch: FetchSettings::default(),
            chat: ChatSettings::default(),
        }
    }

    pub fn load(root: PathBuf, source: &dyn ConfigSource) -> Result<Self, ConfigError> {
        let d = Self::defaults(root);
        debug!("loading platform config from {}", source.describe());

        Ok(Self {
            plugins_dir: source
                .get("PLATFORM_PLUGINS_DIR")
                .map(PathBuf::from)
                .unwrap_or(d.plugins_dir),
            data_dir: source
                .get("PLATFORM_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(d.data_dir),
            log_level: source.get("PLATFORM_LOG_LEVEL").unwrap_or(d.log_level),
            self_url: source.get("PLATFORM_SELF_URL").unwrap_or(d.self_url),
            worker_exe: source
                .get("SANDBOX_WORKER_EXE")
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from),
            prefetch_page: parse_or(source, "WORKFLOW_PREFETCH_PAGE", d.prefetch_page)?,
            fetch: FetchSettings {
                initial_delay_ms: parse_or(source, "FETCH_INITIAL_DELAY_MS", d.fetch.initial_delay_ms)?,
                max_delay_ms: parse_or(source, "FETCH_MAX_DELAY_MS", d.fetch.max_delay_ms)?,
                probe_url: source.get("FETCH_PROBE_URL").unwrap_or(d.fetch.probe_url),
                history_retention: parse_or(source, "FETCH_HISTORY_RETENTION", d.fetch.history_retention)?,
            },
            chat: ChatSettings {
                lru_capacity: parse_or(source, "CHAT_LRU_CAPACITY", d.chat.lru_capacity)?,
                draft_debounce_ms: parse_or(source, "DRAFT_DEBOUNCE_MS", d.chat.draft_debounce_ms)?,
                draft_min_length: parse_or(source, "DRAFT_MIN_LENGTH", d.chat.draft_min_length)?,
                draft_max_length: parse_or(source, "DRAFT_MAX_LENGTH", d.chat.draft_max_length)?,
            },
            root: d.root,
        })
    }

    pub fn chat_db(&self) -> PathBuf {
        self.data_dir.join("chats.sqlite")
    }

    pub fn host_stats_file(&self) -> PathBuf {
        self.data_dir.join("host_stats.json")
    }
}

fn parse_or<T>(source: &dyn ConfigSource, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    match source.get(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse::<T>().map_err(|e| ConfigError::Invalid {
            key: key.to_string(),
            value: raw.clone(),
            reason: e.to_string(),
        }),
    }
}

/// Resolve the platform root directory from the environment or use default.
pub fn resolve_root_dir() -> PathBuf {
    if let Ok(path) = env::var("PLATFORM_ROOT") {
        PathBuf::from(path)
    } else {
        PathBuf::from("./platform")
    }
}
