use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use sandbox_protocol::LogLevel;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt, prelude::*};

/// Sink for user-visible progress of workflow runs and sandbox activity.
pub trait LoggerType: Send + Sync {
    fn log(&self, level: LogLevel, context: &str, msg: &str);

    /// Presents the terminal result of a run.
    fn render_result(&self, step_id: &str, result: &Value) -> Result<()>;

    fn debug_name(&self) -> String;
}

#[derive(Clone)]
pub struct Logger(pub Arc<dyn LoggerType>);

impl Logger {
    pub fn new(inner: impl LoggerType + 'static) -> Self {
        Logger(Arc::new(inner))
    }

    pub fn log(&self, level: LogLevel, context: &str, msg: &str) {
        self.0.log(level, context, msg)
    }

    pub fn render_result(&self, step_id: &str, result: &Value) -> Result<()> {
        self.0.render_result(step_id, result)
    }
}

impl std::fmt::Debug for Logger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0.debug_name())
    }
}

/// Forwards everything to `tracing` under the `workflow` target.
#[derive(Clone, Debug, Default)]
pub struct TracingLogger;

impl LoggerType for TracingLogger {
    fn log(&self, level: LogLevel, context: &str, msg: &str) {
        match level {
            LogLevel::Trace => tracing::trace!(target: "workflow", %context, "{msg}"),
            LogLevel::Debug => tracing::debug!(target: "workflow", %context, "{msg}"),
            LogLevel::Info => tracing::info!(target: "workflow", %context, "{msg}"),
            LogLevel::Warn => tracing::warn!(target: "workflow", %context, "{msg}"),
            LogLevel::Error => tracing::error!(target: "workflow", %context, "{msg}"),
            LogLevel::Critical => tracing::error!(target: "workflow", %context, "[CRITICAL] {msg}"),
        }
    }

    fn render_result(&self, step_id: &str, result: &Value) -> Result<()> {
        let pretty = serde_json::to_string_pretty(result)?;
        tracing::info!(target: "workflow", step_id, "result:\n{pretty}");
        Ok(())
    }

    fn debug_name(&self) -> String {
        "TracingLogger".to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub level: LogLevel,
    pub context: String,
    pub message: String,
}

/// Keeps entries in memory, in arrival order.
#[derive(Clone, Debug, Default)]
pub struct MemoryLogger {
    entries: Arc<Mutex<Vec<LogEntry>>>,
    results: Arc<Mutex<Vec<(String, Value)>>>,
}

impl MemoryLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn messages(&self) -> Vec<String> {
        self.entries().into_iter().map(|e| e.message).collect()
    }

    pub fn results(&self) -> Vec<(String, Value)> {
        self.results.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.clear();
        }
        if let Ok(mut results) = self.results.lock() {
            results.clear();
        }
    }
}

impl LoggerType for MemoryLogger {
    fn log(&self, level: LogLevel, context: &str, msg: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.push(LogEntry {
                level,
                context: context.to_string(),
                message: msg.to_string(),
            });
        }
    }

    fn render_result(&self, step_id: &str, result: &Value) -> Result<()> {
        if let Ok(mut results) = self.results.lock() {
            results.push((step_id.to_string(), result.clone()));
        }
        Ok(())
    }

    fn debug_name(&self) -> String {
        format!("MemoryLogger({} entries)", self.entries().len())
    }
}

/// Installs the global subscriber and returns the tracing-backed [`Logger`].
///
/// - `log_file`, relative to `root`: plain-text daily rolling log.
/// - `event_file`, relative to `root`: newline-delimited JSON of `workflow` events.
/// - stderr: human readable output at `log_level`.
pub fn init_tracing(
    root: PathBuf,
    log_file: String,
    event_file: String,
    log_level: String,
) -> Result<Logger> {
    let log_file = root.join(log_file);
    let event_file = root.join(event_file);

    let (txt_dir, txt_name) = split_path(&log_file)?;
    let txt_appender = RollingFileAppender::new(Rotation::DAILY, txt_dir, txt_name);
    let txt_layer = fmt::Layer::default()
        .with_writer(txt_appender)
        .with_ansi(false);

    let (json_dir, json_name) = split_path(&event_file)?;
    let json_appender = RollingFileAppender::new(Rotation::DAILY, json_dir, json_name);
    let json_layer = fmt::layer()
        .json()
        .with_writer(json_appender)
        .with_target(true)
        .with_filter(EnvFilter::new("workflow=info"));

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(EnvFilter::new(&log_level));

    Registry::default()
        .with(EnvFilter::new(&log_level))
        .with(txt_layer)
        .with(json_layer)
        .with(stderr_layer)
        .try_init()
        .context("a global tracing subscriber is already installed")?;

    Ok(Logger::new(TracingLogger))
}

fn split_path(path: &Path) -> Result<(&Path, &std::ffi::OsStr)> {
    let dir = path
        .parent()
        .with_context(|| format!("{} has no parent directory", path.display()))?;
    let name = path
        .file_name()
        .with_context(|| format!("{} has no file name", path.display()))?;
    Ok((dir, name))
}
