use std::path::{Path, PathBuf};

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

pub const MANIFEST_FILE: &str = "manifest.json";
pub const WORKFLOW_FILE: &str = "workflow.json";
pub const DEFAULT_TOOL_SOURCE: &str = "mcp_server.rhai";

#[derive(Debug, Error)]
pub enum PluginError {
    #[error("invalid plugin id {0:?}")]
    InvalidId(String),

    #[error("plugin {plugin_id} has no {what}")]
    NotFound { plugin_id: String, what: String },

    #[error("could not read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid manifest for plugin {plugin_id}: {source}")]
    Manifest {
        plugin_id: String,
        #[source]
        source: serde_json::Error,
    },
}

fn default_main_server() -> String {
    DEFAULT_TOOL_SOURCE.to_string()
}

/// `plugins/<id>/manifest.json`
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct PluginManifest {
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub description: String,
    /// Tool source file, relative to the plugin directory.
    #[serde(default = "default_main_server")]
    pub main_server: String,
    #[serde(default)]
    pub host_permissions: Vec<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
    #[serde(default)]
    pub icon: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PluginSummary {
    pub id: String,
    pub name: String,
    pub version: String,
    pub description: String,
    pub icon: Option<String>,
}

/// Storage of plugin packages.
#[async_trait]
pub trait PluginSource: Send + Sync {
    async fn list(&self) -> Vec<PluginSummary>;
    async fn manifest(&self, plugin_id: &str) -> Result<PluginManifest, PluginError>;
    async fn workflow_document(&self, plugin_id: &str) -> Result<String, PluginError>;
    async fn tool_source(&self, plugin_id: &str) -> Result<String, PluginError>;
}

/// Plugins laid out as `<root>/<id>/{manifest.json, workflow.json, mcp_server.rhai}`.
#[derive(Debug, Clone)]
pub struct DirPluginSource {
    root: PathBuf,
}

impl DirPluginSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn plugin_dir(&self, plugin_id: &str) -> Result<PathBuf, PluginError> {
        validate_id(plugin_id)?;
        Ok(self.root.join(plugin_id))
    }

    async fn read(&self, plugin_id: &str, file: &str, what: &str) -> Result<String, PluginError> {
        let path = self.plugin_dir(plugin_id)?.join(file);
        match tokio::fs::read_to_string(&path).await {
            Ok(text) => Ok(text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(PluginError::NotFound {
                plugin_id: plugin_id.to_string(),
                what: what.to_string(),
            }),
            Err(source) => Err(PluginError::Io { path, source }),
        }
    }
}

#[async_trait]
impl PluginSource for DirPluginSource {
    async fn list(&self) -> Vec<PluginSummary> {
        let mut out = Vec::new();
        let mut dir = match tokio::fs::read_dir(&self.root).await {
            Ok(dir) => dir,
            Err(e) => {
                warn!("cannot list plugins in {}: {e}", self.root.display());
                return out;
            }
        };

        while let Ok(Some(entry)) = dir.next_entry().await {
            let Ok(id) = entry.file_name().into_string() else {
                continue;
            };
            if !entry.path().is_dir() {
                continue;
            }
            match self.manifest(&id).await {
                Ok(m) => out.push(PluginSummary {
                    id,
                    name: m.name,
                    version: m.version,
                    description: m.description,
                    icon: m.icon,
                }),
                Err(e) => warn!("skipping plugin {id}: {e}"),
            }
        }
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    async fn manifest(&self, plugin_id: &str) -> Result<PluginManifest, PluginError> {
        let text = self.read(plugin_id, MANIFEST_FILE, "manifest").await?;
        serde_json::from_str(&text).map_err(|source| PluginError::Manifest {
            plugin_id: plugin_id.to_string(),
            source,
        })
    }

    async fn workflow_document(&self, plugin_id: &str) -> Result<String, PluginError> {
        self.read(plugin_id, WORKFLOW_FILE, "workflow").await
    }

    async fn tool_source(&self, plugin_id: &str) -> Result<String, PluginError> {
        let main = match self.manifest(plugin_id).await {
            Ok(m) => m.main_server,
            Err(PluginError::NotFound { .. }) => default_main_server(),
            Err(e) => return Err(e),
        };
        validate_relative(plugin_id, &main)?;
        self.read(plugin_id, &main, "tool source").await
    }
}

fn validate_id(plugin_id: &str) -> Result<(), PluginError> {
    let bad = plugin_id.is_empty()
        || plugin_id == "."
        || plugin_id.contains("..")
        || plugin_id.contains(['/', '\\']);
    if bad {
        Err(PluginError::InvalidId(plugin_id.to_string()))
    } else {
        Ok(())
    }
}

fn validate_relative(plugin_id: &str, file: &str) -> Result<(), PluginError> {
    let path = Path::new(file);
    let escapes = path.is_absolute()
        || path
            .components()
            .any(|c| matches!(c, std::path::Component::ParentDir));
    if escapes {
        Err(PluginError::InvalidId(format!("{plugin_id}/{file}")))
    } else {
        Ok(())
    }
}
