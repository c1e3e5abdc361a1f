use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::chat::ChatRole;

/// Requests a UI sends to the platform, one JSON object each, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(
    tag = "type",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum PlatformRequest {
    GetPlugins,
    RunWorkflow {
        plugin_id: String,
    },
    CreatePluginChat {
        plugin_id: String,
        page_key: Option<String>,
    },
    GetPluginChat {
        plugin_id: String,
        page_key: Option<String>,
    },
    SavePluginChatMessage {
        plugin_id: String,
        page_key: Option<String>,
        #[serde(default = "default_role")]
        role: ChatRole,
        content: String,
    },
    DeletePluginChat {
        plugin_id: String,
        page_key: Option<String>,
    },
    ListPluginChats {
        plugin_id: String,
    },
    SavePluginChatDraft {
        plugin_id: String,
        page_key: Option<String>,
        text: String,
    },
    GetPluginChatDraft {
        plugin_id: String,
        page_key: Option<String>,
    },
}

fn default_role() -> ChatRole {
    ChatRole::User
}

impl PlatformRequest {
    pub fn from_line(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line.trim())
    }
}

/// The `{"error": ...}` body every failed request answers with.
pub fn error_response(message: impl std::fmt::Display) -> Value {
    json!({ "error": message.to_string() })
}
