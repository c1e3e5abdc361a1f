use chrono::Utc;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};
use url::Url;

/// Page key used when no page URL is known.
pub const UNKNOWN_PAGE: &str = "unknown page";

/// Normalizes a tab URL into the page a chat belongs to: query and fragment
/// are dropped. Unparsable input is returned as-is.
pub fn page_key(url: Option<&str>) -> String {
    let raw = match url {
        Some(raw) if !raw.is_empty() => raw,
        _ => return UNKNOWN_PAGE.to_string(),
    };
    match Url::parse(raw) {
        Ok(mut url) => {
            url.set_query(None);
            url.set_fragment(None);
            url.to_string()
        }
        Err(_) => raw.to_string(),
    }
}

/// `pluginId::pageKey`
pub fn chat_key(plugin_id: &str, page_key: &str) -> String {
    format!("{plugin_id}::{page_key}")
}

pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ChatRole {
    User,
    Plugin,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
    /// Milliseconds since the epoch.
    pub timestamp: i64,
}

impl ChatMessage {
    pub fn new(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: now_millis(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(ChatRole::User, content)
    }

    pub fn plugin(content: impl Into<String>) -> Self {
        Self::new(ChatRole::Plugin, content)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginChat {
    pub chat_key: String,
    pub plugin_id: String,
    pub page_key: String,
    pub messages: Vec<ChatMessage>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl PluginChat {
    pub fn empty(plugin_id: &str, page_key: &str) -> Self {
        let now = now_millis();
        Self {
            chat_key: chat_key(plugin_id, page_key),
            plugin_id: plugin_id.to_string(),
            page_key: page_key.to_string(),
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn push(&mut self, message: ChatMessage) {
        self.messages.push(message);
        self.updated_at = now_millis().max(self.updated_at);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatDraft {
    pub draft_key: String,
    pub plugin_id: String,
    pub page_key: String,
    pub text: String,
    pub updated_at: i64,
}

impl ChatDraft {
    pub fn new(plugin_id: &str, page_key: &str, text: impl Into<String>) -> Self {
        Self {
            draft_key: chat_key(plugin_id, page_key),
            plugin_id: plugin_id.to_string(),
            page_key: page_key.to_string(),
            text: text.into(),
            updated_at: now_millis(),
        }
    }
}
