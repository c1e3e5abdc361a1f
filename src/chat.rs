//! Per-plugin, per-page conversations and unsent drafts.

pub mod cache;
pub mod draft_sync;
pub mod model;
pub mod storage;
pub mod store;

use thiserror::Error;

pub use draft_sync::{DraftStatus, DraftSync, DraftSyncOptions};
pub use model::{ChatDraft, ChatMessage, ChatRole, PluginChat, UNKNOWN_PAGE, chat_key, page_key};
pub use storage::{ChatStorage, SqliteChatStorage};
pub use store::PluginConversationStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("could not (de)serialize chat: {0}")]
    Serialization(#[from] serde_json::Error),
}
