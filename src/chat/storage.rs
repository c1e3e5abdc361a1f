use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension, Row, params};
use tokio::sync::Mutex;

use super::StoreError;
use super::model::{ChatDraft, PluginChat};

/// Durable storage behind the conversation store. Chats and drafts live in
/// separate namespaces.
#[async_trait]
pub trait ChatStorage: Send + Sync {
    async fn load_chat(&self, chat_key: &str) -> Result<Option<PluginChat>, StoreError>;
    async fn put_chat(&self, chat: &PluginChat) -> Result<(), StoreError>;
    async fn delete_chat(&self, chat_key: &str) -> Result<bool, StoreError>;
    async fn chats_for_plugin(&self, plugin_id: &str) -> Result<Vec<PluginChat>, StoreError>;

    async fn load_draft(&self, draft_key: &str) -> Result<Option<ChatDraft>, StoreError>;
    async fn put_draft(&self, draft: &ChatDraft) -> Result<(), StoreError>;
    async fn delete_draft(&self, draft_key: &str) -> Result<bool, StoreError>;
}

pub struct SqliteChatStorage {
    db: Arc<Mutex<Connection>>,
}

impl SqliteChatStorage {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(db: Connection) -> Result<Self, StoreError> {
        db.execute(
            "CREATE TABLE IF NOT EXISTS plugin_chats (
                chat_key TEXT PRIMARY KEY,
                plugin_id TEXT NOT NULL,
                page_key TEXT NOT NULL,
                messages TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )",
            [],
        )?;
        db.execute(
            "CREATE INDEX IF NOT EXISTS idx_plugin_chats_plugin ON plugin_chats(plugin_id)",
            [],
        )?;
        db.execute(
            "CREATE TABLE IF NOT EXISTS plugin_chat_drafts (
                draft_key TEXT PRIMARY KEY,
                plugin_id TEXT NOT NULL,
                page_key TEXT NOT NULL,
                text TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            )",
            [],
        )?;

        Ok(Self {
            db: Arc::new(Mutex::new(db)),
        })
    }
}

struct ChatRow {
    chat_key: String,
    plugin_id: String,
    page_key: String,
    messages: String,
    created_at: i64,
    updated_at: i64,
}

impl ChatRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            chat_key: row.get(0)?,
            plugin_id: row.get(1)?,
            page_key: row.get(2)?,
            messages: row.get(3)?,
            created_at: row.get(4)?,
            updated_at: row.get(5)?,
        })
    }

    fn into_chat(self) -> Result<PluginChat, StoreError> {
        Ok(PluginChat {
            chat_key: self.chat_key,
            plugin_id: self.plugin_id,
            page_key: self.page_key,
            messages: serde_json::from_str(&self.messages)?,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

const CHAT_COLUMNS: &str = "chat_key, plugin_id, page_key, messages, created_at, updated_at";

#[async_trait]
impl ChatStorage for SqliteChatStorage {
    async fn load_chat(&self, chat_key: &str) -> Result<Option<PluginChat>, StoreError> {
        let db = self.db.lock().await;
        let row = db
            .query_row(
                &format!("SELECT {CHAT_COLUMNS} FROM plugin_chats WHERE chat_key = ?1"),
                params![chat_key],
                ChatRow::read,
            )
            .optional()?;
        row.map(ChatRow::into_chat).transpose()
    }

    async fn put_chat(&self, chat: &PluginChat) -> Result<(), StoreError> {
        let messages = serde_json::to_string(&chat.messages)?;
        let db = self.db.lock().await;
        db.execute(
            &format!(
                "INSERT INTO plugin_chats ({CHAT_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(chat_key) DO UPDATE SET
                    messages = excluded.messages,
                    updated_at = excluded.updated_at"
            ),
            params![
                chat.chat_key,
                chat.plugin_id,
                chat.page_key,
                messages,
                chat.created_at,
                chat.updated_at
            ],
        )?;
        Ok(())
    }

    async fn delete_chat(&self, chat_key: &str) -> Result<bool, StoreError> {
        let db = self.db.lock().await;
        let n = db.execute("DELETE FROM plugin_chats WHERE chat_key = ?1", params![chat_key])?;
        Ok(n > 0)
    }

    async fn chats_for_plugin(&self, plugin_id: &str) -> Result<Vec<PluginChat>, StoreError> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(&format!(
            "SELECT {CHAT_COLUMNS} FROM plugin_chats WHERE plugin_id = ?1 ORDER BY updated_at DESC"
        ))?;
        let rows = stmt
            .query_map(params![plugin_id], ChatRow::read)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(ChatRow::into_chat).collect()
    }

    async fn load_draft(&self, draft_key: &str) -> Result<Option<ChatDraft>, StoreError> {
        let db = self.db.lock().await;
        let draft = db
            .query_row(
                "SELECT draft_key, plugin_id, page_key, text, updated_at
                 FROM plugin_chat_drafts WHERE draft_key = ?1",
                params![draft_key],
                |row| {
                    Ok(ChatDraft {
                        draft_key: row.get(0)?,
                        plugin_id: row.get(1)?,
                        page_key: row.get(2)?,
                        text: row.get(3)?,
                        updated_at: row.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(draft)
    }

    async fn put_draft(&self, draft: &ChatDraft) -> Result<(), StoreError> {
        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO plugin_chat_drafts (draft_key, plugin_id, page_key, text, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(draft_key) DO UPDATE SET
                text = excluded.text,
                updated_at = excluded.updated_at",
            params![
                draft.draft_key,
                draft.plugin_id,
                draft.page_key,
                draft.text,
                draft.updated_at
            ],
        )?;
        Ok(())
    }

    async fn delete_draft(&self, draft_key: &str) -> Result<bool, StoreError> {
        let db = self.db.lock().await;
        let n = db.execute(
            "DELETE FROM plugin_chat_drafts WHERE draft_key = ?1",
            params![draft_key],
        )?;
        Ok(n > 0)
    }
}
