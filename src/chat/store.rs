use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::Mutex as AsyncMutex;
use tracing::debug;

use super::StoreError;
use super::cache::LruCache;
use super::model::{ChatDraft, ChatMessage, PluginChat, chat_key};
use super::storage::ChatStorage;

pub const DEFAULT_LRU_CAPACITY: usize = 50;

/// Conversations keyed by `(plugin, page)`, with a bounded in-memory LRU in
/// front of durable storage. Eviction only ever drops the memory copy.
pub struct PluginConversationStore {
    storage: Arc<dyn ChatStorage>,
    cache: Mutex<LruCache<String, PluginChat>>,
    /// Serializes mutations so a key never gets two chats.
    writes: AsyncMutex<()>,
}

impl PluginConversationStore {
    pub fn new(storage: Arc<dyn ChatStorage>, capacity: usize) -> Self {
        Self {
            storage,
            cache: Mutex::new(LruCache::new(capacity)),
            writes: AsyncMutex::new(()),
        }
    }

    fn cache(&self) -> MutexGuard<'_, LruCache<String, PluginChat>> {
        self.cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn remember(&self, chat: &PluginChat) {
        if let Some((evicted, _)) = self.cache().put(chat.chat_key.clone(), chat.clone()) {
            debug!(chat_key = %evicted, "evicted chat from memory");
        }
    }

    /// Cache first, then storage. Never creates.
    pub async fn get_chat(
        &self,
        plugin_id: &str,
        page_key: &str,
    ) -> Result<Option<PluginChat>, StoreError> {
        let key = chat_key(plugin_id, page_key);
        let cached = self.cache().get(&key).cloned();
        if cached.is_some() {
            return Ok(cached);
        }
        let loaded = self.storage.load_chat(&key).await?;
        if let Some(chat) = &loaded {
            self.remember(chat);
        }
        Ok(loaded)
    }

    /// Returns the chat for `(plugin_id, page_key)`, creating and persisting
    /// an empty one if none exists.
    pub async fn ensure_chat(&self, plugin_id: &str, page_key: &str) -> Result<PluginChat, StoreError> {
        let _write = self.writes.lock().await;
        if let Some(chat) = self.get_chat(plugin_id, page_key).await? {
            return Ok(chat);
        }
        let chat = PluginChat::empty(plugin_id, page_key);
        self.storage.put_chat(&chat).await?;
        self.remember(&chat);
        debug!(chat_key = %chat.chat_key, "created chat");
        Ok(chat)
    }

    pub async fn append_message(
        &self,
        plugin_id: &str,
        page_key: &str,
        message: ChatMessage,
    ) -> Result<PluginChat, StoreError> {
        let _write = self.writes.lock().await;
        let mut chat = match self.get_chat(plugin_id, page_key).await? {
            Some(chat) => chat,
            None => PluginChat::empty(plugin_id, page_key),
        };
        chat.push(message);
        self.storage.put_chat(&chat).await?;
        self.remember(&chat);
        Ok(chat)
    }

    /// Removes the chat from memory and storage. Returns whether it existed.
    pub async fn delete_chat(&self, plugin_id: &str, page_key: &str) -> Result<bool, StoreError> {
        let _write = self.writes.lock().await;
        let key = chat_key(plugin_id, page_key);
        let cached = self.cache().remove(&key).is_some();
        let stored = self.storage.delete_chat(&key).await?;
        Ok(cached || stored)
    }

    /// Every chat of a plugin, straight from storage.
    pub async fn list_for_plugin(&self, plugin_id: &str) -> Result<Vec<PluginChat>, StoreError> {
        self.storage.chats_for_plugin(plugin_id).await
    }

    /// Saving an empty string clears the draft instead.
    pub async fn save_draft(&self, plugin_id: &str, page_key: &str, text: &str) -> Result<(), StoreError> {
        if text.is_empty() {
            self.clear_draft(plugin_id, page_key).await?;
            return Ok(());
        }
        self.storage
            .put_draft(&ChatDraft::new(plugin_id, page_key, text))
            .await
    }

    pub async fn get_draft(&self, plugin_id: &str, page_key: &str) -> Result<Option<ChatDraft>, StoreError> {
        self.storage.load_draft(&chat_key(plugin_id, page_key)).await
    }

    pub async fn clear_draft(&self, plugin_id: &str, page_key: &str) -> Result<bool, StoreError> {
        self.storage.delete_draft(&chat_key(plugin_id, page_key)).await
    }

    /// Cached chat keys from least to most recently touched.
    pub fn cached_keys(&self) -> Vec<String> {
        self.cache().keys_by_recency()
    }
}
