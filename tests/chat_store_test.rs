use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use plugin_platform::chat::{
    ChatDraft, ChatMessage, ChatRole, ChatStorage, PluginChat, PluginConversationStore, SqliteChatStorage,
    StoreError, chat_key,
};

/// Sqlite storage that counts chat reads.
struct CountingStorage {
    inner: SqliteChatStorage,
    loads: AtomicUsize,
}

impl CountingStorage {
    fn new() -> Self {
        Self {
            inner: SqliteChatStorage::open_in_memory().unwrap(),
            loads: AtomicUsize::new(0),
        }
    }

    fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChatStorage for CountingStorage {
    async fn load_chat(&self, chat_key: &str) -> Result<Option<PluginChat>, StoreError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        self.inner.load_chat(chat_key).await
    }

    async fn put_chat(&self, chat: &PluginChat) -> Result<(), StoreError> {
        self.inner.put_chat(chat).await
    }

    async fn delete_chat(&self, chat_key: &str) -> Result<bool, StoreError> {
        self.inner.delete_chat(chat_key).await
    }

    async fn chats_for_plugin(&self, plugin_id: &str) -> Result<Vec<PluginChat>, StoreError> {
        self.inner.chats_for_plugin(plugin_id).await
    }

    async fn load_draft(&self, draft_key: &str) -> Result<Option<ChatDraft>, StoreError> {
        self.inner.load_draft(draft_key).await
    }

    async fn put_draft(&self, draft: &ChatDraft) -> Result<(), StoreError> {
        self.inner.put_draft(draft).await
    }

    async fn delete_draft(&self, draft_key: &str) -> Result<bool, StoreError> {
        self.inner.delete_draft(draft_key).await
    }
}

fn store(capacity: usize) -> (Arc<CountingStorage>, PluginConversationStore) {
    let storage = Arc::new(CountingStorage::new());
    let store = PluginConversationStore::new(storage.clone(), capacity);
    (storage, store)
}

#[tokio::test]
async fn eviction_only_drops_the_memory_copy() {
    let (storage, store) = store(50);
    for n in 0..=50 {
        store.ensure_chat("p", &format!("page-{n}")).await.unwrap();
    }

    let cached = store.cached_keys();
    assert_eq!(cached.len(), 50);
    assert!(!cached.contains(&chat_key("p", "page-0")));
    assert_eq!(cached.last(), Some(&chat_key("p", "page-50")));

    let before = storage.loads();
    let chat = store.get_chat("p", "page-0").await.unwrap().unwrap();
    assert_eq!(chat.page_key, "page-0");
    assert_eq!(storage.loads(), before + 1, "evicted chat comes back from storage");
    assert_eq!(store.list_for_plugin("p").await.unwrap().len(), 51);
}

#[tokio::test]
async fn reads_refresh_recency() {
    let (storage, store) = store(3);
    for page in ["a", "b", "c"] {
        store.ensure_chat("p", page).await.unwrap();
    }

    let before = storage.loads();
    store.get_chat("p", "a").await.unwrap().unwrap();
    assert_eq!(storage.loads(), before, "cache hit");

    store.ensure_chat("p", "d").await.unwrap();
    assert_eq!(
        store.cached_keys(),
        vec![chat_key("p", "c"), chat_key("p", "a"), chat_key("p", "d")]
    );
}

#[tokio::test]
async fn get_never_creates() {
    let (_, store) = store(50);
    assert!(store.get_chat("p", "nowhere").await.unwrap().is_none());
    assert!(store.list_for_plugin("p").await.unwrap().is_empty());
}

#[tokio::test]
async fn appended_messages_keep_their_order() {
    let (_, store) = store(50);
    store.append_message("p", "page", ChatMessage::user("hello")).await.unwrap();
    let chat = store
        .append_message("p", "page", ChatMessage::plugin("hi there"))
        .await
        .unwrap();

    let roles: Vec<ChatRole> = chat.messages.iter().map(|m| m.role).collect();
    assert_eq!(roles, vec![ChatRole::User, ChatRole::Plugin]);
    assert!(chat.updated_at >= chat.created_at);

    assert!(store.delete_chat("p", "page").await.unwrap());
    assert!(!store.delete_chat("p", "page").await.unwrap());
    assert!(store.get_chat("p", "page").await.unwrap().is_none());
}

#[tokio::test]
async fn drafts_live_apart_from_messages() {
    let (_, store) = store(50);
    store.save_draft("p", "page", "half a thought").await.unwrap();
    store.append_message("p", "page", ChatMessage::user("sent")).await.unwrap();

    let draft = store.get_draft("p", "page").await.unwrap().unwrap();
    assert_eq!(draft.text, "half a thought");
    assert_eq!(draft.draft_key, chat_key("p", "page"));

    store.delete_chat("p", "page").await.unwrap();
    assert!(store.get_draft("p", "page").await.unwrap().is_some());

    store.save_draft("p", "page", "").await.unwrap();
    assert!(store.get_draft("p", "page").await.unwrap().is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_ensure_creates_one_chat() {
    let (_, store) = store(50);
    let store = Arc::new(store);

    let tasks: Vec<_> = (0..16)
        .map(|_| {
            let store = store.clone();
            tokio::spawn(async move { store.ensure_chat("p", "shared").await.unwrap() })
        })
        .collect();

    let mut created = Vec::new();
    for task in tasks {
        created.push(task.await.unwrap().created_at);
    }
    created.dedup();
    assert_eq!(created.len(), 1);
    assert_eq!(store.list_for_plugin("p").await.unwrap().len(), 1);
}

#[tokio::test]
async fn chats_survive_reopening_the_database() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("chats.sqlite3");

    {
        let store = PluginConversationStore::new(Arc::new(SqliteChatStorage::open(&db).unwrap()), 50);
        store.append_message("p", "page", ChatMessage::user("remember me")).await.unwrap();
        store.save_draft("p", "page", "unsent words").await.unwrap();
    }

    let store = PluginConversationStore::new(Arc::new(SqliteChatStorage::open(&db).unwrap()), 50);
    let chat = store.get_chat("p", "page").await.unwrap().unwrap();
    assert_eq!(chat.messages[0].content, "remember me");
    assert_eq!(store.get_draft("p", "page").await.unwrap().unwrap().text, "unsent words");
}
