use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::warn;

use super::StoreError;
use super::store::PluginConversationStore;
use crate::config::ChatSettings;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DraftSyncOptions {
    pub debounce: Duration,
    pub min_length: usize,
    pub max_length: usize,
}

impl Default for DraftSyncOptions {
    fn default() -> Self {
        Self::from(&ChatSettings::default())
    }
}

impl From<&ChatSettings> for DraftSyncOptions {
    fn from(settings: &ChatSettings) -> Self {
        Self {
            debounce: settings.draft_debounce(),
            min_length: settings.draft_min_length,
            max_length: settings.draft_max_length,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DraftStatus {
    pub saved: bool,
    pub error: Option<String>,
}

#[derive(Default)]
struct SyncState {
    pending: Option<JoinHandle<()>>,
    last_saved: String,
    chat_ensured: bool,
    status: DraftStatus,
}

/// Debounced draft writer for one `(plugin, page)` input box.
///
/// Text whose length is within `[min_length, max_length]` is saved once the
/// user stops typing for `debounce`; a newer keystroke supersedes the pending
/// save. The first time the text reaches `min_length` the chat itself is
/// created. Clearing the box clears the stored draft right away.
pub struct DraftSync {
    store: Arc<PluginConversationStore>,
    plugin_id: String,
    page_key: String,
    options: DraftSyncOptions,
    state: Arc<Mutex<SyncState>>,
}

fn lock(state: &Mutex<SyncState>) -> MutexGuard<'_, SyncState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl DraftSync {
    pub fn new(
        store: Arc<PluginConversationStore>,
        plugin_id: impl Into<String>,
        page_key: impl Into<String>,
        options: DraftSyncOptions,
    ) -> Self {
        Self {
            store,
            plugin_id: plugin_id.into(),
            page_key: page_key.into(),
            options,
            state: Arc::new(Mutex::new(SyncState::default())),
        }
    }

    /// Loads the stored draft, if any, to prefill the input.
    pub async fn load(&self) -> Result<Option<String>, StoreError> {
        let draft = self.store.get_draft(&self.plugin_id, &self.page_key).await?;
        let mut state = lock(&self.state);
        Ok(draft.map(|draft| {
            state.last_saved = draft.text.clone();
            state.status = DraftStatus { saved: true, error: None };
            draft.text
        }))
    }

    pub async fn set_text(&self, text: &str) -> Result<(), StoreError> {
        self.cancel_pending();
        let len = text.chars().count();

        if len >= self.options.min_length && len <= self.options.max_length {
            let ensure = {
                let mut state = lock(&self.state);
                !std::mem::replace(&mut state.chat_ensured, true)
            };
            if ensure {
                if let Err(e) = self.store.ensure_chat(&self.plugin_id, &self.page_key).await {
                    lock(&self.state).chat_ensured = false;
                    return Err(e);
                }
            }
            self.schedule_save(text.to_string());
        } else if len == 0 {
            self.clear().await?;
        }
        Ok(())
    }

    /// Drops the stored draft, e.g. after the message was sent.
    pub async fn clear(&self) -> Result<(), StoreError> {
        self.cancel_pending();
        self.store.clear_draft(&self.plugin_id, &self.page_key).await?;
        let mut state = lock(&self.state);
        state.last_saved.clear();
        state.status = DraftStatus::default();
        Ok(())
    }

    pub fn status(&self) -> DraftStatus {
        lock(&self.state).status.clone()
    }

    fn cancel_pending(&self) {
        if let Some(pending) = lock(&self.state).pending.take() {
            pending.abort();
        }
    }

    fn schedule_save(&self, text: String) {
        let store = self.store.clone();
        let state = self.state.clone();
        let plugin_id = self.plugin_id.clone();
        let page_key = self.page_key.clone();
        let delay = self.options.debounce;

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if lock(&state).last_saved == text {
                return;
            }
            let result = store.save_draft(&plugin_id, &page_key, &text).await;
            let mut state = lock(&state);
            match result {
                Ok(()) => {
                    state.last_saved = text;
                    state.status = DraftStatus { saved: true, error: None };
                }
                Err(e) => {
                    warn!(%plugin_id, %page_key, "could not save draft: {e}");
                    state.status = DraftStatus {
                        saved: false,
                        error: Some(e.to_string()),
                    };
                }
            }
        });
        lock(&self.state).pending = Some(handle);
    }
}

impl Drop for DraftSync {
    fn drop(&mut self) {
        self.cancel_pending();
    }
}
