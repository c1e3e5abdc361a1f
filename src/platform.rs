use std::sync::Arc;

use anyhow::{Context, Error};
use sandbox_worker::RhaiInterpreter;
use serde_json::{Value, json};
use tracing::{error, info};

use crate::chat::{
    ChatMessage, DraftSync, DraftSyncOptions, PluginConversationStore, SqliteChatStorage, page_key,
};
use crate::config::PlatformConfig;
use crate::host::{
    AdaptiveRetryFetcher, BrowserTabs, HostCapabilityRouter, JsonFileHostStats, RetryPolicy, SnapshotTabs,
};
use crate::logger::Logger;
use crate::message::{PlatformRequest, error_response};
use crate::plugins::{DirPluginSource, PluginSource};
use crate::sandbox::{SandboxBridge, WorkerLaunch};
use crate::workflow::{WorkflowEngine, WorkflowRegistry};

/// Every component wired together from one [`PlatformConfig`].
pub struct Platform {
    config: PlatformConfig,
    plugins: Arc<dyn PluginSource>,
    tabs: Arc<dyn BrowserTabs>,
    router: Arc<HostCapabilityRouter>,
    bridge: Arc<SandboxBridge>,
    engine: WorkflowEngine,
    chats: Arc<PluginConversationStore>,
}

impl Platform {
    /// Boots the platform with a window of page snapshots as the browser.
    pub async fn bootstrap(config: PlatformConfig, logger: Logger) -> Result<Self, Error> {
        Self::bootstrap_with_tabs(config, logger, Arc::new(SnapshotTabs::new())).await
    }

    pub async fn bootstrap_with_tabs(
        config: PlatformConfig,
        logger: Logger,
        tabs: Arc<dyn BrowserTabs>,
    ) -> Result<Self, Error> {
        tokio::fs::create_dir_all(&config.data_dir)
            .await
            .with_context(|| format!("could not create {}", config.data_dir.display()))?;

        let plugins: Arc<dyn PluginSource> = Arc::new(DirPluginSource::new(config.plugins_dir.clone()));

        let stats = JsonFileHostStats::open(config.host_stats_file(), config.fetch.history_retention).await;
        let fetcher = Arc::new(AdaptiveRetryFetcher::new(
            Arc::new(stats),
            RetryPolicy::from(&config.fetch),
        ));
        let router = Arc::new(HostCapabilityRouter::new(
            tabs.clone(),
            fetcher,
            logger.clone(),
            config.self_url.clone(),
        ));

        let launch = match &config.worker_exe {
            Some(exe) => WorkerLaunch::Process {
                exe: exe.clone(),
                args: vec![],
            },
            None => WorkerLaunch::InProcess(Arc::new(RhaiInterpreter::default())),
        };
        info!(?launch, "sandbox worker launch mode");
        let bridge = SandboxBridge::new(launch, plugins.clone(), router.clone(), logger.clone());

        let engine = WorkflowEngine::new(
            WorkflowRegistry::new(plugins.clone()),
            router.clone(),
            bridge.clone(),
            logger,
        )
        .with_page_prefetch(config.prefetch_page);

        let storage = SqliteChatStorage::open(&config.chat_db())
            .with_context(|| format!("could not open {}", config.chat_db().display()))?;
        let chats = Arc::new(PluginConversationStore::new(Arc::new(storage), config.chat.lru_capacity));

        Ok(Self {
            config,
            plugins,
            tabs,
            router,
            bridge,
            engine,
            chats,
        })
    }

    pub fn config(&self) -> &PlatformConfig {
        &self.config
    }

    pub fn plugins(&self) -> &Arc<dyn PluginSource> {
        &self.plugins
    }

    pub fn tabs(&self) -> &Arc<dyn BrowserTabs> {
        &self.tabs
    }

    pub fn router(&self) -> &Arc<HostCapabilityRouter> {
        &self.router
    }

    pub fn bridge(&self) -> &Arc<SandboxBridge> {
        &self.bridge
    }

    pub fn engine(&self) -> &WorkflowEngine {
        &self.engine
    }

    pub fn chats(&self) -> &Arc<PluginConversationStore> {
        &self.chats
    }

    /// A debounced draft writer for the chat input of `(plugin_id, page_url)`.
    pub fn draft_sync(&self, plugin_id: &str, page_url: Option<&str>) -> DraftSync {
        DraftSync::new(
            self.chats.clone(),
            plugin_id,
            page_key(page_url),
            DraftSyncOptions::from(&self.config.chat),
        )
    }

    /// Answers one UI request; failures become `{"error": ...}`.
    pub async fn handle(&self, request: PlatformRequest) -> Value {
        match self.try_handle(request).await {
            Ok(value) => value,
            Err(e) => {
                error!("request failed: {e:#}");
                error_response(format!("{e:#}"))
            }
        }
    }

    async fn try_handle(&self, request: PlatformRequest) -> Result<Value, Error> {
        let value = match request {
            PlatformRequest::GetPlugins => serde_json::to_value(self.plugins.list().await)?,
            PlatformRequest::RunWorkflow { plugin_id } => {
                let report = self.engine.run(&plugin_id).await?;
                match &report.error {
                    None => serde_json::to_value(&report)?,
                    Some(failure) => json!({
                        "error": format!("step {} failed: {}", failure.step_id, failure.message),
                        "report": report,
                    }),
                }
            }
            PlatformRequest::CreatePluginChat { plugin_id, page_key: page } => {
                let chat = self.chats.ensure_chat(&plugin_id, &page_key(page.as_deref())).await?;
                serde_json::to_value(chat)?
            }
            PlatformRequest::GetPluginChat { plugin_id, page_key: page } => {
                let chat = self.chats.get_chat(&plugin_id, &page_key(page.as_deref())).await?;
                serde_json::to_value(chat)?
            }
            PlatformRequest::SavePluginChatMessage {
                plugin_id,
                page_key: page,
                role,
                content,
            } => {
                let chat = self
                    .chats
                    .append_message(&plugin_id, &page_key(page.as_deref()), ChatMessage::new(role, content))
                    .await?;
                serde_json::to_value(chat)?
            }
            PlatformRequest::DeletePluginChat { plugin_id, page_key: page } => {
                let deleted = self.chats.delete_chat(&plugin_id, &page_key(page.as_deref())).await?;
                json!({ "deleted": deleted })
            }
            PlatformRequest::ListPluginChats { plugin_id } => {
                serde_json::to_value(self.chats.list_for_plugin(&plugin_id).await?)?
            }
            PlatformRequest::SavePluginChatDraft {
                plugin_id,
                page_key: page,
                text,
            } => {
                self.chats
                    .save_draft(&plugin_id, &page_key(page.as_deref()), &text)
                    .await?;
                json!({ "saved": !text.is_empty() })
            }
            PlatformRequest::GetPluginChatDraft { plugin_id, page_key: page } => {
                let draft = self.chats.get_draft(&plugin_id, &page_key(page.as_deref())).await?;
                serde_json::to_value(draft)?
            }
        };
        Ok(value)
    }

    pub async fn shutdown(&self) {
        self.bridge.shutdown().await;
        info!("platform shut down");
    }
}
