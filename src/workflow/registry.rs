use std::sync::Arc;

use moka::future::Cache;
use tracing::debug;

use super::{Workflow, WorkflowError};
use crate::plugins::PluginSource;

/// Parsed workflows per plugin id, loaded once from the plugin package.
#[derive(Clone)]
pub struct WorkflowRegistry {
    plugins: Arc<dyn PluginSource>,
    cache: Cache<String, Arc<Workflow>>,
}

impl WorkflowRegistry {
    pub fn new(plugins: Arc<dyn PluginSource>) -> Self {
        Self {
            plugins,
            cache: Cache::builder().max_capacity(256).build(),
        }
    }

    pub async fn get(&self, plugin_id: &str) -> Result<Arc<Workflow>, WorkflowError> {
        if let Some(workflow) = self.cache.get(plugin_id).await {
            return Ok(workflow);
        }
        let document = self.plugins.workflow_document(plugin_id).await?;
        let workflow = Arc::new(Workflow::parse(plugin_id, &document)?);
        debug!(plugin_id, steps = workflow.steps.len(), "loaded workflow");
        self.cache.insert(plugin_id.to_string(), workflow.clone()).await;
        Ok(workflow)
    }

    /// Forgets the cached workflow so the next run reads the package again.
    pub async fn invalidate(&self, plugin_id: &str) {
        self.cache.invalidate(plugin_id).await;
    }

    pub fn plugins(&self) -> &Arc<dyn PluginSource> {
        &self.plugins
    }
}
