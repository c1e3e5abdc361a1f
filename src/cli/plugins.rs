use plugin_platform::plugins::{DirPluginSource, PluginSource};

use super::CliContext;

pub async fn execute(context: &CliContext) -> anyhow::Result<()> {
    let source = DirPluginSource::new(context.config.plugins_dir.clone());
    let plugins = source.list().await;
    if plugins.is_empty() {
        println!("No plugins found in {}", context.config.plugins_dir.display());
        return Ok(());
    }
    for plugin in plugins {
        println!("{:<24} {:<10} {}", plugin.id, plugin.version, plugin.name);
        if !plugin.description.is_empty() {
            println!("{:<24} {}", "", plugin.description);
        }
    }
    Ok(())
}
