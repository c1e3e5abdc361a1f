use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::Args;
use tracing::info;

use super::CliContext;
use plugin_platform::host::SnapshotTabs;
use plugin_platform::platform::Platform;

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Plugin id (directory name under the plugins directory)
    pub plugin: String,

    /// Open a tab by downloading this URL before the run
    #[arg(long = "page")]
    pub pages: Vec<String>,

    /// Open a tab from a saved page, given as `URL=FILE`
    #[arg(long = "snapshot")]
    pub snapshots: Vec<String>,

    /// Print the full execution report as JSON
    #[arg(long, default_value_t = false)]
    pub report: bool,
}

pub async fn execute(args: RunArgs, context: &CliContext) -> anyhow::Result<()> {
    let tabs = Arc::new(SnapshotTabs::new());
    let client = reqwest::Client::new();
    for url in &args.pages {
        tabs.capture(&client, url).await?;
        info!(%url, "opened tab");
    }
    for snapshot in &args.snapshots {
        let (url, file) = snapshot
            .split_once('=')
            .with_context(|| format!("snapshot {snapshot:?} is not of the form URL=FILE"))?;
        let html = tokio::fs::read_to_string(PathBuf::from(file))
            .await
            .with_context(|| format!("could not read {file}"))?;
        tabs.open(url, html)?;
    }

    let platform = Platform::bootstrap_with_tabs(context.config.clone(), context.logger.clone(), tabs).await?;
    let outcome = platform.engine().run(&args.plugin).await;
    platform.shutdown().await;

    let report = outcome?;
    if args.report {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else if let Some(result) = &report.result {
        println!("{}", serde_json::to_string_pretty(result)?);
    }
    if let Some(failure) = &report.error {
        bail!("step {} failed: {}", failure.step_id, failure.message);
    }
    Ok(())
}
