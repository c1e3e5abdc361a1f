use std::sync::Arc;

use clap::Args;
use plugin_platform::host::{AdaptiveRetryFetcher, FetchOptions, JsonFileHostStats, RetryPolicy};

use super::CliContext;

#[derive(Args, Debug)]
pub struct FetchArgs {
    /// URL returning JSON
    pub url: String,

    /// Extra request header, `Name: value`
    #[arg(long = "header", short = 'H')]
    pub headers: Vec<String>,
}

pub async fn execute(args: FetchArgs, context: &CliContext) -> anyhow::Result<()> {
    let config = &context.config;
    tokio::fs::create_dir_all(&config.data_dir).await?;
    let stats = JsonFileHostStats::open(config.host_stats_file(), config.fetch.history_retention).await;
    let fetcher = AdaptiveRetryFetcher::new(Arc::new(stats), RetryPolicy::from(&config.fetch));

    let mut options = FetchOptions::default();
    for header in &args.headers {
        let (name, value) = header
            .split_once(':')
            .ok_or_else(|| anyhow::anyhow!("header {header:?} is not of the form `Name: value`"))?;
        options.headers.push((name.trim().to_string(), value.trim().to_string()));
    }

    let data = fetcher.fetch_with_retry(&args.url, &options).await?;
    println!("{}", serde_json::to_string_pretty(&data)?);
    Ok(())
}
