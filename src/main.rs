mod cli;

use clap::Parser;
use cli::{Cli, CliContext, default_command, execute};
use plugin_platform::config::{EnvConfig, PlatformConfig, resolve_root_dir};
use plugin_platform::logger::init_tracing;
use tracing::error;

#[tokio::main(flavor = "multi_thread", worker_threads = 4)]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let root = resolve_root_dir();

    let source = EnvConfig::new(root.join(".env"));
    let config = PlatformConfig::load(root.clone(), &source)?;
    let logger = init_tracing(
        root,
        "logs/platform.log".to_string(),
        "logs/platform-events.json".to_string(),
        config.log_level.clone(),
    )?;

    let context = CliContext::new(config, logger);
    let command = cli.command.unwrap_or_else(default_command);
    if let Err(e) = execute(&context, command).await {
        error!("{e:#}");
        return Err(e);
    }
    Ok(())
}
