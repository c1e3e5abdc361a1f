use clap::{Parser, Subcommand};

pub mod chat;
pub mod fetch;
pub mod plugins;
pub mod run;
pub mod schema;
pub mod serve;

use chat::ChatArgs;
use fetch::FetchArgs;
use run::RunArgs;
use schema::SchemaArgs;

use plugin_platform::{config::PlatformConfig, logger::Logger};

#[derive(Parser, Debug)]
#[command(
    name = "plugin_platform",
    about = "Runs agent plugin workflows against the host and a sandboxed interpreter",
    version = "0.1.0"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a plugin's workflow
    Run(RunArgs),

    /// List installed plugins
    Plugins,

    /// Fetch JSON from a URL with adaptive retries
    Fetch(FetchArgs),

    /// Inspect and edit plugin chats
    Chat(ChatArgs),

    /// Emit JSON‐Schema for workflows, manifests and requests
    Schema(SchemaArgs),

    /// Answer line-delimited JSON requests on stdin/stdout
    Serve,
}

#[derive(Clone)]
pub struct CliContext {
    pub config: PlatformConfig,
    pub logger: Logger,
}

impl CliContext {
    pub fn new(config: PlatformConfig, logger: Logger) -> Self {
        Self { config, logger }
    }
}

pub async fn execute(context: &CliContext, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Run(args) => run::execute(args, context).await,
        Commands::Plugins => plugins::execute(context).await,
        Commands::Fetch(args) => fetch::execute(args, context).await,
        Commands::Chat(args) => chat::execute(args, context).await,
        Commands::Schema(args) => schema::execute(args, context).await,
        Commands::Serve => serve::execute(context).await,
    }
}

pub fn default_command() -> Commands {
    Commands::Plugins
}
