use std::sync::Arc;

use sandbox_worker::RhaiInterpreter;
use tracing_subscriber::{EnvFilter, fmt};

/// Sandbox worker: speaks the envelope protocol on stdin/stdout.
/// Logs go to stderr only, stdout belongs to the protocol.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_env("SANDBOX_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_env_filter(filter)
        .init();

    sandbox_protocol::runtime::run_stdio(Arc::new(RhaiInterpreter::default())).await?;
    Ok(())
}
