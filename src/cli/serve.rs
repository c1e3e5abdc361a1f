use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{info, warn};

use super::CliContext;
use plugin_platform::message::{PlatformRequest, error_response};
use plugin_platform::platform::Platform;

/// One request per input line, one response per output line, in order.
pub async fn execute(context: &CliContext) -> anyhow::Result<()> {
    let platform = Platform::bootstrap(context.config.clone(), context.logger.clone()).await?;
    info!("serving requests on stdin");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else { break };
        if line.trim().is_empty() {
            continue;
        }

        let response = match PlatformRequest::from_line(&line) {
            Ok(request) => platform.handle(request).await,
            Err(e) => {
                warn!("bad request: {e}");
                error_response(format!("bad request: {e}"))
            }
        };
        let mut out = serde_json::to_string(&response)?;
        out.push('\n');
        stdout.write_all(out.as_bytes()).await?;
        stdout.flush().await?;
    }

    platform.shutdown().await;
    Ok(())
}
