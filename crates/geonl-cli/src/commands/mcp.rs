use std::sync::Arc;

use anyhow::{Context, Result};
use geonl_lib::AggregatorConfig;
use geonl_mcp::{run_server_loop, McpServerState, StdioTransport};

/// Configure tracing to write only to stderr.
pub fn configure_tracing(log_level: Option<&str>) -> Result<()> {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = if let Some(level) = log_level {
        EnvFilter::try_new(level).with_context(|| format!("invalid log level '{}'", level))?
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let subscriber = fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(env_filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    Ok(())
}

/// Entry point for `geonl mcp`.
pub fn run(log_level: Option<&str>) -> Result<()> {
    configure_tracing(log_level)?;

    let config = AggregatorConfig::from_env().context("invalid GEONL_* configuration")?;

    let runtime = tokio::runtime::Runtime::new().context("failed to start async runtime")?;
    runtime.block_on(async {
        let state =
            McpServerState::new(config).context("Failed to initialize MCP server state")?;
        run_server_loop(StdioTransport::stdio(), Arc::new(state)).await
    })
}
