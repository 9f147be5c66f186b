use std::sync::Arc;

use anyhow::{Context, Result};
use geonl_lib::AggregatorConfig;
use geonl_mcp::{run_server_loop, McpServerState, StdioTransport};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Logging MUST go to stderr; stdout carries the protocol.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("geonl_mcp=info".parse()?)
                .add_directive("geonl_lib=info".parse()?),
        )
        .init();

    let config = AggregatorConfig::from_env().context("invalid GEONL_* configuration")?;
    let state = McpServerState::new(config).context("failed to initialize MCP server state")?;
    info!("Serving geonl tools over stdio");

    run_server_loop(StdioTransport::stdio(), Arc::new(state)).await
}
