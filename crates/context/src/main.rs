//! ManualQA Context Engine - MCP stdio server
//!
//! Reads JSON-RPC requests line by line from stdin and writes responses to
//! stdout. Logs go to stderr so they never corrupt the protocol stream.

use anyhow::Context;
use manualqa_common::{config::AppConfig, VERSION};
use manualqa_context::{bootstrap, init_tracing, LogTarget, McpServer};
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = AppConfig::load().context("Failed to load configuration")?;
    init_tracing(&config.observability, LogTarget::Stderr)?;

    info!(version = VERSION, "Starting ManualQA context engine (MCP stdio)");

    let ready = bootstrap(&config).await.map_err(|e| {
        error!(error = %e, "Failed to initialise answer engine");
        e
    })?;

    info!(
        facts = ready.stats.facts,
        summaries = ready.stats.summaries,
        triplets = ready.stats.triplets,
        document = ready.manifest.as_ref().map(|m| m.document.as_str()).unwrap_or("unknown"),
        "Serving evidence snapshot"
    );

    let server = McpServer::new(Arc::new(ready.engine), config.mcp.clone());
    server.serve_stdio().await.context("MCP transport failed")?;

    info!("Stdin closed, shutting down");
    Ok(())
}
