//! versync MCP server entry point.
//!
//! Boots the sync layer from configuration and serves it over stdio.
//! Logging goes to stderr to avoid interfering with the JSON-RPC protocol on stdout.

use anyhow::Result;
use rmcp::service::serve_server;
use rmcp::transport::io::stdio;
use tracing_subscriber::EnvFilter;
use versync_core::AppConfig;

mod catalog;
mod error;
mod handler;
mod platform;
mod tools;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .json()
        .init();

    let config = AppConfig::load()?;
    tracing::info!(backend = ?config.store_backend, "Starting versync server on stdio transport");

    let platform = platform::Platform::open(&config).await?;
    platform.service().store().health_check().await?;

    let handler = handler::VersyncServer::new(platform.clone());
    let server = serve_server(handler, stdio()).await?;
    server.waiting().await?;

    platform.close().await?;
    tracing::info!("versync server stopped");

    Ok(())
}
