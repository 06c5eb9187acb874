//! # RPC Node
//!
//! Runs one service: consumes its queue, answers with the built-in handlers
//! and, when `RPC_DST_SERVICE_NAME` is set, pings that service once at
//! startup.
//!
//! ```text
//! RUST_LOG=debug RPC_SERVICE_NAME=svc-a rpc-node
//! ```

use anyhow::{Context, Result};
use rpc_node::{NodeConfig, NodeRuntime};
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    // Load configuration
    let config = NodeConfig::from_env().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    info!("===========================================");
    info!("  RPC Node v{}", env!("CARGO_PKG_VERSION"));
    info!("  Service: {}", config.service.name);
    info!("===========================================");

    let runtime = NodeRuntime::new(config);
    runtime.start().await?;
    runtime.self_check().await?;

    info!("Node is running. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c().await?;

    runtime.shutdown().await;
    Ok(())
}
