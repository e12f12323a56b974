//! # pulse-gateway
//!
//! Gateway server binary — loads settings, wires the session registry
//! and built-in handlers, and serves until interrupted.

#![deny(unsafe_code)]

mod settings;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use pulse_server::server::PulseServer;
use pulse_server::ws::handlers;
use pulse_server::ws::registry::Registry;

/// Pulse realtime gateway.
#[derive(Parser, Debug)]
#[command(name = "pulse-gateway", about = "Pulse realtime session gateway")]
struct Cli {
    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Pong wait in milliseconds (overrides settings).
    #[arg(long)]
    pong_wait_ms: Option<u64>,

    /// Maximum concurrent sessions (overrides settings).
    #[arg(long)]
    max_connections: Option<usize>,

    /// Path to the settings file (default `~/.pulse/gateway.json`).
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let settings_path = args.config.unwrap_or_else(settings::settings_path);
    let mut config =
        settings::load_config(&settings_path).context("Failed to load settings")?;
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(pong_wait_ms) = args.pong_wait_ms {
        config.pong_wait_ms = pong_wait_ms;
    }
    if let Some(max_connections) = args.max_connections {
        config.max_connections = max_connections;
    }

    let metrics = pulse_server::metrics::install_recorder();

    let registry = Arc::new(Registry::new());
    handlers::register_all(&registry).await;
    info!(handlers = ?registry.handler_types().await, "handlers registered");

    let server = PulseServer::new(config, registry.clone(), metrics)
        .context("Invalid gateway configuration")?;
    let (addr, serve_task) = server.listen().await.context("Failed to bind")?;
    info!(%addr, "pulse gateway up");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("shutdown signal received");

    server
        .shutdown()
        .drain(&registry, vec![serve_task], Some(Duration::from_secs(10)))
        .await;
    info!("goodbye");

    Ok(())
}
