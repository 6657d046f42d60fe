//! Slipstream Dedicated Server
//!
//! Serves the demo course. Configuration comes from `SLIPSTREAM_*`
//! environment variables; logging from `RUST_LOG` (default `info`).

use std::sync::Arc;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::prelude::*;

use slipstream::network::{AuthConfig, GameServer, ServerConfig};
use slipstream::world::BrushWorld;
use slipstream::{SNAPSHOT_RATE, TICK_RATE, VERSION};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing("info");

    info!("Slipstream Server v{}", VERSION);
    info!("Tick Rate: {} Hz, Snapshot Rate: {} Hz (defaults)", TICK_RATE, SNAPSHOT_RATE);

    let config = ServerConfig::from_env();
    let auth = AuthConfig::from_env();
    if auth.is_configured() {
        info!("JWT authentication enabled");
    }

    let world = BrushWorld::demo_course();
    info!(map = %config.map, brushes = world.len(), "level loaded");

    let server = GameServer::new(config, Arc::new(world)).with_auth(auth);
    let bound = server.bind().await.context("failed to start server")?;
    let shutdown = bound.shutdown_handle();

    tokio::spawn(async move {
        shutdown_signal().await;
        shutdown.shutdown();
    });

    bound.serve().await.context("server stopped with an error")?;
    info!("Server shutdown complete");
    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(default_level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();
}

/// Resolves on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received terminate signal, shutting down"),
    }
}
