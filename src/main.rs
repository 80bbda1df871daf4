//! socks5-relay - Entry Point
//!
//! Dual-role SOCKS5 proxy engine: server-role TCP CONNECT/UDP ASSOCIATE
//! termination, with optional client-role chaining to an upstream proxy.

use anyhow::{Context, Result};
use std::path::PathBuf;
use tokio::signal;
use tracing::{error, info};

use socks5_relay::{Config, Proxy, VERSION};

/// Application entry point
#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;

    socks5_relay::util::init_tracing(&config.logging)?;

    info!(
        version = VERSION,
        config_path = ?config_path,
        "Starting socks5-relay"
    );

    let proxy = Proxy::new(config.clone());

    if config.metrics.enabled {
        socks5_relay::metrics::init_metrics(&config.metrics)?;
        socks5_relay::metrics::start_api_server(config.metrics.bind_addr, proxy.nat_map());
        info!(bind_addr = %config.metrics.bind_addr, "Metrics and diagnostic API started");
    }

    info!(bind_addr = %config.server.bind_addr, "SOCKS5 relay listening");

    tokio::select! {
        result = proxy.listen_and_serve() => {
            if let Err(e) = result {
                error!(error = %e, "relay error");
                return Err(e);
            }
        }
        _ = shutdown_signal() => {
            info!("shutdown signal received");
        }
    }

    info!("socks5-relay stopped");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
