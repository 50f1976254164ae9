//! Gateway Daemon
//!
//! Standalone HTTP server for the ledger gateway.
//!
//! # Usage
//!
//! ```bash
//! # Start with defaults (127.0.0.1:8000, empty ledger)
//! gateway-daemon
//!
//! # Serve a fixture ledger on all interfaces
//! gateway-daemon --listen 0.0.0.0:8000 --fixtures fixtures/sample.json
//!
//! # With verbose logging
//! RUST_LOG=debug gateway-daemon
//! ```
//!
//! # Environment Variables
//!
//! - `GATEWAY_CONFIG`: Path to a TOML config file
//! - `GATEWAY_LISTEN_ADDR`: Listen address
//! - `GATEWAY_RATE_LIMIT`, `GATEWAY_RATE_LIMIT_PER_HOUR`, `GATEWAY_RATE_LIMIT_BURST`
//! - `GATEWAY_SNAPSHOT_FRAME_LIMIT`: Frames per account stream
//! - `RUST_LOG`: Log level (trace, debug, info, warn, error)
//!
//! # Signals
//!
//! - SIGTERM/SIGINT: Graceful shutdown; open streams are closed first

mod server;

use std::path::PathBuf;

use clap::Parser;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use gateway_core::GatewayConfig;

use crate::server::GatewayServer;

/// Ledger gateway HTTP daemon
#[derive(Debug, Parser)]
#[command(name = "gateway-daemon", version, about)]
struct Cli {
    /// TOML config file; a missing file falls back to defaults
    #[arg(long, env = "GATEWAY_CONFIG")]
    config: Option<PathBuf>,

    /// Listen address, overriding file and environment
    #[arg(long)]
    listen: Option<String>,

    /// JSON ledger fixture to serve
    #[arg(long)]
    fixtures: Option<PathBuf>,

    /// Disable per-client rate limiting
    #[arg(long)]
    no_rate_limit: bool,
}

impl Cli {
    fn load_config(&self) -> anyhow::Result<GatewayConfig> {
        let mut config = GatewayConfig::load_from_path(self.config.as_deref())?;
        if let Some(listen) = &self.listen {
            config.listen_addr.clone_from(listen);
        }
        if self.no_rate_limit {
            config.rate_limit.enabled = false;
        }
        Ok(config)
    }
}

/// Cancel `shutdown` on Ctrl+C or SIGTERM
async fn wait_for_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        }
        () = terminate => {
            info!("Received SIGTERM, shutting down");
        }
        () = shutdown.cancelled() => return,
    }

    shutdown.cancel();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("gateway_daemon=info".parse()?)
                .add_directive("gateway_core=info".parse()?),
        )
        .with_target(true)
        .init();

    let cli = Cli::parse();
    info!("Starting Gateway Daemon");
    info!("PID: {}", std::process::id());

    let config = cli.load_config()?;
    let server = GatewayServer::new(config);
    if let Some(path) = &cli.fixtures {
        server.load_fixtures(path)?;
    }

    let shutdown = CancellationToken::new();
    tokio::spawn(wait_for_signal(shutdown.clone()));

    server.run(shutdown).await?;

    info!("Gateway daemon stopped cleanly");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_overrides() {
        let cli = Cli::parse_from([
            "gateway-daemon",
            "--config",
            "/nonexistent/gateway.toml",
            "--listen",
            "0.0.0.0:9000",
            "--no-rate-limit",
        ]);
        let config = cli.load_config().unwrap();
        assert_eq!(config.listen_addr, "0.0.0.0:9000");
        assert!(!config.rate_limit.enabled);
    }

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::parse_from(["gateway-daemon"]);
        assert!(cli.fixtures.is_none());
        assert!(!cli.no_rate_limit);
    }
}
