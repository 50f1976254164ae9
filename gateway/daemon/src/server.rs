//! Daemon Server Implementation
//!
//! Wires the gateway together and runs the HTTP listener:
//! - Seeds the in-memory ledger from an optional fixture file
//! - Builds the keyed rate limiter, stream engine and dispatcher
//! - Serves the router until the shutdown token fires
//!
//! ```text
//!                     GatewayServer
//!                          │
//!        ┌─────────────────┼──────────────────┐
//!        │                 │                  │
//!   MemoryLedger ──► TopicBus ──► StreamEngine ◄── shutdown token
//!        │                                    │
//!        └────────► AppState ◄── Dispatcher ◄─┘
//!                      │
//!                axum::serve (graceful)
//! ```

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use gateway_core::{
    router, AppState, Dispatcher, GatewayConfig, KeyedRateLimiter, LedgerFixture, MemoryLedger,
    StreamEngine, TopicBus,
};

/// The gateway HTTP server
pub struct GatewayServer {
    config: GatewayConfig,
    store: Arc<MemoryLedger>,
    bus: Arc<TopicBus>,
}

impl GatewayServer {
    /// Create a server with an empty ledger
    pub fn new(config: GatewayConfig) -> Self {
        let bus = Arc::new(TopicBus::new());
        let store = Arc::new(MemoryLedger::with_bus(Arc::clone(&bus)));
        Self { config, store, bus }
    }

    /// Seed the ledger from a JSON fixture file
    pub fn load_fixtures(&self, path: &Path) -> Result<()> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read fixture file: {path:?}"))?;
        let fixture: LedgerFixture = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse fixture file: {path:?}"))?;

        info!(
            path = ?path,
            ledgers = fixture.ledgers.len(),
            accounts = fixture.accounts.len(),
            offers = fixture.offers.len(),
            "Loaded ledger fixtures"
        );
        self.store.load_fixture(fixture);
        Ok(())
    }

    /// Build handler state for the router
    pub fn app_state(&self, shutdown: CancellationToken) -> AppState {
        let engine = StreamEngine::new(
            Arc::<TopicBus>::clone(&self.bus),
            shutdown,
            self.config.stream.clone(),
        );
        let mut dispatcher = Dispatcher::new(engine);

        if self.config.rate_limit.enabled {
            let limiter = KeyedRateLimiter::new(self.config.rate_limit.clone());
            dispatcher = dispatcher.with_rate_limiter(Arc::new(limiter));
        } else {
            info!("Rate limiting disabled");
        }

        AppState::new(Arc::<MemoryLedger>::clone(&self.store), dispatcher)
    }

    /// Serve until `shutdown` is cancelled
    ///
    /// Cancelling also ends every open stream, so graceful shutdown does not
    /// wait on long-lived connections.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let listener = TcpListener::bind(&self.config.listen_addr)
            .await
            .with_context(|| format!("Failed to bind to {}", self.config.listen_addr))?;
        let local_addr = listener.local_addr()?;
        info!(addr = %local_addr, "Listening for connections");

        let app = router(self.app_state(shutdown.clone()));
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .context("Server error")?;

        info!("Server stopped");
        Ok(())
    }
}
