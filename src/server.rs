//! Relay server lifecycle.
//!
//! [`RelayServer`] is constructed explicitly and owned by the caller; there
//! is no process-global instance. Shutdown runs in a fixed order:
//!
//! 1. stop the liveness monitor (no sweep can race the teardown),
//! 2. close every registered session,
//! 3. tell unregistered connections to close,
//! 4. stop accepting and close the listener.

use std::future::Future;
use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::api;
use crate::app_state::AppState;
use crate::config::RelayConfig;
use crate::error::RelayError;
use crate::service::LivenessMonitor;
use crate::ws::handler::ws_handler;

/// The rendezvous relay: shared state plus its start/stop lifecycle.
#[derive(Debug)]
pub struct RelayServer {
    config: RelayConfig,
    state: AppState,
    shutdown_tx: watch::Sender<bool>,
}

impl RelayServer {
    /// Creates a server with an empty registry.
    #[must_use]
    pub fn new(config: RelayConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let state = AppState::new(shutdown_rx, config.heartbeat_interval);
        Self {
            config,
            state,
            shutdown_tx,
        }
    }

    /// Builds the Axum application: `/ws` plus the status endpoints.
    pub fn router(&self) -> Router {
        Router::new()
            .merge(api::build_router())
            .route("/ws", get(ws_handler))
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
            .with_state(self.state.clone())
    }

    /// Binds the configured listen address.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Io`] if the address cannot be bound.
    pub async fn bind(&self) -> Result<TcpListener, RelayError> {
        Ok(TcpListener::bind(self.config.listen_addr).await?)
    }

    /// Serves connections on `listener` until `signal` resolves, then shuts
    /// down in order.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Io`] if the listener fails irrecoverably.
    pub async fn serve<F>(self, listener: TcpListener, signal: F) -> Result<(), RelayError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let app = self.router();
        let Self {
            config,
            state,
            shutdown_tx,
        } = self;

        let monitor = LivenessMonitor::start(
            Arc::clone(&state.registry),
            state.broadcaster.clone(),
            config.heartbeat_interval,
        );

        if let Ok(addr) = listener.local_addr() {
            tracing::info!(%addr, "relay listening");
        }

        let registry = Arc::clone(&state.registry);
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                signal.await;
                tracing::info!("shutdown requested");
                monitor.stop().await;
                let closed = registry.close_all().await;
                tracing::info!(closed, "sessions closed");
                let _ = shutdown_tx.send(true);
            })
            .await?;

        tracing::info!("relay stopped");
        Ok(())
    }
}
