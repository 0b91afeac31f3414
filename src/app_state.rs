//! Shared application state injected into all Axum handlers.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::time::Instant;
use utoipa::ToSchema;

use crate::domain::SessionRegistry;
use crate::service::PeerBroadcaster;
use crate::ws::MessageRouter;

/// Shared application state available to all handlers via Axum's
/// `State` extractor.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Identity → session map.
    pub registry: Arc<SessionRegistry>,
    /// Peer-list fan-out.
    pub broadcaster: PeerBroadcaster,
    /// Envelope dispatcher.
    pub router: MessageRouter,
    /// Flips to `true` when the server begins shutting down.
    pub shutdown: watch::Receiver<bool>,
    /// Process start, for uptime reporting.
    pub started_at: Instant,
    /// Probe period; connections use it to probe themselves until they
    /// register.
    pub heartbeat_interval: Duration,
}

impl AppState {
    /// Wires a fresh registry, broadcaster and router together.
    #[must_use]
    pub fn new(shutdown: watch::Receiver<bool>, heartbeat_interval: Duration) -> Self {
        let registry = Arc::new(SessionRegistry::new());
        let broadcaster = PeerBroadcaster::new(Arc::clone(&registry));
        let router = MessageRouter::new(Arc::clone(&registry), broadcaster.clone());
        Self {
            registry,
            broadcaster,
            router,
            shutdown,
            started_at: Instant::now(),
            heartbeat_interval,
        }
    }

    /// Returns a point-in-time status snapshot.
    pub async fn status(&self) -> RelayStatus {
        let clients = self.registry.snapshot_identities().await;
        RelayStatus {
            connected_clients: clients.len(),
            clients,
            uptime_secs: self.started_at.elapsed().as_secs(),
        }
    }
}

/// Registry summary for external polling.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct RelayStatus {
    /// Number of registered clients.
    pub connected_clients: usize,
    /// Registered identities, sorted.
    pub clients: Vec<String>,
    /// Seconds since the server started.
    pub uptime_secs: u64,
}
