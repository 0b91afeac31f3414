//! Periodic liveness sweeps.
//!
//! Each tick probes every registered session. A session that has not
//! answered the previous tick's probe by the time of the next tick is
//! closed and evicted, so one full missed interval is the grace period:
//!
//! ```text
//! ALIVE --tick--> SUSPECT --pong--> ALIVE
//!                 SUSPECT --tick--> EVICTED
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use super::PeerBroadcaster;
use crate::domain::SessionRegistry;

/// Handle to the background sweep task.
///
/// The only long-lived background task in the relay. [`LivenessMonitor::stop`]
/// must complete before sessions are torn down at shutdown.
#[derive(Debug)]
pub struct LivenessMonitor {
    handle: JoinHandle<()>,
}

impl LivenessMonitor {
    /// Spawns the sweep loop. The first sweep runs one `interval` after
    /// start.
    #[must_use]
    pub fn start(
        registry: Arc<SessionRegistry>,
        broadcaster: PeerBroadcaster,
        interval: Duration,
    ) -> Self {
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                sweep_once(&registry, &broadcaster).await;
            }
        });
        tracing::info!(interval_secs = interval.as_secs_f64(), "liveness monitor started");
        Self { handle }
    }

    /// Cancels the sweep loop and waits until the task has finished, so no
    /// sweep can run after this returns.
    pub async fn stop(self) {
        self.handle.abort();
        match self.handle.await {
            Err(e) if e.is_panic() => {
                tracing::error!(error = %e, "liveness monitor panicked");
            }
            _ => tracing::info!("liveness monitor stopped"),
        }
    }
}

/// Runs one sweep and refreshes every peer list afterwards, whether or not
/// anything was evicted. Returns the evicted identities.
pub async fn sweep_once(registry: &SessionRegistry, broadcaster: &PeerBroadcaster) -> Vec<String> {
    let evicted = registry.sweep().await;
    for identity in &evicted {
        tracing::info!(%identity, "evicted unresponsive client");
    }
    let remaining = registry.len().await;
    tracing::debug!(evicted = evicted.len(), remaining, "liveness sweep complete");
    broadcaster.broadcast_peer_list().await;
    evicted
}
