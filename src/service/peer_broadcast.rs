//! Peer-list fan-out.

use std::sync::Arc;

use crate::domain::{SessionChannel, SessionRegistry};
use crate::error::RelayError;
use crate::ws::messages::Envelope;

/// Builds `peer-list` envelopes from the registry and delivers them.
///
/// Invoked whenever membership may have changed: after a registration,
/// after a disconnect, and after every liveness sweep.
#[derive(Debug, Clone)]
pub struct PeerBroadcaster {
    registry: Arc<SessionRegistry>,
}

impl PeerBroadcaster {
    /// Creates a broadcaster over `registry`.
    #[must_use]
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self { registry }
    }

    /// Sends the current peer list to a single channel.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::ChannelClosed`] if the channel is gone, or
    /// [`RelayError::Encode`] if the envelope cannot be serialized.
    pub async fn send_peer_list(&self, channel: &SessionChannel) -> Result<(), RelayError> {
        let peers = self.registry.snapshot_identities().await;
        let frame = Envelope::peer_list(&peers)?.encode()?;
        channel.send_text(frame)
    }

    /// Sends the current peer list to every registered session with an
    /// open channel. Closed channels are skipped without eviction.
    ///
    /// Returns the number of sessions the list was queued for.
    pub async fn broadcast_peer_list(&self) -> usize {
        let peers = self.registry.snapshot_identities().await;
        let frame = match Envelope::peer_list(&peers).and_then(|e| e.encode()) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(error = %e, "failed to encode peer list");
                return 0;
            }
        };

        let delivered = self
            .registry
            .fan_out(None, |_| Some(frame.clone()))
            .await;
        tracing::debug!(peers = peers.len(), delivered, "peer list broadcast");
        delivered
    }
}
