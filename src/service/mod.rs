//! Service layer: peer-list broadcasting and liveness tracking.
//!
//! [`PeerBroadcaster`] fans the current identity list out to sessions;
//! [`LivenessMonitor`] owns the periodic probe/evict sweep.

pub mod liveness;
pub mod peer_broadcast;

pub use liveness::LivenessMonitor;
pub use peer_broadcast::PeerBroadcaster;
