//! Per-connection identifier.
//!
//! Client identities are chosen by the clients themselves and may be reused
//! by a reconnecting peer. [`ConnectionId`] names the underlying WebSocket
//! connection instead, so two sessions claiming the same identity can still
//! be told apart.

use std::fmt;

/// Unique identifier for one accepted WebSocket connection.
///
/// Wraps a UUID v4 allocated when the connection is upgraded. Never sent
/// on the wire protocol; used for registry ownership checks and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(uuid::Uuid);

impl ConnectionId {
    /// Creates a new random `ConnectionId` (UUID v4).
    #[must_use]
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
