//! Relay error types.
//!
//! [`RelayError`] is the central error type. The client-facing variants
//! render exactly the text sent back in `error` envelopes; the rest are
//! server-side failures that are logged and never reach a client.

use crate::domain::ConnectionId;

/// Error enum for envelope handling, channel sends, and startup.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// Inbound frame did not parse as an envelope.
    #[error("Invalid JSON format")]
    InvalidEnvelope(#[source] serde_json::Error),

    /// `register` carried neither `data.id` nor `from`.
    #[error("Client ID is required")]
    MissingClientId,

    /// Unicast target is not registered.
    #[error("Peer {0} not found")]
    PeerNotFound(String),

    /// Envelope `type` is not one the relay handles.
    #[error("Unknown message type: {0}")]
    UnknownMessageType(String),

    /// The connection behind a channel is closing or already gone.
    #[error("channel closed for connection {0}")]
    ChannelClosed(ConnectionId),

    /// An outbound envelope could not be serialized.
    #[error("failed to encode envelope: {0}")]
    Encode(String),

    /// Invalid configuration value.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Listener or socket I/O failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl RelayError {
    /// Returns `true` for errors that are reported to the client in an
    /// `error` envelope.
    #[must_use]
    pub const fn is_client_facing(&self) -> bool {
        matches!(
            self,
            Self::InvalidEnvelope(_)
                | Self::MissingClientId
                | Self::PeerNotFound(_)
                | Self::UnknownMessageType(_)
        )
    }
}
