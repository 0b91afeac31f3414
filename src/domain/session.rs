//! Client session: the channel handle plus liveness state for one peer.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use axum::extract::ws::Utf8Bytes;
use tokio::sync::mpsc;

use super::ConnectionId;
use crate::error::RelayError;

/// Frames queued for the connection's writer half.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// A serialized envelope.
    Text(Utf8Bytes),
    /// A liveness probe.
    Ping,
    /// Send a Close frame and end the connection.
    Close,
}

/// Cloneable handle to a connection's outbound queue.
///
/// Sending never blocks: frames go to an unbounded queue drained by the
/// connection task. Once [`SessionChannel::close`] has been called the
/// channel reports itself as not open and refuses further frames.
#[derive(Debug, Clone)]
pub struct SessionChannel {
    conn_id: ConnectionId,
    tx: mpsc::UnboundedSender<Outbound>,
    closing: Arc<AtomicBool>,
}

impl SessionChannel {
    /// Creates a channel for `conn_id` together with the receiving end the
    /// connection task drains.
    #[must_use]
    pub fn new(conn_id: ConnectionId) -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let channel = Self {
            conn_id,
            tx,
            closing: Arc::new(AtomicBool::new(false)),
        };
        (channel, rx)
    }

    /// Returns the connection this channel writes to.
    #[must_use]
    pub const fn conn_id(&self) -> ConnectionId {
        self.conn_id
    }

    /// Returns `true` while the channel accepts frames.
    #[must_use]
    pub fn is_open(&self) -> bool {
        !self.closing.load(Ordering::Acquire) && !self.tx.is_closed()
    }

    /// Queues a text frame.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::ChannelClosed`] if the channel is closing or the
    /// connection task has already gone away.
    pub fn send_text(&self, text: Utf8Bytes) -> Result<(), RelayError> {
        self.push(Outbound::Text(text))
    }

    /// Queues a liveness probe.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::ChannelClosed`] if the channel is not open.
    pub fn send_ping(&self) -> Result<(), RelayError> {
        self.push(Outbound::Ping)
    }

    /// Tears the connection down. Idempotent.
    pub fn close(&self) {
        if !self.closing.swap(true, Ordering::AcqRel) {
            let _ = self.tx.send(Outbound::Close);
        }
    }

    fn push(&self, frame: Outbound) -> Result<(), RelayError> {
        if self.closing.load(Ordering::Acquire) {
            return Err(RelayError::ChannelClosed(self.conn_id));
        }
        self.tx
            .send(frame)
            .map_err(|_| RelayError::ChannelClosed(self.conn_id))
    }
}

/// A registered peer.
///
/// Owned by the [`super::SessionRegistry`]; the `alive` flag is the only
/// field that changes after construction.
#[derive(Debug)]
pub struct ClientSession {
    /// Identity the peer registered under.
    pub identity: String,

    /// Outbound channel. Closing it is the session's only teardown action.
    pub channel: SessionChannel,

    alive: AtomicBool,
}

impl ClientSession {
    /// Creates a session in the alive state.
    #[must_use]
    pub fn new(identity: String, channel: SessionChannel) -> Self {
        Self {
            identity,
            channel,
            alive: AtomicBool::new(true),
        }
    }

    /// Returns the connection backing this session.
    #[must_use]
    pub const fn conn_id(&self) -> ConnectionId {
        self.channel.conn_id()
    }

    /// Returns the current liveness flag.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Records a probe reply.
    pub fn mark_alive(&self) {
        self.alive.store(true, Ordering::Release);
    }

    /// Clears the liveness flag, returning its previous value.
    pub fn take_alive(&self) -> bool {
        self.alive.swap(false, Ordering::AcqRel)
    }
}
