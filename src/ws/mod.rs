//! WebSocket layer: connection handling, envelopes, and message routing.
//!
//! The endpoint at `/ws` carries the negotiation protocol. Each connection
//! runs its own read/write loop; all shared state lives in the
//! [`crate::domain::SessionRegistry`].

pub mod connection;
pub mod handler;
pub mod messages;
pub mod router;

pub use messages::{Envelope, MessageType};
pub use router::{MessageRouter, PeerContext};
