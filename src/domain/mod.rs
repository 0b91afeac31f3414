//! Domain layer: connection identity, client sessions, and the registry.
//!
//! This module holds the only shared mutable state in the relay: the
//! [`SessionRegistry`] mapping client identities to live sessions.

pub mod connection_id;
pub mod session;
pub mod session_registry;

pub use connection_id::ConnectionId;
pub use session::{ClientSession, Outbound, SessionChannel};
pub use session_registry::SessionRegistry;
