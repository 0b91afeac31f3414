//! # rendezvous-relay
//!
//! WebSocket rendezvous relay for peer-to-peer session negotiation.
//!
//! Clients connect over a persistent WebSocket, register an identity, and
//! exchange negotiation payloads (offers, answers, connectivity
//! candidates, transport endpoint info) until they can talk directly. The
//! relay never looks inside those payloads; it only tracks who is
//! connected, routes envelopes, and evicts peers that stop answering
//! liveness probes. All state is in memory.
//!
//! ## Architecture
//!
//! ```text
//! Clients (WebSocket /ws, HTTP /health /status)
//!     │
//!     ├── WS connection loop (ws/)
//!     ├── MessageRouter (ws/)
//!     │
//!     ├── PeerBroadcaster, LivenessMonitor (service/)
//!     │
//!     └── SessionRegistry (domain/)
//! ```

pub mod api;
pub mod app_state;
pub mod config;
pub mod domain;
pub mod error;
pub mod server;
pub mod service;
pub mod ws;

pub use config::RelayConfig;
pub use error::RelayError;
pub use server::RelayServer;
