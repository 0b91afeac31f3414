//! Identity-keyed session storage.
//!
//! [`SessionRegistry`] is the single serialization domain for peer state:
//! every mutation (registration, disconnect, liveness eviction) and every
//! read that leads to a forward goes through its one [`RwLock`]. Outbound
//! sends only push onto unbounded queues, so holding the lock across them
//! never blocks on the network.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::ws::Utf8Bytes;
use tokio::sync::RwLock;

use super::{ClientSession, ConnectionId};
use crate::error::RelayError;

/// Map from client identity to its live session.
///
/// # Concurrency
///
/// - Forwards and fan-outs hold the read lock for the lookup and the send,
///   so a liveness sweep cannot evict a recipient mid-forward.
/// - Registration, removal and sweeps hold the write lock.
/// - At most one session per identity exists at any instant.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<ClientSession>>>,
}

impl SessionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs `session` under its identity.
    ///
    /// A session already registered under that identity by another
    /// connection is closed and discarded first. Any other identity held by
    /// the same connection is dropped, so a connection owns one identity.
    ///
    /// Returns `false` without touching the map if the session's channel is
    /// already closed.
    pub async fn register(&self, session: ClientSession) -> bool {
        let conn_id = session.conn_id();
        let mut map = self.sessions.write().await;
        if !session.channel.is_open() {
            return false;
        }

        map.retain(|identity, existing| {
            existing.conn_id() != conn_id || *identity == session.identity
        });

        if let Some(existing) = map.get(&session.identity)
            && existing.conn_id() != conn_id
        {
            tracing::info!(
                identity = %session.identity,
                old_conn = %existing.conn_id(),
                new_conn = %conn_id,
                "replacing existing session"
            );
            existing.channel.close();
        }

        map.insert(session.identity.clone(), Arc::new(session));
        true
    }

    /// Removes the entry for `identity` if present.
    pub async fn unregister(&self, identity: &str) {
        self.sessions.write().await.remove(identity);
    }

    /// Removes the entry for `identity` only if it is backed by `conn_id`.
    ///
    /// Returns `true` if an entry was removed. A connection that was
    /// replaced by a newer registration must not evict its successor.
    pub async fn unregister_connection(&self, identity: &str, conn_id: ConnectionId) -> bool {
        let mut map = self.sessions.write().await;
        match map.get(identity) {
            Some(existing) if existing.conn_id() == conn_id => {
                map.remove(identity);
                true
            }
            _ => false,
        }
    }

    /// Returns the session registered under `identity`.
    pub async fn lookup(&self, identity: &str) -> Option<Arc<ClientSession>> {
        self.sessions.read().await.get(identity).cloned()
    }

    /// Returns all registered identities, sorted.
    pub async fn snapshot_identities(&self) -> Vec<String> {
        let map = self.sessions.read().await;
        let mut identities: Vec<String> = map.keys().cloned().collect();
        identities.sort_unstable();
        identities
    }

    /// Sends `text` to the session registered under `identity`.
    ///
    /// Returns `None` when no such session exists, otherwise the outcome of
    /// the send.
    pub async fn forward_to(
        &self,
        identity: &str,
        text: Utf8Bytes,
    ) -> Option<Result<(), RelayError>> {
        let map = self.sessions.read().await;
        map.get(identity)
            .map(|session| session.channel.send_text(text))
    }

    /// Sends a frame built by `build` to every session with an open channel.
    ///
    /// Sessions whose identity equals `exclude`, and sessions for which
    /// `build` returns `None`, are skipped. Send failures are logged and
    /// otherwise ignored. Returns the number of frames queued.
    pub async fn fan_out<F>(&self, exclude: Option<&str>, mut build: F) -> usize
    where
        F: FnMut(&ClientSession) -> Option<Utf8Bytes>,
    {
        let map = self.sessions.read().await;
        let mut delivered = 0usize;
        for session in map.values() {
            if exclude == Some(session.identity.as_str()) || !session.channel.is_open() {
                continue;
            }
            let Some(text) = build(session) else {
                continue;
            };
            match session.channel.send_text(text) {
                Ok(()) => delivered = delivered.saturating_add(1),
                Err(e) => {
                    tracing::warn!(identity = %session.identity, error = %e, "fan-out send failed");
                }
            }
        }
        delivered
    }

    /// Records a liveness reply from `conn_id` for `identity`.
    ///
    /// Ignored unless the identity is currently registered by that
    /// connection.
    pub async fn mark_alive(&self, identity: &str, conn_id: ConnectionId) {
        let map = self.sessions.read().await;
        if let Some(session) = map.get(identity)
            && session.conn_id() == conn_id
        {
            session.mark_alive();
        }
    }

    /// Runs one liveness pass.
    ///
    /// Sessions that have not replied since the previous pass are closed and
    /// removed. Every other session has its flag cleared and, if its channel
    /// is open, receives a probe. Returns the evicted identities.
    pub async fn sweep(&self) -> Vec<String> {
        let mut map = self.sessions.write().await;
        let mut evicted = Vec::new();

        map.retain(|identity, session| {
            if !session.take_alive() {
                session.channel.close();
                evicted.push(identity.clone());
                return false;
            }
            if session.channel.is_open()
                && let Err(e) = session.channel.send_ping()
            {
                tracing::warn!(%identity, error = %e, "liveness probe failed");
            }
            true
        });

        evicted.sort_unstable();
        evicted
    }

    /// Closes every session's channel and empties the registry.
    ///
    /// Returns the number of sessions closed.
    pub async fn close_all(&self) -> usize {
        let mut map = self.sessions.write().await;
        for session in map.values() {
            session.channel.close();
        }
        let closed = map.len();
        map.clear();
        closed
    }

    /// Returns the number of registered sessions.
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Returns `true` if no session is registered.
    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}
