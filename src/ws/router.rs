//! Envelope dispatch.
//!
//! [`MessageRouter::route`] parses one inbound frame and dispatches it by
//! declared type:
//!
//! | type                        | behavior                                   |
//! |-----------------------------|--------------------------------------------|
//! | `register`                  | bind identity, confirm, broadcast peer list |
//! | `offer`                     | unicast; sender is told if target missing  |
//! | `answer`                    | unicast; silently dropped if target missing |
//! | `ice-candidate`, `udp-info` | copy to every other open session           |
//! | `get-peers`                 | peer list to the requester only            |
//! | anything else               | `error` reply                              |

use std::sync::Arc;

use axum::extract::ws::Utf8Bytes;
use chrono::Utc;

use super::messages::{Envelope, MessageType};
use crate::domain::{ClientSession, SessionChannel, SessionRegistry};
use crate::error::RelayError;
use crate::service::PeerBroadcaster;

/// Placeholder used in the missing-peer error when `offer` has no `to`.
const MISSING_TARGET: &str = "<none>";

/// Per-connection routing context.
///
/// Holds the connection's own channel (the reply path before registration)
/// and the identity it registered under, if any.
#[derive(Debug)]
pub struct PeerContext {
    channel: SessionChannel,
    identity: Option<String>,
}

impl PeerContext {
    /// Creates an unregistered context for `channel`.
    #[must_use]
    pub fn new(channel: SessionChannel) -> Self {
        Self {
            channel,
            identity: None,
        }
    }

    /// Returns the connection's channel.
    #[must_use]
    pub fn channel(&self) -> &SessionChannel {
        &self.channel
    }

    /// Returns the identity this connection registered under.
    #[must_use]
    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }
}

/// Stateless dispatcher shared by all connections.
#[derive(Debug, Clone)]
pub struct MessageRouter {
    registry: Arc<SessionRegistry>,
    broadcaster: PeerBroadcaster,
}

impl MessageRouter {
    /// Creates a router over `registry`.
    #[must_use]
    pub fn new(registry: Arc<SessionRegistry>, broadcaster: PeerBroadcaster) -> Self {
        Self {
            registry,
            broadcaster,
        }
    }

    /// Handles one inbound text frame from `peer`.
    ///
    /// Never fails: client mistakes are answered with an `error` envelope on
    /// the originating channel and server-side failures are logged.
    ///
    /// Frames from a connection whose channel is already closed (replaced
    /// by a newer registration, evicted, or shutting down) are dropped.
    pub async fn route(&self, peer: &mut PeerContext, text: Utf8Bytes) {
        let conn_id = peer.channel.conn_id();
        if !peer.channel.is_open() {
            tracing::debug!(%conn_id, "frame from closed connection dropped");
            return;
        }
        let result = match Envelope::parse(text.as_str()) {
            Ok(envelope) => self.dispatch(peer, envelope, text).await,
            Err(e) => {
                tracing::debug!(%conn_id, error = ?e, "malformed envelope");
                Err(e)
            }
        };

        match result {
            Ok(()) => {}
            Err(e) if e.is_client_facing() => reply_error(&peer.channel, &e),
            Err(e) => tracing::warn!(%conn_id, error = %e, "message handling failed"),
        }
    }

    async fn dispatch(
        &self,
        peer: &mut PeerContext,
        envelope: Envelope,
        raw: Utf8Bytes,
    ) -> Result<(), RelayError> {
        let kind = envelope
            .kind()
            .ok_or_else(|| RelayError::UnknownMessageType(envelope.msg_type.clone()))?;

        if kind != MessageType::Register {
            warn_on_sender_mismatch(peer, &envelope);
        }
        tracing::trace!(conn_id = %peer.channel.conn_id(), msg_type = %kind, "dispatch");

        match kind {
            MessageType::Register => self.register(peer, &envelope).await,
            MessageType::Offer => {
                self.offer(&envelope, raw).await;
                Ok(())
            }
            MessageType::Answer => {
                self.answer(&envelope, raw).await;
                Ok(())
            }
            MessageType::IceCandidate | MessageType::UdpInfo => {
                self.relay_to_others(peer, &envelope).await;
                Ok(())
            }
            MessageType::GetPeers => self.broadcaster.send_peer_list(&peer.channel).await,
            MessageType::Registered | MessageType::PeerList | MessageType::Error => {
                Err(RelayError::UnknownMessageType(envelope.msg_type))
            }
        }
    }

    async fn register(
        &self,
        peer: &mut PeerContext,
        envelope: &Envelope,
    ) -> Result<(), RelayError> {
        let identity = envelope
            .data_id()
            .or_else(|| envelope.sender().map(str::to_string))
            .ok_or(RelayError::MissingClientId)?;

        if !self
            .registry
            .register(ClientSession::new(identity.clone(), peer.channel.clone()))
            .await
        {
            tracing::debug!(
                %identity,
                conn_id = %peer.channel.conn_id(),
                "registration from closed connection ignored"
            );
            return Ok(());
        }
        tracing::info!(%identity, conn_id = %peer.channel.conn_id(), "client registered");
        peer.identity = Some(identity.clone());

        let confirmation = Envelope::registered(&identity, Utc::now())?.encode()?;
        if let Err(e) = peer.channel.send_text(confirmation) {
            tracing::warn!(%identity, error = %e, "failed to confirm registration");
        }

        self.broadcaster.broadcast_peer_list().await;
        Ok(())
    }

    async fn offer(&self, envelope: &Envelope, raw: Utf8Bytes) {
        let target = envelope.to.as_deref().unwrap_or(MISSING_TARGET);
        let outcome = match envelope.to.as_deref() {
            Some(to) => self.registry.forward_to(to, raw).await,
            None => None,
        };
        match outcome {
            Some(Ok(())) => {}
            Some(Err(e)) => tracing::warn!(%target, error = %e, "offer forward failed"),
            None => {
                tracing::debug!(%target, "offer target not registered");
                let Some(sender) = envelope.sender() else {
                    return;
                };
                let err = RelayError::PeerNotFound(target.to_string());
                let encoded =
                    Envelope::error(&err.to_string(), Utc::now()).and_then(|e| e.encode());
                let frame = match encoded {
                    Ok(frame) => frame,
                    Err(e) => {
                        tracing::warn!(error = %e, "failed to encode error reply");
                        return;
                    }
                };
                if let Some(Err(e)) = self.registry.forward_to(sender, frame).await {
                    tracing::warn!(%sender, error = %e, "failed to report missing peer");
                }
            }
        }
    }

    async fn answer(&self, envelope: &Envelope, raw: Utf8Bytes) {
        let Some(target) = envelope.to.as_deref() else {
            tracing::debug!("answer without target dropped");
            return;
        };
        match self.registry.forward_to(target, raw).await {
            Some(Ok(())) => {}
            Some(Err(e)) => tracing::warn!(%target, error = %e, "answer forward failed"),
            None => tracing::debug!(%target, "answer target not registered; dropped"),
        }
    }

    async fn relay_to_others(&self, peer: &PeerContext, envelope: &Envelope) {
        let sender = envelope.sender().or(peer.identity());
        let delivered = self
            .registry
            .fan_out(sender, |recipient| {
                envelope
                    .addressed_to(&recipient.identity)
                    .encode()
                    .map_err(|e| {
                        tracing::warn!(identity = %recipient.identity, error = %e, "failed to encode relay copy");
                    })
                    .ok()
            })
            .await;
        tracing::trace!(msg_type = %envelope.msg_type, sender, delivered, "relayed to peers");
    }
}

fn warn_on_sender_mismatch(peer: &PeerContext, envelope: &Envelope) {
    if let (Some(bound), Some(claimed)) = (peer.identity(), envelope.sender())
        && bound != claimed
    {
        tracing::warn!(
            bound,
            claimed,
            msg_type = %envelope.msg_type,
            "envelope sender differs from registered identity"
        );
    }
}

fn reply_error(channel: &SessionChannel, error: &RelayError) {
    let encoded = Envelope::error(&error.to_string(), Utc::now()).and_then(|e| e.encode());
    let frame = match encoded {
        Ok(frame) => frame,
        Err(e) => {
            tracing::warn!(error = %e, "failed to encode error reply");
            return;
        }
    };
    if let Err(e) = channel.send_text(frame) {
        tracing::warn!(conn_id = %channel.conn_id(), error = %e, "failed to send error reply");
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use serde_json::Value;
    use tokio::sync::mpsc;

    use super::*;
    use crate::domain::{ConnectionId, Outbound};

    struct Client {
        ctx: PeerContext,
        rx: mpsc::UnboundedReceiver<Outbound>,
    }

    impl Client {
        fn connect() -> Self {
            let (channel, rx) = SessionChannel::new(ConnectionId::new());
            Self {
                ctx: PeerContext::new(channel),
                rx,
            }
        }

        async fn send(&mut self, router: &MessageRouter, text: &str) {
            router.route(&mut self.ctx, Utf8Bytes::from(text)).await;
        }

        fn frames(&mut self) -> Vec<Value> {
            let mut out = Vec::new();
            while let Ok(frame) = self.rx.try_recv() {
                if let Outbound::Text(text) = frame {
                    let Ok(value) = serde_json::from_str::<Value>(text.as_str()) else {
                        panic!("outbound frame should be JSON");
                    };
                    out.push(value);
                }
            }
            out
        }

        fn raw_texts(&mut self) -> Vec<String> {
            let mut out = Vec::new();
            while let Ok(frame) = self.rx.try_recv() {
                if let Outbound::Text(text) = frame {
                    out.push(text.as_str().to_string());
                }
            }
            out
        }
    }

    fn setup() -> (Arc<SessionRegistry>, MessageRouter) {
        let registry = Arc::new(SessionRegistry::new());
        let broadcaster = PeerBroadcaster::new(Arc::clone(&registry));
        let router = MessageRouter::new(Arc::clone(&registry), broadcaster);
        (registry, router)
    }

    fn str_at<'a>(value: &'a Value, pointer: &str) -> Option<&'a str> {
        value.pointer(pointer).and_then(Value::as_str)
    }

    fn peers(value: &Value) -> Vec<String> {
        value
            .pointer("/data/peers")
            .and_then(Value::as_array)
            .map(|a| {
                a.iter()
                    .filter_map(|p| p.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }

    async fn registered(router: &MessageRouter, id: &str) -> Client {
        let mut client = Client::connect();
        client
            .send(
                router,
                &format!(r#"{{"type":"register","from":"{id}","data":{{"id":"{id}"}}}}"#),
            )
            .await;
        client
    }

    #[tokio::test]
    async fn register_confirms_then_broadcasts() {
        let (registry, router) = setup();
        let mut alice = registered(&router, "A").await;

        let frames = alice.frames();
        assert_eq!(frames.len(), 2);
        let [confirm, list] = frames.as_slice() else {
            panic!("expected confirmation and peer list");
        };
        assert_eq!(str_at(confirm, "/type"), Some("registered"));
        assert_eq!(confirm.pointer("/data/success"), Some(&Value::Bool(true)));
        assert_eq!(str_at(confirm, "/data/id"), Some("A"));
        assert!(str_at(confirm, "/data/timestamp").is_some());
        assert_eq!(str_at(list, "/type"), Some("peer-list"));
        assert_eq!(peers(list), vec!["A"]);
        assert_eq!(alice.ctx.identity(), Some("A"));
        assert_eq!(registry.len().await, 1);

        let mut bob = registered(&router, "B").await;
        let alice_frames = alice.frames();
        let Some(last) = alice_frames.last() else {
            panic!("alice should get an updated list");
        };
        assert_eq!(peers(last), vec!["A", "B"]);
        let bob_frames = bob.frames();
        let Some(last) = bob_frames.last() else {
            panic!("bob should get a list");
        };
        assert_eq!(peers(last), vec!["A", "B"]);
    }

    #[tokio::test]
    async fn register_falls_back_to_from() {
        let (registry, router) = setup();
        let mut client = Client::connect();
        client
            .send(&router, r#"{"type":"register","from":"carol"}"#)
            .await;
        assert!(registry.lookup("carol").await.is_some());
        assert_eq!(client.ctx.identity(), Some("carol"));
    }

    #[tokio::test]
    async fn data_id_takes_precedence_over_from() {
        let (registry, router) = setup();
        let mut client = Client::connect();
        client
            .send(
                &router,
                r#"{"type":"register","from":"outer","data":{"id":"inner"}}"#,
            )
            .await;
        assert!(registry.lookup("inner").await.is_some());
        assert!(registry.lookup("outer").await.is_none());
    }

    #[tokio::test]
    async fn register_without_identity_is_rejected() {
        let (registry, router) = setup();
        let mut client = Client::connect();
        client.send(&router, r#"{"type":"register","data":{}}"#).await;

        let frames = client.frames();
        assert_eq!(frames.len(), 1);
        let Some(reply) = frames.first() else {
            panic!("expected an error reply");
        };
        assert_eq!(str_at(reply, "/type"), Some("error"));
        assert_eq!(str_at(reply, "/data/error"), Some("Client ID is required"));
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn duplicate_registration_closes_first_connection() {
        let (registry, router) = setup();
        let mut first = registered(&router, "A").await;
        let _second = registered(&router, "A").await;

        let mut saw_close = false;
        while let Ok(frame) = first.rx.try_recv() {
            saw_close |= frame == Outbound::Close;
        }
        assert!(saw_close);
        assert!(!first.ctx.channel().is_open());
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn replaced_connection_cannot_reclaim_identity() {
        let (registry, router) = setup();
        let mut first = registered(&router, "A").await;
        let mut second = registered(&router, "A").await;
        let _ = first.raw_texts();
        let _ = second.frames();

        // A frame the first connection read before its close was processed.
        first
            .send(&router, r#"{"type":"register","from":"A","data":{"id":"A"}}"#)
            .await;

        assert!(second.ctx.channel().is_open());
        let Some(current) = registry.lookup("A").await else {
            panic!("A should stay registered");
        };
        assert_eq!(current.conn_id(), second.ctx.channel().conn_id());
        assert!(current.channel.is_open());
        assert!(first.frames().is_empty());
        assert!(second.frames().is_empty());
    }

    #[tokio::test]
    async fn closed_connection_frames_are_dropped() {
        let (registry, router) = setup();
        let mut bob = registered(&router, "B").await;
        let _ = bob.frames();
        let mut stale = Client::connect();
        stale.ctx.channel().close();

        stale
            .send(&router, r#"{"type":"offer","from":"X","to":"B","data":{}}"#)
            .await;
        stale.send(&router, "not json").await;

        assert!(bob.frames().is_empty());
        assert!(stale.frames().is_empty());
        assert_eq!(registry.snapshot_identities().await, vec!["B"]);
    }

    #[tokio::test]
    async fn candidate_payload_is_relayed_unchanged() {
        let (_registry, router) = setup();
        let mut alice = registered(&router, "A").await;
        let mut bob = registered(&router, "B").await;
        let _ = alice.frames();
        let _ = bob.frames();

        alice
            .send(
                &router,
                r#"{"type":"ice-candidate","from":"A","data":{"z":1,"a":2,"n":123456789012345678901234567890}}"#,
            )
            .await;

        assert_eq!(
            bob.raw_texts(),
            vec![
                r#"{"type":"ice-candidate","from":"A","to":"B","data":{"z":1,"a":2,"n":123456789012345678901234567890}}"#
                    .to_string()
            ]
        );
    }

    #[tokio::test]
    async fn offer_is_forwarded_verbatim() {
        let (_registry, router) = setup();
        let mut alice = registered(&router, "A").await;
        let mut bob = registered(&router, "B").await;
        let _ = alice.frames();
        let _ = bob.frames();

        let offer = r#"{"type":"offer","from":"A","to":"B","data":{"sdp":"v=0 ..."}}"#;
        alice.send(&router, offer).await;

        assert_eq!(bob.raw_texts(), vec![offer.to_string()]);
        assert!(alice.frames().is_empty());
    }

    #[tokio::test]
    async fn offer_to_missing_peer_notifies_sender() {
        let (_registry, router) = setup();
        let mut alice = registered(&router, "A").await;
        let _ = alice.frames();

        alice
            .send(&router, r#"{"type":"offer","from":"A","to":"ghost","data":{}}"#)
            .await;

        let frames = alice.frames();
        let [reply] = frames.as_slice() else {
            panic!("expected exactly one error reply");
        };
        assert_eq!(str_at(reply, "/type"), Some("error"));
        assert_eq!(str_at(reply, "/data/error"), Some("Peer ghost not found"));
    }

    #[tokio::test]
    async fn offer_error_goes_to_registered_from_not_origin() {
        let (_registry, router) = setup();
        let mut alice = registered(&router, "A").await;
        let mut stranger = Client::connect();
        let _ = alice.frames();

        stranger
            .send(&router, r#"{"type":"offer","from":"A","to":"ghost"}"#)
            .await;

        assert!(stranger.frames().is_empty());
        assert_eq!(alice.frames().len(), 1);
    }

    #[tokio::test]
    async fn answer_to_missing_peer_is_silent() {
        let (_registry, router) = setup();
        let mut alice = registered(&router, "A").await;
        let _ = alice.frames();

        alice
            .send(&router, r#"{"type":"answer","from":"A","to":"ghost","data":{}}"#)
            .await;

        assert!(alice.frames().is_empty());
    }

    #[tokio::test]
    async fn answer_is_forwarded_verbatim() {
        let (_registry, router) = setup();
        let mut alice = registered(&router, "A").await;
        let mut bob = registered(&router, "B").await;
        let _ = alice.frames();

        let answer = r#"{"type":"answer","from":"B","to":"A","data":{"sdp":"x"}}"#;
        bob.send(&router, answer).await;

        assert_eq!(alice.raw_texts(), vec![answer.to_string()]);
    }

    #[tokio::test]
    async fn candidates_fan_out_to_everyone_but_sender() {
        let (_registry, router) = setup();
        let mut alice = registered(&router, "A").await;
        let mut bob = registered(&router, "B").await;
        let mut carol = registered(&router, "C").await;
        for client in [&mut alice, &mut bob, &mut carol] {
            let _ = client.frames();
        }

        for msg_type in ["ice-candidate", "udp-info"] {
            alice
                .send(
                    &router,
                    &format!(
                        r#"{{"type":"{msg_type}","from":"A","to":"B","data":{{"candidate":"c"}}}}"#
                    ),
                )
                .await;

            assert!(alice.frames().is_empty());
            for (client, id) in [(&mut bob, "B"), (&mut carol, "C")] {
                let frames = client.frames();
                let [copy] = frames.as_slice() else {
                    panic!("{id} should get exactly one copy");
                };
                assert_eq!(str_at(copy, "/type"), Some(msg_type));
                assert_eq!(str_at(copy, "/to"), Some(id));
                assert_eq!(str_at(copy, "/from"), Some("A"));
                assert_eq!(str_at(copy, "/data/candidate"), Some("c"));
            }
        }
    }

    #[tokio::test]
    async fn get_peers_answers_requester_only() {
        let (_registry, router) = setup();
        let mut alice = registered(&router, "A").await;
        let mut bob = registered(&router, "B").await;
        let _ = alice.frames();
        let _ = bob.frames();

        bob.send(&router, r#"{"type":"get-peers","from":"B"}"#).await;

        let frames = bob.frames();
        let [list] = frames.as_slice() else {
            panic!("expected one peer list");
        };
        assert_eq!(str_at(list, "/type"), Some("peer-list"));
        assert_eq!(peers(list), vec!["A", "B"]);
        assert!(alice.frames().is_empty());
    }

    #[tokio::test]
    async fn get_peers_works_before_registration() {
        let (_registry, router) = setup();
        let _alice = registered(&router, "A").await;
        let mut anon = Client::connect();

        anon.send(&router, r#"{"type":"get-peers"}"#).await;

        let frames = anon.frames();
        let [list] = frames.as_slice() else {
            panic!("expected one peer list");
        };
        assert_eq!(peers(list), vec!["A"]);
    }

    #[tokio::test]
    async fn unknown_type_is_named_in_error() {
        let (_registry, router) = setup();
        let mut client = Client::connect();
        client.send(&router, r#"{"type":"dance","from":"A"}"#).await;
        client.send(&router, r#"{"type":"peer-list"}"#).await;

        let frames = client.frames();
        let [first, second] = frames.as_slice() else {
            panic!("expected two error replies");
        };
        assert_eq!(
            str_at(first, "/data/error"),
            Some("Unknown message type: dance")
        );
        assert_eq!(
            str_at(second, "/data/error"),
            Some("Unknown message type: peer-list")
        );
    }

    #[tokio::test]
    async fn malformed_input_yields_one_error_and_no_mutation() {
        let (registry, router) = setup();
        let mut client = Client::connect();
        client.send(&router, "{\"type\": \"register\", ").await;

        let frames = client.frames();
        let [reply] = frames.as_slice() else {
            panic!("expected exactly one error reply");
        };
        assert_eq!(str_at(reply, "/type"), Some("error"));
        assert_eq!(str_at(reply, "/data/error"), Some("Invalid JSON format"));
        assert!(registry.is_empty().await);
        assert!(client.ctx.channel().is_open());
    }
}
