//! WebSocket connection state machine.
//!
//! Runs the read/write loop for a single connection: inbound frames go to
//! the [`MessageRouter`](super::router::MessageRouter), queued outbound
//! frames go to the socket, and a server shutdown closes the connection.
//!
//! Until a connection registers, the liveness monitor does not know about
//! it, so the loop probes it itself on the same interval: a connection that
//! leaves one probe unanswered by the next tick is closed. Once registered,
//! probing is left to the monitor.

use axum::body::Bytes;
use axum::extract::ws::{CloseFrame, Message, Utf8Bytes, WebSocket, close_code};
use futures_util::{SinkExt, StreamExt};
use tokio::time::{Instant, MissedTickBehavior};

use super::router::PeerContext;
use crate::app_state::AppState;
use crate::domain::{ConnectionId, Outbound, SessionChannel};

/// Runs the read/write loop for a single WebSocket connection.
///
/// On exit the connection's registration (if it is still the current one
/// for its identity) is removed and the remaining peers get a fresh list.
pub async fn run_connection(socket: WebSocket, state: AppState) {
    let conn_id = ConnectionId::new();
    let (channel, mut outbound_rx) = SessionChannel::new(conn_id);
    let mut peer = PeerContext::new(channel);
    let mut shutdown = state.shutdown.clone();
    let (mut ws_tx, mut ws_rx) = socket.split();
    let interval = state.heartbeat_interval;
    let mut probe = tokio::time::interval_at(Instant::now() + interval, interval);
    probe.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut awaiting_pong = false;

    tracing::debug!(%conn_id, "ws connection opened");

    loop {
        tokio::select! {
            // Incoming frame from client
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        state.router.route(&mut peer, text).await;
                    }
                    Some(Ok(Message::Binary(bytes))) => {
                        let text = Utf8Bytes::from(String::from_utf8_lossy(&bytes).into_owned());
                        state.router.route(&mut peer, text).await;
                    }
                    Some(Ok(Message::Pong(_))) => {
                        awaiting_pong = false;
                        if let Some(identity) = peer.identity() {
                            state.registry.mark_alive(identity, conn_id).await;
                        }
                    }
                    Some(Ok(Message::Ping(_))) => {}
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        tracing::warn!(%conn_id, error = %e, "ws transport error");
                        break;
                    }
                }
            }
            // Frame queued by the router, broadcaster, or liveness monitor
            frame = outbound_rx.recv() => {
                let message = match frame {
                    Some(Outbound::Text(text)) => Message::Text(text),
                    Some(Outbound::Ping) => Message::Ping(Bytes::new()),
                    Some(Outbound::Close) | None => {
                        let _ = ws_tx.send(close_message(close_code::NORMAL, "")).await;
                        break;
                    }
                };
                if let Err(e) = ws_tx.send(message).await {
                    tracing::warn!(%conn_id, error = %e, "ws send failed");
                    break;
                }
            }
            // Probe for connections the liveness monitor does not cover
            _ = probe.tick() => {
                if peer.identity().is_some() {
                    awaiting_pong = false;
                } else if awaiting_pong {
                    tracing::info!(%conn_id, "unregistered connection unresponsive; closing");
                    let _ = ws_tx.send(close_message(close_code::NORMAL, "")).await;
                    break;
                } else {
                    awaiting_pong = true;
                    if let Err(e) = ws_tx.send(Message::Ping(Bytes::new())).await {
                        tracing::warn!(%conn_id, error = %e, "ws send failed");
                        break;
                    }
                }
            }
            // Server shutting down
            _ = shutdown.changed() => {
                let _ = ws_tx
                    .send(close_message(close_code::AWAY, "server shutting down"))
                    .await;
                break;
            }
        }
    }

    peer.channel().close();
    if let Some(identity) = peer.identity()
        && state.registry.unregister_connection(identity, conn_id).await
    {
        tracing::info!(%identity, %conn_id, "client disconnected");
        state.broadcaster.broadcast_peer_list().await;
    }

    tracing::debug!(%conn_id, "ws connection closed");
}

fn close_message(code: u16, reason: &'static str) -> Message {
    Message::Close(Some(CloseFrame {
        code,
        reason: Utf8Bytes::from_static(reason),
    }))
}
