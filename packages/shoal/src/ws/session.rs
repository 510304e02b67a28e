//! Per-connection session: registration, heartbeat-raced read loop, and
//! teardown.
//!
//! One task owns one session and is the only writer to its state. The loop
//! races the next inbound frame against the heartbeat deadline and the
//! connection's outbound queue; whichever completes first is acted on. The
//! loop is generic over the transport so tests can drive it with
//! channel-backed fakes instead of sockets.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message};
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::metrics::ServerMetrics;

use super::broadcast::RoomRouter;
use super::direct::DirectRouter;
use super::protocol::{DirectFrame, HEARTBEAT_SENTINEL, RoomFrame, ServerMessage};
use super::registry::{ChannelKey, ConnectionHandle, ConnectionRegistry};

/// WebSocket normal-closure code. Used for every server-initiated close; a
/// heartbeat expiry is indistinguishable in intent from a normal goodbye.
const NORMAL_CLOSURE: u16 = 1000;

/// Which routing component a session's deliverable frames feed.
#[derive(Debug, Clone, Copy)]
pub enum SessionChannel {
    Room { room_id: i64 },
    Direct,
    Notify,
}

impl SessionChannel {
    fn key(&self, subject: &str) -> ChannelKey {
        match self {
            SessionChannel::Room { room_id } => ChannelKey::Room(*room_id),
            SessionChannel::Direct => ChannelKey::Direct(subject.to_string()),
            SessionChannel::Notify => ChannelKey::Notify(subject.to_string()),
        }
    }
}

/// Everything a session task needs beyond its socket.
#[derive(Clone)]
pub struct SessionContext {
    pub registry: Arc<ConnectionRegistry>,
    pub rooms: Arc<RoomRouter>,
    pub direct: Arc<DirectRouter>,
    pub metrics: Arc<ServerMetrics>,
    /// Inactivity window; the deadline resets on any inbound frame.
    pub heartbeat: Duration,
    /// Outbound queue depth per connection.
    pub send_buffer: usize,
}

/// Why the read loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CloseReason {
    PeerClosed,
    HeartbeatExpired,
    TransportError,
}

/// Run one session to completion. The caller has already authenticated the
/// subject and resolved the channel; everything from registration to the
/// close frame happens here.
pub async fn run_session<S>(socket: S, subject: String, channel: SessionChannel, ctx: SessionContext)
where
    S: Stream<Item = Result<Message, axum::Error>> + Sink<Message> + Send + Unpin,
{
    let key = channel.key(&subject);
    let (handle, mut outbound) = ConnectionHandle::new(ctx.send_buffer);
    let conn_id = handle.id;
    ctx.registry.register(key.clone(), Arc::clone(&handle));
    ctx.metrics.connection_opened();
    info!(user_id = %subject, channel = %key, conn_id = %conn_id, "session open");

    if let SessionChannel::Room { room_id } = channel {
        ctx.rooms.notice(room_id, format!("{subject} joined"));
    }

    let (mut sink, mut stream) = socket.split();
    let mut deadline = Instant::now() + ctx.heartbeat;

    let reason = loop {
        tokio::select! {
            queued = outbound.recv() => {
                match queued {
                    Some(json) => {
                        ctx.metrics.message_sent();
                        if sink.send(Message::Text(json.as_str().into())).await.is_err() {
                            break CloseReason::TransportError;
                        }
                    }
                    None => break CloseReason::TransportError,
                }
            }
            frame = stream.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        deadline = Instant::now() + ctx.heartbeat;
                        ctx.metrics.message_received();
                        if text.as_str() == HEARTBEAT_SENTINEL {
                            let pong = serde_json::to_string(&ServerMessage::Pong)
                                .unwrap_or_else(|_| r#"{"type":"pong"}"#.to_string());
                            if sink.send(Message::Text(pong.into())).await.is_err() {
                                break CloseReason::TransportError;
                            }
                        } else {
                            handle_frame(&channel, &subject, text.as_str(), &ctx);
                        }
                    }
                    Some(Ok(Message::Close(_))) => break CloseReason::PeerClosed,
                    Some(Ok(_)) => {
                        // Transport-level ping/pong/binary count as activity.
                        deadline = Instant::now() + ctx.heartbeat;
                    }
                    Some(Err(e)) => {
                        debug!(conn_id = %conn_id, error = %e, "websocket read error");
                        ctx.metrics.websocket_error();
                        break CloseReason::TransportError;
                    }
                    None => break CloseReason::PeerClosed,
                }
            }
            _ = tokio::time::sleep_until(deadline) => {
                break CloseReason::HeartbeatExpired;
            }
        }
    };

    // Teardown order matters: the registry entry goes first so no fan-out
    // can pick this handle up again, then the room hears about the exit,
    // then the transport closes.
    ctx.registry.unregister(&key, conn_id);
    if let SessionChannel::Room { room_id } = channel {
        ctx.rooms.notice(room_id, format!("{subject} left"));
    }
    if reason != CloseReason::TransportError {
        let _ = sink
            .send(Message::Close(Some(CloseFrame {
                code: NORMAL_CLOSURE,
                reason: "".into(),
            })))
            .await;
    }
    ctx.metrics.connection_closed();
    info!(
        user_id = %subject,
        channel = %key,
        conn_id = %conn_id,
        reason = ?reason,
        "session closed"
    );
}

/// Hand a deliverable payload to the router for this channel kind. The
/// notification channel is push-only; anything inbound on it is dropped.
fn handle_frame(channel: &SessionChannel, subject: &str, raw: &str, ctx: &SessionContext) {
    match channel {
        SessionChannel::Room { room_id } => match serde_json::from_str::<RoomFrame>(raw) {
            Ok(frame) => {
                let _ = ctx.rooms.broadcast_chat(*room_id, subject, frame);
            }
            Err(e) => debug!(user_id = %subject, error = %e, "dropping malformed room frame"),
        },
        SessionChannel::Direct => match serde_json::from_str::<DirectFrame>(raw) {
            Ok(frame) => {
                let _persist = ctx.direct.route(subject, frame);
            }
            Err(e) => debug!(user_id = %subject, error = %e, "dropping malformed direct frame"),
        },
        SessionChannel::Notify => {
            debug!(user_id = %subject, "ignoring inbound frame on notification channel");
        }
    }
}
