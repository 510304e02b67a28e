//! Connection upgrade endpoints.
//!
//! The credential token rides in the query string for all three channel
//! kinds (the upgrade request cannot carry custom headers). Rejections
//! happen before the upgrade: 401 for a missing/invalid token, 400 for a
//! missing or non-numeric room id. No session state exists until the
//! upgrade callback runs.

use axum::{
    extract::{Query, State, WebSocketUpgrade},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use tracing::debug;

use crate::AppState;
use crate::ws::{SessionChannel, run_session};

#[derive(Debug, Deserialize)]
pub struct RoomParams {
    token: Option<String>,
    room: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChannelParams {
    token: Option<String>,
}

/// `GET /ws/rooms?token=...&room=<id>` — room chat channel.
pub async fn room_handler(
    State(state): State<AppState>,
    Query(params): Query<RoomParams>,
    ws: WebSocketUpgrade,
) -> Response {
    let subject = match authenticate(&state, params.token.as_deref()).await {
        Ok(subject) => subject,
        Err(rejection) => return rejection,
    };
    let Some(room_id) = params.room.as_deref().and_then(|r| r.parse::<i64>().ok()) else {
        state.metrics.handshake_rejected();
        debug!(room = ?params.room, "rejecting upgrade: missing or non-numeric room id");
        return (StatusCode::BAD_REQUEST, "room must be a numeric id").into_response();
    };

    let channel = SessionChannel::Room { room_id };
    let ctx = state.session_context(&channel);
    ws.on_upgrade(move |socket| run_session(socket, subject, channel, ctx))
}

/// `GET /ws/direct?token=...` — direct-message channel; the channel key is
/// the verified subject itself.
pub async fn direct_handler(
    State(state): State<AppState>,
    Query(params): Query<ChannelParams>,
    ws: WebSocketUpgrade,
) -> Response {
    let subject = match authenticate(&state, params.token.as_deref()).await {
        Ok(subject) => subject,
        Err(rejection) => return rejection,
    };
    let channel = SessionChannel::Direct;
    let ctx = state.session_context(&channel);
    ws.on_upgrade(move |socket| run_session(socket, subject, channel, ctx))
}

/// `GET /ws/notifications?token=...` — notification channel (push-only).
pub async fn notification_handler(
    State(state): State<AppState>,
    Query(params): Query<ChannelParams>,
    ws: WebSocketUpgrade,
) -> Response {
    let subject = match authenticate(&state, params.token.as_deref()).await {
        Ok(subject) => subject,
        Err(rejection) => return rejection,
    };
    let channel = SessionChannel::Notify;
    let ctx = state.session_context(&channel);
    ws.on_upgrade(move |socket| run_session(socket, subject, channel, ctx))
}

/// Resolve the query-string credential to a verified subject, or produce
/// the 401 rejection.
async fn authenticate(state: &AppState, token: Option<&str>) -> Result<String, Response> {
    let Some(token) = token else {
        state.metrics.handshake_rejected();
        debug!("rejecting upgrade: missing credential token");
        return Err((StatusCode::UNAUTHORIZED, "missing credential token").into_response());
    };
    match state.verifier.verify(token).await {
        Ok(subject) => Ok(subject),
        Err(e) => {
            state.metrics.handshake_rejected();
            debug!(error = %e, "rejecting upgrade: invalid credential token");
            Err((StatusCode::UNAUTHORIZED, "invalid credential token").into_response())
        }
    }
}
