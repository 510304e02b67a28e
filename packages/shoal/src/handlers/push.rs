//! Push subscription endpoints. The request body is the browser's own
//! `PushSubscription.toJSON()` shape.

use axum::{Json, extract::State, http::StatusCode};
use serde::Deserialize;

use crate::AppState;
use crate::auth::AuthUser;
use crate::models::PushEndpoint;

use super::notifications::ApiError;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionPayload {
    pub endpoint: String,
    /// Epoch milliseconds, as browsers serialize it; usually null.
    #[serde(default)]
    pub expiration_time: Option<i64>,
    pub keys: SubscriptionKeys,
}

#[derive(Debug, Deserialize)]
pub struct SubscriptionKeys {
    pub p256dh: String,
    pub auth: String,
}

/// `POST /api/push/subscriptions` — create or refresh the caller's
/// subscription for this endpoint.
pub async fn subscribe(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<SubscriptionPayload>,
) -> Result<StatusCode, ApiError> {
    let expires_at = payload
        .expiration_time
        .and_then(chrono::DateTime::from_timestamp_millis);
    let endpoint = PushEndpoint {
        user_id: user.user_id,
        endpoint: payload.endpoint,
        p256dh: payload.keys.p256dh,
        auth: payload.keys.auth,
        expires_at,
    };
    state.push_endpoints.upsert(&endpoint).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct UnsubscribePayload {
    pub endpoint: String,
}

/// `DELETE /api/push/subscriptions` — drop the caller's subscription for
/// this endpoint. Idempotent.
pub async fn unsubscribe(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<UnsubscribePayload>,
) -> Result<StatusCode, ApiError> {
    state
        .push_endpoints
        .delete(&user.user_id, &payload.endpoint)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
