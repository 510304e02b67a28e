//! Notification endpoints: unread listing, dispatch, and read receipts.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;

use crate::AppState;
use crate::auth::AuthUser;
use crate::models::NotificationRecord;
use crate::notify::DispatchError;
use crate::repository::StoreError;

/// API failure mapped onto a status code.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Store(StoreError::NotFound) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (
            status,
            Json(serde_json::json!({ "error": self.to_string() })),
        )
            .into_response()
    }
}

/// `GET /api/notifications` — the caller's unread notifications.
pub async fn list_unread(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<Vec<NotificationRecord>>, ApiError> {
    Ok(Json(state.notifications.list_unread(&user.user_id).await?))
}

#[derive(Debug, Deserialize)]
pub struct DispatchRequest {
    pub user_id: String,
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub url: Option<String>,
}

/// `POST /api/notifications` — dispatch a notification to a user.
pub async fn dispatch(
    State(state): State<AppState>,
    _user: AuthUser,
    Json(request): Json<DispatchRequest>,
) -> Result<(StatusCode, Json<NotificationRecord>), ApiError> {
    let record = state
        .dispatcher
        .dispatch(
            &request.user_id,
            &request.title,
            &request.body,
            request.url.as_deref(),
        )
        .await?;
    Ok((StatusCode::CREATED, Json(record)))
}

/// `POST /api/notifications/{id}/read`
pub async fn mark_read(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    state.notifications.mark_read(id, &user.user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /api/notifications/read-all`
pub async fn mark_all_read(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<StatusCode, ApiError> {
    state.notifications.mark_all_read(&user.user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
