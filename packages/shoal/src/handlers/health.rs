//! Health and metrics endpoints (unauthenticated).

use axum::{Json, extract::State};

use crate::AppState;
use crate::metrics::{HealthStatus, MetricsSnapshot};

/// `GET /health`
pub async fn health_handler(State(state): State<AppState>) -> Json<HealthStatus> {
    let channels =
        (state.chat_registry.channel_count() + state.notify_registry.channel_count()) as u64;
    Json(state.metrics.health(channels))
}

/// `GET /metrics`
pub async fn metrics_handler(State(state): State<AppState>) -> Json<MetricsSnapshot> {
    Json(state.metrics.snapshot())
}
