//! HTTP handlers for the health endpoint.

use std::sync::Arc;

use axum::extract::{Json, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use tokio::sync::watch;

use crate::adapters::websocket::BroadcastHub;
use crate::application::{CoordinatorHandle, PipelineStats, StreamStatus};
use crate::domain::foundation::Timestamp;

use super::dto::{HealthResponse, HealthStatus};

// ════════════════════════════════════════════════════════════════════════════════
// Application State
// ════════════════════════════════════════════════════════════════════════════════

#[derive(Clone)]
pub struct HealthAppState {
    pub hub: Arc<BroadcastHub>,
    pub coordinator: CoordinatorHandle,
    pub stream_status: watch::Receiver<StreamStatus>,
}

// ════════════════════════════════════════════════════════════════════════════════
// Handlers
// ════════════════════════════════════════════════════════════════════════════════

/// GET /health
///
/// 200 while the coordinator runs, even with the stream down; 503 otherwise.
pub async fn get_health(State(state): State<HealthAppState>) -> impl IntoResponse {
    let stream_status = *state.stream_status.borrow();
    let stats = state.coordinator.stats().await;

    let (http_status, status, stats) = match stats {
        Ok(stats) if stream_status.is_connected() => (StatusCode::OK, HealthStatus::Ok, stats),
        Ok(stats) => (StatusCode::OK, HealthStatus::Degraded, stats),
        Err(e) => {
            tracing::warn!(error = %e, "Health check could not reach coordinator");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                HealthStatus::Unavailable,
                PipelineStats::default(),
            )
        }
    };

    let body = HealthResponse {
        status,
        stream_status,
        element_count: stats.element_count,
        enriched_count: stats.enriched_count,
        code_count: stats.code_count,
        schedule_size: stats.schedule_size,
        connection_count: state.hub.connection_count().await,
        dropped_messages: state.hub.dropped_messages(),
        timestamp: Timestamp::now().to_rfc3339(),
    };
    (http_status, Json(body))
}
