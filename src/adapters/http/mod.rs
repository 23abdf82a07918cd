//! HTTP adapters - the axum router serving `/health` and `/ws`.

pub mod health;

use std::sync::Arc;

use axum::Router;
use tokio::sync::watch;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::adapters::websocket::{websocket_router, BroadcastHub, WebSocketState};
use crate::application::{CoordinatorHandle, StreamStatus};

pub use health::{health_routes, HealthAppState, HealthResponse, HealthStatus};

/// Shared handles every route needs.
#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<BroadcastHub>,
    pub coordinator: CoordinatorHandle,
    pub stream_status: watch::Receiver<StreamStatus>,
}

impl AppState {
    fn health(&self) -> HealthAppState {
        HealthAppState {
            hub: self.hub.clone(),
            coordinator: self.coordinator.clone(),
            stream_status: self.stream_status.clone(),
        }
    }

    fn websocket(&self) -> WebSocketState {
        WebSocketState::new(
            self.hub.clone(),
            self.coordinator.clone(),
            self.stream_status.clone(),
        )
    }
}

/// Builds the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .merge(health_routes(state.health()))
        .merge(websocket_router().with_state(state.websocket()))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::persistence::InMemoryPersistence;
    use crate::adapters::stream::InMemoryStream;
    use crate::application::{Coordinator, CoordinatorConfig};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    fn app(status: StreamStatus) -> (Router, watch::Sender<StreamStatus>, watch::Sender<bool>) {
        let hub = Arc::new(BroadcastHub::default());
        let (status_tx, status_rx) = watch::channel(status);
        let (shutdown, shutdown_rx) = watch::channel(false);
        let (coordinator, _task) = Coordinator::new(
            CoordinatorConfig::default(),
            Arc::new(InMemoryPersistence::new()),
            Arc::new(InMemoryStream::new()),
            hub.clone(),
        )
        .spawn(status_rx.clone(), shutdown_rx);

        let state = AppState {
            hub,
            coordinator,
            stream_status: status_rx,
        };
        (router(state), status_tx, shutdown)
    }

    async fn get_health(router: Router) -> (StatusCode, serde_json::Value) {
        let response = router
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn health_reports_ok_when_stream_connected() {
        let (router, _status, _shutdown) = app(StreamStatus::Connected);

        let (status, body) = get_health(router).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["streamStatus"], "connected");
        assert_eq!(body["elementCount"], 0);
        assert_eq!(body["connectionCount"], 0);
    }

    #[tokio::test]
    async fn health_is_degraded_while_stream_reconnects() {
        let (router, _status, _shutdown) = app(StreamStatus::Disconnected);

        let (status, body) = get_health(router).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "degraded");
    }

    #[tokio::test]
    async fn health_is_unavailable_without_coordinator() {
        let (router, _status, shutdown) = app(StreamStatus::Connected);
        shutdown.send(true).unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let (status, body) = get_health(router).await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["status"], "unavailable");
    }

    #[tokio::test]
    async fn unknown_route_is_not_found() {
        let (router, _status, _shutdown) = app(StreamStatus::Connected);
        let response = router
            .oneshot(Request::builder().uri("/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
