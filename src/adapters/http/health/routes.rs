//! HTTP routes for the health endpoint.

use axum::routing::get;
use axum::Router;

use super::handlers::{get_health, HealthAppState};

pub fn health_routes(state: HealthAppState) -> Router {
    Router::new()
        // GET /health
        .route("/health", get(get_health))
        .with_state(state)
}
