//! Health HTTP adapter module.
//!
//! Reports pipeline and stream status for probes and operators.

pub mod dto;
pub mod handlers;
pub mod routes;

pub use dto::{HealthResponse, HealthStatus};
pub use handlers::HealthAppState;
pub use routes::health_routes;
