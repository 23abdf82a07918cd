//! HTTP DTOs for the health endpoint.

use serde::Serialize;

use crate::application::StreamStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Stream connected and coordinator running.
    Ok,
    /// Serving from memory while the stream reconnects.
    Degraded,
    /// Coordinator not running.
    Unavailable,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub stream_status: StreamStatus,
    pub element_count: usize,
    pub enriched_count: usize,
    pub code_count: usize,
    pub schedule_size: usize,
    pub connection_count: usize,
    pub dropped_messages: u64,
    pub timestamp: String,
}
