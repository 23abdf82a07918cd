//! WebSocket message types for the live element feed.
//!
//! Defines the protocol between server and connected subscribers:
//! - Server → Client: connection status, inventories, cost matches,
//!   raw element records, operation responses, errors, pongs
//! - Client → Server: pings, cost schedule uploads, code matching and
//!   reapply requests

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::application::{
    CodeMatchingReport, CostMatchInfo, ElementInventory, OperationResponse, StreamStatus,
    UploadScheduleCommand,
};
use crate::domain::foundation::{ConnectionId, ErrorCode, Timestamp};

// ============================================
// Server → Client Messages
// ============================================

/// All message types that can be sent from server to client.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Sent on connect and whenever the stream status changes.
    Connection(ConnectionMessage),

    /// Inventory sent to a subscriber right after it connects.
    ElementInfo(ElementInventory),

    /// Periodic inventory snapshot.
    ElementUpdate(ElementInventory),

    CostMatchInfo(CostMatchInfo),

    CostDataResponse(OperationResponse),

    ReapplyCostsResponse(OperationResponse),

    CodeMatchingInfo(CodeMatchingReport),

    /// Stream record forwarded unmodified.
    Element(JsonValue),

    Error(ErrorMessage),

    /// Heartbeat response.
    Pong(PongMessage),
}

impl ServerMessage {
    /// `connection_id` is set when addressed to a single new subscriber.
    pub fn connection(connection_id: Option<ConnectionId>, stream_status: StreamStatus) -> Self {
        ServerMessage::Connection(ConnectionMessage {
            connection_id: connection_id.map(|id| id.to_string()),
            stream_status,
            timestamp: Timestamp::now().to_rfc3339(),
        })
    }

    /// Wraps a raw record. Non-object records are nested under `data` so
    /// the `type` tag always has an object to live in.
    pub fn raw_element(record: &JsonValue) -> Self {
        match record {
            JsonValue::Object(_) => ServerMessage::Element(record.clone()),
            other => ServerMessage::Element(serde_json::json!({ "data": other })),
        }
    }

    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        ServerMessage::Error(ErrorMessage {
            code: code.to_string(),
            message: message.into(),
            timestamp: Timestamp::now().to_rfc3339(),
        })
    }

    pub fn pong() -> Self {
        ServerMessage::Pong(PongMessage {
            timestamp: Timestamp::now().to_rfc3339(),
        })
    }

    /// Wire name of the message, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::Connection(_) => "connection",
            ServerMessage::ElementInfo(_) => "element_info",
            ServerMessage::ElementUpdate(_) => "element_update",
            ServerMessage::CostMatchInfo(_) => "cost_match_info",
            ServerMessage::CostDataResponse(_) => "cost_data_response",
            ServerMessage::ReapplyCostsResponse(_) => "reapply_costs_response",
            ServerMessage::CodeMatchingInfo(_) => "code_matching_info",
            ServerMessage::Element(_) => "element",
            ServerMessage::Error(_) => "error",
            ServerMessage::Pong(_) => "pong",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection_id: Option<String>,
    pub stream_status: StreamStatus,
    pub timestamp: String,
}

/// Error message sent to client.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorMessage {
    pub code: String,
    pub message: String,
    pub timestamp: String,
}

/// Heartbeat response.
#[derive(Debug, Clone, Serialize)]
pub struct PongMessage {
    pub timestamp: String,
}

// ============================================
// Client → Server Messages
// ============================================

/// All message types that can be received from client.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Heartbeat request.
    Ping,

    /// Cost schedule upload.
    CostData(CostDataPayload),

    RequestCodeMatching(CodeMatchingRequest),

    /// Re-run enrichment for every element against the current schedule.
    ReapplyCosts,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CostDataPayload {
    #[serde(default)]
    pub data: JsonValue,
    #[serde(default = "default_replace_existing", alias = "replace_existing")]
    pub replace_existing: bool,
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
}

fn default_replace_existing() -> bool {
    true
}

impl From<CostDataPayload> for UploadScheduleCommand {
    fn from(payload: CostDataPayload) -> Self {
        Self {
            data: payload.data,
            replace_existing: payload.replace_existing,
            project: payload.project,
            filename: payload.filename,
            timestamp: payload.timestamp,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CodeMatchingRequest {
    #[serde(default)]
    pub codes: Vec<String>,
}
