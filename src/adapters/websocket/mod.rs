//! WebSocket adapters for the live element feed.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────┐      ┌──────────────────────────────┐
//! │  Coordinator                 │      │  ws_handler (per connection) │
//! │  raw records, cost matches,  │      │  replies to client requests  │
//! │  snapshots, stream status    │      │                              │
//! └──────────────────────────────┘      └──────────────────────────────┘
//!                │ broadcast                          │ send_to
//!                ▼                                    ▼
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                        BroadcastHub                                  │
//! │   conn-1 queue        conn-2 queue        conn-3 queue               │
//! └─────────────────────────────────────────────────────────────────────┘
//!                │ writer task per connection
//!                ▼
//!            WebSocket
//! ```
//!
//! # Components
//!
//! - [`messages`] - WebSocket message protocol types
//! - [`hub`] - Subscriber registry, fan-out and liveness probing
//! - [`handler`] - Axum WebSocket upgrade handler

pub mod handler;
pub mod hub;
pub mod messages;

pub use handler::{respond, websocket_router, ws_handler, WebSocketState};
pub use hub::{
    BroadcastHub, Liveness, Outbound, ProbeOutcome, DEFAULT_LIVENESS_INTERVAL,
    DEFAULT_SUBSCRIBER_BUFFER,
};
pub use messages::{
    ClientMessage, CodeMatchingRequest, ConnectionMessage, CostDataPayload, ErrorMessage,
    PongMessage, ServerMessage,
};
