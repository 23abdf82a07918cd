//! Adapters - Implementations of port interfaces.
//!
//! Adapters connect the pipeline to external systems:
//! - `stream` - Element stream (in-memory, Redis Streams)
//! - `persistence` - Element and aggregate documents (in-memory, PostgreSQL)
//! - `websocket` - Live subscriber feed
//! - `http` - axum router

pub mod http;
pub mod persistence;
pub mod stream;
pub mod websocket;

pub use http::{router, AppState};
pub use persistence::{InMemoryPersistence, PostgresPersistence};
pub use stream::{ConsumerGroup, InMemoryStream, RedisStreams};
pub use websocket::{BroadcastHub, ServerMessage};
