//! Ports - Interfaces for external dependencies.
//!
//! Following hexagonal architecture, ports define the contracts between
//! the pipeline and the outside world. Adapters implement these ports.
//!
//! - `StreamGateway` - Element event stream (consume + publish)
//! - `PersistenceGateway` - Document store for elements, cost entries and
//!   project aggregates

mod persistence_gateway;
mod stream_gateway;

pub use persistence_gateway::{BatchOutcome, PersistenceError, PersistenceGateway};
pub use stream_gateway::{StreamError, StreamGateway, StreamMessage};
