//! Stream adapters - element event stream implementations.
//!
//! - `InMemoryStream` - For tests
//! - `RedisStreams` - Redis Streams with consumer groups

mod in_memory;
mod redis_streams;

pub use in_memory::InMemoryStream;
pub use redis_streams::{ConsumerGroup, RedisStreams};
