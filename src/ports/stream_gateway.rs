//! StreamGateway port - Interface to the element event stream.
//!
//! The relay consumes element records from one channel and publishes
//! enriched records onto another. Delivery is at-least-once: callers
//! acknowledge messages after processing and tolerate redelivery.

use async_trait::async_trait;
use serde_json::Value as JsonValue;

/// One message read from a stream channel.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamMessage {
    /// Transport-assigned message id, used for acknowledgement.
    pub id: String,
    pub channel: String,
    pub payload: JsonValue,
}

/// Port for reading from and publishing to the element stream.
///
/// # Example
///
/// ```ignore
/// gateway.ensure_channel("elements").await?;
/// for message in gateway.next_batch("elements", 100).await? {
///     handle(message.payload);
///     gateway.ack("elements", &[message.id]).await?;
/// }
/// ```
#[async_trait]
pub trait StreamGateway: Send + Sync {
    /// Drops the current transport and opens a fresh one.
    ///
    /// Called before every connect attempt, so a connection that died
    /// during an outage is never reused.
    async fn reconnect(&self) -> Result<(), StreamError>;

    /// Creates the channel (and consumer group) if missing. Idempotent.
    async fn ensure_channel(&self, channel: &str) -> Result<(), StreamError>;

    /// Waits for up to `max` messages. An empty batch means nothing arrived
    /// within the adapter's block timeout.
    async fn next_batch(&self, channel: &str, max: usize) -> Result<Vec<StreamMessage>, StreamError>;

    /// Appends a record to a channel, returning its message id.
    async fn publish(&self, channel: &str, record: &JsonValue) -> Result<String, StreamError>;

    /// Acknowledges processed messages.
    async fn ack(&self, channel: &str, ids: &[String]) -> Result<(), StreamError>;
}

/// Errors raised by stream adapters.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// Transport is unreachable or the connection dropped.
    #[error("stream unavailable: {0}")]
    Unavailable(String),

    /// Channel has not been created.
    #[error("unknown channel: {0}")]
    UnknownChannel(String),

    /// Record could not be encoded for the transport.
    #[error("cannot encode record: {0}")]
    Encoding(String),
}

impl StreamError {
    /// Whether reconnecting may resolve the error.
    pub fn is_transient(&self) -> bool {
        matches!(self, StreamError::Unavailable(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[allow(dead_code)]
    fn assert_gateway_object_safe(_: &dyn StreamGateway) {}

    #[test]
    fn only_unavailable_is_transient() {
        assert!(StreamError::Unavailable("reset".into()).is_transient());
        assert!(!StreamError::UnknownChannel("x".into()).is_transient());
        assert!(!StreamError::Encoding("x".into()).is_transient());
    }
}
