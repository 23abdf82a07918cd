//! In-memory stream gateway for testing.
//!
//! # Security Note
//!
//! This adapter is for **testing only** and should not be used in production.
//! It uses `.expect()` on lock operations which will panic if locks are poisoned.
//! Production code should use the Redis Streams adapter.

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::Notify;

use crate::ports::{StreamError, StreamGateway, StreamMessage};

#[derive(Default)]
struct Channel {
    pending: VecDeque<StreamMessage>,
    published: Vec<StreamMessage>,
    acked: Vec<String>,
}

#[derive(Default)]
struct State {
    channels: HashMap<String, Channel>,
    next_id: u64,
    failures_remaining: usize,
    ensure_calls: usize,
    reconnects: usize,
}

/// In-memory stream for tests.
///
/// Features:
/// - Channels created on `ensure_channel` or first `push`
/// - Capture of published records and acknowledgements for assertions
/// - Injected transport failures via [`fail_next`](Self::fail_next)
///
/// # Example
///
/// ```ignore
/// let stream = InMemoryStream::new();
/// stream.push("elements", json!({"elementId": "e-1"}));
/// let batch = stream.next_batch("elements", 10).await?;
/// ```
pub struct InMemoryStream {
    state: Mutex<State>,
    arrivals: Notify,
    block: Duration,
}

impl InMemoryStream {
    pub fn new() -> Self {
        Self::with_block(Duration::from_millis(50))
    }

    /// How long `next_batch` waits for a message before returning empty.
    pub fn with_block(block: Duration) -> Self {
        Self {
            state: Mutex::new(State::default()),
            arrivals: Notify::new(),
            block,
        }
    }

    // === Test Helpers ===

    /// Enqueues a record as if a producer had written it.
    pub fn push(&self, channel: &str, payload: JsonValue) -> String {
        let id = self.append(channel, payload);
        self.arrivals.notify_one();
        id
    }

    /// Makes the next `count` reads fail as if the transport were down.
    pub fn fail_next(&self, count: usize) {
        self.lock().failures_remaining = count;
    }

    /// Every record written to a channel, in order.
    pub fn records(&self, channel: &str) -> Vec<JsonValue> {
        self.lock()
            .channels
            .get(channel)
            .map(|c| c.published.iter().map(|m| m.payload.clone()).collect())
            .unwrap_or_default()
    }

    pub fn acked(&self, channel: &str) -> Vec<String> {
        self.lock()
            .channels
            .get(channel)
            .map(|c| c.acked.clone())
            .unwrap_or_default()
    }

    pub fn pending_count(&self, channel: &str) -> usize {
        self.lock()
            .channels
            .get(channel)
            .map(|c| c.pending.len())
            .unwrap_or(0)
    }

    pub fn ensure_calls(&self) -> usize {
        self.lock().ensure_calls
    }

    pub fn reconnects(&self) -> usize {
        self.lock().reconnects
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().expect("InMemoryStream: state lock poisoned")
    }

    fn append(&self, channel: &str, payload: JsonValue) -> String {
        let mut state = self.lock();
        state.next_id += 1;
        let id = format!("{}-0", state.next_id);
        let message = StreamMessage {
            id: id.clone(),
            channel: channel.to_string(),
            payload,
        };
        let entry = state.channels.entry(channel.to_string()).or_default();
        entry.published.push(message.clone());
        entry.pending.push_back(message);
        id
    }

    fn take(&self, channel: &str, max: usize) -> Result<Vec<StreamMessage>, StreamError> {
        let mut state = self.lock();
        if state.failures_remaining > 0 {
            state.failures_remaining -= 1;
            return Err(StreamError::Unavailable("injected failure".to_string()));
        }
        let entry = state
            .channels
            .get_mut(channel)
            .ok_or_else(|| StreamError::UnknownChannel(channel.to_string()))?;
        let count = max.min(entry.pending.len());
        Ok(entry.pending.drain(..count).collect())
    }
}

impl Default for InMemoryStream {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StreamGateway for InMemoryStream {
    async fn reconnect(&self) -> Result<(), StreamError> {
        self.lock().reconnects += 1;
        Ok(())
    }

    async fn ensure_channel(&self, channel: &str) -> Result<(), StreamError> {
        let mut state = self.lock();
        state.ensure_calls += 1;
        state.channels.entry(channel.to_string()).or_default();
        Ok(())
    }

    async fn next_batch(&self, channel: &str, max: usize) -> Result<Vec<StreamMessage>, StreamError> {
        let batch = self.take(channel, max)?;
        if !batch.is_empty() {
            return Ok(batch);
        }
        // Emulates a blocking read; a timeout simply yields an empty batch.
        let _ = tokio::time::timeout(self.block, self.arrivals.notified()).await;
        self.take(channel, max)
    }

    async fn publish(&self, channel: &str, record: &JsonValue) -> Result<String, StreamError> {
        Ok(self.push(channel, record.clone()))
    }

    async fn ack(&self, channel: &str, ids: &[String]) -> Result<(), StreamError> {
        let mut state = self.lock();
        let entry = state
            .channels
            .get_mut(channel)
            .ok_or_else(|| StreamError::UnknownChannel(channel.to_string()))?;
        entry.acked.extend(ids.iter().cloned());
        Ok(())
    }
}
