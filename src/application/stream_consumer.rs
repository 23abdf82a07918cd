//! StreamConsumer - Background service feeding stream records to the coordinator.
//!
//! Reads the element stream through a consumer group, hands every record
//! to the coordinator, refreshes the project aggregates the batch touched
//! and acknowledges the batch.
//!
//! ## States
//!
//! ```text
//! CONNECTING ──ok──▶ CONNECTED ──read error──▶ BACKOFF ──delay──▶ CONNECTING
//!      └──────────error───────────────────────────▲
//! ```
//!
//! Every CONNECTING attempt opens a fresh transport before recreating the
//! channels. Transport failures never end the loop. Only a shutdown signal, or a
//! coordinator that is no longer running, stops it.
//!
//! ## Configuration
//!
//! | Setting | Default | Description |
//! |---------|---------|-------------|
//! | `channel` | `elements` | Stream the element producer writes to |
//! | `output_channel` | `elements:enriched` | Stream enriched elements go to |
//! | `batch_size` | 50 | Max records per read |
//! | `reconnect_delay` | 5s | Wait between failed read and reconnect |

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;

use crate::domain::foundation::DomainError;
use crate::ports::{StreamError, StreamGateway};

use super::coordinator::CoordinatorHandle;
use super::reports::IngestOutcome;

/// Health of the upstream stream connection, as reported to subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamStatus {
    Connecting,
    Connected,
    Disconnected,
}

impl StreamStatus {
    pub fn is_connected(&self) -> bool {
        matches!(self, StreamStatus::Connected)
    }
}

/// Configuration for the StreamConsumer service.
#[derive(Debug, Clone)]
pub struct StreamConsumerConfig {
    pub channel: String,
    pub output_channel: String,
    pub batch_size: usize,
    pub reconnect_delay: Duration,
}

impl Default for StreamConsumerConfig {
    fn default() -> Self {
        Self {
            channel: "elements".to_string(),
            output_channel: "elements:enriched".to_string(),
            batch_size: 50,
            reconnect_delay: Duration::from_secs(5),
        }
    }
}

impl StreamConsumerConfig {
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }
}

/// Why a poll cycle failed.
#[derive(Debug, Error)]
pub enum ConsumeError {
    #[error("stream read failed: {0}")]
    Stream(#[from] StreamError),

    #[error(transparent)]
    Coordinator(#[from] DomainError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Connecting,
    Connected,
    Backoff,
}

/// Background service that drains the element stream.
pub struct StreamConsumer {
    stream: Arc<dyn StreamGateway>,
    coordinator: CoordinatorHandle,
    status: watch::Sender<StreamStatus>,
    config: StreamConsumerConfig,
}

impl StreamConsumer {
    pub fn new(
        stream: Arc<dyn StreamGateway>,
        coordinator: CoordinatorHandle,
        status: watch::Sender<StreamStatus>,
        config: StreamConsumerConfig,
    ) -> Self {
        Self {
            stream,
            coordinator,
            status,
            config,
        }
    }

    /// Receiver for connection status changes.
    pub fn subscribe(&self) -> watch::Receiver<StreamStatus> {
        self.status.subscribe()
    }

    /// Run the consumer loop until shutdown signal is received.
    ///
    /// Returns an error only when the coordinator has stopped.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), DomainError> {
        let mut state = State::Connecting;

        loop {
            if *shutdown.borrow() {
                break;
            }

            state = match state {
                State::Connecting => {
                    self.set_status(StreamStatus::Connecting);
                    match self.connect().await {
                        Ok(()) => {
                            tracing::info!(channel = %self.config.channel, "Stream connected");
                            self.set_status(StreamStatus::Connected);
                            State::Connected
                        }
                        Err(e) => {
                            tracing::warn!(channel = %self.config.channel, error = %e, "Stream connect failed");
                            self.set_status(StreamStatus::Disconnected);
                            State::Backoff
                        }
                    }
                }
                State::Connected => {
                    tokio::select! {
                        changed = shutdown.changed() => {
                            if changed.is_err() {
                                break;
                            }
                            State::Connected
                        }
                        result = self.poll_once() => match result {
                            Ok(_) => State::Connected,
                            Err(ConsumeError::Stream(e)) => {
                                tracing::warn!(
                                    channel = %self.config.channel,
                                    error = %e,
                                    transient = e.is_transient(),
                                    "Stream read failed, reconnecting"
                                );
                                self.set_status(StreamStatus::Disconnected);
                                State::Backoff
                            }
                            Err(ConsumeError::Coordinator(e)) => {
                                tracing::error!(error = %e, "Coordinator stopped, consumer exiting");
                                self.set_status(StreamStatus::Disconnected);
                                return Err(e);
                            }
                        }
                    }
                }
                State::Backoff => {
                    tokio::select! {
                        changed = shutdown.changed() => {
                            if changed.is_err() {
                                break;
                            }
                            State::Backoff
                        }
                        _ = tokio::time::sleep(self.config.reconnect_delay) => State::Connecting,
                    }
                }
            };
        }

        self.set_status(StreamStatus::Disconnected);
        tracing::info!(channel = %self.config.channel, "Stream consumer stopped");
        Ok(())
    }

    /// Reads one batch, ingests every record and acknowledges the batch.
    ///
    /// Rejected records are acknowledged too; redelivery cannot fix them.
    pub async fn poll_once(&self) -> Result<usize, ConsumeError> {
        let batch = self
            .stream
            .next_batch(&self.config.channel, self.config.batch_size)
            .await?;
        if batch.is_empty() {
            return Ok(0);
        }

        let mut ids = Vec::with_capacity(batch.len());
        for message in batch {
            if let IngestOutcome::Rejected(reason) = self.coordinator.ingest(message.payload).await? {
                tracing::warn!(message_id = %message.id, reason = %reason, "Skipping malformed record");
            }
            ids.push(message.id);
        }
        self.coordinator.refresh_aggregates().await?;

        self.stream.ack(&self.config.channel, &ids).await?;
        tracing::debug!(channel = %self.config.channel, count = ids.len(), "Batch processed");
        Ok(ids.len())
    }

    async fn connect(&self) -> Result<(), StreamError> {
        self.stream.reconnect().await?;
        self.stream.ensure_channel(&self.config.channel).await?;
        self.stream.ensure_channel(&self.config.output_channel).await
    }

    fn set_status(&self, status: StreamStatus) {
        self.status.send_if_modified(|current| {
            if *current == status {
                return false;
            }
            *current = status;
            true
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::persistence::InMemoryPersistence;
    use crate::adapters::stream::InMemoryStream;
    use crate::adapters::websocket::BroadcastHub;
    use crate::application::{Coordinator, CoordinatorConfig};
    use crate::domain::foundation::ErrorCode;
    use serde_json::json;
    use tokio::task::JoinHandle;

    struct Fixture {
        consumer: StreamConsumer,
        stream: Arc<InMemoryStream>,
        coordinator: CoordinatorHandle,
        coordinator_shutdown: watch::Sender<bool>,
    }

    fn fixture(config: StreamConsumerConfig) -> Fixture {
        let stream = Arc::new(InMemoryStream::with_block(Duration::from_millis(10)));
        let (status, status_rx) = watch::channel(StreamStatus::Connecting);
        let (coordinator_shutdown, shutdown_rx) = watch::channel(false);
        let (coordinator, _task) = Coordinator::new(
            CoordinatorConfig::default(),
            Arc::new(InMemoryPersistence::new()),
            stream.clone(),
            Arc::new(BroadcastHub::default()),
        )
        .spawn(status_rx, shutdown_rx);

        Fixture {
            consumer: StreamConsumer::new(stream.clone(), coordinator.clone(), status, config),
            stream,
            coordinator,
            coordinator_shutdown,
        }
    }

    fn quick() -> StreamConsumerConfig {
        StreamConsumerConfig::default().with_reconnect_delay(Duration::from_millis(10))
    }

    fn spawn(consumer: StreamConsumer) -> (watch::Sender<bool>, JoinHandle<Result<(), DomainError>>) {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(async move { consumer.run(shutdown_rx).await });
        (shutdown, task)
    }

    async fn eventually(mut condition: impl FnMut() -> bool) {
        for _ in 0..300 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test]
    async fn poll_once_ingests_and_acks() {
        let f = fixture(quick());
        f.stream.push("elements", json!({"elementId": "e-1", "ebkph": "C1"}));
        let id = f.stream.push("elements", json!({"elementId": "e-2", "ebkph": "C2"}));

        let processed = f.consumer.poll_once().await.unwrap();

        assert_eq!(processed, 2);
        assert!(f.stream.acked("elements").contains(&id));
        assert_eq!(f.coordinator.stats().await.unwrap().element_count, 2);
    }

    #[tokio::test]
    async fn malformed_records_are_acked() {
        let f = fixture(quick());
        let id = f.stream.push("elements", json!({"noId": true}));

        f.consumer.poll_once().await.unwrap();

        assert_eq!(f.stream.acked("elements"), vec![id]);
        assert_eq!(f.coordinator.stats().await.unwrap().element_count, 0);
    }

    #[tokio::test]
    async fn run_connects_and_consumes() {
        let f = fixture(quick());
        let status = f.consumer.subscribe();
        let stream = f.stream.clone();
        let (shutdown, task) = spawn(f.consumer);

        stream.push("elements", json!({"elementId": "e-1"}));
        eventually(|| stream.acked("elements").len() == 1).await;

        assert_eq!(*status.borrow(), StreamStatus::Connected);
        assert!(stream.ensure_calls() >= 2);

        shutdown.send(true).unwrap();
        task.await.unwrap().unwrap();
        assert_eq!(*status.borrow(), StreamStatus::Disconnected);
    }

    #[tokio::test]
    async fn recovers_after_transient_failures() {
        let f = fixture(quick());
        let status = f.consumer.subscribe();
        let stream = f.stream.clone();
        stream.push("elements", json!({"elementId": "e-1"}));
        stream.fail_next(3);
        let (shutdown, task) = spawn(f.consumer);

        eventually(|| stream.acked("elements").len() == 1).await;
        assert_eq!(*status.borrow(), StreamStatus::Connected);
        assert!(stream.reconnects() >= 4, "each retry opens a new transport");

        shutdown.send(true).unwrap();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn shutdown_interrupts_backoff() {
        let f = fixture(StreamConsumerConfig::default().with_reconnect_delay(Duration::from_secs(3600)));
        let status = f.consumer.subscribe();
        f.stream.fail_next(usize::MAX);
        let (shutdown, task) = spawn(f.consumer);

        eventually(|| *status.borrow() == StreamStatus::Disconnected).await;
        shutdown.send(true).unwrap();

        let result = tokio::time::timeout(Duration::from_secs(1), task).await;
        assert!(result.expect("consumer should stop promptly").unwrap().is_ok());
    }

    #[tokio::test]
    async fn exits_when_coordinator_stops() {
        let f = fixture(quick());
        f.coordinator_shutdown.send(true).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        f.stream.push("elements", json!({"elementId": "e-1"}));
        let (_shutdown, task) = spawn(f.consumer);

        let err = task.await.unwrap().unwrap_err();

        assert_eq!(err.code, ErrorCode::CoordinatorUnavailable);
        assert!(f.stream.acked("elements").is_empty());
    }
}
