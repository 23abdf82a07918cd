//! Integration tests for the element cost pipeline.
//!
//! These tests verify the end-to-end flow:
//! 1. StreamConsumer reads element records and hands them to the Coordinator
//! 2. Subscribers upload a cost schedule over the WebSocket protocol
//! 3. Elements are enriched, persisted, published and aggregated per project
//! 4. The BroadcastHub fans results out to every live subscriber
//!
//! Uses in-memory adapters to test the pipeline without external dependencies.

use serde_json::{json, Value as JsonValue};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use element_cost_relay::adapters::websocket::{respond, Outbound, WebSocketState};
use element_cost_relay::adapters::{BroadcastHub, InMemoryPersistence, InMemoryStream};
use element_cost_relay::application::{
    Coordinator, CoordinatorConfig, CoordinatorHandle, StreamConsumer, StreamConsumerConfig,
    StreamStatus,
};
use element_cost_relay::domain::foundation::{DomainError, ElementId, ProjectId};

// =============================================================================
// Test Infrastructure
// =============================================================================

struct Pipeline {
    stream: Arc<InMemoryStream>,
    persistence: Arc<InMemoryPersistence>,
    hub: Arc<BroadcastHub>,
    coordinator: CoordinatorHandle,
    ws: WebSocketState,
    status: watch::Receiver<StreamStatus>,
    shutdown: watch::Sender<bool>,
    consumer: JoinHandle<Result<(), DomainError>>,
}

impl Pipeline {
    fn start() -> Self {
        let stream = Arc::new(InMemoryStream::with_block(Duration::from_millis(10)));
        let persistence = Arc::new(InMemoryPersistence::new());
        let hub = Arc::new(BroadcastHub::default());
        let (shutdown, shutdown_rx) = watch::channel(false);
        let (status, status_rx) = watch::channel(StreamStatus::Connecting);

        let (coordinator, _task) = Coordinator::new(
            CoordinatorConfig {
                snapshot_interval: Duration::from_secs(3600),
                ..Default::default()
            },
            persistence.clone(),
            stream.clone(),
            hub.clone(),
        )
        .spawn(status_rx.clone(), shutdown_rx.clone());

        let consumer = StreamConsumer::new(
            stream.clone(),
            coordinator.clone(),
            status,
            StreamConsumerConfig::default().with_reconnect_delay(Duration::from_millis(10)),
        );
        let consumer = tokio::spawn(async move { consumer.run(shutdown_rx).await });

        Self {
            ws: WebSocketState::new(hub.clone(), coordinator.clone(), status_rx.clone()),
            status: status_rx,
            stream,
            persistence,
            hub,
            coordinator,
            shutdown,
            consumer,
        }
    }

    fn produce(&self, id: &str, code: &str, quantity: f64) -> String {
        self.stream.push(
            "elements",
            json!({
                "elementId": id,
                "projectId": "P",
                "classificationCode": code,
                "quantity": quantity,
            }),
        )
    }

    async fn upload(&self, rows: JsonValue) -> JsonValue {
        let frame = json!({"type": "cost_data", "data": rows}).to_string();
        serde_json::to_value(respond(&self.ws, &frame).await).unwrap()
    }

    async fn wait_for_acks(&self, count: usize) {
        for _ in 0..300 {
            if self.stream.acked("elements").len() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("stream records were not acknowledged in time");
    }

    /// Waits until the consumer is connected and the coordinator has
    /// broadcast that status change.
    async fn wait_until_connected(&self) {
        let mut status = self.status.clone();
        tokio::time::timeout(Duration::from_secs(3), status.wait_for(|s| s.is_connected()))
            .await
            .expect("stream did not connect in time")
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.coordinator.stats().await.unwrap();
    }

    async fn total(&self) -> f64 {
        self.persistence
            .aggregate(&ProjectId::new("P").unwrap())
            .await
            .map(|a| a.total_from_elements)
            .unwrap_or(0.0)
    }

    async fn stop(self) {
        self.shutdown.send(true).unwrap();
        self.consumer.await.unwrap().unwrap();
    }
}

fn drain(receiver: &mut mpsc::Receiver<Outbound>) -> Vec<JsonValue> {
    let mut messages = Vec::new();
    while let Ok(frame) = receiver.try_recv() {
        if let Outbound::Text(text) = frame {
            messages.push(serde_json::from_str(&text).unwrap());
        }
    }
    messages
}

fn of_type<'a>(messages: &'a [JsonValue], kind: &str) -> Vec<&'a JsonValue> {
    messages.iter().filter(|m| m["type"] == kind).collect()
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn element_received_before_upload_is_costed_by_the_upload() {
    let pipeline = Pipeline::start();
    let (_, mut subscriber) = pipeline.hub.register().await;

    pipeline.produce("e-1", "c 02.1", 5.0);
    pipeline.wait_for_acks(1).await;

    let response = pipeline
        .upload(json!([{"ebkph": "C2.1", "cost_unit": 10}]))
        .await;

    assert_eq!(response["type"], "cost_data_response");
    assert_eq!(response["status"], "success");
    assert_eq!(pipeline.total().await, 50.0);

    let messages = drain(&mut subscriber);
    assert_eq!(of_type(&messages, "element").len(), 1);
    let matches = of_type(&messages, "cost_match_info");
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0]["matches"]["C2.1"]["elementCount"], 1);
    assert_eq!(matches[0]["matches"]["C2.1"]["costUnit"], 10.0);

    pipeline.stop().await;
}

#[tokio::test]
async fn element_received_after_upload_is_costed_on_arrival() {
    let pipeline = Pipeline::start();
    pipeline
        .upload(json!([{"ebkph": "C2.1", "cost_unit": 10}]))
        .await;

    pipeline.produce("e-1", "C2.1", 5.0);
    pipeline.wait_for_acks(1).await;

    assert_eq!(pipeline.total().await, 50.0);
    let published = pipeline.stream.records("elements:enriched");
    assert_eq!(published.len(), 1);
    assert_eq!(published[0]["elementId"], "e-1");
    assert_eq!(published[0]["totalCost"], 50.0);
    assert_eq!(published[0]["matchMethod"], "direct");

    pipeline.stop().await;
}

#[tokio::test]
async fn redelivered_record_is_not_counted_twice() {
    let pipeline = Pipeline::start();
    pipeline
        .upload(json!([{"ebkph": "C1", "cost_unit": 2}]))
        .await;

    pipeline.produce("e-1", "C1", 3.0);
    pipeline.produce("e-1", "C1", 3.0);
    pipeline.wait_for_acks(2).await;

    assert_eq!(pipeline.total().await, 6.0);
    assert_eq!(pipeline.persistence.cost_entry_count().await, 1);
    assert_eq!(pipeline.coordinator.stats().await.unwrap().element_count, 1);

    pipeline.stop().await;
}

#[tokio::test]
async fn match_tiers_apply_end_to_end() {
    let pipeline = Pipeline::start();
    pipeline.produce("direct", "C2.1", 1.0);
    pipeline.produce("simplified", "C21", 1.0);
    pipeline.produce("major", "C2.9", 1.0);
    pipeline.produce("none", "X1", 1.0);
    pipeline.wait_for_acks(4).await;

    pipeline
        .upload(json!([
            {"ebkph": "C2", "cost_unit": 7},
            {"ebkph": "C2.1", "cost_unit": 10}
        ]))
        .await;

    let cost = |id: &'static str| {
        let persistence = pipeline.persistence.clone();
        async move {
            persistence
                .element(&ElementId::new(id).unwrap())
                .await
                .and_then(|e| e.total_cost())
        }
    };
    assert_eq!(cost("direct").await, Some(10.0));
    assert_eq!(cost("simplified").await, Some(10.0));
    assert_eq!(cost("major").await, Some(7.0));
    assert_eq!(cost("none").await, None);
    assert_eq!(pipeline.total().await, 27.0);

    pipeline.stop().await;
}

#[tokio::test]
async fn rejected_upload_reaches_only_the_requester() {
    let pipeline = Pipeline::start();
    pipeline.wait_until_connected().await;
    let (_, mut bystander) = pipeline.hub.register().await;

    let response = pipeline.upload(json!([])).await;

    assert_eq!(response["type"], "cost_data_response");
    assert_eq!(response["status"], "error");
    let seen = drain(&mut bystander);
    assert!(of_type(&seen, "cost_data_response").is_empty());
    assert!(seen.is_empty(), "bystander received {:?}", seen);

    pipeline.stop().await;
}

#[tokio::test]
async fn partial_persistence_failure_is_reported_in_the_summary() {
    let pipeline = Pipeline::start();
    for id in ["a", "b", "c"] {
        pipeline.produce(id, "E1", 1.0);
    }
    pipeline.wait_for_acks(3).await;
    pipeline
        .persistence
        .fail_writes_for(&ElementId::new("c").unwrap())
        .await;

    let response = pipeline
        .upload(json!([{"ebkph": "E1", "cost_unit": 4}]))
        .await;

    assert_eq!(response["status"], "warning");
    assert_eq!(response["persisted"], 2);
    assert_eq!(response["persistFailed"], 1);

    pipeline.stop().await;
}

#[tokio::test]
async fn stream_outage_is_broadcast_and_recovered() {
    let pipeline = Pipeline::start();
    pipeline.wait_until_connected().await;
    let (_, mut subscriber) = pipeline.hub.register().await;

    pipeline.stream.fail_next(1);
    pipeline.produce("e-1", "C1", 1.0);
    pipeline.wait_for_acks(1).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    pipeline.coordinator.stats().await.unwrap();

    let statuses: Vec<String> = of_type(&drain(&mut subscriber), "connection")
        .iter()
        .map(|m| m["streamStatus"].as_str().unwrap().to_string())
        .collect();
    assert!(statuses.contains(&"disconnected".to_string()));
    assert_eq!(statuses.last().map(String::as_str), Some("connected"));

    pipeline.stop().await;
}

#[tokio::test]
async fn silent_subscriber_is_dropped_after_two_probes() {
    let pipeline = Pipeline::start();
    let (quiet, mut quiet_rx) = pipeline.hub.register().await;
    let (chatty, _chatty_rx) = pipeline.hub.register().await;

    pipeline.hub.probe_liveness().await;
    pipeline.hub.touch(chatty).await;
    let outcome = pipeline.hub.probe_liveness().await;

    assert_eq!(outcome.removed, 1);
    assert_eq!(pipeline.hub.connection_count().await, 1);
    assert!(pipeline.hub.liveness(quiet).await.is_none());

    let mut frames = Vec::new();
    while let Ok(frame) = quiet_rx.try_recv() {
        frames.push(frame);
    }
    assert_eq!(frames, vec![Outbound::Ping, Outbound::Close]);

    pipeline.stop().await;
}
