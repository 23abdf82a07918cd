//! Subscriber registry and fan-out for the live element feed.
//!
//! # Liveness
//!
//! Every probe marks each connection unconfirmed and sends a ping. Any
//! inbound traffic (pong frames included) confirms it again. A connection
//! still unconfirmed at the next probe is closed and removed, so a dead
//! peer lingers for at most two probe intervals.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch, RwLock};

use crate::domain::foundation::{ConnectionId, Timestamp};

use super::messages::ServerMessage;

pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 256;
pub const DEFAULT_LIVENESS_INTERVAL: Duration = Duration::from_secs(30);

/// Frames queued for a connection's writer.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    /// Serialized message, shared across all recipients of a broadcast.
    Text(Arc<str>),
    Ping,
    Close,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Confirmed,
    Unconfirmed,
}

struct Subscriber {
    sender: mpsc::Sender<Outbound>,
    liveness: Liveness,
    last_activity: Timestamp,
}

/// Result of one liveness probe.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProbeOutcome {
    pub pinged: usize,
    pub removed: usize,
}

/// Registry of live subscribers.
///
/// # Thread Safety
///
/// Uses `RwLock` for the registry since broadcasts (reads) vastly
/// outnumber registrations (writes). Sends never await: each connection
/// has a bounded queue and a full queue drops the message.
pub struct BroadcastHub {
    subscribers: RwLock<HashMap<ConnectionId, Subscriber>>,
    next_id: AtomicU64,
    buffer: usize,
    dropped: AtomicU64,
}

impl BroadcastHub {
    pub fn new(buffer: usize) -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            buffer: buffer.max(1),
            dropped: AtomicU64::new(0),
        }
    }

    /// Registers a connection and returns the receiving end of its queue.
    pub async fn register(&self) -> (ConnectionId, mpsc::Receiver<Outbound>) {
        let id = ConnectionId::from_raw(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (sender, receiver) = mpsc::channel(self.buffer);
        self.subscribers.write().await.insert(
            id,
            Subscriber {
                sender,
                liveness: Liveness::Confirmed,
                last_activity: Timestamp::now(),
            },
        );
        tracing::info!(connection_id = %id, "Subscriber registered");
        (id, receiver)
    }

    pub async fn unregister(&self, id: ConnectionId) {
        if self.subscribers.write().await.remove(&id).is_some() {
            tracing::info!(connection_id = %id, "Subscriber unregistered");
        }
    }

    /// Sends a message to every open connection. Returns how many queued it.
    pub async fn broadcast(&self, message: &ServerMessage) -> usize {
        let Some(text) = encode(message) else {
            return 0;
        };

        let mut delivered = 0;
        let mut closed = Vec::new();
        {
            let subscribers = self.subscribers.read().await;
            for (id, subscriber) in subscribers.iter() {
                match subscriber.sender.try_send(Outbound::Text(Arc::clone(&text))) {
                    Ok(()) => delivered += 1,
                    Err(TrySendError::Full(_)) => self.record_drop(*id, message),
                    Err(TrySendError::Closed(_)) => closed.push(*id),
                }
            }
        }

        if !closed.is_empty() {
            let mut subscribers = self.subscribers.write().await;
            for id in closed {
                subscribers.remove(&id);
                tracing::debug!(connection_id = %id, "Removed closed subscriber");
            }
        }
        delivered
    }

    /// Sends a message to one connection. Returns `false` if it was not queued.
    pub async fn send_to(&self, id: ConnectionId, message: &ServerMessage) -> bool {
        let Some(text) = encode(message) else {
            return false;
        };

        let result = {
            let subscribers = self.subscribers.read().await;
            match subscribers.get(&id) {
                Some(subscriber) => subscriber.sender.try_send(Outbound::Text(text)),
                None => return false,
            }
        };

        match result {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.record_drop(id, message);
                false
            }
            Err(TrySendError::Closed(_)) => {
                self.unregister(id).await;
                false
            }
        }
    }

    /// Marks a connection as alive after inbound traffic.
    pub async fn touch(&self, id: ConnectionId) {
        if let Some(subscriber) = self.subscribers.write().await.get_mut(&id) {
            subscriber.liveness = Liveness::Confirmed;
            subscriber.last_activity = Timestamp::now();
        }
    }

    /// Closes connections that missed the previous probe and pings the rest.
    pub async fn probe_liveness(&self) -> ProbeOutcome {
        let mut outcome = ProbeOutcome::default();
        let mut subscribers = self.subscribers.write().await;

        subscribers.retain(|id, subscriber| match subscriber.liveness {
            Liveness::Unconfirmed => {
                let _ = subscriber.sender.try_send(Outbound::Close);
                tracing::info!(
                    connection_id = %id,
                    last_activity = %subscriber.last_activity.to_rfc3339(),
                    "Closing unresponsive subscriber"
                );
                outcome.removed += 1;
                false
            }
            Liveness::Confirmed => {
                subscriber.liveness = Liveness::Unconfirmed;
                match subscriber.sender.try_send(Outbound::Ping) {
                    Err(TrySendError::Closed(_)) => {
                        outcome.removed += 1;
                        false
                    }
                    _ => {
                        outcome.pinged += 1;
                        true
                    }
                }
            }
        });

        outcome
    }

    pub async fn liveness(&self, id: ConnectionId) -> Option<Liveness> {
        self.subscribers.read().await.get(&id).map(|s| s.liveness)
    }

    pub async fn connection_count(&self) -> usize {
        self.subscribers.read().await.len()
    }

    /// Messages dropped because a subscriber queue was full.
    pub fn dropped_messages(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Runs [`probe_liveness`](Self::probe_liveness) every `interval` until shutdown.
    pub async fn run_liveness(self: Arc<Self>, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return;
                    }
                }
                _ = ticker.tick() => {
                    let outcome = self.probe_liveness().await;
                    if outcome.removed > 0 {
                        tracing::info!(
                            removed = outcome.removed,
                            remaining = outcome.pinged,
                            "Liveness probe removed subscribers"
                        );
                    }
                }
            }
        }
    }

    fn record_drop(&self, id: ConnectionId, message: &ServerMessage) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(
            connection_id = %id,
            message_type = message.kind(),
            "Subscriber queue full, dropping message"
        );
    }
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new(DEFAULT_SUBSCRIBER_BUFFER)
    }
}

fn encode(message: &ServerMessage) -> Option<Arc<str>> {
    match serde_json::to_string(message) {
        Ok(text) => Some(Arc::from(text)),
        Err(e) => {
            tracing::error!(message_type = message.kind(), error = %e, "Failed to encode message");
            None
        }
    }
}
