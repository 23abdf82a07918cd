//! WebSocket upgrade handler for the live element feed.
//!
//! Handles the HTTP → WebSocket upgrade and manages the connection lifecycle:
//! 1. Register with the broadcast hub
//! 2. Greet with connection status and the element inventory
//! 3. Forward queued frames until disconnect, while a per-connection worker
//!    answers client requests in arrival order
//! 4. Unregister

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{SinkExt, Stream, StreamExt};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::application::{CoordinatorHandle, OperationResponse, StreamStatus};
use crate::domain::foundation::{ConnectionId, ErrorCode};

use super::hub::{BroadcastHub, Outbound};
use super::messages::{ClientMessage, ServerMessage};

/// State required for WebSocket handling.
#[derive(Clone)]
pub struct WebSocketState {
    pub hub: Arc<BroadcastHub>,
    pub coordinator: CoordinatorHandle,
    pub stream_status: watch::Receiver<StreamStatus>,
}

impl WebSocketState {
    pub fn new(
        hub: Arc<BroadcastHub>,
        coordinator: CoordinatorHandle,
        stream_status: watch::Receiver<StreamStatus>,
    ) -> Self {
        Self {
            hub,
            coordinator,
            stream_status,
        }
    }
}

/// Route: `GET /ws`
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<WebSocketState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: WebSocketState) {
    let (mut sender, receiver) = socket.split();
    let (connection_id, mut outbound) = state.hub.register().await;
    tracing::info!(connection_id = %connection_id, "Subscriber connected");

    // Single writer: everything for this socket goes through the hub queue.
    let mut send_task = tokio::spawn(async move {
        while let Some(frame) = outbound.recv().await {
            let result = match frame {
                Outbound::Text(text) => sender.send(Message::Text(text.to_string())).await,
                Outbound::Ping => sender.send(Message::Ping(Vec::new())).await,
                Outbound::Close => {
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
            };
            if let Err(e) = result {
                tracing::debug!(connection_id = %connection_id, error = %e, "Send error, closing connection");
                break;
            }
        }
    });

    greet(&state, connection_id).await;

    let (requests, worker) = spawn_request_worker(state.clone(), connection_id);
    let hub = state.hub.clone();
    let mut recv_task = tokio::spawn(async move {
        read_frames(&hub, connection_id, receiver, &requests).await;
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }
    worker.abort();

    state.hub.unregister(connection_id).await;
    tracing::info!(connection_id = %connection_id, "Subscriber disconnected");
}

/// Requests queued per connection before new ones are refused.
const PENDING_REQUESTS: usize = 16;

fn spawn_request_worker(
    state: WebSocketState,
    connection_id: ConnectionId,
) -> (mpsc::Sender<String>, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<String>(PENDING_REQUESTS);
    let task = tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            let reply = respond(&state, &text).await;
            tracing::trace!(connection_id = %connection_id, reply = reply.kind(), "Replying");
            state.hub.send_to(connection_id, &reply).await;
        }
    });
    (tx, task)
}

/// Reads frames until the client goes away.
///
/// Every frame counts as liveness, including while earlier requests are
/// still being answered by the worker.
async fn read_frames<S>(
    hub: &BroadcastHub,
    connection_id: ConnectionId,
    mut frames: S,
    requests: &mpsc::Sender<String>,
) where
    S: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    while let Some(result) = frames.next().await {
        hub.touch(connection_id).await;
        match result {
            Ok(Message::Text(text)) => match requests.try_send(text) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    tracing::warn!(connection_id = %connection_id, "Request queue full, refusing request");
                    let busy = ServerMessage::error(ErrorCode::TooManyRequests, "Too many pending requests");
                    hub.send_to(connection_id, &busy).await;
                }
                Err(TrySendError::Closed(_)) => break,
            },
            Ok(Message::Binary(_)) => {
                tracing::warn!(connection_id = %connection_id, "Received unsupported binary message");
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Close(_)) => {
                tracing::debug!(connection_id = %connection_id, "Client sent close frame");
                break;
            }
            Err(e) => {
                tracing::debug!(connection_id = %connection_id, error = %e, "Receive error");
                break;
            }
        }
    }
}

async fn greet(state: &WebSocketState, connection_id: ConnectionId) {
    let status = *state.stream_status.borrow();
    state
        .hub
        .send_to(connection_id, &ServerMessage::connection(Some(connection_id), status))
        .await;

    let inventory = match state.coordinator.snapshot().await {
        Ok(inventory) => ServerMessage::ElementInfo(inventory),
        Err(e) => ServerMessage::error(e.code, e.message),
    };
    state.hub.send_to(connection_id, &inventory).await;
}

/// Computes the reply to one client text frame.
///
/// Replies go to the requesting connection only.
pub async fn respond(state: &WebSocketState, text: &str) -> ServerMessage {
    let message = match serde_json::from_str::<ClientMessage>(text) {
        Ok(message) => message,
        Err(e) => {
            return ServerMessage::error(ErrorCode::MalformedPayload, format!("Invalid message: {}", e));
        }
    };

    match message {
        ClientMessage::Ping => ServerMessage::pong(),
        ClientMessage::CostData(payload) => {
            match state.coordinator.upload_schedule(payload.into()).await {
                Ok(response) => ServerMessage::CostDataResponse(response),
                Err(e) => {
                    tracing::warn!(code = %e.code(), error = %e, "Cost data rejected");
                    ServerMessage::CostDataResponse(OperationResponse::error(e.to_string()))
                }
            }
        }
        ClientMessage::RequestCodeMatching(request) => {
            match state.coordinator.request_code_matching(request.codes).await {
                Ok(report) => ServerMessage::CodeMatchingInfo(report),
                Err(e) => ServerMessage::error(e.code, e.message),
            }
        }
        ClientMessage::ReapplyCosts => match state.coordinator.reapply_costs().await {
            Ok(response) => ServerMessage::ReapplyCostsResponse(response),
            Err(e) => ServerMessage::ReapplyCostsResponse(OperationResponse::error(e.message)),
        },
    }
}

/// Create axum router for the WebSocket endpoint.
pub fn websocket_router() -> axum::Router<WebSocketState> {
    use axum::routing::get;

    axum::Router::new().route("/ws", get(ws_handler))
}
