//! WebSocket connection handling.
//!
//! Each connection runs one task that multiplexes the client socket with the
//! session's outbox. Replies are JSON text frames until the client sends a
//! binary frame, after which they switch to length-prefixed MessagePack.

use crate::error::ApiError;
use crate::metrics::{self, SessionMetrics};
use crate::state::AppState;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::{IntoResponse, Response},
    http::StatusCode,
    Json,
};
use futures_util::{SinkExt, StreamExt};
use parley_core::Identity;
use parley_protocol::{codec, ServerEvent};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

#[derive(Debug, Deserialize)]
pub struct WsParams {
    pub token: Option<String>,
}

/// Holds one connection slot; released on drop.
struct ConnectionSlot(Arc<AppState>);

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        self.0.release_connection();
    }
}

/// WebSocket upgrade handler.
///
/// A `token` query parameter, when present, must be valid and
/// pre-authenticates the session.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsParams>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let identity = match params.token.as_deref() {
        Some(token) => match state.hub.auth().identify(token) {
            Ok(identity) => Some(identity),
            Err(e) => {
                debug!(error = %e, "Rejecting WebSocket with invalid token");
                return ApiError::from(e).into_response();
            }
        },
        None => None,
    };

    if !state.try_acquire_connection() {
        warn!(
            max = state.config.limits.max_connections,
            "Connection limit reached"
        );
        metrics::record_error("connection_limit");
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": "Too many connections" })),
        )
            .into_response();
    }
    let slot = ConnectionSlot(state.clone());

    ws.max_message_size(state.config.limits.max_message_size)
        .on_upgrade(move |socket| handle_websocket(socket, state, identity, slot))
}

/// Handle a WebSocket connection.
async fn handle_websocket(
    socket: WebSocket,
    state: Arc<AppState>,
    identity: Option<Identity>,
    _slot: ConnectionSlot,
) {
    let _metrics_guard = SessionMetrics::start();

    let (mut session, mut outbox) = state.hub.open_session(identity);
    let connection_id = session.handle().clone();
    debug!(connection = %connection_id, "WebSocket connected");

    let (mut sender, mut receiver) = socket.split();
    let mut binary = false;

    loop {
        tokio::select! {
            biased;

            Some(event) = outbox.recv() => {
                let Some(frame) = encode_event(&event, binary) else {
                    continue;
                };
                if sender.send(frame).await.is_err() {
                    break;
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let start = Instant::now();
                        metrics::record_message(text.len(), "inbound");
                        session.handle_text(&text).await;
                        metrics::record_latency(start.elapsed().as_secs_f64());
                    }
                    Some(Ok(Message::Binary(data))) => {
                        let start = Instant::now();
                        binary = true;
                        metrics::record_message(data.len(), "inbound");
                        session.handle_binary(&data).await;
                        metrics::record_latency(start.elapsed().as_secs_f64());
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {}
                    Some(Ok(Message::Close(_))) => {
                        debug!(connection = %connection_id, "Received close frame");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(connection = %connection_id, error = %e, "WebSocket error");
                        metrics::record_error("websocket");
                        break;
                    }
                    None => {
                        debug!(connection = %connection_id, "WebSocket stream ended");
                        break;
                    }
                }
                metrics::set_active_rooms(state.hub.broadcaster().stats().room_count);
            }
        }
    }

    session.close();
    metrics::set_active_rooms(state.hub.broadcaster().stats().room_count);

    debug!(connection = %connection_id, "WebSocket disconnected");
}

fn encode_event(event: &ServerEvent, binary: bool) -> Option<Message> {
    let encoded = if binary {
        codec::encode(event).map(|data| Message::Binary(data.to_vec()))
    } else {
        codec::to_json(event).map(Message::Text)
    };

    match encoded {
        Ok(frame) => {
            let len = match &frame {
                Message::Text(text) => text.len(),
                Message::Binary(data) => data.len(),
                _ => 0,
            };
            metrics::record_message(len, "outbound");
            Some(frame)
        }
        Err(e) => {
            warn!(event = event.name(), error = %e, "Failed to encode event");
            metrics::record_error("encode");
            None
        }
    }
}
