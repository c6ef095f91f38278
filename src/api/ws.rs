//! WebSocket chat and query endpoints.
//!
//! Both endpoints accept JSON frames `{"query": "..."}` and answer with a
//! typed frame sequence: `start`, then `chunk` per generated fragment, then
//! `done`. Malformed or empty frames produce an `error` frame and the
//! connection stays open for the next request.

use crate::api::AppState;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

/// Incoming WebSocket frame.
#[derive(Debug, Deserialize)]
struct WsRequest {
    #[serde(default)]
    query: String,
}

/// `GET /ws/chat`: upgrades to the streaming chat protocol.
pub async fn ws_chat(State(state): State<Arc<AppState>>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| session(state, socket, "chat"))
}

/// `GET /ws/query`: upgrades to the streaming query protocol.
pub async fn ws_query(State(state): State<Arc<AppState>>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| session(state, socket, "query"))
}

/// Serves one WebSocket connection until the client disconnects.
async fn session(state: Arc<AppState>, mut socket: WebSocket, endpoint: &'static str) {
    tracing::info!(endpoint, "websocket connection established");
    metrics::gauge!("graphrag_websocket_connections").increment(1.0);

    while let Some(incoming) = socket.recv().await {
        let message = match incoming {
            Ok(message) => message,
            Err(e) => {
                tracing::debug!(endpoint, error = %e, "websocket receive failed");
                break;
            },
        };
        let text = match message {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };

        let query = serde_json::from_str::<WsRequest>(&text)
            .map(|request| request.query)
            .unwrap_or_default();
        if query.trim().is_empty() {
            if send_json(&mut socket, &json!({"type": "error", "error": "Query is required"}))
                .await
                .is_err()
            {
                break;
            }
            continue;
        }

        if stream_answer(&state, &mut socket, &query).await.is_err() {
            break;
        }
    }

    metrics::gauge!("graphrag_websocket_connections").decrement(1.0);
    tracing::info!(endpoint, "websocket connection closed");
}

/// Streams one answer over the socket as typed frames.
async fn stream_answer(
    state: &Arc<AppState>,
    socket: &mut WebSocket,
    query: &str,
) -> Result<(), axum::Error> {
    send_json(socket, &json!({"type": "start", "query": query})).await?;

    let mut chunks = state.orchestrator.stream_query(query).await;
    let mut index = 0usize;
    while let Some(chunk) = chunks.next().await {
        match chunk {
            Ok(text) => {
                send_json(
                    socket,
                    &json!({"type": "chunk", "chunk": text, "index": index, "done": false}),
                )
                .await?;
                index += 1;
            },
            Err(e) => {
                tracing::error!(error = %e, "websocket stream failed");
                send_json(socket, &json!({"type": "error", "error": e.to_string()})).await?;
                return Ok(());
            },
        }
    }

    send_json(socket, &json!({"type": "done", "index": index, "done": true})).await
}

async fn send_json(socket: &mut WebSocket, value: &serde_json::Value) -> Result<(), axum::Error> {
    socket.send(Message::Text(value.to_string().into())).await
}
