//! REST and SSE query endpoints.

use crate::api::{validate_query, validate_top_k, ApiError, AppState};
use crate::models::Source;
use axum::extract::{Query as QueryParams, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::Json;
use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// Maximum query length in characters.
const MAX_QUERY_CHARS: usize = 1000;

/// Body of `POST /query`.
#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    /// The question.
    pub query: String,
    /// Number of sources to return (1–10).
    #[serde(default)]
    pub top_k: Option<usize>,
    /// Requested provider, echoed back in the response.
    #[serde(default)]
    pub provider: Option<String>,
    /// Per-request token limit (currently advisory).
    #[serde(default)]
    pub max_tokens: Option<u32>,
    /// Per-request temperature (currently advisory).
    #[serde(default)]
    pub temperature: Option<f32>,
}

/// Response of `POST /query`.
#[derive(Debug, Serialize)]
pub struct QueryResponse {
    /// Generated answer.
    pub answer: String,
    /// Supporting sources.
    pub sources: Vec<Source>,
    /// The original question.
    pub query: String,
    /// Echo of the requested provider.
    pub provider: Option<String>,
}

/// `POST /query`: answers a question with fused vector and graph evidence.
pub async fn query(
    State(state): State<Arc<AppState>>,
    Json(request): Json<QueryRequest>,
) -> Result<Json<QueryResponse>, ApiError> {
    let query_text = validate_query(&request.query, MAX_QUERY_CHARS)?;
    let top_k = validate_top_k(request.top_k, state.config.top_k_default)?;

    state.stats.record_query();
    metrics::counter!("graphrag_requests_total", "endpoint" => "/query").increment(1);

    let outcome = state.orchestrator.query(&query_text, top_k).await?;
    Ok(Json(QueryResponse {
        answer: outcome.answer,
        sources: outcome.sources,
        query: outcome.query,
        provider: request.provider,
    }))
}

/// Query parameters of `GET /query/stream`.
#[derive(Debug, Deserialize)]
pub struct StreamParams {
    /// The question.
    pub query: String,
}

/// `GET /query/stream`: streams answer chunks as server-sent events.
///
/// Each event's `data:` field carries one chunk; the stream terminates with
/// `data: [DONE]`. A generator failure mid-stream emits one error event and
/// ends the stream without the terminator.
pub async fn query_stream(
    State(state): State<Arc<AppState>>,
    QueryParams(params): QueryParams<StreamParams>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let query_text = validate_query(&params.query, MAX_QUERY_CHARS)?;
    metrics::counter!("graphrag_requests_total", "endpoint" => "/query/stream").increment(1);

    let mut chunks = state.orchestrator.stream_query(&query_text).await;
    let (tx, rx) = mpsc::channel::<Event>(16);
    tokio::spawn(async move {
        while let Some(chunk) = chunks.next().await {
            match chunk {
                Ok(text) => {
                    if tx.send(Event::default().data(text)).await.is_err() {
                        return;
                    }
                },
                Err(e) => {
                    tracing::error!(error = %e, "stream query failed");
                    let _ = tx.send(Event::default().data(format!("Error: {e}"))).await;
                    return;
                },
            }
        }
        let _ = tx.send(Event::default().data("[DONE]")).await;
    });

    let stream = ReceiverStream::new(rx).map(Ok::<_, Infallible>);
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
