//! Webhook endpoints.
//!
//! Events are accepted, counted, and logged; only `cache_cleared` has a
//! defined side effect (clearing the shared cache). The other event types
//! are placeholders for integrations that push change notifications.

use crate::api::{ApiError, AppState};
use crate::Error;
use axum::extract::State;
use axum::response::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

/// Recognized webhook event types.
const EVENT_TYPES: &[&str] = &[
    "document_updated",
    "knowledge_base_changed",
    "graph_updated",
    "cache_cleared",
];

/// Body of `POST /webhook/events`.
#[derive(Debug, Deserialize)]
pub struct WebhookEventRequest {
    /// Event type; must be one of the recognized types.
    pub event_type: String,
    /// Event payload, passed through untouched.
    pub payload: Value,
    /// Event timestamp supplied by the sender.
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    /// Optional signature; currently recorded, not verified.
    #[serde(default)]
    pub signature: Option<String>,
}

/// Response of `POST /webhook/events`.
#[derive(Debug, Serialize)]
pub struct WebhookEventResponse {
    /// Always `received`.
    pub status: String,
    /// Assigned event id.
    pub event_id: String,
    /// Processing timestamp.
    pub processed_at: DateTime<Utc>,
}

/// `POST /webhook/events`: receives a change notification.
pub async fn receive_event(
    State(state): State<Arc<AppState>>,
    Json(request): Json<WebhookEventRequest>,
) -> Result<Json<WebhookEventResponse>, ApiError> {
    if !EVENT_TYPES.contains(&request.event_type.as_str()) {
        return Err(ApiError(Error::InvalidInput(format!(
            "unknown event type '{}', allowed: {EVENT_TYPES:?}",
            request.event_type
        ))));
    }

    let event_id = Uuid::new_v4().to_string();
    let processed_at = Utc::now();
    state.stats.record_webhook_event(processed_at);
    metrics::counter!("graphrag_webhook_events_total", "event_type" => request.event_type.clone())
        .increment(1);

    match request.event_type.as_str() {
        "cache_cleared" => {
            let removed = state.cache.clear();
            tracing::info!(event_id = %event_id, removed, "webhook: cache cleared");
        },
        other => {
            tracing::info!(event_id = %event_id, event_type = %other, "webhook event received");
        },
    }

    if request.signature.is_some() {
        tracing::debug!(event_id = %event_id, "webhook signature present, verification not enabled");
    }

    Ok(Json(WebhookEventResponse {
        status: "received".to_string(),
        event_id,
        processed_at,
    }))
}

/// Response of `GET /webhook/status`.
#[derive(Debug, Serialize)]
pub struct WebhookStatusResponse {
    /// Webhook intake status.
    pub status: String,
    /// Events received since startup.
    pub total_events: u64,
    /// Timestamp of the last event.
    pub last_event_at: Option<DateTime<Utc>>,
    /// Configured callback URL, when one exists.
    pub webhook_url: Option<String>,
}

/// `GET /webhook/status`: reports webhook intake counters.
pub async fn status(State(state): State<Arc<AppState>>) -> Json<WebhookStatusResponse> {
    let snapshot = state.stats.snapshot();
    Json(WebhookStatusResponse {
        status: "active".to_string(),
        total_events: snapshot.webhook_events,
        last_event_at: snapshot.last_webhook_at,
        webhook_url: None,
    })
}
