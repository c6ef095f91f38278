//! Admin endpoints, gated by a shared-secret header.

use crate::api::{ApiError, AppState};
use crate::Error;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

/// Verifies the shared secret carried in the configured header.
fn verify_api_key(headers: &HeaderMap, state: &AppState) -> Result<(), ApiError> {
    let Some(expected) = state.config.api_key.as_deref() else {
        return Err(ApiError(Error::Unauthorized(
            "admin API key is not configured".to_string(),
        )));
    };
    let provided = headers
        .get(state.config.api_key_header.as_str())
        .and_then(|value| value.to_str().ok());
    match provided {
        None => Err(ApiError(Error::Unauthorized(
            "API key is required".to_string(),
        ))),
        Some(key) if key != expected => {
            Err(ApiError(Error::Unauthorized("invalid API key".to_string())))
        },
        Some(_) => Ok(()),
    }
}

/// Response of `GET /admin/stats`.
#[derive(Debug, Serialize)]
pub struct SystemStatsResponse {
    /// Queries served since startup.
    pub total_queries: u64,
    /// Documents ingested since startup.
    pub total_documents: u64,
    /// Reserved; populated once the metrics pipeline feeds it.
    pub cache_hit_rate: f64,
    /// Reserved; populated once the metrics pipeline feeds it.
    pub average_response_time: f64,
    /// Seconds since startup.
    pub uptime_seconds: u64,
    /// Report timestamp.
    pub timestamp: DateTime<Utc>,
}

/// `GET /admin/stats`: process-level counters.
pub async fn system_stats(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<SystemStatsResponse>, ApiError> {
    verify_api_key(&headers, &state)?;

    let snapshot = state.stats.snapshot();
    Ok(Json(SystemStatsResponse {
        total_queries: snapshot.total_queries,
        total_documents: snapshot.total_documents,
        cache_hit_rate: 0.0,
        average_response_time: 0.0,
        uptime_seconds: snapshot.uptime_seconds,
        timestamp: Utc::now(),
    }))
}

/// Response of `POST /admin/cache/clear`.
#[derive(Debug, Serialize)]
pub struct CacheClearResponse {
    /// Always `success`.
    pub status: String,
    /// Number of keys dropped.
    pub keys_cleared: usize,
    /// Clear timestamp.
    pub cleared_at: DateTime<Utc>,
}

/// `POST /admin/cache/clear`: drops every cached result.
pub async fn clear_cache(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<CacheClearResponse>, ApiError> {
    verify_api_key(&headers, &state)?;

    let keys_cleared = state.cache.clear();
    tracing::info!(keys_cleared, "admin cache clear");
    Ok(Json(CacheClearResponse {
        status: "success".to_string(),
        keys_cleared,
        cleared_at: Utc::now(),
    }))
}

/// Response of `GET /admin/graph/stats`.
#[derive(Debug, Serialize)]
pub struct GraphStatsResponse {
    /// Total entities in the graph store.
    pub total_entities: usize,
    /// Total relations in the graph store.
    pub total_relations: usize,
    /// Entity counts per type.
    pub entity_types: HashMap<String, usize>,
    /// Relation counts per type.
    pub relation_types: HashMap<String, usize>,
    /// Report timestamp.
    pub timestamp: DateTime<Utc>,
}

/// `GET /admin/graph/stats`: aggregate graph statistics.
pub async fn graph_stats(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<GraphStatsResponse>, ApiError> {
    verify_api_key(&headers, &state)?;

    let stats = state.graph.get_statistics().await?;
    Ok(Json(GraphStatsResponse {
        total_entities: stats.total_entities,
        total_relations: stats.total_relations,
        entity_types: stats.entity_types,
        relation_types: stats.relation_types,
        timestamp: Utc::now(),
    }))
}
