//! HTTP transport: REST, SSE, WebSocket, webhook, and admin endpoints.
//!
//! The service container ([`AppState`]) owns one instance of each
//! collaborator, built at startup and threaded through the handlers as
//! axum state.
//!
//! # Routes (under `/api/v1`)
//!
//! | Route | Handler |
//! |-------|---------|
//! | `POST /query` | [`query::query`] |
//! | `GET /query/stream` | [`query::query_stream`] (SSE) |
//! | `GET /ws/chat`, `GET /ws/query` | [`ws`] |
//! | `POST /knowledge/query` | [`knowledge::knowledge_query`] |
//! | `POST /knowledge/ingest` | [`knowledge::ingest`] |
//! | `GET /knowledge/sources` | [`knowledge::sources`] |
//! | `POST /webhook/events` | [`webhook::receive_event`] |
//! | `GET /webhook/status` | [`webhook::status`] |
//! | `GET /admin/stats` | [`admin::system_stats`] (shared secret) |
//! | `POST /admin/cache/clear` | [`admin::clear_cache`] (shared secret) |
//! | `GET /admin/graph/stats` | [`admin::graph_stats`] (shared secret) |
//! | `GET /health{,/ready,/live}` | health probes |

pub mod admin;
pub mod knowledge;
pub mod query;
pub mod webhook;
pub mod ws;

use crate::config::AppConfig;
use crate::llm::GeneratorService;
use crate::services::{
    CacheService, EntityExtractor, GraphBuilder, InMemoryVectorIndex, Orchestrator,
    OrchestratorConfig, RetrievalService, VectorIndex,
};
use crate::storage::GraphStore;
use crate::Error;
use axum::extract::State;
use axum::http::{HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Service container: one instance of each collaborator, constructed at
/// startup.
pub struct AppState {
    /// Resolved configuration.
    pub config: AppConfig,
    /// The graph store.
    pub graph: Arc<dyn GraphStore>,
    /// The shared result cache.
    pub cache: Arc<CacheService>,
    /// The vector index.
    pub vector: Arc<dyn VectorIndex>,
    /// The query orchestrator.
    pub orchestrator: Arc<Orchestrator>,
    /// The ingest pipeline.
    pub builder: Arc<GraphBuilder>,
    /// Request and webhook counters.
    pub stats: ServiceStats,
}

impl AppState {
    /// Wires up the service graph over the given store.
    #[must_use]
    pub fn new(config: AppConfig, graph: Arc<dyn GraphStore>) -> Self {
        let cache = Arc::new(CacheService::new());
        let llm = Arc::new(GeneratorService::new(config.llm.clone()));
        let vector: Arc<dyn VectorIndex> = Arc::new(InMemoryVectorIndex::new());
        let retrieval = Arc::new(RetrievalService::new(
            llm.clone(),
            vector.clone(),
            cache.clone(),
        ));
        let extractor = Arc::new(EntityExtractor::new(llm));
        let builder = Arc::new(GraphBuilder::new(graph.clone(), extractor));
        let orchestrator = Arc::new(Orchestrator::new(
            retrieval,
            Some(graph.clone()),
            Some(cache.clone()),
            OrchestratorConfig::from_graph_config(&config.graph),
        ));

        Self {
            config,
            graph,
            cache,
            vector,
            orchestrator,
            builder,
            stats: ServiceStats::new(),
        }
    }
}

/// Mutex-protected request and webhook counters.
#[derive(Debug)]
pub struct ServiceStats {
    started_at: Instant,
    inner: Mutex<StatsInner>,
}

#[derive(Debug, Default, Clone)]
struct StatsInner {
    total_queries: u64,
    total_documents: u64,
    webhook_events: u64,
    last_webhook_at: Option<DateTime<Utc>>,
}

/// A point-in-time copy of the counters.
#[derive(Debug, Clone)]
pub struct StatsSnapshot {
    /// Queries served since startup.
    pub total_queries: u64,
    /// Documents ingested since startup.
    pub total_documents: u64,
    /// Webhook events received since startup.
    pub webhook_events: u64,
    /// Timestamp of the last webhook event.
    pub last_webhook_at: Option<DateTime<Utc>>,
    /// Seconds since startup.
    pub uptime_seconds: u64,
}

impl ServiceStats {
    fn new() -> Self {
        Self {
            started_at: Instant::now(),
            inner: Mutex::new(StatsInner::default()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StatsInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Counts one served query.
    pub fn record_query(&self) {
        self.lock().total_queries += 1;
    }

    /// Counts one ingested document.
    pub fn record_document(&self) {
        self.lock().total_documents += 1;
    }

    /// Counts one webhook event.
    pub fn record_webhook_event(&self, at: DateTime<Utc>) {
        let mut inner = self.lock();
        inner.webhook_events += 1;
        inner.last_webhook_at = Some(at);
    }

    /// Copies the counters out.
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        let inner = self.lock().clone();
        StatsSnapshot {
            total_queries: inner.total_queries,
            total_documents: inner.total_documents,
            webhook_events: inner.webhook_events,
            last_webhook_at: inner.last_webhook_at,
            uptime_seconds: self.started_at.elapsed().as_secs(),
        }
    }
}

/// Transport-level error wrapper mapping error kinds onto status codes.
#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        Self(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self.0 {
            Error::InvalidInput(_) => (StatusCode::BAD_REQUEST, self.0.to_string()),
            Error::Unauthorized(_) => (StatusCode::UNAUTHORIZED, self.0.to_string()),
            Error::RateLimited { .. } | Error::Upstream { .. } => {
                (StatusCode::SERVICE_UNAVAILABLE, self.0.to_string())
            },
            Error::OperationFailed { .. } => {
                tracing::error!(error = %self.0, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            },
        };
        (
            status,
            Json(json!({"error": message, "status_code": status.as_u16()})),
        )
            .into_response()
    }
}

/// Builds the application router.
#[must_use]
pub fn router(state: Arc<AppState>) -> Router {
    let cors = cors_layer(&state.config);

    let api = Router::new()
        .route("/query", post(query::query))
        .route("/query/stream", get(query::query_stream))
        .route("/ws/chat", get(ws::ws_chat))
        .route("/ws/query", get(ws::ws_query))
        .route("/knowledge/query", post(knowledge::knowledge_query))
        .route("/knowledge/ingest", post(knowledge::ingest))
        .route("/knowledge/sources", get(knowledge::sources))
        .route("/webhook/events", post(webhook::receive_event))
        .route("/webhook/status", get(webhook::status))
        .route("/admin/stats", get(admin::system_stats))
        .route("/admin/cache/clear", post(admin::clear_cache))
        .route("/admin/graph/stats", get(admin::graph_stats))
        .route("/health", get(health))
        .route("/health/ready", get(ready))
        .route("/health/live", get(live));

    Router::new()
        .route("/", get(root))
        .nest("/api/v1", api)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Builds the CORS layer from configuration.
///
/// A wildcard origin cannot be combined with credentials, so `*` maps to a
/// permissive layer without them.
fn cors_layer(config: &AppConfig) -> CorsLayer {
    if config.cors_origins.iter().any(|origin| origin == "*") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<HeaderValue> = config
            .cors_origins
            .iter()
            .filter_map(|origin| origin.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods([Method::GET, Method::POST])
            .allow_credentials(true)
    }
}

/// Generic success envelope used by the health probes.
#[derive(Debug, Serialize)]
pub struct SuccessResponse {
    /// Always `true` for these probes.
    pub success: bool,
    /// Human-readable status message.
    pub message: String,
    /// Probe-specific payload.
    pub data: serde_json::Value,
}

async fn root() -> Json<serde_json::Value> {
    Json(json!({
        "message": "graphrag is running",
        "health": "/api/v1/health",
    }))
}

async fn health(State(_state): State<Arc<AppState>>) -> Json<SuccessResponse> {
    Json(SuccessResponse {
        success: true,
        message: "graphrag is healthy".to_string(),
        data: json!({
            "status": "healthy",
            "timestamp": Utc::now().to_rfc3339(),
            "version": env!("CARGO_PKG_VERSION"),
        }),
    })
}

async fn ready() -> Json<SuccessResponse> {
    Json(SuccessResponse {
        success: true,
        message: "service is ready".to_string(),
        data: json!({"ready": true}),
    })
}

async fn live() -> Json<SuccessResponse> {
    Json(SuccessResponse {
        success: true,
        message: "service is alive".to_string(),
        data: json!({"alive": true}),
    })
}

/// Validates a query string: non-empty after trim, at most `max_chars`.
pub(crate) fn validate_query(query: &str, max_chars: usize) -> Result<String, ApiError> {
    let trimmed = query.trim();
    if trimmed.is_empty() {
        return Err(ApiError(Error::InvalidInput(
            "query cannot be empty".to_string(),
        )));
    }
    if trimmed.chars().count() > max_chars {
        return Err(ApiError(Error::InvalidInput(format!(
            "query too long, maximum {max_chars} characters"
        ))));
    }
    Ok(trimmed.to_string())
}

/// Validates a requested `top_k` against the allowed range.
pub(crate) fn validate_top_k(requested: Option<usize>, default: usize) -> Result<usize, ApiError> {
    let top_k = requested.unwrap_or(default);
    if !(1..=10).contains(&top_k) {
        return Err(ApiError(Error::InvalidInput(
            "top_k must be between 1 and 10".to_string(),
        )));
    }
    Ok(top_k)
}
