//! Knowledge-base endpoints: ingest, graph-aware query, and source listing.

use crate::api::{validate_query, validate_top_k, ApiError, AppState};
use crate::models::{Entity, Relation, Source, DOCUMENT_ENTITY_TYPE, KNOWN_ENTITY_TYPES};
use crate::services::vector::VectorDocument;
use crate::Error;
use axum::extract::State;
use axum::response::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

/// Maximum ingest content length in characters.
const MAX_CONTENT_CHARS: usize = 1_000_000;

/// Maximum length of the `source` label.
const MAX_SOURCE_CHARS: usize = 255;

/// Maximum entries in `entity_types`.
const MAX_ENTITY_TYPES: usize = 50;

/// Body of `POST /knowledge/query`.
#[derive(Debug, Deserialize)]
pub struct KnowledgeQueryRequest {
    /// The question.
    pub query: String,
    /// Number of sources to return (1–10).
    #[serde(default)]
    pub top_k: Option<usize>,
    /// Whether to include graph entities and relations.
    #[serde(default = "default_include_graph")]
    pub include_graph: bool,
}

const fn default_include_graph() -> bool {
    true
}

/// Response of `POST /knowledge/query`.
#[derive(Debug, Serialize)]
pub struct KnowledgeQueryResponse {
    /// Generated answer.
    pub answer: String,
    /// Supporting sources.
    pub sources: Vec<Source>,
    /// Graph entities surfaced by enhancement.
    pub graph_entities: Vec<Entity>,
    /// Graph relations surfaced by enhancement.
    pub graph_relations: Vec<Relation>,
    /// The original question.
    pub query: String,
}

/// `POST /knowledge/query`: like `/query`, optionally carrying graph
/// evidence.
pub async fn knowledge_query(
    State(state): State<Arc<AppState>>,
    Json(request): Json<KnowledgeQueryRequest>,
) -> Result<Json<KnowledgeQueryResponse>, ApiError> {
    let query_text = validate_query(&request.query, 1000)?;
    let top_k = validate_top_k(request.top_k, state.config.top_k_default)?;

    state.stats.record_query();
    metrics::counter!("graphrag_requests_total", "endpoint" => "/knowledge/query").increment(1);

    let outcome = state.orchestrator.query(&query_text, top_k).await?;
    let (graph_entities, graph_relations) = if request.include_graph {
        (outcome.graph_entities, outcome.graph_relations)
    } else {
        (Vec::new(), Vec::new())
    };

    Ok(Json(KnowledgeQueryResponse {
        answer: outcome.answer,
        sources: outcome.sources,
        graph_entities,
        graph_relations,
        query: outcome.query,
    }))
}

/// Body of `POST /knowledge/ingest`.
#[derive(Debug, Deserialize)]
pub struct KnowledgeIngestRequest {
    /// Document text.
    pub content: String,
    /// Source label, e.g. a file name.
    #[serde(default)]
    pub source: Option<String>,
    /// Metadata stored alongside the document in the vector index.
    #[serde(default)]
    pub metadata: Option<Map<String, Value>>,
    /// Whitelist of entity types for extraction.
    #[serde(default)]
    pub entity_types: Option<Vec<String>>,
}

/// Response of `POST /knowledge/ingest`.
#[derive(Debug, Serialize)]
pub struct KnowledgeIngestResponse {
    /// Assigned document id.
    pub document_id: String,
    /// Entities persisted.
    pub entities_count: usize,
    /// Relations persisted.
    pub relations_count: usize,
    /// Always `success`; partial relation failures are counted, not fatal.
    pub status: String,
    /// Ingest timestamp.
    pub created_at: DateTime<Utc>,
}

fn validate_ingest(request: &KnowledgeIngestRequest) -> Result<(), ApiError> {
    let content = request.content.trim();
    if content.is_empty() {
        return Err(ApiError(Error::InvalidInput(
            "content cannot be empty".to_string(),
        )));
    }
    if content.chars().count() > MAX_CONTENT_CHARS {
        return Err(ApiError(Error::InvalidInput(format!(
            "content too long, maximum {MAX_CONTENT_CHARS} characters"
        ))));
    }

    if let Some(source) = &request.source {
        if source.chars().count() > MAX_SOURCE_CHARS {
            return Err(ApiError(Error::InvalidInput(format!(
                "source identifier too long, maximum {MAX_SOURCE_CHARS} characters"
            ))));
        }
    }

    if let Some(entity_types) = &request.entity_types {
        if entity_types.len() > MAX_ENTITY_TYPES {
            return Err(ApiError(Error::InvalidInput(format!(
                "too many entity types, maximum {MAX_ENTITY_TYPES}"
            ))));
        }
        let invalid: Vec<&str> = entity_types
            .iter()
            .map(String::as_str)
            .filter(|requested| !KNOWN_ENTITY_TYPES.contains(requested))
            .collect();
        if !invalid.is_empty() {
            return Err(ApiError(Error::InvalidInput(format!(
                "invalid entity types: {invalid:?}, allowed: {KNOWN_ENTITY_TYPES:?}"
            ))));
        }
    }
    Ok(())
}

/// `POST /knowledge/ingest`: builds the graph for a document and adds it to
/// the vector index.
pub async fn ingest(
    State(state): State<Arc<AppState>>,
    Json(request): Json<KnowledgeIngestRequest>,
) -> Result<Json<KnowledgeIngestResponse>, ApiError> {
    validate_ingest(&request)?;
    metrics::counter!("graphrag_requests_total", "endpoint" => "/knowledge/ingest").increment(1);

    let document_id = format!("doc_{}", Uuid::new_v4());
    let content = request.content.trim();

    let report = state
        .builder
        .build_from_text(
            content,
            &document_id,
            request.entity_types.as_deref(),
            request.source.as_deref(),
        )
        .await?;

    let mut metadata = request.metadata.unwrap_or_default();
    metadata.insert(
        "source".to_string(),
        Value::String(request.source.clone().unwrap_or_else(|| "api".to_string())),
    );
    state
        .vector
        .add_documents(vec![VectorDocument {
            id: document_id.clone(),
            content: content.to_string(),
            metadata: Value::Object(metadata),
        }])
        .await?;

    state.stats.record_document();
    tracing::info!(
        document_id = %document_id,
        entities = report.entities_count,
        relations = report.relations_count,
        "knowledge ingested"
    );

    Ok(Json(KnowledgeIngestResponse {
        document_id,
        entities_count: report.entities_count,
        relations_count: report.relations_count,
        status: "success".to_string(),
        created_at: Utc::now(),
    }))
}

/// Response of `GET /knowledge/sources`.
#[derive(Debug, Serialize)]
pub struct KnowledgeSourceResponse {
    /// Unique ingested documents.
    pub sources: Vec<Value>,
    /// Number of unique sources.
    pub total: usize,
}

/// `GET /knowledge/sources`: lists the unique ingested documents.
pub async fn sources(
    State(state): State<Arc<AppState>>,
) -> Result<Json<KnowledgeSourceResponse>, ApiError> {
    let documents = state
        .graph
        .get_entities_by_type(DOCUMENT_ENTITY_TYPE, 1000)
        .await?;

    let mut seen: HashSet<String> = HashSet::new();
    let mut sources = Vec::new();
    for entity in documents {
        let source = entity
            .properties
            .get("source")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map_or_else(|| entity.id.clone(), ToString::to_string);

        if seen.insert(source.clone()) {
            sources.push(json!({
                "id": entity.id,
                "name": entity.name,
                "source": source,
                "type": entity.entity_type,
                "created_at": entity.created_at.to_rfc3339(),
                "metadata": entity.properties,
            }));
        }
    }

    let total = sources.len();
    Ok(Json(KnowledgeSourceResponse { sources, total }))
}
