//! Query and ingest result types shared between services and transport.

use crate::models::graph::{Entity, Relation};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A supporting source for an answer.
///
/// Produced by the vector index (`metadata.source` names the origin
/// document) or synthesized from a graph entity during enhancement
/// (`metadata.source == "graph"`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    /// Document or entity id.
    pub id: String,
    /// Source content, or the entity name for graph pseudo-sources.
    pub content: String,
    /// Relevance score in `[0.0, 1.0]`.
    pub score: f64,
    /// Open metadata object.
    #[serde(default)]
    pub metadata: Value,
}

/// Result of a plain retrieval (vector search + generation).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalOutcome {
    /// Generated answer text.
    pub answer: String,
    /// Supporting sources from the vector index.
    pub sources: Vec<Source>,
    /// The original question.
    pub query: String,
}

/// Result of a graph-augmented query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryOutcome {
    /// Generated answer text.
    pub answer: String,
    /// Fused and re-ranked sources, at most `top_k`.
    pub sources: Vec<Source>,
    /// The original question.
    pub query: String,
    /// Whether graph evidence contributed to the sources.
    #[serde(default)]
    pub graph_enhanced: bool,
    /// Entities surfaced by graph enhancement.
    #[serde(default)]
    pub graph_entities: Vec<Entity>,
    /// Relations surfaced by graph enhancement.
    #[serde(default)]
    pub graph_relations: Vec<Relation>,
}

impl QueryOutcome {
    /// Wraps a plain retrieval outcome with no graph evidence attached.
    #[must_use]
    pub fn from_retrieval(retrieval: RetrievalOutcome) -> Self {
        Self {
            answer: retrieval.answer,
            sources: retrieval.sources,
            query: retrieval.query,
            graph_enhanced: false,
            graph_entities: Vec::new(),
            graph_relations: Vec::new(),
        }
    }
}

/// Result of ingesting a single document into the graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestReport {
    /// Id of the document entity.
    pub document_id: String,
    /// Number of entities persisted.
    pub entities_count: usize,
    /// Number of relations persisted.
    pub relations_count: usize,
    /// Ids of the persisted entities.
    pub entities: Vec<String>,
    /// Ids of the persisted relations.
    pub relations: Vec<String>,
}

/// Accumulated result of a batch ingest.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchIngestReport {
    /// Number of documents submitted.
    pub total_documents: usize,
    /// Documents ingested successfully.
    pub success_count: usize,
    /// Documents that failed.
    pub error_count: usize,
    /// Entities persisted across the batch.
    pub total_entities: usize,
    /// Relations persisted across the batch.
    pub total_relations: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_source_serde_round_trip() {
        let source = Source {
            id: "doc_1".to_string(),
            content: "content".to_string(),
            score: 0.9,
            metadata: json!({"source": "report.pdf", "page": 1}),
        };
        let back: Source = serde_json::from_str(&serde_json::to_string(&source).unwrap()).unwrap();
        assert_eq!(back, source);
    }

    #[test]
    fn test_query_outcome_from_retrieval() {
        let outcome = QueryOutcome::from_retrieval(RetrievalOutcome {
            answer: "a".to_string(),
            sources: Vec::new(),
            query: "q".to_string(),
        });
        assert!(!outcome.graph_enhanced);
        assert!(outcome.graph_entities.is_empty());
        assert!(outcome.graph_relations.is_empty());
    }

    #[test]
    fn test_query_outcome_defaults_on_deserialize() {
        let json = r#"{"answer": "a", "sources": [], "query": "q"}"#;
        let outcome: QueryOutcome = serde_json::from_str(json).unwrap();
        assert!(!outcome.graph_enhanced);
        assert!(outcome.graph_entities.is_empty());
    }
}
