//! Vector index contract and an in-memory lexical implementation.
//!
//! The index is an opaque nearest-neighbour collaborator: `search` returns
//! `{id, content, score, metadata}` records with scores in `[0.0, 1.0]`.
//! The in-memory implementation here scores by lexical overlap, enough to
//! run the pipeline and the tests; a real ANN index would plug in behind
//! the same trait.

use crate::models::Source;
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::RwLock;

/// A document held by the vector index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorDocument {
    /// Document id (matches the graph's document entity id).
    pub id: String,
    /// Raw document content.
    pub content: String,
    /// Open metadata carried through to search results.
    #[serde(default)]
    pub metadata: Value,
}

/// Trait for vector index backends.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Returns the `top_k` most relevant documents for the query.
    ///
    /// # Errors
    ///
    /// Returns an error if the search fails.
    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<Source>>;

    /// Adds (or replaces, by id) documents. Returns how many were stored.
    ///
    /// # Errors
    ///
    /// Returns an error if the index rejects the documents.
    async fn add_documents(&self, documents: Vec<VectorDocument>) -> Result<usize>;

    /// Deletes documents by id. Returns how many were removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the deletion fails.
    async fn delete_documents(&self, ids: &[String]) -> Result<usize>;
}

/// In-memory lexical index.
#[derive(Debug, Default)]
pub struct InMemoryVectorIndex {
    documents: RwLock<Vec<VectorDocument>>,
}

impl InMemoryVectorIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored documents.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Whether the index holds no documents.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Vec<VectorDocument>> {
        match self.documents.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Vec<VectorDocument>> {
        match self.documents.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Lexical relevance of `content` to the query, in `[0.0, 1.0]`.
///
/// Whole-phrase containment scores highest; otherwise the score grows with
/// the fraction of whitespace-separated query terms found in the content.
/// Returns `None` when nothing matches.
fn lexical_score(query_lower: &str, terms: &[&str], content: &str) -> Option<f64> {
    if query_lower.is_empty() {
        return None;
    }
    let content_lower = content.to_lowercase();
    if content_lower.contains(query_lower) {
        return Some(0.9);
    }
    if terms.is_empty() {
        return None;
    }
    #[allow(clippy::cast_precision_loss)]
    let ratio = terms
        .iter()
        .filter(|term| content_lower.contains(**term))
        .count() as f64
        / terms.len() as f64;
    if ratio > 0.0 {
        Some(0.4 + 0.4 * ratio)
    } else {
        None
    }
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<Source>> {
        let query_lower = query.to_lowercase();
        let terms: Vec<&str> = query_lower.split_whitespace().collect();

        let mut hits: Vec<Source> = self
            .read()
            .iter()
            .filter_map(|doc| {
                lexical_score(&query_lower, &terms, &doc.content).map(|score| Source {
                    id: doc.id.clone(),
                    content: doc.content.clone(),
                    score,
                    metadata: doc.metadata.clone(),
                })
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(top_k);
        tracing::debug!(query = %query, hits = hits.len(), "vector search");
        Ok(hits)
    }

    async fn add_documents(&self, documents: Vec<VectorDocument>) -> Result<usize> {
        let count = documents.len();
        let mut stored = self.write();
        for document in documents {
            stored.retain(|existing| existing.id != document.id);
            stored.push(document);
        }
        tracing::info!(count, "documents added to vector index");
        Ok(count)
    }

    async fn delete_documents(&self, ids: &[String]) -> Result<usize> {
        let mut stored = self.write();
        let before = stored.len();
        stored.retain(|doc| !ids.contains(&doc.id));
        Ok(before - stored.len())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use serde_json::json;

    fn doc(id: &str, content: &str) -> VectorDocument {
        VectorDocument {
            id: id.to_string(),
            content: content.to_string(),
            metadata: json!({"source": format!("{id}.txt")}),
        }
    }

    #[tokio::test]
    async fn test_phrase_match_ranks_highest() {
        let index = InMemoryVectorIndex::new();
        index
            .add_documents(vec![
                doc("d1", "long-term care policy overview"),
                doc("d2", "care systems and long history"),
                doc("d3", "completely unrelated"),
            ])
            .await
            .unwrap();

        let hits = index.search("long-term care", 10).await.unwrap();
        assert_eq!(hits[0].id, "d1");
        assert!((hits[0].score - 0.9).abs() < f64::EPSILON);
        assert!(hits.iter().all(|hit| hit.id != "d3"));
        assert!(hits.iter().all(|hit| (0.0..=1.0).contains(&hit.score)));
    }

    #[tokio::test]
    async fn test_cjk_phrase_match() {
        let index = InMemoryVectorIndex::new();
        index
            .add_documents(vec![doc("d1", "台北市長期照護2.0政策由衛福部管理")])
            .await
            .unwrap();

        let hits = index.search("長期照護", 3).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "d1");
    }

    #[tokio::test]
    async fn test_top_k_truncation() {
        let index = InMemoryVectorIndex::new();
        index
            .add_documents((0..5).map(|i| doc(&format!("d{i}"), "shared topic")).collect())
            .await
            .unwrap();

        let hits = index.search("shared topic", 2).await.unwrap();
        assert_eq!(hits.len(), 2);
    }

    #[tokio::test]
    async fn test_add_replaces_by_id() {
        let index = InMemoryVectorIndex::new();
        index.add_documents(vec![doc("d1", "old")]).await.unwrap();
        index.add_documents(vec![doc("d1", "new")]).await.unwrap();
        assert_eq!(index.len(), 1);

        let hits = index.search("new", 1).await.unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn test_delete_documents() {
        let index = InMemoryVectorIndex::new();
        index
            .add_documents(vec![doc("d1", "a"), doc("d2", "b")])
            .await
            .unwrap();
        let removed = index
            .delete_documents(&["d1".to_string(), "missing".to_string()])
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(index.len(), 1);
    }

    #[tokio::test]
    async fn test_empty_query_matches_nothing() {
        let index = InMemoryVectorIndex::new();
        index.add_documents(vec![doc("d1", "text")]).await.unwrap();
        assert!(index.search("", 3).await.unwrap().is_empty());
    }
}
