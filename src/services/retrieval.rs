//! Retrieval service: vector search plus answer generation, with a result
//! cache keyed by `(query, top_k)`.

use crate::llm::{ChunkStream, GeneratorService};
use crate::models::RetrievalOutcome;
use crate::services::cache::{fingerprint_key, CacheService};
use crate::services::vector::VectorIndex;
use crate::Result;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

/// TTL of cached retrieval results.
const RETRIEVAL_CACHE_TTL: Duration = Duration::from_secs(3600);

/// Composes the vector index and the generator.
pub struct RetrievalService {
    llm: Arc<GeneratorService>,
    vector: Arc<dyn VectorIndex>,
    cache: Arc<CacheService>,
}

impl RetrievalService {
    /// Creates the service over its collaborators.
    #[must_use]
    pub fn new(
        llm: Arc<GeneratorService>,
        vector: Arc<dyn VectorIndex>,
        cache: Arc<CacheService>,
    ) -> Self {
        Self { llm, vector, cache }
    }

    /// Answers a query from the vector index and the generator.
    ///
    /// Results are cached for an hour under a fingerprint of
    /// `(query, top_k)`. The generator is prompted with the question alone;
    /// retrieved sources accompany the answer but are not injected into the
    /// prompt.
    ///
    /// # Errors
    ///
    /// Returns an error if the vector search or generation fails.
    pub async fn query(&self, query: &str, top_k: usize) -> Result<RetrievalOutcome> {
        let cache_key = fingerprint_key("rag_query", &json!({"args": [query], "top_k": top_k}));
        if let Some(value) = self.cache.get(&cache_key) {
            if let Ok(outcome) = serde_json::from_value::<RetrievalOutcome>(value) {
                tracing::debug!(query = %truncate(query, 50), "retrieval cache hit");
                return Ok(outcome);
            }
        }

        let sources = self.vector.search(query, top_k).await?;
        let answer = self.llm.generate(query, None, None).await?;

        let outcome = RetrievalOutcome {
            answer,
            sources,
            query: query.to_string(),
        };

        if let Ok(value) = serde_json::to_value(&outcome) {
            self.cache.set(&cache_key, value, RETRIEVAL_CACHE_TTL);
        }
        Ok(outcome)
    }

    /// Streams an answer for the query; no caching is applied.
    pub async fn stream_query(&self, query: &str) -> ChunkStream {
        self.llm.generate_chunk(query).await
    }
}

/// Truncates a string for log output.
fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::config::LlmConfig;
    use crate::services::vector::{InMemoryVectorIndex, VectorDocument};
    use futures_util::StreamExt;

    fn service() -> RetrievalService {
        RetrievalService::new(
            Arc::new(GeneratorService::new(LlmConfig::default())),
            Arc::new(InMemoryVectorIndex::new()),
            Arc::new(CacheService::new()),
        )
    }

    #[tokio::test]
    async fn test_query_returns_answer_and_sources() {
        let vector = Arc::new(InMemoryVectorIndex::new());
        vector
            .add_documents(vec![VectorDocument {
                id: "doc_1".to_string(),
                content: "care policy overview".to_string(),
                metadata: json!({"source": "care.pdf"}),
            }])
            .await
            .unwrap();

        let service = RetrievalService::new(
            Arc::new(GeneratorService::new(LlmConfig::default())),
            vector,
            Arc::new(CacheService::new()),
        );

        let outcome = service.query("care policy", 3).await.unwrap();
        assert_eq!(outcome.query, "care policy");
        assert!(!outcome.answer.is_empty());
        assert_eq!(outcome.sources.len(), 1);
        assert_eq!(outcome.sources[0].id, "doc_1");
    }

    #[tokio::test]
    async fn test_query_caches_by_query_and_top_k() {
        let cache = Arc::new(CacheService::new());
        let service = RetrievalService::new(
            Arc::new(GeneratorService::new(LlmConfig::default())),
            Arc::new(InMemoryVectorIndex::new()),
            cache.clone(),
        );

        let first = service.query("question", 3).await.unwrap();
        let second = service.query("question", 3).await.unwrap();
        assert_eq!(first.answer, second.answer);

        let key = fingerprint_key("rag_query", &json!({"args": ["question"], "top_k": 3}));
        assert!(cache.exists(&key));

        // A different top_k misses the cache.
        let other_key = fingerprint_key("rag_query", &json!({"args": ["question"], "top_k": 5}));
        assert!(!cache.exists(&other_key));
    }

    #[tokio::test]
    async fn test_stream_query_yields_chunks() {
        let service = service();
        let mut stream = service.stream_query("question").await;
        let mut chunks = Vec::new();
        while let Some(chunk) = stream.next().await {
            chunks.push(chunk.unwrap());
        }
        assert!(!chunks.is_empty());
        assert!(chunks.concat().contains("Stub"));
    }
}
