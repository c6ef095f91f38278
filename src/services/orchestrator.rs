//! Query orchestration: fuse vector and graph evidence, score, rank,
//! cache, and stream.
//!
//! # Request flow
//!
//! ```text
//! RECEIVED → CACHE_CHECK → {hit → DONE}
//!                ↓ miss
//!            VECTOR_RETRIEVE → {fail → FAIL}
//!                ↓ ok
//!            GRAPH_ENHANCE → {fail → degrade, log, continue}
//!                ↓
//!            FUSE_AND_RANK → CACHE_STORE → DONE
//! ```
//!
//! Graph enhancement fans out concurrently (entity search plus per-document
//! `CONTAINS` expansion, then per-seed neighbor/relation lookups); results
//! are reassembled in input order. Any failure of the enhancement layer
//! degrades the request to pure vector results; it never fails it.

use crate::config::GraphConfig;
use crate::llm::ChunkStream;
use crate::models::{
    Direction, Entity, QueryOutcome, Relation, Source, CONTAINS_RELATION,
};
use crate::services::cache::{fingerprint_key, CacheService};
use crate::services::retrieval::RetrievalService;
use crate::storage::GraphStore;
use crate::Result;
use futures_util::future::join_all;
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

/// Tuning knobs for graph enhancement.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Maximum entities considered per enhancement stage.
    pub max_entities: usize,
    /// Maximum neighbors pulled in per seed entity.
    pub max_neighbors: usize,
    /// TTL of composite query results.
    pub cache_ttl: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_entities: 5,
            max_neighbors: 3,
            cache_ttl: Duration::from_secs(3600),
        }
    }
}

impl OrchestratorConfig {
    /// Builds the config from the graph section of the app configuration.
    #[must_use]
    pub fn from_graph_config(config: &GraphConfig) -> Self {
        Self {
            max_entities: config.query_max_entities,
            max_neighbors: config.query_max_neighbors,
            cache_ttl: Duration::from_secs(config.cache_ttl_secs),
        }
    }

    /// Sets the entity budget.
    #[must_use]
    pub const fn with_max_entities(mut self, max: usize) -> Self {
        self.max_entities = max;
        self
    }

    /// Sets the per-seed neighbor budget.
    #[must_use]
    pub const fn with_max_neighbors(mut self, max: usize) -> Self {
        self.max_neighbors = max;
        self
    }
}

/// Evidence produced by graph enhancement.
#[derive(Debug, Default)]
struct GraphEnhancement {
    sources: Vec<Source>,
    entities: Vec<Entity>,
    relations: Vec<Relation>,
}

/// Orchestrates graph-augmented retrieval queries.
pub struct Orchestrator {
    retrieval: Arc<RetrievalService>,
    graph: Option<Arc<dyn GraphStore>>,
    cache: Option<Arc<CacheService>>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    /// Creates an orchestrator.
    ///
    /// Without a graph store, queries skip enhancement gracefully; without
    /// a cache, every query recomputes.
    #[must_use]
    pub fn new(
        retrieval: Arc<RetrievalService>,
        graph: Option<Arc<dyn GraphStore>>,
        cache: Option<Arc<CacheService>>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            retrieval,
            graph,
            cache,
            config,
        }
    }

    /// Answers a query, fusing vector retrieval with graph evidence.
    ///
    /// # Errors
    ///
    /// Returns an error if retrieval fails; graph-side failures degrade to
    /// the vector-only result instead.
    pub async fn query(&self, query_text: &str, top_k: usize) -> Result<QueryOutcome> {
        tracing::debug!(query = %truncate(query_text, 100), "graph query started");

        // 1. Outer cache.
        let cache_key = fingerprint_key(
            "graphrag_query",
            &json!({"args": [query_text], "top_k": top_k}),
        );
        if let Some(cache) = &self.cache {
            if let Some(value) = cache.get(&cache_key) {
                if let Ok(outcome) = serde_json::from_value::<QueryOutcome>(value) {
                    tracing::debug!(query = %truncate(query_text, 50), "graph query cache hit");
                    return Ok(outcome);
                }
            }
        }

        // 2. Vector retrieval (has its own inner cache).
        let retrieval = self.retrieval.query(query_text, top_k).await?;
        let mut outcome = QueryOutcome::from_retrieval(retrieval);

        // 3. Graph enhancement, degrading on failure.
        if let Some(graph) = &self.graph {
            match self
                .enhance_with_graph(graph.as_ref(), query_text, &outcome.sources)
                .await
            {
                Ok(enhancement) => {
                    // 4. Fusion: vector wins on id collision, then re-rank
                    // and cut to top_k.
                    if !enhancement.sources.is_empty() {
                        let mut seen: HashSet<String> =
                            outcome.sources.iter().map(|s| s.id.clone()).collect();
                        for source in enhancement.sources {
                            if seen.insert(source.id.clone()) {
                                outcome.sources.push(source);
                            }
                        }
                        outcome.sources.sort_by(|a, b| {
                            b.score
                                .partial_cmp(&a.score)
                                .unwrap_or(std::cmp::Ordering::Equal)
                        });
                        outcome.sources.truncate(top_k);
                        outcome.graph_enhanced = true;
                    }
                    // 5. Attach graph evidence.
                    outcome.graph_entities = enhancement.entities;
                    outcome.graph_relations = enhancement.relations;
                },
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        "graph enhancement failed, falling back to vector search"
                    );
                    metrics::counter!("graphrag_enhancement_degraded_total").increment(1);
                },
            }
        }

        // 6. Outer cache store, only on successful completion.
        if let Some(cache) = &self.cache {
            if let Ok(value) = serde_json::to_value(&outcome) {
                cache.set(&cache_key, value, self.config.cache_ttl);
            }
        }

        tracing::info!(
            sources = outcome.sources.len(),
            graph_enhanced = outcome.graph_enhanced,
            "graph query completed"
        );
        Ok(outcome)
    }

    /// Streams an answer; a passthrough to retrieval streaming.
    ///
    /// Graph enhancement is not applied on the streaming path: graph
    /// context cannot be injected mid-stream without re-prompting.
    pub async fn stream_query(&self, query_text: &str) -> ChunkStream {
        tracing::debug!(query = %truncate(query_text, 100), "graph stream query started");
        self.retrieval.stream_query(query_text).await
    }

    /// Expands vector hits into graph evidence.
    ///
    /// Seed entities come from a semantic entity search over the query and
    /// from `CONTAINS` expansion of vector-retrieved documents; each seed
    /// then contributes its neighbors (as scored pseudo-sources) and its
    /// relations. Item-level lookup failures are skipped; a failure of the
    /// seed search aborts the whole enhancement.
    async fn enhance_with_graph(
        &self,
        graph: &dyn GraphStore,
        query_text: &str,
        vector_sources: &[Source],
    ) -> Result<GraphEnhancement> {
        let doc_ids: Vec<&str> = vector_sources
            .iter()
            .map(|source| source.id.as_str())
            .filter(|id| !id.is_empty())
            .collect();
        if doc_ids.is_empty() {
            return Ok(GraphEnhancement::default());
        }

        let max_entities = self.config.max_entities;

        // Fan out: semantic entity search alongside per-document lookups.
        let doc_lookups = doc_ids.iter().take(max_entities).map(|doc_id| async move {
            let entity = graph.get_entity(doc_id).await;
            let contained = graph
                .get_neighbors(doc_id, Some(CONTAINS_RELATION), Direction::Outgoing)
                .await;
            (entity, contained)
        });
        let (query_entities, doc_results) = tokio::join!(
            graph.search_entities(query_text, max_entities),
            join_all(doc_lookups),
        );
        let query_entities = query_entities?;

        // Merge into an ordered-unique seed set.
        let mut seen: HashSet<String> = HashSet::new();
        let mut entities: Vec<Entity> = Vec::new();
        for entity in query_entities {
            if seen.insert(entity.id.clone()) {
                entities.push(entity);
            }
        }
        for (entity, contained) in doc_results {
            if let Ok(Some(entity)) = entity {
                if seen.insert(entity.id.clone()) {
                    entities.push(entity);
                }
            }
            if let Ok(contained) = contained {
                for entity in contained {
                    if seen.insert(entity.id.clone()) {
                        entities.push(entity);
                    }
                }
            }
        }
        if entities.is_empty() {
            return Ok(GraphEnhancement::default());
        }

        // Fan out again: neighbors and relations per seed entity.
        let seeds: Vec<Entity> = entities.iter().take(max_entities).cloned().collect();
        let expansions = join_all(seeds.iter().map(|seed| async move {
            tokio::join!(
                graph.get_neighbors(&seed.id, None, Direction::Both),
                graph.get_relations_by_entity(&seed.id, Direction::Both),
            )
        }))
        .await;

        let mut sources: Vec<Source> = Vec::new();
        let mut relations: Vec<Relation> = Vec::new();
        let mut seen_relations: HashSet<String> = HashSet::new();

        for (neighbors, seed_relations) in expansions {
            if let Ok(neighbors) = neighbors {
                for neighbor in neighbors.into_iter().take(self.config.max_neighbors) {
                    if seen.insert(neighbor.id.clone()) {
                        let score = entity_relevance_score(&neighbor, query_text);
                        sources.push(Source {
                            id: neighbor.id.clone(),
                            content: neighbor.name.clone(),
                            score,
                            metadata: json!({
                                "source": "graph",
                                "type": neighbor.entity_type,
                                "properties": neighbor.properties,
                            }),
                        });
                        entities.push(neighbor);
                    }
                }
            }
            if let Ok(seed_relations) = seed_relations {
                for relation in seed_relations {
                    if seen_relations.insert(relation.id.clone()) {
                        relations.push(relation);
                    }
                }
            }
        }

        Ok(GraphEnhancement {
            sources,
            entities,
            relations,
        })
    }
}

/// Relevance of an entity to a query, as a dynamic weight in
/// `[0.55, 0.95]`.
///
/// Evaluated case-insensitively, first match wins: exact name, query within
/// name, name within query, word overlap, type substring, property
/// substring, base weight.
#[must_use]
pub fn entity_relevance_score(entity: &Entity, query_text: &str) -> f64 {
    let query = query_text.to_lowercase();
    let name = entity.name.to_lowercase();
    let entity_type = entity.entity_type.to_lowercase();

    if query == name {
        return 0.95;
    }
    if name.contains(&query) {
        return 0.85;
    }
    if query.contains(&name) {
        return 0.80;
    }

    let query_words: HashSet<&str> = query.split_whitespace().collect();
    let name_words: HashSet<&str> = name.split_whitespace().collect();
    let common = query_words.intersection(&name_words).count();
    if common > 0 {
        #[allow(clippy::cast_precision_loss)]
        let ratio = common as f64 / query_words.len().max(1) as f64;
        return 0.20f64.mul_add(ratio, 0.60);
    }

    if entity_type.contains(&query) || query.contains(&entity_type) {
        return 0.65;
    }

    if entity
        .properties
        .values()
        .filter_map(|value| value.as_str())
        .any(|value| value.to_lowercase().contains(&query))
    {
        return 0.70;
    }

    0.55
}

/// Truncates a string for log output.
fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}
