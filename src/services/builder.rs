//! Graph construction from document text.
//!
//! The builder turns `(text, document_id, optional type whitelist)` into
//! persisted graph state: extracted entities, a synthetic `Document`
//! entity, one `CONTAINS` edge from the document to every extracted
//! entity, and whatever typed relations the extractor finds.

use crate::models::{Entity, IngestReport, Relation, BatchIngestReport, CONTAINS_RELATION, DOCUMENT_ENTITY_TYPE};
use crate::services::extraction::EntityExtractor;
use crate::storage::GraphStore;
use crate::Result;
use std::sync::Arc;

/// A document submitted for batch ingest.
#[derive(Debug, Clone)]
pub struct DocumentInput {
    /// Document id.
    pub id: String,
    /// Document text.
    pub content: String,
}

/// Builds and maintains graph state from documents.
pub struct GraphBuilder {
    graph: Arc<dyn GraphStore>,
    extractor: Arc<EntityExtractor>,
}

impl GraphBuilder {
    /// Creates a builder over the given store and extractor.
    #[must_use]
    pub fn new(graph: Arc<dyn GraphStore>, extractor: Arc<EntityExtractor>) -> Self {
        Self { graph, extractor }
    }

    /// Ingests a document: extracts entities and relations and persists
    /// them together with the document entity and its `CONTAINS` edges.
    ///
    /// Empty text produces an empty report and writes nothing. Failure to
    /// persist an individual entity or relation is counted and logged, not
    /// fatal.
    ///
    /// # Errors
    ///
    /// Returns an error if extraction fails outright.
    pub async fn build_from_text(
        &self,
        text: &str,
        document_id: &str,
        entity_types: Option<&[String]>,
        source: Option<&str>,
    ) -> Result<IngestReport> {
        tracing::info!(document_id = %document_id, "building graph from text");

        if text.trim().is_empty() {
            return Ok(IngestReport {
                document_id: document_id.to_string(),
                entities_count: 0,
                relations_count: 0,
                entities: Vec::new(),
                relations: Vec::new(),
            });
        }

        // 1. Extract entities.
        let mut entities = self.extractor.extract_entities(text, entity_types).await?;

        // 2. Append the synthetic document entity.
        let document_name = source.map_or_else(
            || format!("Document_{document_id}"),
            ToString::to_string,
        );
        entities.push(
            Entity::new(DOCUMENT_ENTITY_TYPE, document_name)
                .with_id(document_id)
                .with_property("source", source.unwrap_or("graph_builder")),
        );

        // 3. Persist entities, keeping those actually stored.
        let mut saved_entities: Vec<Entity> = Vec::new();
        for entity in entities {
            match self.graph.add_entity(&entity).await {
                Ok(true) => saved_entities.push(entity),
                Ok(false) => {
                    tracing::warn!(entity_id = %entity.id, "entity not persisted");
                },
                Err(e) => {
                    tracing::warn!(entity_id = %entity.id, error = %e, "failed to persist entity");
                },
            }
        }

        // 4. Extract typed relations over the persisted entity set.
        let mut relations = self
            .extractor
            .extract_relations(text, &saved_entities)
            .await?;

        // 5. Synthesize one CONTAINS edge per extracted entity.
        for entity in &saved_entities {
            if entity.id != document_id {
                relations.push(
                    Relation::new(document_id, &entity.id, CONTAINS_RELATION)
                        .with_id(format!("{document_id}_contains_{}", entity.id))
                        .with_property("extracted_from", "document"),
                );
            }
        }

        // 6. Persist relations, counting failures separately.
        let mut saved_relations: Vec<String> = Vec::new();
        let mut failed_relations = 0usize;
        for relation in &relations {
            match self.graph.add_relation(relation).await {
                Ok(true) => saved_relations.push(relation.id.clone()),
                Ok(false) => failed_relations += 1,
                Err(e) => {
                    failed_relations += 1;
                    tracing::warn!(relation_id = %relation.id, error = %e, "failed to persist relation");
                },
            }
        }
        if failed_relations > 0 {
            tracing::warn!(
                document_id = %document_id,
                failed = failed_relations,
                "some relations were not persisted"
            );
        }

        tracing::info!(
            document_id = %document_id,
            entities = saved_entities.len(),
            relations = saved_relations.len(),
            "graph built"
        );

        Ok(IngestReport {
            document_id: document_id.to_string(),
            entities_count: saved_entities.len(),
            relations_count: saved_relations.len(),
            entities: saved_entities.into_iter().map(|e| e.id).collect(),
            relations: saved_relations,
        })
    }

    /// Re-ingests a document: deletes the document entity (cascading into
    /// its relations) and rebuilds from the new text.
    ///
    /// # Errors
    ///
    /// Returns an error if the rebuild fails.
    pub async fn update_from_text(&self, text: &str, document_id: &str) -> Result<IngestReport> {
        tracing::info!(document_id = %document_id, "updating graph for document");
        self.graph.delete_entity(document_id).await?;
        self.build_from_text(text, document_id, None, None).await
    }

    /// Ingests a batch of documents sequentially, tallying per-document
    /// success and failure.
    pub async fn build_batch(&self, documents: &[DocumentInput]) -> BatchIngestReport {
        let mut report = BatchIngestReport {
            total_documents: documents.len(),
            ..BatchIngestReport::default()
        };

        for document in documents {
            match self
                .build_from_text(&document.content, &document.id, None, None)
                .await
            {
                Ok(result) => {
                    report.success_count += 1;
                    report.total_entities += result.entities_count;
                    report.total_relations += result.relations_count;
                },
                Err(e) => {
                    tracing::error!(document_id = %document.id, error = %e, "batch ingest failed for document");
                    report.error_count += 1;
                },
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::config::LlmConfig;
    use crate::llm::GeneratorService;
    use crate::models::Direction;
    use crate::storage::InMemoryGraphStore;

    fn builder_with_store() -> (GraphBuilder, Arc<InMemoryGraphStore>) {
        let store = Arc::new(InMemoryGraphStore::new());
        let extractor = Arc::new(EntityExtractor::new(Arc::new(GeneratorService::new(
            LlmConfig::default(),
        ))));
        (
            GraphBuilder::new(store.clone(), extractor),
            store,
        )
    }

    #[tokio::test]
    async fn test_empty_text_builds_nothing() {
        let (builder, store) = builder_with_store();
        let report = builder.build_from_text("", "doc_1", None, None).await.unwrap();
        assert_eq!(report.entities_count, 0);
        assert_eq!(report.relations_count, 0);
        assert_eq!(store.entity_count(), 0);
        assert_eq!(store.relation_count(), 0);
    }

    #[tokio::test]
    async fn test_ingest_creates_document_and_contains_edges() {
        let (builder, store) = builder_with_store();
        let report = builder
            .build_from_text("台北市長期照護政策", "doc_1", None, None)
            .await
            .unwrap();

        assert_eq!(report.document_id, "doc_1");
        assert!(report.entities_count >= 2);
        assert!(report.entities.contains(&"doc_1".to_string()));

        let document = store.get_entity("doc_1").await.unwrap().unwrap();
        assert_eq!(document.entity_type, DOCUMENT_ENTITY_TYPE);
        assert_eq!(document.name, "Document_doc_1");

        // Every extracted entity hangs off the document via CONTAINS.
        let contained = store
            .get_neighbors("doc_1", Some(CONTAINS_RELATION), Direction::Outgoing)
            .await
            .unwrap();
        assert_eq!(contained.len(), report.entities_count - 1);

        // Synthetic edge ids are deterministic.
        let first = &contained[0];
        assert!(store
            .get_relation(&format!("doc_1_contains_{}", first.id))
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_source_names_document() {
        let (builder, store) = builder_with_store();
        builder
            .build_from_text("照護服務說明", "doc_2", None, Some("care.pdf"))
            .await
            .unwrap();
        let document = store.get_entity("doc_2").await.unwrap().unwrap();
        assert_eq!(document.name, "care.pdf");
        assert_eq!(
            document.properties.get("source").and_then(|v| v.as_str()),
            Some("care.pdf")
        );
    }

    #[tokio::test]
    async fn test_update_replaces_previous_ingest() {
        let (builder, store) = builder_with_store();
        builder
            .build_from_text("台北市長期照護政策", "doc_1", None, None)
            .await
            .unwrap();
        let before = store.entity_count();
        assert!(before > 0);

        let report = builder
            .update_from_text("新竹市幼兒服務", "doc_1")
            .await
            .unwrap();
        assert!(report.entities_count > 0);

        // Old CONTAINS edges are gone; the remaining ones all belong to the
        // fresh ingest.
        let relations = store
            .get_relations_by_entity("doc_1", Direction::Outgoing)
            .await
            .unwrap();
        assert_eq!(relations.len(), report.entities_count - 1);
    }

    #[tokio::test]
    async fn test_batch_tallies_documents() {
        let (builder, _store) = builder_with_store();
        let documents = vec![
            DocumentInput {
                id: "doc_a".to_string(),
                content: "台北市社福政策".to_string(),
            },
            DocumentInput {
                id: "doc_b".to_string(),
                content: "Kaohsiung Harbor expansion".to_string(),
            },
        ];
        let report = builder.build_batch(&documents).await;
        assert_eq!(report.total_documents, 2);
        assert_eq!(report.success_count, 2);
        assert_eq!(report.error_count, 0);
        assert!(report.total_entities > 0);
    }
}
