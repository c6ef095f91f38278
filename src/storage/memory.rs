//! In-memory graph store.
//!
//! The reference implementation of [`GraphStore`]: fast, non-persistent,
//! used by tests and as the behavioral baseline for the `SQLite` backend.

use crate::models::{Direction, Entity, GraphStatistics, Relation};
use crate::storage::GraphStore;
use crate::Result;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::RwLock;

/// In-memory graph state guarded by one lock.
#[derive(Debug, Default)]
struct GraphState {
    entities: HashMap<String, Entity>,
    relations: HashMap<String, Relation>,
    /// entity id → ids of incident relations (both directions).
    entity_relations: HashMap<String, Vec<String>>,
}

/// In-memory [`GraphStore`] backend.
///
/// Uses an `RwLock` for reader-writer semantics; mutation is non-suspending
/// and serialized by the lock. Data is not persisted between runs.
#[derive(Debug, Default)]
pub struct InMemoryGraphStore {
    state: RwLock<GraphState>,
}

impl InMemoryGraphStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored entities.
    #[must_use]
    pub fn entity_count(&self) -> usize {
        self.read().entities.len()
    }

    /// Returns the number of stored relations.
    #[must_use]
    pub fn relation_count(&self) -> usize {
        self.read().relations.len()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, GraphState> {
        match self.state.read() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::warn!("in-memory graph lock was poisoned, recovering");
                poisoned.into_inner()
            },
        }
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, GraphState> {
        match self.state.write() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::warn!("in-memory graph lock was poisoned, recovering");
                poisoned.into_inner()
            },
        }
    }

    /// Removes a relation and its index entries. Returns `true` if present.
    fn remove_relation(state: &mut GraphState, relation_id: &str) -> bool {
        let Some(relation) = state.relations.remove(relation_id) else {
            return false;
        };
        for endpoint in [&relation.source_id, &relation.target_id] {
            if let Some(ids) = state.entity_relations.get_mut(endpoint) {
                ids.retain(|id| id != relation_id);
            }
        }
        true
    }
}

#[async_trait]
impl GraphStore for InMemoryGraphStore {
    async fn add_entity(&self, entity: &Entity) -> Result<bool> {
        let mut state = self.write();
        let mut stored = entity.clone();
        stored.updated_at = Utc::now();
        state
            .entity_relations
            .entry(stored.id.clone())
            .or_default();
        state.entities.insert(stored.id.clone(), stored);
        Ok(true)
    }

    async fn get_entity(&self, id: &str) -> Result<Option<Entity>> {
        Ok(self.read().entities.get(id).cloned())
    }

    async fn delete_entity(&self, id: &str) -> Result<bool> {
        let mut state = self.write();
        if !state.entities.contains_key(id) {
            return Ok(false);
        }
        let incident = state.entity_relations.get(id).cloned().unwrap_or_default();
        for relation_id in incident {
            Self::remove_relation(&mut state, &relation_id);
        }
        state.entities.remove(id);
        state.entity_relations.remove(id);
        Ok(true)
    }

    async fn add_relation(&self, relation: &Relation) -> Result<bool> {
        if relation.is_self_loop() {
            tracing::warn!(relation_id = %relation.id, "rejecting self-loop relation");
            return Ok(false);
        }
        let mut state = self.write();
        if !state.entities.contains_key(&relation.source_id)
            || !state.entities.contains_key(&relation.target_id)
        {
            tracing::warn!(
                relation_id = %relation.id,
                "source or target entity not found for relation"
            );
            return Ok(false);
        }

        // Upsert: drop any previous version of this relation id first so the
        // endpoint index never holds stale entries.
        Self::remove_relation(&mut state, &relation.id);

        state
            .relations
            .insert(relation.id.clone(), relation.clone());
        for endpoint in [&relation.source_id, &relation.target_id] {
            state
                .entity_relations
                .entry(endpoint.clone())
                .or_default()
                .push(relation.id.clone());
        }
        Ok(true)
    }

    async fn get_relation(&self, id: &str) -> Result<Option<Relation>> {
        Ok(self.read().relations.get(id).cloned())
    }

    async fn delete_relation(&self, id: &str) -> Result<bool> {
        let mut state = self.write();
        Ok(Self::remove_relation(&mut state, id))
    }

    async fn get_entities_by_type(&self, entity_type: &str, limit: usize) -> Result<Vec<Entity>> {
        Ok(self
            .read()
            .entities
            .values()
            .filter(|entity| entity.entity_type == entity_type)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn search_entities(&self, query: &str, limit: usize) -> Result<Vec<Entity>> {
        let needle = query.to_lowercase();
        let mut results = Vec::new();
        for entity in self.read().entities.values() {
            if entity.name.to_lowercase().contains(&needle)
                || entity.entity_type.to_lowercase().contains(&needle)
            {
                results.push(entity.clone());
                if results.len() >= limit {
                    break;
                }
            }
        }
        Ok(results)
    }

    async fn get_neighbors(
        &self,
        entity_id: &str,
        relation_type: Option<&str>,
        direction: Direction,
    ) -> Result<Vec<Entity>> {
        let state = self.read();
        let mut neighbors: Vec<Entity> = Vec::new();
        let relation_ids = state
            .entity_relations
            .get(entity_id)
            .cloned()
            .unwrap_or_default();

        for relation_id in relation_ids {
            let Some(relation) = state.relations.get(&relation_id) else {
                continue;
            };
            if let Some(wanted) = relation_type {
                if relation.relation_type != wanted {
                    continue;
                }
            }

            if direction.includes_outgoing() && relation.source_id == entity_id {
                if let Some(neighbor) = state.entities.get(&relation.target_id) {
                    if !neighbors.iter().any(|n| n.id == neighbor.id) {
                        neighbors.push(neighbor.clone());
                    }
                }
            }
            if direction.includes_incoming() && relation.target_id == entity_id {
                if let Some(neighbor) = state.entities.get(&relation.source_id) {
                    if !neighbors.iter().any(|n| n.id == neighbor.id) {
                        neighbors.push(neighbor.clone());
                    }
                }
            }
        }

        Ok(neighbors)
    }

    async fn get_relations_by_entity(
        &self,
        entity_id: &str,
        direction: Direction,
    ) -> Result<Vec<Relation>> {
        let state = self.read();
        let mut relations = Vec::new();
        for relation_id in state
            .entity_relations
            .get(entity_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
        {
            let Some(relation) = state.relations.get(relation_id) else {
                continue;
            };
            let matches = match direction {
                Direction::Both => true,
                Direction::Outgoing => relation.source_id == entity_id,
                Direction::Incoming => relation.target_id == entity_id,
            };
            if matches {
                relations.push(relation.clone());
            }
        }
        Ok(relations)
    }

    async fn get_relations_by_type(
        &self,
        relation_type: &str,
        limit: usize,
    ) -> Result<Vec<Relation>> {
        Ok(self
            .read()
            .relations
            .values()
            .filter(|relation| relation.relation_type == relation_type)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn get_statistics(&self) -> Result<GraphStatistics> {
        let state = self.read();
        let mut entity_types: HashMap<String, usize> = HashMap::new();
        for entity in state.entities.values() {
            *entity_types.entry(entity.entity_type.clone()).or_default() += 1;
        }
        let mut relation_types: HashMap<String, usize> = HashMap::new();
        for relation in state.relations.values() {
            *relation_types
                .entry(relation.relation_type.clone())
                .or_default() += 1;
        }
        Ok(GraphStatistics {
            total_entities: state.entities.len(),
            total_relations: state.relations.len(),
            entity_types,
            relation_types,
        })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    fn entity(id: &str, entity_type: &str, name: &str) -> Entity {
        Entity::new(entity_type, name).with_id(id)
    }

    #[tokio::test]
    async fn test_add_and_get_entity() {
        let store = InMemoryGraphStore::new();
        let e = entity("e1", "Person", "Alice");
        assert!(store.add_entity(&e).await.unwrap());

        let fetched = store.get_entity("e1").await.unwrap().unwrap();
        assert_eq!(fetched.name, "Alice");
        assert_eq!(fetched.entity_type, "Person");
        assert_eq!(fetched.created_at, e.created_at);
    }

    #[tokio::test]
    async fn test_add_relation_requires_endpoints() {
        let store = InMemoryGraphStore::new();
        store
            .add_entity(&entity("a", "Concept", "a"))
            .await
            .unwrap();

        let dangling = Relation::new("a", "missing", "RELATED_TO");
        assert!(!store.add_relation(&dangling).await.unwrap());
        assert_eq!(store.relation_count(), 0);
    }

    #[tokio::test]
    async fn test_add_relation_rejects_self_loop() {
        let store = InMemoryGraphStore::new();
        store
            .add_entity(&entity("a", "Concept", "a"))
            .await
            .unwrap();

        let loop_rel = Relation::new("a", "a", "RELATED_TO");
        assert!(!store.add_relation(&loop_rel).await.unwrap());
    }

    #[tokio::test]
    async fn test_cascade_delete() {
        let store = InMemoryGraphStore::new();
        for id in ["a", "b", "c"] {
            store
                .add_entity(&entity(id, "Concept", id))
                .await
                .unwrap();
        }
        store
            .add_relation(&Relation::new("a", "b", "RELATED_TO").with_id("r_ab"))
            .await
            .unwrap();
        store
            .add_relation(&Relation::new("b", "c", "RELATED_TO").with_id("r_bc"))
            .await
            .unwrap();
        store
            .add_relation(&Relation::new("a", "c", "RELATED_TO").with_id("r_ac"))
            .await
            .unwrap();

        assert!(store.delete_entity("a").await.unwrap());

        assert_eq!(store.relation_count(), 1);
        assert!(store.get_relation("r_bc").await.unwrap().is_some());
        assert!(store.get_relation("r_ab").await.unwrap().is_none());
        assert!(store.get_relation("r_ac").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_relation_upsert_reindexes_endpoints() {
        let store = InMemoryGraphStore::new();
        for id in ["a", "b", "c"] {
            store
                .add_entity(&entity(id, "Concept", id))
                .await
                .unwrap();
        }
        store
            .add_relation(&Relation::new("a", "b", "RELATED_TO").with_id("r1"))
            .await
            .unwrap();
        // Same id, different endpoints.
        store
            .add_relation(&Relation::new("a", "c", "RELATED_TO").with_id("r1"))
            .await
            .unwrap();

        let b_rels = store
            .get_relations_by_entity("b", Direction::Both)
            .await
            .unwrap();
        assert!(b_rels.is_empty());
        let c_rels = store
            .get_relations_by_entity("c", Direction::Both)
            .await
            .unwrap();
        assert_eq!(c_rels.len(), 1);
    }

    #[tokio::test]
    async fn test_search_entities_matches_name_or_type() {
        let store = InMemoryGraphStore::new();
        store
            .add_entity(&entity("e1", "Organization", "Acme Corp"))
            .await
            .unwrap();
        store
            .add_entity(&entity("e2", "Concept", "acme protocol"))
            .await
            .unwrap();
        store
            .add_entity(&entity("e3", "Concept", "unrelated"))
            .await
            .unwrap();

        let hits = store.search_entities("ACME", 10).await.unwrap();
        assert_eq!(hits.len(), 2);

        let by_type = store.search_entities("organization", 10).await.unwrap();
        assert_eq!(by_type.len(), 1);
        assert_eq!(by_type[0].id, "e1");
    }

    #[tokio::test]
    async fn test_get_neighbors_directions() {
        let store = InMemoryGraphStore::new();
        for id in ["a", "b", "c"] {
            store
                .add_entity(&entity(id, "Concept", id))
                .await
                .unwrap();
        }
        store
            .add_relation(&Relation::new("a", "b", "CONTAINS"))
            .await
            .unwrap();
        store
            .add_relation(&Relation::new("c", "a", "CONTAINS"))
            .await
            .unwrap();

        let outgoing = store
            .get_neighbors("a", None, Direction::Outgoing)
            .await
            .unwrap();
        assert_eq!(outgoing.len(), 1);
        assert_eq!(outgoing[0].id, "b");

        let incoming = store
            .get_neighbors("a", None, Direction::Incoming)
            .await
            .unwrap();
        assert_eq!(incoming.len(), 1);
        assert_eq!(incoming[0].id, "c");

        let both = store
            .get_neighbors("a", None, Direction::Both)
            .await
            .unwrap();
        assert_eq!(both.len(), 2);

        let filtered = store
            .get_neighbors("a", Some("MANAGES"), Direction::Both)
            .await
            .unwrap();
        assert!(filtered.is_empty());
    }

    #[tokio::test]
    async fn test_statistics_counts_by_type() {
        let store = InMemoryGraphStore::new();
        store
            .add_entity(&entity("a", "Person", "Alice"))
            .await
            .unwrap();
        store
            .add_entity(&entity("b", "Person", "Bob"))
            .await
            .unwrap();
        store
            .add_entity(&entity("d", "Document", "doc"))
            .await
            .unwrap();
        store
            .add_relation(&Relation::new("d", "a", "CONTAINS"))
            .await
            .unwrap();

        let stats = store.get_statistics().await.unwrap();
        assert_eq!(stats.total_entities, 3);
        assert_eq!(stats.total_relations, 1);
        assert_eq!(stats.entity_types.get("Person"), Some(&2));
        assert_eq!(stats.relation_types.get("CONTAINS"), Some(&1));
    }

    #[tokio::test]
    async fn test_get_path_on_chain() {
        let store = InMemoryGraphStore::new();
        for i in 0..10 {
            store
                .add_entity(&entity(&format!("E{i}"), "Concept", &format!("E{i}")))
                .await
                .unwrap();
        }
        for i in 0..9 {
            store
                .add_relation(&Relation::new(
                    format!("E{i}"),
                    format!("E{}", i + 1),
                    "NEXT",
                ))
                .await
                .unwrap();
        }

        let too_short = store.get_path("E0", "E9", 3).await.unwrap();
        assert!(too_short.is_empty());

        let exact = store.get_path("E0", "E9", 9).await.unwrap();
        assert_eq!(exact.len(), 1);
        assert_eq!(exact[0].len(), 10);
        assert_eq!(exact[0][0], "E0");
        assert_eq!(exact[0][9], "E9");
    }

    #[tokio::test]
    async fn test_get_path_same_node() {
        let store = InMemoryGraphStore::new();
        store
            .add_entity(&entity("x", "Concept", "x"))
            .await
            .unwrap();
        let paths = store.get_path("x", "x", 5).await.unwrap();
        assert_eq!(paths, vec![vec!["x".to_string()]]);
    }

    #[tokio::test]
    async fn test_subgraph_includes_boundary_edges() {
        let store = InMemoryGraphStore::new();
        for id in ["a", "b", "c"] {
            store
                .add_entity(&entity(id, "Concept", id))
                .await
                .unwrap();
        }
        store
            .add_relation(&Relation::new("a", "b", "NEXT").with_id("r_ab"))
            .await
            .unwrap();
        store
            .add_relation(&Relation::new("b", "c", "NEXT").with_id("r_bc"))
            .await
            .unwrap();

        let snapshot = store
            .get_subgraph(&["a".to_string()], 1)
            .await
            .unwrap();
        let ids: Vec<&str> = snapshot.entities.iter().map(|e| e.id.as_str()).collect();
        // depth 1 reaches b; c stays outside, but b's edge to c is emitted.
        assert!(ids.contains(&"a"));
        assert!(ids.contains(&"b"));
        assert!(!ids.contains(&"c"));
        assert_eq!(snapshot.relations.len(), 2);
    }
}
