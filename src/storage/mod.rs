//! Graph store trait and backends.
//!
//! The graph layer provides durable CRUD and traversal over entities and
//! relations, plus aggregate statistics.
//!
//! # Available Implementations
//!
//! | Backend | Use Case | Notes |
//! |---------|----------|-------|
//! | [`SqliteGraphStore`] | Default; embedded single-file | WAL mode, cascade deletes |
//! | [`InMemoryGraphStore`] | Reference and testing | `RwLock`ed maps, no persistence |
//!
//! Both backends must pass the same contract test suite
//! (`tests/graph_store_contract.rs`); the in-memory store is the reference.
//!
//! # Implementor Notes
//!
//! - Methods take `&self` so stores can be shared as `Arc<dyn GraphStore>`;
//!   use interior mutability for mutable state.
//! - The storage backend serializes writes; readers may proceed
//!   concurrently.
//! - `get_path` and `get_subgraph` are provided in terms of the primitive
//!   operations and normally need no override.

mod memory;
mod sqlite;

pub use memory::InMemoryGraphStore;
pub use sqlite::SqliteGraphStore;

use crate::models::{Direction, Entity, GraphSnapshot, GraphStatistics, Relation};
use crate::Result;
use async_trait::async_trait;
use std::collections::{HashSet, VecDeque};

/// Upper bound on the number of paths enumerated by [`GraphStore::get_path`].
pub const MAX_ENUMERATED_PATHS: usize = 100;

/// Trait for graph store backends.
///
/// All operations return structured results; backends translate their
/// internal failures into [`crate::Error::OperationFailed`] rather than
/// letting them escape as panics.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Upserts an entity by id, refreshing its `updated_at` timestamp.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn add_entity(&self, entity: &Entity) -> Result<bool>;

    /// Retrieves an entity by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup fails.
    async fn get_entity(&self, id: &str) -> Result<Option<Entity>>;

    /// Deletes an entity by id, cascading to every incident relation.
    ///
    /// Returns `true` if the entity existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the deletion fails.
    async fn delete_entity(&self, id: &str) -> Result<bool>;

    /// Upserts a relation by id.
    ///
    /// Returns `false` without storing anything when the relation is a
    /// self-loop or either endpoint does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn add_relation(&self, relation: &Relation) -> Result<bool>;

    /// Retrieves a relation by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup fails.
    async fn get_relation(&self, id: &str) -> Result<Option<Relation>>;

    /// Deletes a relation by id. Returns `true` if it existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the deletion fails.
    async fn delete_relation(&self, id: &str) -> Result<bool>;

    /// Lists entities with the given type tag, up to `limit`.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    async fn get_entities_by_type(&self, entity_type: &str, limit: usize) -> Result<Vec<Entity>>;

    /// Case-insensitive substring search over entity `name` OR `type`.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    async fn search_entities(&self, query: &str, limit: usize) -> Result<Vec<Entity>>;

    /// Returns the neighbors of an entity, deduplicated by entity id.
    ///
    /// `relation_type` restricts traversal to edges with that tag;
    /// `direction` selects which incident edges to cross. Order is
    /// unspecified.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    async fn get_neighbors(
        &self,
        entity_id: &str,
        relation_type: Option<&str>,
        direction: Direction,
    ) -> Result<Vec<Entity>>;

    /// Returns the relations incident to an entity in the given direction.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    async fn get_relations_by_entity(
        &self,
        entity_id: &str,
        direction: Direction,
    ) -> Result<Vec<Relation>>;

    /// Lists relations with the given type tag, up to `limit`.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    async fn get_relations_by_type(
        &self,
        relation_type: &str,
        limit: usize,
    ) -> Result<Vec<Relation>>;

    /// Returns aggregate entity and relation counts, per type.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    async fn get_statistics(&self) -> Result<GraphStatistics>;

    /// Flushes and releases backend resources.
    ///
    /// Called on graceful shutdown under a bounded timeout; the default is
    /// a no-op for backends with nothing to flush.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be closed cleanly.
    async fn close(&self) -> Result<()> {
        Ok(())
    }

    /// Enumerates simple paths from `source_id` to `target_id` as id
    /// sequences, following outgoing edges only.
    ///
    /// A bounded breadth-first walk: a node is expanded at most once, so the
    /// result set is finite and dominated by shortest simple paths. Each
    /// returned path has at most `max_hops` hops. Enumeration stops once
    /// [`MAX_ENUMERATED_PATHS`] paths are found. `source_id == target_id`
    /// returns the singleton path immediately.
    ///
    /// # Errors
    ///
    /// Returns an error if a neighbor lookup fails.
    async fn get_path(
        &self,
        source_id: &str,
        target_id: &str,
        max_hops: usize,
    ) -> Result<Vec<Vec<String>>> {
        if source_id == target_id {
            return Ok(vec![vec![source_id.to_string()]]);
        }

        let mut paths: Vec<Vec<String>> = Vec::new();
        let mut visited: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<(String, Vec<String>)> = VecDeque::new();
        queue.push_back((source_id.to_string(), vec![source_id.to_string()]));

        while let Some((current, path)) = queue.pop_front() {
            if paths.len() >= MAX_ENUMERATED_PATHS {
                break;
            }
            if path.len() > max_hops {
                continue;
            }
            if !visited.insert(current.clone()) {
                continue;
            }

            let neighbors = self
                .get_neighbors(&current, None, Direction::Outgoing)
                .await?;
            for neighbor in neighbors {
                if neighbor.id == target_id {
                    let mut found = path.clone();
                    found.push(neighbor.id);
                    paths.push(found);
                } else if !path.contains(&neighbor.id) {
                    let mut extended = path.clone();
                    extended.push(neighbor.id.clone());
                    queue.push_back((neighbor.id, extended));
                }
            }
        }

        Ok(paths)
    }

    /// Expands a subgraph around the seed entities up to `max_depth`,
    /// crossing edges in either direction.
    ///
    /// Every visited entity is included; every relation incident to a
    /// visited entity is included exactly once. Entities beyond `max_depth`
    /// are not included even when a boundary node's edge reaches them; the
    /// edge itself is still emitted.
    ///
    /// # Errors
    ///
    /// Returns an error if an entity or relation lookup fails.
    async fn get_subgraph(&self, seed_ids: &[String], max_depth: usize) -> Result<GraphSnapshot> {
        let mut visited: HashSet<String> = HashSet::new();
        let mut included_ids: Vec<String> = Vec::new();
        let mut seen_relations: HashSet<String> = HashSet::new();
        let mut relations: Vec<Relation> = Vec::new();

        let mut queue: VecDeque<(String, usize)> =
            seed_ids.iter().map(|id| (id.clone(), 0)).collect();

        while let Some((entity_id, depth)) = queue.pop_front() {
            if depth > max_depth || !visited.insert(entity_id.clone()) {
                continue;
            }
            included_ids.push(entity_id.clone());

            let incident = self
                .get_relations_by_entity(&entity_id, Direction::Both)
                .await?;
            for relation in incident {
                let next_id = if relation.source_id == entity_id {
                    relation.target_id.clone()
                } else {
                    relation.source_id.clone()
                };
                if seen_relations.insert(relation.id.clone()) {
                    relations.push(relation);
                }
                if depth < max_depth && !visited.contains(&next_id) {
                    queue.push_back((next_id, depth + 1));
                }
            }
        }

        let mut entities = Vec::with_capacity(included_ids.len());
        for id in included_ids {
            if let Some(entity) = self.get_entity(&id).await? {
                entities.push(entity);
            }
        }

        Ok(GraphSnapshot {
            entities,
            relations,
        })
    }
}
