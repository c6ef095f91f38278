//! Property graph types: entities, relations, snapshots, statistics.
//!
//! Entities are named, typed nodes with an open-schema property map.
//! Relations are directed, typed, weighted edges between two entities.
//! Types are short string tags rather than a closed enum so that the
//! extractor can persist whatever the generator produces.
//!
//! # Invariants
//!
//! - An entity id is immutable once assigned.
//! - `(lowercase(name), type)` is the deduplication key within one
//!   extraction batch; colliding properties merge last-write-wins.
//! - A relation never connects an entity to itself, and both endpoints must
//!   exist before the relation is accepted by a store.
//! - Deleting an entity deletes every relation incident to it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// Entity type tag for ingested documents.
pub const DOCUMENT_ENTITY_TYPE: &str = "Document";

/// Relation type tag linking a document to its extracted entities.
pub const CONTAINS_RELATION: &str = "CONTAINS";

/// Entity types accepted by the ingest surface.
pub const KNOWN_ENTITY_TYPES: &[&str] = &[
    "Person",
    "Organization",
    "Location",
    "Document",
    "Concept",
    "Event",
    "Product",
    "Service",
    "Other",
];

/// A node in the property graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Opaque globally-unique id, assigned on creation.
    pub id: String,
    /// Short type tag, e.g. `Person`, `Organization`, `Document`.
    #[serde(rename = "type")]
    pub entity_type: String,
    /// Human-readable label.
    pub name: String,
    /// Open-schema properties.
    #[serde(default)]
    pub properties: Map<String, Value>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
}

impl Entity {
    /// Creates an entity with a generated id and current timestamps.
    #[must_use]
    pub fn new(entity_type: impl Into<String>, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            entity_type: entity_type.into(),
            name: name.into(),
            properties: Map::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Replaces the generated id with a caller-supplied one.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Adds a single property.
    #[must_use]
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Replaces the property map.
    #[must_use]
    pub fn with_properties(mut self, properties: Map<String, Value>) -> Self {
        self.properties = properties;
        self
    }

    /// The deduplication key used within one extraction batch.
    #[must_use]
    pub fn dedup_key(&self) -> (String, String) {
        (self.name.to_lowercase(), self.entity_type.clone())
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.entity_type)
    }
}

/// A directed, typed, weighted edge between two entities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relation {
    /// Opaque id.
    pub id: String,
    /// Id of the source entity.
    pub source_id: String,
    /// Id of the target entity.
    pub target_id: String,
    /// Short type tag, e.g. `CONTAINS`, `LOCATED_IN`, `RELATED_TO`.
    #[serde(rename = "type")]
    pub relation_type: String,
    /// Open-schema properties.
    #[serde(default)]
    pub properties: Map<String, Value>,
    /// Edge weight in `[0.0, 1.0]`. Rule-based extractions carry lower
    /// weights than generator extractions (0.5 pattern, 0.3 co-occurrence).
    #[serde(default = "default_weight")]
    pub weight: f64,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

fn default_weight() -> f64 {
    1.0
}

impl Relation {
    /// Creates a relation with a generated id, weight 1.0, and the current
    /// timestamp.
    #[must_use]
    pub fn new(
        source_id: impl Into<String>,
        target_id: impl Into<String>,
        relation_type: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            source_id: source_id.into(),
            target_id: target_id.into(),
            relation_type: relation_type.into(),
            properties: Map::new(),
            weight: 1.0,
            created_at: Utc::now(),
        }
    }

    /// Replaces the generated id with a caller-supplied one.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Sets the edge weight.
    #[must_use]
    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    /// Adds a single property.
    #[must_use]
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Whether both endpoints are the same entity.
    #[must_use]
    pub fn is_self_loop(&self) -> bool {
        self.source_id == self.target_id
    }
}

/// Direction selector for neighbor and relation queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Edges whose target is the queried entity.
    Incoming,
    /// Edges whose source is the queried entity.
    Outgoing,
    /// Edges in either direction.
    #[default]
    Both,
}

impl Direction {
    /// String form used in logs and query parameters.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Incoming => "incoming",
            Self::Outgoing => "outgoing",
            Self::Both => "both",
        }
    }

    /// Whether outgoing edges are included.
    #[must_use]
    pub const fn includes_outgoing(self) -> bool {
        matches!(self, Self::Outgoing | Self::Both)
    }

    /// Whether incoming edges are included.
    #[must_use]
    pub const fn includes_incoming(self) -> bool {
        matches!(self, Self::Incoming | Self::Both)
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A self-contained subgraph result.
///
/// Produced by neighborhood expansion; relations may reference boundary
/// entities that lie just past the expansion depth.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphSnapshot {
    /// Entities in the snapshot.
    pub entities: Vec<Entity>,
    /// Relations incident to the snapshot's entities.
    pub relations: Vec<Relation>,
}

impl GraphSnapshot {
    /// Whether the snapshot contains no entities and no relations.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.relations.is_empty()
    }
}

/// Aggregate statistics over the graph store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphStatistics {
    /// Total number of entities.
    pub total_entities: usize,
    /// Total number of relations.
    pub total_relations: usize,
    /// Entity count per type tag.
    pub entity_types: HashMap<String, usize>,
    /// Relation count per type tag.
    pub relation_types: HashMap<String, usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_new_assigns_id_and_timestamps() {
        let entity = Entity::new("Concept", "caching");
        assert!(!entity.id.is_empty());
        assert_eq!(entity.entity_type, "Concept");
        assert_eq!(entity.name, "caching");
        assert_eq!(entity.created_at, entity.updated_at);
    }

    #[test]
    fn test_entity_ids_are_unique() {
        let a = Entity::new("Concept", "a");
        let b = Entity::new("Concept", "a");
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_entity_dedup_key_is_case_insensitive() {
        let a = Entity::new("Concept", "Redis");
        let b = Entity::new("Concept", "redis");
        assert_eq!(a.dedup_key(), b.dedup_key());

        let c = Entity::new("Technology", "redis");
        assert_ne!(a.dedup_key(), c.dedup_key());
    }

    #[test]
    fn test_entity_builder_methods() {
        let entity = Entity::new("Document", "report")
            .with_id("doc_1")
            .with_property("source", "api");
        assert_eq!(entity.id, "doc_1");
        assert_eq!(
            entity.properties.get("source").and_then(Value::as_str),
            Some("api")
        );
    }

    #[test]
    fn test_relation_defaults() {
        let rel = Relation::new("a", "b", "RELATED_TO");
        assert!((rel.weight - 1.0).abs() < f64::EPSILON);
        assert!(!rel.is_self_loop());
        assert!(Relation::new("a", "a", "RELATED_TO").is_self_loop());
    }

    #[test]
    fn test_relation_weight_builder() {
        let rel = Relation::new("a", "b", "RELATED_TO").with_weight(0.3);
        assert!((rel.weight - 0.3).abs() < f64::EPSILON);
    }

    #[test]
    fn test_direction_flags() {
        assert!(Direction::Both.includes_incoming());
        assert!(Direction::Both.includes_outgoing());
        assert!(Direction::Incoming.includes_incoming());
        assert!(!Direction::Incoming.includes_outgoing());
        assert!(Direction::Outgoing.includes_outgoing());
        assert!(!Direction::Outgoing.includes_incoming());
    }

    #[test]
    fn test_entity_serde_round_trip() {
        let entity = Entity::new("Person", "Alice").with_property("role", "doctor");
        let json = serde_json::to_string(&entity).unwrap();
        assert!(json.contains("\"type\":\"Person\""));
        let back: Entity = serde_json::from_str(&json).unwrap();
        assert_eq!(back, entity);
    }

    #[test]
    fn test_relation_deserializes_default_weight() {
        let json = r#"{
            "id": "r1",
            "source_id": "a",
            "target_id": "b",
            "type": "CONTAINS",
            "created_at": "2025-01-01T00:00:00Z"
        }"#;
        let rel: Relation = serde_json::from_str(json).unwrap();
        assert!((rel.weight - 1.0).abs() < f64::EPSILON);
        assert!(rel.properties.is_empty());
    }

    #[test]
    fn test_snapshot_is_empty() {
        assert!(GraphSnapshot::default().is_empty());
        let snapshot = GraphSnapshot {
            entities: vec![Entity::new("Concept", "x")],
            relations: Vec::new(),
        };
        assert!(!snapshot.is_empty());
    }
}
