//! Graph store contract tests.
//!
//! Every invariant here runs against both backends: the in-memory
//! reference implementation and the persistent `SQLite` store.

// Integration tests use unwrap for brevity - panics are acceptable in tests
#![allow(clippy::unwrap_used)]

use graphrag::models::{Direction, Entity, Relation};
use graphrag::storage::{GraphStore, InMemoryGraphStore, SqliteGraphStore};
use std::sync::Arc;

fn backends() -> Vec<(&'static str, Arc<dyn GraphStore>)> {
    vec![
        ("memory", Arc::new(InMemoryGraphStore::new())),
        (
            "sqlite",
            Arc::new(SqliteGraphStore::in_memory().unwrap()),
        ),
    ]
}

fn entity(id: &str, entity_type: &str, name: &str) -> Entity {
    Entity::new(entity_type, name).with_id(id)
}

#[tokio::test]
async fn entity_round_trip() {
    for (backend, store) in backends() {
        let original = entity("e1", "Person", "張三").with_property("role", "醫生");
        assert!(store.add_entity(&original).await.unwrap(), "{backend}");

        let fetched = store.get_entity("e1").await.unwrap().unwrap();
        assert_eq!(fetched.id, original.id, "{backend}");
        assert_eq!(fetched.name, original.name, "{backend}");
        assert_eq!(fetched.entity_type, original.entity_type, "{backend}");
        assert_eq!(fetched.properties, original.properties, "{backend}");

        assert!(store.delete_entity("e1").await.unwrap(), "{backend}");
        assert!(store.get_entity("e1").await.unwrap().is_none(), "{backend}");
    }
}

#[tokio::test]
async fn relations_require_existing_endpoints_and_forbid_self_loops() {
    for (backend, store) in backends() {
        store.add_entity(&entity("a", "Concept", "a")).await.unwrap();
        store.add_entity(&entity("b", "Concept", "b")).await.unwrap();

        // Dangling endpoints are rejected.
        assert!(
            !store
                .add_relation(&Relation::new("a", "ghost", "RELATED_TO"))
                .await
                .unwrap(),
            "{backend}"
        );
        // Self-loops are rejected.
        assert!(
            !store
                .add_relation(&Relation::new("a", "a", "RELATED_TO"))
                .await
                .unwrap(),
            "{backend}"
        );
        // A well-formed relation is accepted and retrievable.
        let relation = Relation::new("a", "b", "RELATED_TO").with_id("r1");
        assert!(store.add_relation(&relation).await.unwrap(), "{backend}");
        let fetched = store.get_relation("r1").await.unwrap().unwrap();
        assert_eq!(fetched.source_id, "a", "{backend}");
        assert_eq!(fetched.target_id, "b", "{backend}");
        assert_ne!(fetched.source_id, fetched.target_id, "{backend}");
    }
}

#[tokio::test]
async fn cascade_delete_removes_incident_relations() {
    for (backend, store) in backends() {
        for id in ["a", "b", "c"] {
            store.add_entity(&entity(id, "Concept", id)).await.unwrap();
        }
        store
            .add_relation(&Relation::new("a", "b", "R").with_id("r_ab"))
            .await
            .unwrap();
        store
            .add_relation(&Relation::new("b", "c", "R").with_id("r_bc"))
            .await
            .unwrap();
        store
            .add_relation(&Relation::new("a", "c", "R").with_id("r_ac"))
            .await
            .unwrap();

        assert!(store.delete_entity("a").await.unwrap(), "{backend}");

        // Exactly one relation survives: b → c.
        assert!(store.get_relation("r_ab").await.unwrap().is_none(), "{backend}");
        assert!(store.get_relation("r_ac").await.unwrap().is_none(), "{backend}");
        assert!(store.get_relation("r_bc").await.unwrap().is_some(), "{backend}");
        let stats = store.get_statistics().await.unwrap();
        assert_eq!(stats.total_relations, 1, "{backend}");

        // No relation still references the deleted entity.
        assert!(
            store
                .get_relations_by_entity("a", Direction::Both)
                .await
                .unwrap()
                .is_empty(),
            "{backend}"
        );
    }
}

#[tokio::test]
async fn search_matches_name_or_type_case_insensitively() {
    for (backend, store) in backends() {
        store
            .add_entity(&entity("e1", "Organization", "Acme Corp"))
            .await
            .unwrap();
        store
            .add_entity(&entity("e2", "Concept", "acme protocol"))
            .await
            .unwrap();
        store
            .add_entity(&entity("e3", "Concept", "长照"))
            .await
            .unwrap();

        let hits = store.search_entities("ACME", 10).await.unwrap();
        assert_eq!(hits.len(), 2, "{backend}");
        for hit in &hits {
            let needle = "acme";
            assert!(
                hit.name.to_lowercase().contains(needle)
                    || hit.entity_type.to_lowercase().contains(needle),
                "{backend}"
            );
        }

        // The limit bounds the result size.
        let limited = store.search_entities("acme", 1).await.unwrap();
        assert_eq!(limited.len(), 1, "{backend}");
    }
}

#[tokio::test]
async fn neighbors_are_deduplicated_by_entity() {
    for (backend, store) in backends() {
        for id in ["hub", "x"] {
            store.add_entity(&entity(id, "Concept", id)).await.unwrap();
        }
        // Two parallel edges to the same neighbor.
        store
            .add_relation(&Relation::new("hub", "x", "A").with_id("r1"))
            .await
            .unwrap();
        store
            .add_relation(&Relation::new("hub", "x", "B").with_id("r2"))
            .await
            .unwrap();

        let neighbors = store
            .get_neighbors("hub", None, Direction::Both)
            .await
            .unwrap();
        assert_eq!(neighbors.len(), 1, "{backend}");

        let relations = store
            .get_relations_by_entity("hub", Direction::Outgoing)
            .await
            .unwrap();
        assert_eq!(relations.len(), 2, "{backend}");
    }
}

#[tokio::test]
async fn relations_by_type_respects_limit() {
    for (backend, store) in backends() {
        for id in ["a", "b", "c", "d"] {
            store.add_entity(&entity(id, "Concept", id)).await.unwrap();
        }
        store
            .add_relation(&Relation::new("a", "b", "LINK"))
            .await
            .unwrap();
        store
            .add_relation(&Relation::new("b", "c", "LINK"))
            .await
            .unwrap();
        store
            .add_relation(&Relation::new("c", "d", "OTHER"))
            .await
            .unwrap();

        let links = store.get_relations_by_type("LINK", 10).await.unwrap();
        assert_eq!(links.len(), 2, "{backend}");
        let limited = store.get_relations_by_type("LINK", 1).await.unwrap();
        assert_eq!(limited.len(), 1, "{backend}");
        assert!(
            store
                .get_relations_by_type("MISSING", 10)
                .await
                .unwrap()
                .is_empty(),
            "{backend}"
        );
    }
}

#[tokio::test]
async fn path_enumeration_bounds() {
    for (backend, store) in backends() {
        // Linear chain of ten entities.
        for i in 0..10 {
            store
                .add_entity(&entity(&format!("E{i}"), "Concept", &format!("E{i}")))
                .await
                .unwrap();
        }
        for i in 0..9 {
            store
                .add_relation(&Relation::new(format!("E{i}"), format!("E{}", i + 1), "NEXT"))
                .await
                .unwrap();
        }

        assert!(
            store.get_path("E0", "E9", 3).await.unwrap().is_empty(),
            "{backend}"
        );

        let paths = store.get_path("E0", "E9", 9).await.unwrap();
        assert_eq!(paths.len(), 1, "{backend}");
        let path = &paths[0];
        assert_eq!(path.first().map(String::as_str), Some("E0"), "{backend}");
        assert_eq!(path.last().map(String::as_str), Some("E9"), "{backend}");
        assert!(path.len() <= 10, "{backend}");
        // Simple path: no repeated node.
        let unique: std::collections::HashSet<&String> = path.iter().collect();
        assert_eq!(unique.len(), path.len(), "{backend}");
    }
}

#[tokio::test]
async fn path_from_node_to_itself() {
    for (backend, store) in backends() {
        store.add_entity(&entity("x", "Concept", "x")).await.unwrap();
        let paths = store.get_path("x", "x", 5).await.unwrap();
        assert_eq!(paths, vec![vec!["x".to_string()]], "{backend}");
    }
}

#[tokio::test]
async fn path_follows_outgoing_edges_only() {
    for (backend, store) in backends() {
        for id in ["a", "b"] {
            store.add_entity(&entity(id, "Concept", id)).await.unwrap();
        }
        store
            .add_relation(&Relation::new("b", "a", "NEXT"))
            .await
            .unwrap();

        // a → b has no outgoing route; b → a does.
        assert!(store.get_path("a", "b", 3).await.unwrap().is_empty(), "{backend}");
        assert_eq!(store.get_path("b", "a", 3).await.unwrap().len(), 1, "{backend}");
    }
}

#[tokio::test]
async fn subgraph_expansion_depth_and_boundary_edges() {
    for (backend, store) in backends() {
        // a — b — c — d chain.
        for id in ["a", "b", "c", "d"] {
            store.add_entity(&entity(id, "Concept", id)).await.unwrap();
        }
        store
            .add_relation(&Relation::new("a", "b", "NEXT").with_id("r_ab"))
            .await
            .unwrap();
        store
            .add_relation(&Relation::new("b", "c", "NEXT").with_id("r_bc"))
            .await
            .unwrap();
        store
            .add_relation(&Relation::new("c", "d", "NEXT").with_id("r_cd"))
            .await
            .unwrap();

        let snapshot = store.get_subgraph(&["a".to_string()], 1).await.unwrap();
        let ids: Vec<&str> = snapshot.entities.iter().map(|e| e.id.as_str()).collect();
        assert!(ids.contains(&"a"), "{backend}");
        assert!(ids.contains(&"b"), "{backend}");
        // c is beyond the depth bound, but the boundary edge b → c is
        // still emitted.
        assert!(!ids.contains(&"c"), "{backend}");
        let relation_ids: Vec<&str> =
            snapshot.relations.iter().map(|r| r.id.as_str()).collect();
        assert!(relation_ids.contains(&"r_ab"), "{backend}");
        assert!(relation_ids.contains(&"r_bc"), "{backend}");
        assert!(!relation_ids.contains(&"r_cd"), "{backend}");
    }
}

#[tokio::test]
async fn subgraph_crosses_edges_in_both_directions() {
    for (backend, store) in backends() {
        for id in ["center", "in", "out"] {
            store.add_entity(&entity(id, "Concept", id)).await.unwrap();
        }
        store
            .add_relation(&Relation::new("in", "center", "POINTS"))
            .await
            .unwrap();
        store
            .add_relation(&Relation::new("center", "out", "POINTS"))
            .await
            .unwrap();

        let snapshot = store
            .get_subgraph(&["center".to_string()], 1)
            .await
            .unwrap();
        let ids: Vec<&str> = snapshot.entities.iter().map(|e| e.id.as_str()).collect();
        assert!(ids.contains(&"in"), "{backend}");
        assert!(ids.contains(&"out"), "{backend}");
        assert_eq!(snapshot.relations.len(), 2, "{backend}");
    }
}

#[tokio::test]
async fn statistics_track_types() {
    for (backend, store) in backends() {
        store
            .add_entity(&entity("d1", "Document", "doc one"))
            .await
            .unwrap();
        store
            .add_entity(&entity("p1", "Person", "Alice"))
            .await
            .unwrap();
        store
            .add_entity(&entity("p2", "Person", "Bob"))
            .await
            .unwrap();
        store
            .add_relation(&Relation::new("d1", "p1", "CONTAINS"))
            .await
            .unwrap();

        let stats = store.get_statistics().await.unwrap();
        assert_eq!(stats.total_entities, 3, "{backend}");
        assert_eq!(stats.total_relations, 1, "{backend}");
        assert_eq!(stats.entity_types.get("Person"), Some(&2), "{backend}");
        assert_eq!(stats.entity_types.get("Document"), Some(&1), "{backend}");
        assert_eq!(stats.relation_types.get("CONTAINS"), Some(&1), "{backend}");
    }
}

#[tokio::test]
async fn entities_by_type_respects_limit() {
    for (backend, store) in backends() {
        for i in 0..5 {
            store
                .add_entity(&entity(&format!("c{i}"), "Concept", &format!("c{i}")))
                .await
                .unwrap();
        }
        let all = store.get_entities_by_type("Concept", 100).await.unwrap();
        assert_eq!(all.len(), 5, "{backend}");
        let limited = store.get_entities_by_type("Concept", 2).await.unwrap();
        assert_eq!(limited.len(), 2, "{backend}");
    }
}

#[tokio::test]
async fn upsert_is_idempotent_by_id() {
    for (backend, store) in backends() {
        let first = entity("e1", "Concept", "before");
        store.add_entity(&first).await.unwrap();

        let mut second = first.clone();
        second.name = "after".to_string();
        store.add_entity(&second).await.unwrap();

        let fetched = store.get_entity("e1").await.unwrap().unwrap();
        assert_eq!(fetched.name, "after", "{backend}");
        let stats = store.get_statistics().await.unwrap();
        assert_eq!(stats.total_entities, 1, "{backend}");
    }
}
