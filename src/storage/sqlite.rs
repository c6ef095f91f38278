//! `SQLite` graph store.
//!
//! Durable single-file implementation of [`GraphStore`] suitable for
//! single-node deployment. Entities and relations live in two tables with
//! JSON-encoded open-schema properties, secondary indexes on entity
//! type/name and relation source/target/type, and an `ON DELETE CASCADE`
//! foreign key from entities into relations.

// SQLite returns i64 counts; entity counts are non-negative and small,
// and usize limits fit i64 bind parameters.
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_possible_wrap)]

use crate::models::{Direction, Entity, GraphStatistics, Relation};
use crate::storage::GraphStore;
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

/// Helper to acquire the connection lock with poison recovery.
fn acquire_lock(mutex: &Mutex<Connection>) -> MutexGuard<'_, Connection> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::warn!("graph sqlite mutex was poisoned, recovering");
            metrics::counter!("graphrag_sqlite_mutex_poison_recovery_total").increment(1);
            poisoned.into_inner()
        },
    }
}

/// `SQLite`-based [`GraphStore`].
///
/// # Concurrency Model
///
/// Uses a `Mutex<Connection>` so there is a single writer at a time; WAL
/// mode and a busy timeout keep concurrent readers responsive.
pub struct SqliteGraphStore {
    /// Connection to the `SQLite` database.
    conn: Mutex<Connection>,
    /// Path to the database file (`None` for in-memory).
    db_path: Option<PathBuf>,
}

impl SqliteGraphStore {
    /// Opens (or creates) the store at the given path.
    ///
    /// Parent directories are created when missing.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or initialized.
    pub fn open(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| Error::op("create_graph_db_dir", e))?;
            }
        }
        let conn = Connection::open(&db_path).map_err(|e| Error::op("open_graph_sqlite", e))?;

        let store = Self {
            conn: Mutex::new(conn),
            db_path: Some(db_path),
        };
        store.initialize()?;
        Ok(store)
    }

    /// Creates an in-memory store (useful for testing).
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be initialized.
    pub fn in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().map_err(|e| Error::op("open_graph_sqlite_memory", e))?;
        let store = Self {
            conn: Mutex::new(conn),
            db_path: None,
        };
        store.initialize()?;
        Ok(store)
    }

    /// Returns the database path.
    #[must_use]
    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    /// Initializes pragmas, tables, and indexes.
    fn initialize(&self) -> Result<()> {
        let conn = acquire_lock(&self.conn);

        // WAL for concurrent reads, busy timeout for writer contention,
        // foreign keys for the entity → relation cascade.
        let _ = conn.pragma_update(None, "journal_mode", "WAL");
        let _ = conn.pragma_update(None, "synchronous", "NORMAL");
        let _ = conn.pragma_update(None, "busy_timeout", "5000");
        conn.pragma_update(None, "foreign_keys", "ON")
            .map_err(|e| Error::op("enable_foreign_keys", e))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS entities (
                id TEXT PRIMARY KEY,
                type TEXT NOT NULL,
                name TEXT NOT NULL,
                properties TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )
        .map_err(|e| Error::op("create_entities_table", e))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS relations (
                id TEXT PRIMARY KEY,
                source_id TEXT NOT NULL,
                target_id TEXT NOT NULL,
                type TEXT NOT NULL,
                properties TEXT NOT NULL,
                weight REAL NOT NULL DEFAULT 1.0,
                created_at TEXT NOT NULL,
                FOREIGN KEY (source_id) REFERENCES entities(id) ON DELETE CASCADE,
                FOREIGN KEY (target_id) REFERENCES entities(id) ON DELETE CASCADE,
                CHECK (source_id != target_id)
            )",
            [],
        )
        .map_err(|e| Error::op("create_relations_table", e))?;

        Self::create_indexes(&conn);
        Ok(())
    }

    /// Creates secondary indexes for the query paths in §4.1.
    fn create_indexes(conn: &Connection) {
        let _ = conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_entities_type ON entities(type)",
            [],
        );
        let _ = conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_entities_name ON entities(name)",
            [],
        );
        let _ = conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_relations_source ON relations(source_id)",
            [],
        );
        let _ = conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_relations_target ON relations(target_id)",
            [],
        );
        let _ = conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_relations_type ON relations(type)",
            [],
        );
    }

    /// Parses an entity from a database row.
    fn parse_entity_row(row: &Row<'_>) -> rusqlite::Result<Entity> {
        let id: String = row.get("id")?;
        let entity_type: String = row.get("type")?;
        let name: String = row.get("name")?;
        let properties_json: String = row.get("properties")?;
        let created_at: String = row.get("created_at")?;
        let updated_at: String = row.get("updated_at")?;

        Ok(Entity {
            id,
            entity_type,
            name,
            properties: serde_json::from_str(&properties_json).unwrap_or_default(),
            created_at: parse_timestamp(&created_at),
            updated_at: parse_timestamp(&updated_at),
        })
    }

    /// Parses a relation from a database row.
    fn parse_relation_row(row: &Row<'_>) -> rusqlite::Result<Relation> {
        let id: String = row.get("id")?;
        let source_id: String = row.get("source_id")?;
        let target_id: String = row.get("target_id")?;
        let relation_type: String = row.get("type")?;
        let properties_json: String = row.get("properties")?;
        let weight: f64 = row.get("weight")?;
        let created_at: String = row.get("created_at")?;

        Ok(Relation {
            id,
            source_id,
            target_id,
            relation_type,
            properties: serde_json::from_str(&properties_json).unwrap_or_default(),
            weight,
            created_at: parse_timestamp(&created_at),
        })
    }

    fn entity_exists(conn: &Connection, id: &str) -> Result<bool> {
        conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM entities WHERE id = ?1)",
            params![id],
            |row| row.get::<_, bool>(0),
        )
        .map_err(|e| Error::op("entity_exists", e))
    }

    fn collect_relations(conn: &Connection, sql: &str, id: &str) -> Result<Vec<Relation>> {
        let mut stmt = conn
            .prepare(sql)
            .map_err(|e| Error::op("prepare_relations_query", e))?;
        let rows = stmt
            .query_map(params![id], Self::parse_relation_row)
            .map_err(|e| Error::op("query_relations", e))?;
        let mut relations = Vec::new();
        for row in rows {
            relations.push(row.map_err(|e| Error::op("parse_relation_row", e))?);
        }
        Ok(relations)
    }
}

/// Parses an RFC 3339 timestamp, falling back to the epoch on corrupt data.
fn parse_timestamp(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| DateTime::<Utc>::UNIX_EPOCH)
}

#[async_trait]
impl GraphStore for SqliteGraphStore {
    async fn add_entity(&self, entity: &Entity) -> Result<bool> {
        let conn = acquire_lock(&self.conn);
        let properties = serde_json::to_string(&entity.properties)
            .map_err(|e| Error::op("serialize_entity_properties", e))?;

        conn.execute(
            "INSERT INTO entities (id, type, name, properties, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(id) DO UPDATE SET
                 type = excluded.type,
                 name = excluded.name,
                 properties = excluded.properties,
                 updated_at = excluded.updated_at",
            params![
                entity.id,
                entity.entity_type,
                entity.name,
                properties,
                entity.created_at.to_rfc3339(),
                Utc::now().to_rfc3339(),
            ],
        )
        .map_err(|e| Error::op("add_entity", e))?;
        Ok(true)
    }

    async fn get_entity(&self, id: &str) -> Result<Option<Entity>> {
        let conn = acquire_lock(&self.conn);
        conn.query_row(
            "SELECT id, type, name, properties, created_at, updated_at
             FROM entities WHERE id = ?1",
            params![id],
            Self::parse_entity_row,
        )
        .optional()
        .map_err(|e| Error::op("get_entity", e))
    }

    async fn delete_entity(&self, id: &str) -> Result<bool> {
        let conn = acquire_lock(&self.conn);
        let deleted = conn
            .execute("DELETE FROM entities WHERE id = ?1", params![id])
            .map_err(|e| Error::op("delete_entity", e))?;
        Ok(deleted > 0)
    }

    async fn add_relation(&self, relation: &Relation) -> Result<bool> {
        if relation.is_self_loop() {
            tracing::warn!(relation_id = %relation.id, "rejecting self-loop relation");
            return Ok(false);
        }

        let conn = acquire_lock(&self.conn);
        if !Self::entity_exists(&conn, &relation.source_id)?
            || !Self::entity_exists(&conn, &relation.target_id)?
        {
            tracing::warn!(
                relation_id = %relation.id,
                "source or target entity not found for relation"
            );
            return Ok(false);
        }

        let properties = serde_json::to_string(&relation.properties)
            .map_err(|e| Error::op("serialize_relation_properties", e))?;
        conn.execute(
            "INSERT OR REPLACE INTO relations
                 (id, source_id, target_id, type, properties, weight, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                relation.id,
                relation.source_id,
                relation.target_id,
                relation.relation_type,
                properties,
                relation.weight,
                relation.created_at.to_rfc3339(),
            ],
        )
        .map_err(|e| Error::op("add_relation", e))?;
        Ok(true)
    }

    async fn get_relation(&self, id: &str) -> Result<Option<Relation>> {
        let conn = acquire_lock(&self.conn);
        conn.query_row(
            "SELECT id, source_id, target_id, type, properties, weight, created_at
             FROM relations WHERE id = ?1",
            params![id],
            Self::parse_relation_row,
        )
        .optional()
        .map_err(|e| Error::op("get_relation", e))
    }

    async fn delete_relation(&self, id: &str) -> Result<bool> {
        let conn = acquire_lock(&self.conn);
        let deleted = conn
            .execute("DELETE FROM relations WHERE id = ?1", params![id])
            .map_err(|e| Error::op("delete_relation", e))?;
        Ok(deleted > 0)
    }

    async fn get_entities_by_type(&self, entity_type: &str, limit: usize) -> Result<Vec<Entity>> {
        let conn = acquire_lock(&self.conn);
        let mut stmt = conn
            .prepare(
                "SELECT id, type, name, properties, created_at, updated_at
                 FROM entities WHERE type = ?1 LIMIT ?2",
            )
            .map_err(|e| Error::op("prepare_entities_by_type", e))?;
        let rows = stmt
            .query_map(params![entity_type, limit as i64], Self::parse_entity_row)
            .map_err(|e| Error::op("get_entities_by_type", e))?;
        let mut entities = Vec::new();
        for row in rows {
            entities.push(row.map_err(|e| Error::op("parse_entity_row", e))?);
        }
        Ok(entities)
    }

    async fn search_entities(&self, query: &str, limit: usize) -> Result<Vec<Entity>> {
        let conn = acquire_lock(&self.conn);
        let pattern = format!("%{}%", query.to_lowercase());
        let mut stmt = conn
            .prepare(
                "SELECT id, type, name, properties, created_at, updated_at
                 FROM entities
                 WHERE lower(name) LIKE ?1 OR lower(type) LIKE ?1
                 LIMIT ?2",
            )
            .map_err(|e| Error::op("prepare_search_entities", e))?;
        let rows = stmt
            .query_map(params![pattern, limit as i64], Self::parse_entity_row)
            .map_err(|e| Error::op("search_entities", e))?;
        let mut entities = Vec::new();
        for row in rows {
            entities.push(row.map_err(|e| Error::op("parse_entity_row", e))?);
        }
        Ok(entities)
    }

    async fn get_neighbors(
        &self,
        entity_id: &str,
        relation_type: Option<&str>,
        direction: Direction,
    ) -> Result<Vec<Entity>> {
        let conn = acquire_lock(&self.conn);
        let mut neighbors: Vec<Entity> = Vec::new();
        let push_unique = |entity: Entity, neighbors: &mut Vec<Entity>| {
            if !neighbors.iter().any(|n| n.id == entity.id) {
                neighbors.push(entity);
            }
        };

        let collect = |sql: &str| -> Result<Vec<Entity>> {
            let mut stmt = conn
                .prepare(sql)
                .map_err(|e| Error::op("prepare_neighbors", e))?;
            let rows = match relation_type {
                Some(rt) => stmt
                    .query_map(params![entity_id, rt], Self::parse_entity_row)
                    .map_err(|e| Error::op("get_neighbors", e))?,
                None => stmt
                    .query_map(params![entity_id], Self::parse_entity_row)
                    .map_err(|e| Error::op("get_neighbors", e))?,
            };
            let mut entities = Vec::new();
            for row in rows {
                entities.push(row.map_err(|e| Error::op("parse_entity_row", e))?);
            }
            Ok(entities)
        };

        if direction.includes_outgoing() {
            let sql = if relation_type.is_some() {
                "SELECT e.id, e.type, e.name, e.properties, e.created_at, e.updated_at
                 FROM relations r JOIN entities e ON e.id = r.target_id
                 WHERE r.source_id = ?1 AND r.type = ?2"
            } else {
                "SELECT e.id, e.type, e.name, e.properties, e.created_at, e.updated_at
                 FROM relations r JOIN entities e ON e.id = r.target_id
                 WHERE r.source_id = ?1"
            };
            for entity in collect(sql)? {
                push_unique(entity, &mut neighbors);
            }
        }
        if direction.includes_incoming() {
            let sql = if relation_type.is_some() {
                "SELECT e.id, e.type, e.name, e.properties, e.created_at, e.updated_at
                 FROM relations r JOIN entities e ON e.id = r.source_id
                 WHERE r.target_id = ?1 AND r.type = ?2"
            } else {
                "SELECT e.id, e.type, e.name, e.properties, e.created_at, e.updated_at
                 FROM relations r JOIN entities e ON e.id = r.source_id
                 WHERE r.target_id = ?1"
            };
            for entity in collect(sql)? {
                push_unique(entity, &mut neighbors);
            }
        }

        Ok(neighbors)
    }

    async fn get_relations_by_entity(
        &self,
        entity_id: &str,
        direction: Direction,
    ) -> Result<Vec<Relation>> {
        let conn = acquire_lock(&self.conn);
        match direction {
            Direction::Both => {
                let mut stmt = conn
                    .prepare(
                        "SELECT id, source_id, target_id, type, properties, weight, created_at
                         FROM relations WHERE source_id = ?1 OR target_id = ?1",
                    )
                    .map_err(|e| Error::op("prepare_relations_by_entity", e))?;
                let rows = stmt
                    .query_map(params![entity_id], Self::parse_relation_row)
                    .map_err(|e| Error::op("get_relations_by_entity", e))?;
                let mut relations = Vec::new();
                for row in rows {
                    relations.push(row.map_err(|e| Error::op("parse_relation_row", e))?);
                }
                Ok(relations)
            },
            Direction::Outgoing => Self::collect_relations(
                &conn,
                "SELECT id, source_id, target_id, type, properties, weight, created_at
                 FROM relations WHERE source_id = ?1",
                entity_id,
            ),
            Direction::Incoming => Self::collect_relations(
                &conn,
                "SELECT id, source_id, target_id, type, properties, weight, created_at
                 FROM relations WHERE target_id = ?1",
                entity_id,
            ),
        }
    }

    async fn get_relations_by_type(
        &self,
        relation_type: &str,
        limit: usize,
    ) -> Result<Vec<Relation>> {
        let conn = acquire_lock(&self.conn);
        let mut stmt = conn
            .prepare(
                "SELECT id, source_id, target_id, type, properties, weight, created_at
                 FROM relations WHERE type = ?1 LIMIT ?2",
            )
            .map_err(|e| Error::op("prepare_relations_by_type", e))?;
        let rows = stmt
            .query_map(
                params![relation_type, limit as i64],
                Self::parse_relation_row,
            )
            .map_err(|e| Error::op("get_relations_by_type", e))?;
        let mut relations = Vec::new();
        for row in rows {
            relations.push(row.map_err(|e| Error::op("parse_relation_row", e))?);
        }
        Ok(relations)
    }

    async fn get_statistics(&self) -> Result<GraphStatistics> {
        let conn = acquire_lock(&self.conn);

        let total_entities: i64 = conn
            .query_row("SELECT COUNT(*) FROM entities", [], |row| row.get(0))
            .map_err(|e| Error::op("count_entities", e))?;
        let total_relations: i64 = conn
            .query_row("SELECT COUNT(*) FROM relations", [], |row| row.get(0))
            .map_err(|e| Error::op("count_relations", e))?;

        let mut entity_types: HashMap<String, usize> = HashMap::new();
        {
            let mut stmt = conn
                .prepare("SELECT type, COUNT(*) FROM entities GROUP BY type")
                .map_err(|e| Error::op("prepare_entity_type_counts", e))?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
                })
                .map_err(|e| Error::op("entity_type_counts", e))?;
            for row in rows {
                let (tag, count) = row.map_err(|e| Error::op("entity_type_counts", e))?;
                entity_types.insert(tag, count as usize);
            }
        }

        let mut relation_types: HashMap<String, usize> = HashMap::new();
        {
            let mut stmt = conn
                .prepare("SELECT type, COUNT(*) FROM relations GROUP BY type")
                .map_err(|e| Error::op("prepare_relation_type_counts", e))?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
                })
                .map_err(|e| Error::op("relation_type_counts", e))?;
            for row in rows {
                let (tag, count) = row.map_err(|e| Error::op("relation_type_counts", e))?;
                relation_types.insert(tag, count as usize);
            }
        }

        Ok(GraphStatistics {
            total_entities: total_entities as usize,
            total_relations: total_relations as usize,
            entity_types,
            relation_types,
        })
    }

    async fn close(&self) -> Result<()> {
        let conn = acquire_lock(&self.conn);
        // The checkpoint pragma returns a status row; discard it.
        conn.query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(()))
            .optional()
            .map_err(|e| Error::op("close_graph_store", e))?;
        Ok(())
    }
}
