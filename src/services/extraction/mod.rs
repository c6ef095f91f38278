//! Entity and relation extraction.
//!
//! Turns raw text into `(Vec<Entity>, Vec<Relation>)` with a strict
//! preference for generator-driven structured extraction and a rule-based
//! fallback that always returns *something* on non-empty text.
//!
//! ```text
//! text ──▶ prompt ──▶ generator ──▶ parse ──▶ dedup ──▶ entities
//!                                    │ failed / empty
//!                                    ▼
//!                            rule-based fallback
//! ```

pub mod fallback;
pub mod parser;

pub use parser::{parse_json_array, ParseOutcome};

use crate::llm::GeneratorService;
use crate::models::{Entity, Relation};
use crate::Result;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;

/// Token budget for extraction prompts.
const EXTRACTION_MAX_TOKENS: u32 = 1000;

/// Entity types offered to the generator when the caller supplies none.
const DEFAULT_ENTITY_TYPES: &str = "Person, Document, Concept, Location, Organization, Event";

/// Extracts entities and relations from text using a generator, with
/// rule-based fallback.
pub struct EntityExtractor {
    llm: Arc<GeneratorService>,
}

impl EntityExtractor {
    /// Creates an extractor over the given generator service.
    #[must_use]
    pub fn new(llm: Arc<GeneratorService>) -> Self {
        Self { llm }
    }

    /// Extracts entities from text.
    ///
    /// Entities are deduplicated by `(lowercase(name), type)` with
    /// properties merged last-write-wins. When the generator fails, parsing
    /// fails, or the parsed list is empty, the rule-based fallback runs on
    /// the same text.
    ///
    /// # Errors
    ///
    /// Currently infallible in practice (generator failures degrade to the
    /// fallback), but the signature leaves room for storage-backed
    /// extraction pipelines.
    pub async fn extract_entities(
        &self,
        text: &str,
        entity_types: Option<&[String]>,
    ) -> Result<Vec<Entity>> {
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }

        let prompt = build_entity_prompt(text, entity_types);
        let outcome = match self.llm.generate(&prompt, Some(EXTRACTION_MAX_TOKENS), None).await {
            Ok(response) => parse_json_array(&response),
            Err(e) => {
                tracing::warn!(error = %e, "entity extraction generation failed");
                ParseOutcome::Failed
            },
        };

        let entities = match outcome {
            ParseOutcome::Parsed(items) => dedup_entities(entities_from_items(items)),
            ParseOutcome::Empty | ParseOutcome::Failed => Vec::new(),
        };

        if entities.is_empty() {
            tracing::warn!("generator entity extraction empty, falling back to rule-based");
            return Ok(fallback::extract_entities(text));
        }

        tracing::info!(count = entities.len(), "entities extracted");
        Ok(entities)
    }

    /// Extracts typed relations over an already-extracted entity set.
    ///
    /// Returns empty for fewer than two entities. Generator output is
    /// resolved against the entity set by exact name, then substring
    /// containment in either direction; unresolvable or self-referential
    /// relations are dropped. An empty result degrades to the rule-based
    /// relation fallback.
    ///
    /// # Errors
    ///
    /// See [`Self::extract_entities`].
    pub async fn extract_relations(
        &self,
        text: &str,
        entities: &[Entity],
    ) -> Result<Vec<Relation>> {
        if entities.len() < 2 {
            return Ok(Vec::new());
        }

        let prompt = build_relation_prompt(text, entities);
        let outcome = match self.llm.generate(&prompt, Some(EXTRACTION_MAX_TOKENS), None).await {
            Ok(response) => parse_json_array(&response),
            Err(e) => {
                tracing::warn!(error = %e, "relation extraction generation failed");
                ParseOutcome::Failed
            },
        };

        let relations = match outcome {
            ParseOutcome::Parsed(items) => relations_from_items(items, entities),
            ParseOutcome::Empty | ParseOutcome::Failed => Vec::new(),
        };

        if relations.is_empty() {
            tracing::warn!(
                entities = entities.len(),
                "generator relation extraction empty, falling back to rule-based"
            );
            return Ok(fallback::extract_relations(text, entities));
        }

        tracing::info!(count = relations.len(), "relations extracted");
        Ok(relations)
    }
}

/// Builds the entity-extraction prompt.
fn build_entity_prompt(text: &str, entity_types: Option<&[String]>) -> String {
    let types = entity_types
        .filter(|types| !types.is_empty())
        .map_or_else(|| DEFAULT_ENTITY_TYPES.to_string(), |types| types.join(", "));

    format!(
        r#"Extract every entity from the text below and return them as JSON.

Entity types: {types}

Text:
{text}

Return a JSON array where each entity has these fields:
- name: the entity name
- type: the entity type
- properties: additional attributes (object)

Example response:
[
  {{"name": "張三", "type": "Person", "properties": {{"role": "醫生"}}}},
  {{"name": "醫院", "type": "Organization", "properties": {{"location": "台北"}}}}
]

Return only JSON, no other text:"#
    )
}

/// Builds the relation-extraction prompt.
fn build_relation_prompt(text: &str, entities: &[Entity]) -> String {
    let mut listing = String::new();
    for entity in entities {
        let _ = writeln!(listing, "- {} ({})", entity.name, entity.entity_type);
    }

    format!(
        r#"Extract the relations between the known entities from the text below and return them as JSON.

Known entities:
{listing}
Text:
{text}

Return a JSON array where each relation has these fields:
- source: source entity name
- target: target entity name
- type: relation type (e.g. CONTAINS, RELATED_TO, MENTIONS, AUTHORED_BY, LOCATED_IN, PART_OF)
- properties: additional attributes (object)

Example response:
[
  {{"source": "張三", "target": "醫院", "type": "WORKS_AT", "properties": {{"position": "醫生"}}}},
  {{"source": "文件", "target": "張三", "type": "AUTHORED_BY", "properties": {{}}}}
]

Return only JSON, no other text:"#
    )
}

/// Converts parsed JSON items into entities, skipping items without a name.
fn entities_from_items(items: Vec<Value>) -> Vec<Entity> {
    items
        .into_iter()
        .filter_map(|item| {
            let name = item.get("name")?.as_str()?.trim().to_string();
            if name.is_empty() {
                return None;
            }
            let entity_type = item
                .get("type")
                .and_then(Value::as_str)
                .unwrap_or("Concept")
                .to_string();
            let properties = item
                .get("properties")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default();
            Some(Entity::new(entity_type, name).with_properties(properties))
        })
        .collect()
}

/// Deduplicates entities by `(lowercase(name), type)`, merging properties
/// last-write-wins.
fn dedup_entities(entities: Vec<Entity>) -> Vec<Entity> {
    let mut index: HashMap<(String, String), usize> = HashMap::new();
    let mut result: Vec<Entity> = Vec::new();

    for entity in entities {
        let key = entity.dedup_key();
        if let Some(&position) = index.get(&key) {
            for (prop_key, prop_value) in entity.properties {
                result[position].properties.insert(prop_key, prop_value);
            }
        } else {
            index.insert(key, result.len());
            result.push(entity);
        }
    }
    result
}

/// Resolves a requested entity name against the entity set.
///
/// Exact match on `name` first; otherwise any entity whose name contains
/// the request or is contained in it, first match wins.
fn resolve_entity<'a>(name: &str, entities: &'a [Entity]) -> Option<&'a Entity> {
    entities
        .iter()
        .find(|entity| entity.name == name)
        .or_else(|| {
            entities
                .iter()
                .find(|entity| entity.name.contains(name) || name.contains(&entity.name))
        })
}

/// Converts parsed JSON items into relations over the entity set.
fn relations_from_items(items: Vec<Value>, entities: &[Entity]) -> Vec<Relation> {
    let mut relations = Vec::new();
    let mut unmatched = 0usize;

    for item in items {
        let (Some(source_name), Some(target_name)) = (
            item.get("source").and_then(Value::as_str),
            item.get("target").and_then(Value::as_str),
        ) else {
            continue;
        };

        let (Some(source), Some(target)) = (
            resolve_entity(source_name, entities),
            resolve_entity(target_name, entities),
        ) else {
            unmatched += 1;
            tracing::debug!(
                source = %source_name,
                target = %target_name,
                "could not resolve relation endpoints"
            );
            continue;
        };
        if source.id == target.id {
            continue;
        }

        let relation_type = item
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or("RELATED_TO")
            .to_string();
        let properties = item
            .get("properties")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();

        let mut relation = Relation::new(&source.id, &target.id, relation_type);
        relation.properties = properties;
        relations.push(relation);
    }

    if unmatched > 0 {
        tracing::debug!(unmatched, resolved = relations.len(), "relation name resolution");
    }
    relations
}
