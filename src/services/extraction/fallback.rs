//! Rule-based extraction fallback.
//!
//! Invoked when generator-driven extraction fails or returns nothing. On
//! non-empty text the entity pass always returns *something*: script-Han
//! runs and capitalized Latin tokens become `Concept` entities, and a fixed
//! suffix table upgrades recognizable Chinese terms to richer types. The
//! relation pass matches a fixed phrase-pattern table (weight 0.5) and, when
//! no pattern fires at all, falls back to sentence co-occurrence edges
//! (weight 0.3).

// Allow expect() on static regex patterns - these are guaranteed to compile
#![allow(clippy::expect_used)]

use crate::models::{Entity, Relation};
use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;

/// Maximum entities produced by the fallback pass.
const MAX_FALLBACK_ENTITIES: usize = 50;

/// Weight for phrase-pattern relations.
const PATTERN_WEIGHT: f64 = 0.5;

/// Weight for co-occurrence relations.
const CO_OCCURRENCE_WEIGHT: f64 = 0.3;

static HAN_RUN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[\u{4e00}-\u{9fff}]{2,6}").expect("static regex: han run")
});

static LATIN_PROPER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b[A-Z][a-z]+\b").expect("static regex: latin proper"));

/// Suffix patterns mapping recognizable Chinese terms to entity types.
static SUFFIX_PATTERNS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        (r"[\u{4e00}-\u{9fff}]+政策", "Policy"),
        (r"[\u{4e00}-\u{9fff}]+制度", "System"),
        (r"[\u{4e00}-\u{9fff}]+服務", "Service"),
        (r"[\u{4e00}-\u{9fff}]+計畫", "Plan"),
        (r"[\u{4e00}-\u{9fff}]+方案", "Program"),
        (r"[\u{4e00}-\u{9fff}]+機構", "Organization"),
        (r"[\u{4e00}-\u{9fff}]+單位", "Organization"),
        (r"[\u{4e00}-\u{9fff}]+部門", "Organization"),
        (r"[\u{4e00}-\u{9fff}]+人員", "Person"),
    ]
    .into_iter()
    .map(|(pattern, entity_type)| {
        (
            Regex::new(pattern).expect("static regex: suffix pattern"),
            entity_type,
        )
    })
    .collect()
});

/// Phrase patterns mapping to typed relations.
static RELATION_PATTERNS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        (r"([^，。\n、]+)在([^，。\n、]+)", "LOCATED_IN"),
        (r"([^，。\n、]+)屬於([^，。\n、]+)", "BELONGS_TO"),
        (r"([^，。\n、]+)是([^，。\n、]+)", "IS_A"),
        (r"([^，。\n、]+)包含([^，。\n、]+)", "CONTAINS"),
        (r"([^，。\n、]+)與([^，。\n、]+)相關", "RELATED_TO"),
        (r"([^，。\n、]+)由([^，。\n、]+)組成", "CONSISTS_OF"),
        (r"([^，。\n、]+)管理([^，。\n、]+)", "MANAGES"),
        (r"\b([A-Z][a-z]+)\s+in\s+([A-Z][a-z]+)\b", "LOCATED_IN"),
        (r"\b([A-Z][a-z]+)\s+belongs\s+to\s+([A-Z][a-z]+)\b", "BELONGS_TO"),
        (r"\b([A-Z][a-z]+)\s+is\s+a\s+([A-Z][a-z]+)\b", "IS_A"),
        (r"\b([A-Z][a-z]+)\s+contains\s+([A-Z][a-z]+)\b", "CONTAINS"),
    ]
    .into_iter()
    .map(|(pattern, relation_type)| {
        (
            Regex::new(pattern).expect("static regex: relation pattern"),
            relation_type,
        )
    })
    .collect()
});

/// Extracts entities from text with rules alone.
#[must_use]
pub fn extract_entities(text: &str) -> Vec<Entity> {
    let mut entities = Vec::new();
    let mut seen_names: HashSet<String> = HashSet::new();

    for m in HAN_RUN.find_iter(text) {
        let name = m.as_str();
        if seen_names.insert(name.to_string()) {
            entities.push(
                Entity::new("Concept", name)
                    .with_property("extracted_by", "rule_based")
                    .with_property("language", "chinese"),
            );
        }
    }

    for (pattern, entity_type) in SUFFIX_PATTERNS.iter() {
        for m in pattern.find_iter(text) {
            let name = m.as_str();
            if seen_names.insert(name.to_string()) {
                entities.push(
                    Entity::new(*entity_type, name)
                        .with_property("extracted_by", "rule_based")
                        .with_property("pattern", pattern.as_str()),
                );
            }
        }
    }

    for m in LATIN_PROPER.find_iter(text) {
        let name = m.as_str();
        if name.len() > 2 && seen_names.insert(name.to_string()) {
            entities.push(
                Entity::new("Concept", name)
                    .with_property("extracted_by", "rule_based")
                    .with_property("language", "english"),
            );
        }
    }

    entities.truncate(MAX_FALLBACK_ENTITIES);
    entities
}

/// Resolves a matched phrase fragment to an entity.
///
/// Exact name match first, then any entity whose name is contained in the
/// fragment.
fn resolve<'a>(fragment: &str, entities: &'a [Entity]) -> Option<&'a Entity> {
    entities
        .iter()
        .find(|entity| entity.name == fragment)
        .or_else(|| {
            entities
                .iter()
                .find(|entity| fragment.contains(&entity.name))
        })
}

/// Extracts relations from text with rules alone.
///
/// Requires at least two entities. Pattern matches produce typed edges at
/// weight 0.5; when no pattern matches anywhere, a co-occurrence pass emits
/// `RELATED_TO` edges at weight 0.3 for entity pairs sharing a sentence.
#[must_use]
pub fn extract_relations(text: &str, entities: &[Entity]) -> Vec<Relation> {
    let mut relations = Vec::new();
    if entities.len() < 2 {
        return relations;
    }

    let mut seen: HashSet<(String, String, String)> = HashSet::new();

    for (pattern, relation_type) in RELATION_PATTERNS.iter() {
        for captures in pattern.captures_iter(text) {
            let (Some(source_match), Some(target_match)) = (captures.get(1), captures.get(2))
            else {
                continue;
            };
            let source_text = source_match.as_str().trim();
            let target_text = target_match.as_str().trim();

            let (Some(source), Some(target)) =
                (resolve(source_text, entities), resolve(target_text, entities))
            else {
                continue;
            };
            if source.id == target.id {
                continue;
            }

            let key = (
                source.id.clone(),
                target.id.clone(),
                (*relation_type).to_string(),
            );
            if seen.insert(key) {
                relations.push(
                    Relation::new(&source.id, &target.id, *relation_type)
                        .with_weight(PATTERN_WEIGHT)
                        .with_property("extracted_by", "rule_based")
                        .with_property("source_text", source_text)
                        .with_property("target_text", target_text),
                );
            }
        }
    }

    if relations.is_empty() {
        co_occurrence_relations(text, entities, &mut seen, &mut relations);
    }

    tracing::info!(count = relations.len(), "rule-based relation extraction");
    relations
}

/// Emits `RELATED_TO` edges for entity pairs occurring in one sentence.
fn co_occurrence_relations(
    text: &str,
    entities: &[Entity],
    seen: &mut HashSet<(String, String, String)>,
    relations: &mut Vec<Relation>,
) {
    for sentence in text.split(['。', '！', '？', '\n']) {
        let sentence = sentence.trim();
        if sentence.chars().count() < 5 {
            continue;
        }

        let present: Vec<&Entity> = entities
            .iter()
            .filter(|entity| entity.name.chars().count() > 1 && sentence.contains(&entity.name))
            .collect();
        if present.len() < 2 {
            continue;
        }

        let excerpt: String = sentence.chars().take(100).collect();
        for i in 0..present.len() {
            for j in (i + 1)..present.len() {
                let (source, target) = (present[i], present[j]);
                let key = (
                    source.id.clone(),
                    target.id.clone(),
                    "RELATED_TO".to_string(),
                );
                if seen.insert(key) {
                    relations.push(
                        Relation::new(&source.id, &target.id, "RELATED_TO")
                            .with_weight(CO_OCCURRENCE_WEIGHT)
                            .with_property("extracted_by", "rule_based")
                            .with_property("method", "co_occurrence")
                            .with_property("sentence", excerpt.clone()),
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_han_runs_become_concepts() {
        let entities = extract_entities("台北市提供長期照護");
        // Greedy runs of at most six characters: 台北市提供長 then 期照護.
        let names: Vec<&str> = entities.iter().map(|e| e.name.as_str()).collect();
        assert!(names.contains(&"台北市提供長"));
        assert!(names.contains(&"期照護"));
        assert!(entities.iter().all(|e| {
            e.properties.get("extracted_by").and_then(|v| v.as_str()) == Some("rule_based")
        }));
    }

    #[test]
    fn test_suffix_patterns_assign_types() {
        let entities = extract_entities("這份文件描述長照政策與照護服務");
        let policy = entities.iter().find(|e| e.name.ends_with("政策"));
        assert!(policy.is_some_and(|e| e.entity_type == "Policy"));
        let service = entities.iter().find(|e| e.name.ends_with("服務"));
        assert!(service.is_some_and(|e| e.entity_type == "Service"));
    }

    #[test]
    fn test_latin_proper_nouns() {
        let entities = extract_entities("Taipei runs the program with Alice");
        let names: Vec<&str> = entities.iter().map(|e| e.name.as_str()).collect();
        assert!(names.contains(&"Taipei"));
        assert!(names.contains(&"Alice"));
        // Short tokens and lowercase words are skipped.
        assert!(!names.contains(&"runs"));
    }

    #[test]
    fn test_nonempty_text_yields_entities() {
        assert!(!extract_entities("健保制度").is_empty());
        assert!(!extract_entities("Services Everywhere").is_empty());
    }

    #[test]
    fn test_entity_cap() {
        let text = (0..60u8)
            .map(|i| {
                format!(
                    "W{}{}",
                    char::from(b'a' + i / 26),
                    char::from(b'a' + i % 26)
                )
            })
            .collect::<Vec<_>>()
            .join(" ");
        assert_eq!(extract_entities(&text).len(), MAX_FALLBACK_ENTITIES);
    }

    #[test]
    fn test_relations_require_two_entities() {
        let one = vec![Entity::new("Concept", "台北")];
        assert!(extract_relations("台北在台灣", &one).is_empty());
    }

    #[test]
    fn test_pattern_relation_located_in() {
        let entities = vec![Entity::new("Location", "台北"), Entity::new("Location", "台灣")];
        let relations = extract_relations("台北在台灣", &entities);
        assert_eq!(relations.len(), 1);
        assert_eq!(relations[0].relation_type, "LOCATED_IN");
        assert!((relations[0].weight - 0.5).abs() < f64::EPSILON);
        assert_ne!(relations[0].source_id, relations[0].target_id);
    }

    #[test]
    fn test_pattern_relation_manages() {
        let entities = vec![
            Entity::new("Organization", "衛福部"),
            Entity::new("Policy", "長照政策"),
        ];
        let relations = extract_relations("衛福部管理長照政策", &entities);
        assert_eq!(relations.len(), 1);
        assert_eq!(relations[0].relation_type, "MANAGES");
        assert_eq!(relations[0].source_id, entities[0].id);
        assert_eq!(relations[0].target_id, entities[1].id);
    }

    #[test]
    fn test_english_pattern_relation() {
        let entities = vec![Entity::new("Location", "Taipei"), Entity::new("Location", "Taiwan")];
        let relations = extract_relations("Taipei in Taiwan", &entities);
        assert_eq!(relations.len(), 1);
        assert_eq!(relations[0].relation_type, "LOCATED_IN");
    }

    #[test]
    fn test_co_occurrence_when_no_pattern_matches() {
        let entities = vec![Entity::new("Concept", "甲案"), Entity::new("Concept", "乙案")];
        let relations = extract_relations("會議討論甲案及乙案的進度。", &entities);
        assert_eq!(relations.len(), 1);
        assert_eq!(relations[0].relation_type, "RELATED_TO");
        assert!((relations[0].weight - 0.3).abs() < f64::EPSILON);
        assert_eq!(
            relations[0].properties.get("method").and_then(|v| v.as_str()),
            Some("co_occurrence")
        );
    }

    #[test]
    fn test_short_sentences_skipped_in_co_occurrence() {
        let entities = vec![Entity::new("Concept", "甲"), Entity::new("Concept", "乙")];
        // Both entities share only a four-character sentence, and
        // single-character names never co-occur anyway.
        assert!(extract_relations("甲及乙。", &entities).is_empty());
    }

    #[test]
    fn test_relation_dedup() {
        let entities = vec![Entity::new("Location", "台北"), Entity::new("Location", "台灣")];
        let relations = extract_relations("台北在台灣。台北在台灣", &entities);
        assert_eq!(relations.len(), 1);
    }
}
