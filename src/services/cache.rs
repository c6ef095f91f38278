//! Key-value cache with per-key TTL expiry and fingerprint-based keys.
//!
//! One cache instance is shared by the retrieval layer and the
//! orchestrator, so a single `clear` (admin endpoint or `cache_cleared`
//! webhook) empties both. Values are stored as `serde_json::Value`; callers
//! serialize their result types on write and deserialize on read.
//!
//! # Concurrency
//!
//! Reads and writes go through one mutex; expiry is evaluated under the
//! same lock, so a read concurrent with eviction observes either the value
//! or absence, never partial state.

use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// One cached value with its eviction deadline.
#[derive(Debug, Clone)]
struct CacheEntry {
    value: Value,
    expires_at: Instant,
}

/// In-process TTL cache.
#[derive(Debug, Default)]
pub struct CacheService {
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl CacheService {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, CacheEntry>> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::warn!("cache mutex was poisoned, recovering");
                poisoned.into_inner()
            },
        }
    }

    /// Returns the stored value if present and not expired.
    ///
    /// Expired entries are evicted on read.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Value> {
        let mut entries = self.lock();
        if let Some(entry) = entries.get(key) {
            if entry.expires_at > Instant::now() {
                tracing::debug!(key = %key, "cache hit");
                metrics::counter!("graphrag_cache_hits_total").increment(1);
                return Some(entry.value.clone());
            }
        }
        if entries.remove(key).is_some() {
            tracing::debug!(key = %key, "cache expired");
        } else {
            tracing::debug!(key = %key, "cache miss");
        }
        metrics::counter!("graphrag_cache_misses_total").increment(1);
        None
    }

    /// Stores a value, scheduling eviction at `now + ttl`.
    pub fn set(&self, key: &str, value: Value, ttl: Duration) {
        let mut entries = self.lock();
        let now = Instant::now();
        // Opportunistic purge keeps the map from accumulating dead entries.
        entries.retain(|_, entry| entry.expires_at > now);
        entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                expires_at: now + ttl,
            },
        );
        tracing::debug!(key = %key, ttl_secs = ttl.as_secs(), "cache set");
    }

    /// Removes a key. Returns `true` if it was present.
    pub fn delete(&self, key: &str) -> bool {
        let removed = self.lock().remove(key).is_some();
        if removed {
            tracing::debug!(key = %key, "cache deleted");
        }
        removed
    }

    /// Whether a non-expired entry exists for the key.
    #[must_use]
    pub fn exists(&self, key: &str) -> bool {
        let entries = self.lock();
        entries
            .get(key)
            .is_some_and(|entry| entry.expires_at > Instant::now())
    }

    /// Drops all keys, returning how many were removed.
    pub fn clear(&self) -> usize {
        let mut entries = self.lock();
        let count = entries.len();
        entries.clear();
        tracing::info!(removed = count, "cache cleared");
        count
    }
}

/// Builds a deterministic cache key from a prefix and canonicalized
/// arguments.
///
/// Arguments are serialized with object keys sorted at every level, then
/// hashed to a 128-bit digest (truncated SHA-256). The result is
/// `{prefix}:{hex}`, stable under whitespace, argument-order, and
/// special-character variation.
#[must_use]
pub fn fingerprint_key(prefix: &str, arguments: &Value) -> String {
    let mut canonical = String::new();
    write_canonical(arguments, &mut canonical);
    let digest = Sha256::digest(canonical.as_bytes());
    format!("{prefix}:{}", hex::encode(&digest[..16]))
}

/// Serializes a JSON value with sorted object keys at every level.
fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                if let Some(child) = map.get(*key) {
                    write_canonical(child, out);
                }
            }
            out.push('}');
        },
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        },
        scalar => out.push_str(&scalar.to_string()),
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use serde_json::json;

    #[test]
    fn test_set_get_round_trip() {
        let cache = CacheService::new();
        cache.set("k", json!({"answer": 42}), Duration::from_secs(60));
        assert_eq!(cache.get("k"), Some(json!({"answer": 42})));
        assert!(cache.exists("k"));
    }

    #[test]
    fn test_expiry() {
        let cache = CacheService::new();
        cache.set("k", json!(1), Duration::from_millis(20));
        assert!(cache.exists("k"));
        std::thread::sleep(Duration::from_millis(40));
        assert!(!cache.exists("k"));
        assert_eq!(cache.get("k"), None);
    }

    #[test]
    fn test_delete() {
        let cache = CacheService::new();
        cache.set("k", json!(1), Duration::from_secs(60));
        assert!(cache.delete("k"));
        assert!(!cache.delete("k"));
        assert_eq!(cache.get("k"), None);
    }

    #[test]
    fn test_clear_returns_removed_count() {
        let cache = CacheService::new();
        cache.set("a", json!(1), Duration::from_secs(60));
        cache.set("b", json!(2), Duration::from_secs(60));
        assert_eq!(cache.clear(), 2);
        assert_eq!(cache.clear(), 0);
    }

    #[test]
    fn test_fingerprint_ignores_key_order() {
        let a = fingerprint_key("q", &json!({"a": 1, "b": 2}));
        let b = fingerprint_key("q", &json!({"b": 2, "a": 1}));
        assert_eq!(a, b);
    }

    #[test]
    fn test_fingerprint_sorts_nested_objects() {
        let a = fingerprint_key("q", &json!({"outer": {"x": 1, "y": 2}}));
        let b = fingerprint_key("q", &json!({"outer": {"y": 2, "x": 1}}));
        assert_eq!(a, b);
    }

    #[test]
    fn test_fingerprint_distinguishes_values() {
        let a = fingerprint_key("q", &json!({"args": ["question"], "top_k": 3}));
        let b = fingerprint_key("q", &json!({"args": ["question"], "top_k": 5}));
        assert_ne!(a, b);
    }

    #[test]
    fn test_fingerprint_format() {
        let key = fingerprint_key("graphrag_query", &json!({"args": ["測試問題"], "top_k": 3}));
        let (prefix, digest) = key.split_once(':').unwrap();
        assert_eq!(prefix, "graphrag_query");
        assert_eq!(digest.len(), 32);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
