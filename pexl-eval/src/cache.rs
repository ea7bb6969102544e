//! Context-scoped memoization for explicitly cacheable filter results.

use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::value::Value;

struct Entry {
    expires_at: Option<Instant>,
    value: Value,
}

/// A key→result store owned by one context. Entries live until the context
/// is reset or dropped; growth alone never evicts. A per-entry deadline,
/// when present, is honored on read but leaves the entry in place.
pub struct ExpiringCache {
    entries: DashMap<String, Entry>,
}

impl ExpiringCache {
    pub fn new() -> Self {
        ExpiringCache {
            entries: DashMap::new(),
        }
    }

    pub fn set(&self, key: impl Into<String>, value: Value) {
        self.entries.insert(
            key.into(),
            Entry {
                expires_at: None,
                value,
            },
        );
    }

    pub fn set_with_ttl(&self, key: impl Into<String>, value: Value, ttl: Duration) {
        self.entries.insert(
            key.into(),
            Entry {
                expires_at: Some(Instant::now() + ttl),
                value,
            },
        );
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        let entry = self.entries.get(key)?;
        if let Some(deadline) = entry.expires_at {
            if Instant::now() >= deadline {
                return None;
            }
        }
        Some(entry.value.clone())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.key().clone()).collect()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}

impl Default for ExpiringCache {
    fn default() -> Self {
        ExpiringCache::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn set_get_and_diagnostics() {
        let cache = ExpiringCache::new();
        cache.set("a", Value::Int(1));
        cache.set("b", Value::text("x"));
        assert_eq!(cache.get("a"), Some(Value::Int(1)));
        assert_eq!(cache.get("missing"), None);
        assert_eq!(cache.len(), 2);
        let mut keys = cache.keys();
        keys.sort();
        assert_eq!(keys, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn expired_entries_read_as_absent_but_are_not_evicted() {
        let cache = ExpiringCache::new();
        cache.set_with_ttl("a", Value::Int(1), Duration::ZERO);
        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn clear_empties_the_store() {
        let cache = ExpiringCache::new();
        cache.set("a", Value::Int(1));
        cache.clear();
        assert!(cache.is_empty());
    }
}
