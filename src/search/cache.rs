//! LRU+TTL cache primitive shared by the query-embedding and
//! query+filter-results caches.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

/// Normalizes a query string for use as a cache key: lowercased, trimmed,
/// internal whitespace collapsed to single spaces.
#[must_use]
pub fn normalize_query(query: &str) -> String {
    query
        .trim()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Serializes a filter map canonically (sorted keys) so equivalent filters
/// share a cache key regardless of construction order.
#[must_use]
pub fn canonical_filter_key(filter: &serde_json::Value) -> String {
    fn sort_value(value: &serde_json::Value) -> serde_json::Value {
        match value {
            serde_json::Value::Object(map) => {
                let mut sorted = serde_json::Map::new();
                let mut keys: Vec<&String> = map.keys().collect();
                keys.sort();
                for key in keys {
                    sorted.insert(key.clone(), sort_value(&map[key]));
                }
                serde_json::Value::Object(sorted)
            }
            other => other.clone(),
        }
    }
    sort_value(filter).to_string()
}

struct Entry<V> {
    value: V,
    inserted_at: Instant,
}

/// A bounded cache with both an LRU eviction policy and a per-entry TTL.
///
/// Recency is tracked with a simple `Vec<K>` MRU-ordered list; this crate's
/// cache sizes (≤ a few hundred entries) make the O(n) reorder on access
/// cheap compared to a real intrusive linked-list LRU.
pub struct TtlLruCache<K, V> {
    capacity: usize,
    ttl: Duration,
    entries: HashMap<K, Entry<V>>,
    order: Vec<K>,
}

impl<K, V> TtlLruCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Creates a cache holding at most `capacity` live entries, each valid
    /// for `ttl` from insertion.
    #[must_use]
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            capacity: capacity.max(1),
            ttl,
            entries: HashMap::new(),
            order: Vec::new(),
        }
    }

    /// Looks up `key`, returning `None` if absent or expired. A hit bumps
    /// the key to most-recently-used.
    pub fn get(&mut self, key: &K) -> Option<V> {
        let expired = self
            .entries
            .get(key)
            .is_some_and(|e| e.inserted_at.elapsed() > self.ttl);
        if expired {
            self.entries.remove(key);
            self.order.retain(|k| k != key);
            return None;
        }
        let value = self.entries.get(key).map(|e| e.value.clone());
        if value.is_some() {
            self.touch(key);
        }
        value
    }

    /// Inserts or replaces `key`, evicting the least-recently-used entry if
    /// the cache is at capacity.
    pub fn put(&mut self, key: K, value: V) {
        if self.entries.contains_key(&key) {
            self.entries.insert(
                key.clone(),
                Entry {
                    value,
                    inserted_at: Instant::now(),
                },
            );
            self.touch(&key);
            return;
        }

        if self.entries.len() >= self.capacity {
            if let Some(lru) = self.order.first().cloned() {
                self.entries.remove(&lru);
                self.order.remove(0);
            }
        }

        self.entries.insert(
            key.clone(),
            Entry {
                value,
                inserted_at: Instant::now(),
            },
        );
        self.order.push(key);
    }

    /// Removes every entry, used when the result cache must be invalidated
    /// by a vector-store mutation signal.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    /// Number of live (not necessarily unexpired) entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache currently holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn touch(&mut self, key: &K) {
        self.order.retain(|k| k != key);
        self.order.push(key.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_query_collapses_whitespace() {
        assert_eq!(normalize_query("  Hello   World  "), "hello world");
    }

    #[test]
    fn test_canonical_filter_key_ignores_field_order() {
        let a = serde_json::json!({"b": 1, "a": 2});
        let b = serde_json::json!({"a": 2, "b": 1});
        assert_eq!(canonical_filter_key(&a), canonical_filter_key(&b));
    }

    #[test]
    fn test_put_then_get() {
        let mut cache: TtlLruCache<String, i32> = TtlLruCache::new(10, Duration::from_secs(60));
        cache.put("a".to_string(), 1);
        assert_eq!(cache.get(&"a".to_string()), Some(1));
    }

    #[test]
    fn test_get_miss_returns_none() {
        let mut cache: TtlLruCache<String, i32> = TtlLruCache::new(10, Duration::from_secs(60));
        assert_eq!(cache.get(&"missing".to_string()), None);
    }

    #[test]
    fn test_eviction_when_over_capacity() {
        let mut cache: TtlLruCache<String, i32> = TtlLruCache::new(2, Duration::from_secs(60));
        cache.put("a".to_string(), 1);
        cache.put("b".to_string(), 2);
        cache.put("c".to_string(), 3);
        assert_eq!(cache.get(&"a".to_string()), None);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_access_refreshes_recency() {
        let mut cache: TtlLruCache<String, i32> = TtlLruCache::new(2, Duration::from_secs(60));
        cache.put("a".to_string(), 1);
        cache.put("b".to_string(), 2);
        cache.get(&"a".to_string());
        cache.put("c".to_string(), 3);
        assert_eq!(cache.get(&"b".to_string()), None);
        assert_eq!(cache.get(&"a".to_string()), Some(1));
    }

    #[test]
    fn test_ttl_expiry() {
        let mut cache: TtlLruCache<String, i32> = TtlLruCache::new(10, Duration::from_millis(1));
        cache.put("a".to_string(), 1);
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(cache.get(&"a".to_string()), None);
    }

    #[test]
    fn test_clear_empties_cache() {
        let mut cache: TtlLruCache<String, i32> = TtlLruCache::new(10, Duration::from_secs(60));
        cache.put("a".to_string(), 1);
        cache.clear();
        assert!(cache.is_empty());
    }
}
