//! Bounded in-memory value cache
//!
//! Maps `db:table:record` keys to the raw JSON bytes last read from disk.
//! The cache is a soft-capped FIFO: when an insert would exceed the cap,
//! entries are evicted oldest-first until the new value fits. Eviction
//! order is tracked with an explicit queue so it stays stable under
//! concurrent writers.

use std::collections::{HashMap, VecDeque};
use std::sync::RwLock;

pub struct ValueCache {
    inner: RwLock<CacheInner>,
}

struct CacheInner {
    cap: usize,
    used: usize,
    map: HashMap<String, Vec<u8>>,
    /// Insertion order, oldest at the front.
    order: VecDeque<String>,
}

impl ValueCache {
    pub fn new(cap: usize) -> Self {
        Self {
            inner: RwLock::new(CacheInner {
                cap,
                used: 0,
                map: HashMap::new(),
                order: VecDeque::new(),
            }),
        }
    }

    /// Build the standard cache key for a record.
    pub fn record_key(db: &str, table: &str, item: &str) -> String {
        format!("{db}:{table}:{item}")
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        let inner = self.inner.read().expect("cache lock poisoned");
        inner.map.get(key).cloned()
    }

    /// Insert a value. Values larger than the cap are silently skipped.
    pub fn set(&self, key: &str, value: Vec<u8>) {
        let mut inner = self.inner.write().expect("cache lock poisoned");
        if value.len() > inner.cap {
            return;
        }

        // Re-setting a key replaces the old entry and refreshes its
        // position in the eviction queue.
        if let Some(old) = inner.map.remove(key) {
            inner.used -= old.len();
            inner.order.retain(|k| k != key);
        }

        while inner.used + value.len() > inner.cap {
            let Some(oldest) = inner.order.pop_front() else {
                break;
            };
            if let Some(evicted) = inner.map.remove(&oldest) {
                inner.used -= evicted.len();
            }
        }

        inner.used += value.len();
        inner.order.push_back(key.to_string());
        inner.map.insert(key.to_string(), value);
    }

    pub fn delete(&self, key: &str) {
        let mut inner = self.inner.write().expect("cache lock poisoned");
        if let Some(old) = inner.map.remove(key) {
            inner.used -= old.len();
            inner.order.retain(|k| k != key);
        }
    }

    /// Drop every entry whose key starts with `prefix`. Used when a table
    /// or database is deleted so a later re-create cannot surface stale
    /// values.
    pub fn purge_prefix(&self, prefix: &str) {
        let mut inner = self.inner.write().expect("cache lock poisoned");
        let doomed: Vec<String> = inner
            .map
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        for key in doomed {
            if let Some(old) = inner.map.remove(&key) {
                inner.used -= old.len();
            }
        }
        inner.order.retain(|k| !k.starts_with(prefix));
    }

    pub fn used_bytes(&self) -> usize {
        self.inner.read().expect("cache lock poisoned").used
    }

    pub fn len(&self) -> usize {
        self.inner.read().expect("cache lock poisoned").map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_get_delete() {
        let cache = ValueCache::new(1024);
        cache.set("a", b"hello".to_vec());
        assert_eq!(cache.get("a").unwrap(), b"hello");
        assert_eq!(cache.used_bytes(), 5);

        cache.delete("a");
        assert!(cache.get("a").is_none());
        assert_eq!(cache.used_bytes(), 0);
    }

    #[test]
    fn test_oversized_value_is_skipped() {
        let cache = ValueCache::new(10);
        cache.set("big", vec![0u8; 11]);
        assert!(cache.get("big").is_none());
        assert_eq!(cache.used_bytes(), 0);
    }

    #[test]
    fn test_fifo_eviction_order() {
        // 100-byte cap, three 40-byte values: "a" goes first.
        let cache = ValueCache::new(100);
        cache.set("a", vec![1u8; 40]);
        cache.set("b", vec![2u8; 40]);
        cache.set("c", vec![3u8; 40]);

        assert!(cache.get("a").is_none());
        assert!(cache.get("b").is_some());
        assert!(cache.get("c").is_some());
        assert_eq!(cache.used_bytes(), 80);
    }

    #[test]
    fn test_eviction_frees_until_fit() {
        let cache = ValueCache::new(100);
        cache.set("a", vec![0u8; 30]);
        cache.set("b", vec![0u8; 30]);
        cache.set("c", vec![0u8; 30]);
        // 90 used; a 90-byte value must evict all three.
        cache.set("d", vec![0u8; 90]);

        assert!(cache.get("a").is_none());
        assert!(cache.get("b").is_none());
        assert!(cache.get("c").is_none());
        assert_eq!(cache.get("d").unwrap().len(), 90);
        assert_eq!(cache.used_bytes(), 90);
    }

    #[test]
    fn test_reset_refreshes_position() {
        let cache = ValueCache::new(100);
        cache.set("a", vec![0u8; 40]);
        cache.set("b", vec![0u8; 40]);
        // Re-set "a": it moves to the back of the queue.
        cache.set("a", vec![1u8; 40]);
        cache.set("c", vec![0u8; 40]);

        assert!(cache.get("b").is_none());
        assert!(cache.get("a").is_some());
        assert!(cache.get("c").is_some());
    }

    #[test]
    fn test_used_never_exceeds_cap() {
        let cache = ValueCache::new(64);
        for i in 0..100 {
            cache.set(&format!("k{i}"), vec![0u8; (i % 30) + 1]);
            assert!(cache.used_bytes() <= 64);
        }
    }

    #[test]
    fn test_purge_prefix() {
        let cache = ValueCache::new(1024);
        cache.set("db:t1:a", b"1".to_vec());
        cache.set("db:t1:b", b"2".to_vec());
        cache.set("db:t2:a", b"3".to_vec());

        cache.purge_prefix("db:t1:");
        assert!(cache.get("db:t1:a").is_none());
        assert!(cache.get("db:t1:b").is_none());
        assert!(cache.get("db:t2:a").is_some());
        assert_eq!(cache.used_bytes(), 1);
    }

    #[test]
    fn test_record_key_format() {
        assert_eq!(ValueCache::record_key("db", "tbl", "it"), "db:tbl:it");
    }
}
