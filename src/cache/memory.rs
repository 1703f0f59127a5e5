//! In-Memory Cache Module
//!
//! Engine backed by an in-process HashMap with lazy expiration and purge sweeps.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::cache::engine::{CacheEngine, CacheTier, EngineKind, EngineLock};
use crate::cache::{CacheStats, CachedItem, InsertionOrder, StatsRecorder};
use crate::error::{CacheError, Result};

// == Entries ==
/// Map plus arrival order, always mutated together under one lock.
#[derive(Debug, Default)]
struct Entries {
    items: HashMap<String, CachedItem>,
    order: InsertionOrder,
}

impl Entries {
    fn remove(&mut self, key: &str) -> Option<CachedItem> {
        let removed = self.items.remove(key);
        if removed.is_some() {
            self.order.remove(key);
        }
        removed
    }
}

// == In-Memory Cache ==
/// Volatile engine holding items in a key to [`CachedItem`] map.
///
/// Expired items are treated as absent on every read and are physically
/// removed by the next [`CacheTier::purge`].
#[derive(Debug)]
pub struct InMemoryCache {
    context: String,
    entries: EngineLock<Entries>,
    stats: StatsRecorder,
}

impl InMemoryCache {
    // == Constructor ==
    pub fn new(context: impl Into<String>) -> Self {
        Self {
            context: context.into(),
            entries: EngineLock::new(Entries::default()),
            stats: StatsRecorder::new(),
        }
    }

    /// The context this engine serves.
    pub fn context(&self) -> &str {
        &self.context
    }

    // == Keys In Order ==
    /// Returns every stored key, oldest arrival first, expired ones included.
    pub fn keys_in_order(&self) -> Vec<String> {
        self.entries.read().order.oldest_first().cloned().collect()
    }

    // == Length ==
    /// Returns the number of stored items, expired-but-unpurged included.
    pub fn len(&self) -> usize {
        self.entries.read().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().items.is_empty()
    }
}

impl CacheEngine for InMemoryCache {
    fn kind(&self) -> EngineKind {
        EngineKind::Memory
    }

    // == Add ==
    /// Inserts a new item under the write lock.
    ///
    /// An expired item still waiting for purge does not block the key.
    /// Insertion counts as an access, so a sliding item starts with a full
    /// window.
    fn add(
        &self,
        key: &str,
        value: serde_json::Value,
        absolute_expiration: DateTime<Utc>,
        sliding_expiration: Duration,
    ) -> Result<()> {
        let now = Utc::now();
        let mut entries = self.entries.write();

        if let Some(existing) = entries.items.get(key) {
            if !existing.is_expired_at(now) {
                return Err(CacheError::DuplicateKey(key.to_string()));
            }
            entries.remove(key);
        }

        let mut item = CachedItem::new(key, value, absolute_expiration, sliding_expiration);
        item.renew_at(now);
        entries.items.insert(key.to_string(), item);
        entries.order.push(key);

        Ok(())
    }

    // == Get ==
    /// Retrieves a value by key.
    ///
    /// Non-sliding hits are served under the shared read lock. Sliding hits
    /// renew the deadline, which is a write: the lock is re-taken exclusively
    /// and the item re-validated before renewing.
    fn get(&self, key: &str) -> Result<Option<serde_json::Value>> {
        let now = Utc::now();

        let needs_renewal = {
            let entries = self.entries.read();
            match entries.items.get(key) {
                Some(item) if !item.is_expired_at(now) => {
                    if !item.has_sliding() {
                        self.stats.record_hit();
                        return Ok(Some(item.value.clone()));
                    }
                    true
                }
                _ => false,
            }
        };

        if needs_renewal {
            let mut entries = self.entries.write();
            if let Some(item) = entries.items.get_mut(key) {
                if !item.is_expired_at(now) {
                    item.renew_at(now);
                    self.stats.record_hit();
                    return Ok(Some(item.value.clone()));
                }
            }
        }

        self.stats.record_miss();
        Ok(None)
    }

    fn exists(&self, key: &str) -> Result<bool> {
        let now = Utc::now();
        let entries = self.entries.read();
        Ok(entries
            .items
            .get(key)
            .is_some_and(|item| !item.is_expired_at(now)))
    }

    // == Update ==
    /// Replaces the value of a live item and renews a sliding deadline.
    fn update(&self, key: &str, value: serde_json::Value) -> Result<()> {
        let now = Utc::now();
        let mut entries = self.entries.write();

        match entries.items.get_mut(key) {
            Some(item) if !item.is_expired_at(now) => {
                item.value = value;
                item.renew_at(now);
                Ok(())
            }
            _ => Err(CacheError::NotFound(key.to_string())),
        }
    }

    // == Remove ==
    fn remove(&self, key: &str) -> Result<()> {
        self.entries.write().remove(key);
        Ok(())
    }

    // == Keys ==
    /// Snapshot of live keys in arrival order, copied under the read lock.
    fn keys(&self) -> Result<Vec<String>> {
        let now = Utc::now();
        let entries = self.entries.read();

        Ok(entries
            .order
            .oldest_first()
            .filter(|key| {
                entries
                    .items
                    .get(key.as_str())
                    .is_some_and(|item| !item.is_expired_at(now))
            })
            .cloned()
            .collect())
    }

    fn stats(&self) -> CacheStats {
        self.stats.snapshot(self.len())
    }
}

impl CacheTier for InMemoryCache {
    fn get_item(&self, key: &str) -> Result<Option<CachedItem>> {
        Ok(self.entries.read().items.get(key).cloned())
    }

    // == Purge ==
    /// Removes all expired items.
    ///
    /// Expired keys are collected under an upgradable read so plain readers
    /// keep going during the scan; the same guard is then upgraded to remove
    /// them. No writer can slip in between scan and removal.
    fn purge(&self) -> Result<usize> {
        let now = Utc::now();
        let entries = self.entries.upgradable_read();

        let expired: Vec<String> = entries
            .items
            .values()
            .filter(|item| item.is_expired_at(now))
            .map(|item| item.key.clone())
            .collect();

        if expired.is_empty() {
            return Ok(0);
        }

        let mut entries = EngineLock::upgrade(entries);
        for key in &expired {
            entries.remove(key);
        }
        drop(entries);

        self.stats.record_purged(expired.len());
        debug!(
            context = %self.context,
            purged = expired.len(),
            "purged expired items"
        );

        Ok(expired.len())
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{NO_ABSOLUTE_EXPIRATION, NO_SLIDING_EXPIRATION};
    use chrono::TimeDelta;
    use serde_json::json;
    use std::sync::Arc;
    use std::thread::{self, sleep};

    fn add_forever(cache: &InMemoryCache, key: &str, value: serde_json::Value) {
        cache
            .add(key, value, NO_ABSOLUTE_EXPIRATION, NO_SLIDING_EXPIRATION)
            .unwrap();
    }

    #[test]
    fn test_cache_new() {
        let cache = InMemoryCache::new("test");
        assert_eq!(cache.len(), 0);
        assert!(cache.is_empty());
        assert_eq!(cache.context(), "test");
    }

    #[test]
    fn test_add_and_get() {
        let cache = InMemoryCache::new("test");

        add_forever(&cache, "key1", json!("value1"));

        assert_eq!(cache.get("key1").unwrap(), Some(json!("value1")));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_get_nonexistent() {
        let cache = InMemoryCache::new("test");
        assert_eq!(cache.get("nonexistent").unwrap(), None);
    }

    #[test]
    fn test_duplicate_add_rejected() {
        let cache = InMemoryCache::new("test");

        add_forever(&cache, "key1", json!(1));
        let result = cache.add("key1", json!(2), NO_ABSOLUTE_EXPIRATION, NO_SLIDING_EXPIRATION);

        assert!(matches!(result, Err(CacheError::DuplicateKey(k)) if k == "key1"));
        assert_eq!(cache.get("key1").unwrap(), Some(json!(1)));
    }

    #[test]
    fn test_add_replaces_expired_leftover() {
        let cache = InMemoryCache::new("test");
        let past = Utc::now() - TimeDelta::seconds(1);

        cache.add("key1", json!(1), past, NO_SLIDING_EXPIRATION).unwrap();
        add_forever(&cache, "key1", json!(2));

        assert_eq!(cache.get("key1").unwrap(), Some(json!(2)));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_already_expired_on_insert() {
        let cache = InMemoryCache::new("test");
        let past = Utc::now() - TimeDelta::seconds(1);

        cache.add("key1", json!(1), past, NO_SLIDING_EXPIRATION).unwrap();

        assert_eq!(cache.get("key1").unwrap(), None);
        assert!(!cache.exists("key1").unwrap());
        // Lazily expired: still stored until the next purge
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_sliding_renewal() {
        let cache = InMemoryCache::new("test");
        let soon = Utc::now() + TimeDelta::milliseconds(10);

        cache
            .add("sliding", json!("s"), soon, Duration::from_secs(3600))
            .unwrap();
        cache.add("fixed", json!("f"), soon, NO_SLIDING_EXPIRATION).unwrap();

        sleep(Duration::from_millis(20));

        assert_eq!(cache.get("sliding").unwrap(), Some(json!("s")));
        assert_eq!(cache.get("fixed").unwrap(), None);
    }

    #[test]
    fn test_sliding_read_extends_deadline() {
        let cache = InMemoryCache::new("test");
        let window = Duration::from_millis(60);

        cache
            .add("sliding", json!("s"), NO_ABSOLUTE_EXPIRATION, window)
            .unwrap();

        // Keep reading inside the window well past its original length
        for _ in 0..4 {
            sleep(Duration::from_millis(30));
            assert_eq!(cache.get("sliding").unwrap(), Some(json!("s")));
        }

        sleep(Duration::from_millis(120));
        assert_eq!(cache.get("sliding").unwrap(), None);
    }

    #[test]
    fn test_update_existing() {
        let cache = InMemoryCache::new("test");

        add_forever(&cache, "key1", json!("old"));
        cache.update("key1", json!("new")).unwrap();

        assert_eq!(cache.get("key1").unwrap(), Some(json!("new")));
    }

    #[test]
    fn test_update_keeps_policy() {
        let cache = InMemoryCache::new("test");
        let deadline = Utc::now() + TimeDelta::hours(1);

        cache.add("key1", json!(1), deadline, NO_SLIDING_EXPIRATION).unwrap();
        cache.update("key1", json!(2)).unwrap();

        let item = cache.get_item("key1").unwrap().unwrap();
        assert_eq!(item.absolute_expiration, deadline);
        assert_eq!(item.sliding_expiration, NO_SLIDING_EXPIRATION);
    }

    #[test]
    fn test_update_missing_is_not_found() {
        let cache = InMemoryCache::new("test");

        let result = cache.update("missing", json!(1));
        assert!(matches!(result, Err(CacheError::NotFound(_))));
        assert!(!cache.exists("missing").unwrap());
    }

    #[test]
    fn test_remove_is_idempotent() {
        let cache = InMemoryCache::new("test");

        add_forever(&cache, "key1", json!(1));
        cache.remove("key1").unwrap();
        cache.remove("key1").unwrap();

        assert!(cache.is_empty());
        assert_eq!(cache.get("key1").unwrap(), None);
    }

    #[test]
    fn test_purge_removes_expired_keeps_live() {
        let cache = InMemoryCache::new("test");
        let now = Utc::now();

        cache
            .add("short", json!(1), now + TimeDelta::milliseconds(1), NO_SLIDING_EXPIRATION)
            .unwrap();
        cache
            .add("long", json!(2), now + TimeDelta::hours(1), NO_SLIDING_EXPIRATION)
            .unwrap();

        sleep(Duration::from_millis(10));

        assert_eq!(cache.purge().unwrap(), 1);
        assert_eq!(cache.keys().unwrap(), vec!["long".to_string()]);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.stats().purged, 1);
    }

    #[test]
    fn test_purge_large_map_is_fast() {
        let cache = InMemoryCache::new("test");
        let past = Utc::now() - TimeDelta::seconds(1);
        let started = std::time::Instant::now();

        for i in 0..40_000 {
            let deadline = if i % 2 == 0 { past } else { NO_ABSOLUTE_EXPIRATION };
            cache
                .add(&format!("key{i}"), json!(i), deadline, NO_SLIDING_EXPIRATION)
                .unwrap();
        }
        assert_eq!(cache.purge().unwrap(), 20_000);

        assert!(
            started.elapsed() < Duration::from_secs(5),
            "40k adds and a 20k purge took {:?}",
            started.elapsed()
        );
        assert_eq!(cache.len(), 20_000);
        assert_eq!(cache.keys_in_order()[..2], ["key1".to_string(), "key3".to_string()]);
    }

    #[test]
    fn test_purge_nothing_expired() {
        let cache = InMemoryCache::new("test");
        add_forever(&cache, "key1", json!(1));

        assert_eq!(cache.purge().unwrap(), 0);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_keys_snapshot_in_arrival_order() {
        let cache = InMemoryCache::new("test");

        add_forever(&cache, "c", json!(1));
        add_forever(&cache, "a", json!(2));
        add_forever(&cache, "b", json!(3));

        let keys = cache.keys().unwrap();
        cache.remove("a").unwrap();

        assert_eq!(keys, vec!["c", "a", "b"]);
        assert_eq!(cache.keys_in_order(), vec!["c", "b"]);
    }

    #[test]
    fn test_stats() {
        let cache = InMemoryCache::new("test");

        add_forever(&cache, "key1", json!(1));
        cache.get("key1").unwrap();
        cache.get("nonexistent").unwrap();

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.total_entries, 1);
    }

    #[test]
    fn test_concurrent_readers_and_writers() {
        let cache = Arc::new(InMemoryCache::new("test"));

        let handles: Vec<_> = (0..4)
            .map(|t| {
                let cache = Arc::clone(&cache);
                thread::spawn(move || {
                    for i in 0..250 {
                        let key = format!("{t}-{i}");
                        cache
                            .add(&key, json!(i), NO_ABSOLUTE_EXPIRATION, NO_SLIDING_EXPIRATION)
                            .unwrap();
                        assert_eq!(cache.get(&key).unwrap(), Some(json!(i)));
                        let _ = cache.keys().unwrap();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(cache.len(), 1000);
    }
}
