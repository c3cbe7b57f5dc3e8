//! In-process near cache
//!
//! A bounded `DashMap` keyed by the fully namespaced cache key. Entries are
//! dropped once past their stale window, either lazily on lookup or by the
//! background sweep started with [`NearCache::spawn_cleanup`].

use crate::entry::{CacheEntry, Freshness};
use dashmap::DashMap;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

struct Slot {
    entry: CacheEntry<Value>,
    size: u64,
}

pub struct NearCache {
    entries: DashMap<String, Slot>,
    max_entries: usize,
    total_bytes: AtomicU64,
    evictions: AtomicU64,
}

impl NearCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: DashMap::new(),
            max_entries: max_entries.max(1),
            total_bytes: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Entry for `key` if it is still servable (fresh or stale)
    pub fn get(&self, key: &str) -> Option<CacheEntry<Value>> {
        let now = Instant::now();
        let expired = match self.entries.get(key) {
            Some(slot) if slot.entry.freshness(now) != Freshness::Expired => {
                return Some(slot.entry.clone());
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            self.remove_expired(key, now);
        }
        None
    }

    pub fn insert(&self, entry: CacheEntry<Value>) {
        let size = encoded_len(&entry.value);
        let key = entry.key.clone();

        if !self.entries.contains_key(&key) && self.entries.len() >= self.max_entries {
            self.purge_expired();
            if self.entries.len() >= self.max_entries {
                self.evict_one();
            }
        }

        if let Some(previous) = self.entries.insert(key, Slot { entry, size }) {
            self.total_bytes.fetch_sub(previous.size, Ordering::Relaxed);
        }
        self.total_bytes.fetch_add(size, Ordering::Relaxed);
    }

    pub fn remove(&self, key: &str) -> bool {
        match self.entries.remove(key) {
            Some((_, slot)) => {
                self.total_bytes.fetch_sub(slot.size, Ordering::Relaxed);
                true
            }
            None => false,
        }
    }

    /// Remove every key starting with `prefix`; returns how many were removed
    pub fn remove_prefix(&self, prefix: &str) -> usize {
        let keys: Vec<String> = self
            .entries
            .iter()
            .filter(|item| item.key().starts_with(prefix))
            .map(|item| item.key().clone())
            .collect();

        keys.iter().filter(|key| self.remove(key)).count()
    }

    pub fn clear(&self) {
        self.entries.clear();
        self.total_bytes.store(0, Ordering::Relaxed);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of keys under `prefix`
    pub fn count_prefix(&self, prefix: &str) -> usize {
        self.entries
            .iter()
            .filter(|item| item.key().starts_with(prefix))
            .count()
    }

    /// Sum of the encoded sizes of all held values
    pub fn size_bytes(&self) -> u64 {
        self.total_bytes.load(Ordering::Relaxed)
    }

    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    pub fn reset_evictions(&self) {
        self.evictions.store(0, Ordering::Relaxed);
    }

    /// Drop entries past their stale window; returns how many were dropped
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|item| item.entry.freshness(now) == Freshness::Expired)
            .map(|item| item.key().clone())
            .collect();

        expired
            .iter()
            .filter(|key| self.remove_expired(key, now))
            .count()
    }

    /// Sweep expired entries every `interval` until the cache is dropped
    pub fn spawn_cleanup(self: &Arc<Self>, interval: Duration) -> Option<JoinHandle<()>> {
        if interval.is_zero() {
            return None;
        }

        let weak: Weak<Self> = Arc::downgrade(self);
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // first tick completes immediately
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let Some(cache) = weak.upgrade() else {
                    break;
                };
                let purged = cache.purge_expired();
                if purged > 0 {
                    debug!(purged, "near cache sweep removed expired entries");
                }
            }
        }))
    }

    fn remove_expired(&self, key: &str, now: Instant) -> bool {
        match self
            .entries
            .remove_if(key, |_, slot| slot.entry.freshness(now) == Freshness::Expired)
        {
            Some((_, slot)) => {
                self.total_bytes.fetch_sub(slot.size, Ordering::Relaxed);
                true
            }
            None => false,
        }
    }

    /// Evict the entry that would stop being servable soonest
    fn evict_one(&self) {
        let victim = self
            .entries
            .iter()
            .min_by_key(|item| item.entry.retain_until())
            .map(|item| item.key().clone());

        if let Some(key) = victim {
            if self.remove(&key) {
                self.evictions.fetch_add(1, Ordering::Relaxed);
                debug!(key = %key, "near cache full, evicted entry");
            }
        }
    }
}

fn encoded_len(value: &Value) -> u64 {
    serde_json::to_vec(value).map(|bytes| bytes.len() as u64).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(key: &str, ttl_ms: u64) -> CacheEntry<Value> {
        CacheEntry::new(key, json!({ "k": key }), Duration::from_millis(ttl_ms), None)
    }

    #[tokio::test(start_paused = true)]
    async fn get_returns_live_entries_only() {
        let cache = NearCache::new(10);
        cache.insert(entry("a", 100));
        assert!(cache.get("a").is_some());

        tokio::time::advance(Duration::from_millis(100)).await;
        assert!(cache.get("a").is_none());
        assert!(cache.is_empty());
        assert_eq!(cache.size_bytes(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_entries_are_still_returned() {
        let cache = NearCache::new(10);
        cache.insert(CacheEntry::new(
            "a",
            json!(1),
            Duration::from_millis(100),
            Some(Duration::from_millis(1000)),
        ));

        tokio::time::advance(Duration::from_millis(500)).await;
        let found = cache.get("a").unwrap();
        assert_eq!(found.freshness(Instant::now()), Freshness::Stale);
    }

    #[tokio::test(start_paused = true)]
    async fn capacity_evicts_soonest_expiring() {
        let cache = NearCache::new(2);
        cache.insert(entry("short", 10));
        cache.insert(entry("long", 10_000));
        cache.insert(entry("new", 10_000));

        assert_eq!(cache.len(), 2);
        assert!(cache.get("short").is_none());
        assert!(cache.get("long").is_some());
        assert_eq!(cache.evictions(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn size_tracks_replacements_and_removals() {
        let cache = NearCache::new(10);
        cache.insert(CacheEntry::new("a", json!("xx"), Duration::from_secs(1), None));
        assert_eq!(cache.size_bytes(), 4);
        cache.insert(CacheEntry::new("a", json!("xxxx"), Duration::from_secs(1), None));
        assert_eq!(cache.size_bytes(), 6);
        assert!(cache.remove("a"));
        assert_eq!(cache.size_bytes(), 0);
        assert!(!cache.remove("a"));
    }

    #[tokio::test(start_paused = true)]
    async fn prefix_operations() {
        let cache = NearCache::new(10);
        cache.insert(entry("svc:a", 1000));
        cache.insert(entry("svc:b", 1000));
        cache.insert(entry("other:a", 1000));

        assert_eq!(cache.count_prefix("svc:"), 2);
        assert_eq!(cache.remove_prefix("svc:"), 2);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn background_sweep_purges() {
        let cache = Arc::new(NearCache::new(10));
        cache.insert(entry("a", 50));
        let handle = cache.spawn_cleanup(Duration::from_millis(100)).unwrap();

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(cache.is_empty());
        handle.abort();
    }
}
