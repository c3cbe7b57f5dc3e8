//! Near cache in front of an optional shared distributed tier

use crate::distributed::DistributedTier;
use crate::entry::{CacheEntry, Freshness, WireEntry};
use crate::errors::{CacheError, Result};
use crate::near::NearCache;
use crate::stats::{CacheStats, DistributedStats, StatsCollector};
use crate::store::CacheStore;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tierstore_core::{namespaced_key, StorageError};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Two-tier cache for one service namespace
///
/// Keys are stored as `"<namespace>:<key>"` in both tiers. Reads try the near
/// cache first, then the distributed tier; distributed hits are promoted into
/// the near cache. Distributed failures are logged and counted as misses.
pub struct TieredCache {
    namespace: String,
    near: Arc<NearCache>,
    distributed: Option<Arc<dyn DistributedTier>>,
    stats: StatsCollector,
    cache_timeout: Option<Duration>,
    cleanup: Mutex<Option<JoinHandle<()>>>,
}

impl TieredCache {
    pub fn new(namespace: impl Into<String>, max_entries: usize) -> Self {
        Self {
            namespace: namespace.into(),
            near: Arc::new(NearCache::new(max_entries)),
            distributed: None,
            stats: StatsCollector::new(),
            cache_timeout: None,
            cleanup: Mutex::new(None),
        }
    }

    pub fn with_distributed(mut self, tier: Arc<dyn DistributedTier>) -> Self {
        self.distributed = Some(tier);
        self
    }

    /// Deadline applied to every distributed tier call
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.cache_timeout = timeout;
        self
    }

    /// Start the near-cache expiry sweep; replaces any running sweep
    pub fn start_cleanup(&self, interval: Duration) {
        let handle = self.near.spawn_cleanup(interval);
        if let Some(previous) = std::mem::replace(&mut *self.cleanup.lock(), handle) {
            previous.abort();
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn near(&self) -> &NearCache {
        &self.near
    }

    pub fn has_distributed(&self) -> bool {
        self.distributed.is_some()
    }

    fn full_key(&self, key: &str) -> String {
        namespaced_key(&self.namespace, key)
    }

    fn namespace_prefix(&self) -> String {
        namespaced_key(&self.namespace, "")
    }

    /// Log and count a swallowed distributed tier failure
    fn tier_failed(&self, key: &str, error: CacheError) {
        let error = StorageError::from(error);
        warn!(key, kind = %error.kind(), error = %error, "distributed cache call failed, continuing without it");
        self.stats.record_error();
    }

    async fn call<T, F>(&self, operation: &'static str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>> + Send,
    {
        match self.cache_timeout {
            Some(duration) => tokio::time::timeout(duration, fut)
                .await
                .map_err(|_| CacheError::Timeout {
                    operation,
                    duration,
                })?,
            None => fut.await,
        }
    }

    /// Servable entry from either tier, without touching the counters
    async fn lookup(&self, key: &str) -> Option<CacheEntry<Value>> {
        let full_key = self.full_key(key);
        let near = self.near.get(&full_key);
        if near.as_ref().is_some_and(CacheEntry::is_fresh) {
            return near;
        }

        let Some(tier) = &self.distributed else {
            return near;
        };

        match self.fetch_remote(tier.as_ref(), &full_key).await {
            Ok(Some(remote)) => {
                let newer = near
                    .as_ref()
                    .map_or(true, |local| remote.expires_at > local.expires_at);
                if newer {
                    debug!(key = %full_key, "promoting distributed entry into near cache");
                    self.near.insert(remote.clone());
                    Some(remote)
                } else {
                    near
                }
            }
            Ok(None) => near,
            Err(e) => {
                self.tier_failed(&full_key, e);
                near
            }
        }
    }

    async fn fetch_remote(
        &self,
        tier: &dyn DistributedTier,
        full_key: &str,
    ) -> Result<Option<CacheEntry<Value>>> {
        let Some(payload) = self.call("get", tier.get(full_key)).await? else {
            return Ok(None);
        };
        let wire: WireEntry =
            serde_json::from_str(&payload).map_err(|e| CacheError::decode(full_key, &e))?;
        let entry = wire.into_entry(full_key);
        if entry.freshness(Instant::now()) == Freshness::Expired {
            return Ok(None);
        }
        Ok(Some(entry))
    }

    async fn store_remote(&self, tier: &dyn DistributedTier, entry: &CacheEntry<Value>) -> Result<()> {
        let payload = serde_json::to_string(&WireEntry::from_entry(entry))
            .map_err(|e| CacheError::encode(&entry.key, &e))?;
        let ttl = entry.remaining_retention(Instant::now());
        self.call("set", tier.set(&entry.key, payload, ttl)).await
    }
}

impl Drop for TieredCache {
    fn drop(&mut self) {
        if let Some(handle) = self.cleanup.get_mut().take() {
            handle.abort();
        }
    }
}

#[async_trait]
impl CacheStore for TieredCache {
    async fn get(&self, key: &str) -> Option<Value> {
        match self.lookup(key).await {
            Some(entry) if entry.is_fresh() => {
                self.stats.record_hit();
                Some(entry.value)
            }
            _ => {
                self.stats.record_miss();
                None
            }
        }
    }

    async fn get_entry(&self, key: &str) -> Option<CacheEntry<Value>> {
        let found = self.lookup(key).await;
        if found.is_some() {
            self.stats.record_hit();
        } else {
            self.stats.record_miss();
        }
        found
    }

    async fn set_entry(&self, key: &str, value: Value, ttl: Duration, stale_ttl: Option<Duration>) {
        let entry = CacheEntry::new(self.full_key(key), value, ttl, stale_ttl);
        self.near.insert(entry.clone());
        self.stats.record_write();

        if let Some(tier) = &self.distributed {
            if let Err(e) = self.store_remote(tier.as_ref(), &entry).await {
                self.tier_failed(&entry.key, e);
            }
        }
    }

    async fn delete(&self, key: &str) {
        let full_key = self.full_key(key);
        self.near.remove(&full_key);

        if let Some(tier) = &self.distributed {
            if let Err(e) = self.call("delete", tier.delete(&full_key)).await {
                self.tier_failed(&full_key, e);
            }
        }
    }

    async fn clear(&self) {
        let prefix = self.namespace_prefix();
        let removed = self.near.remove_prefix(&prefix);
        debug!(namespace = %self.namespace, removed, "cleared near cache namespace");

        if let Some(tier) = &self.distributed {
            match self.call("clear", tier.clear_prefix(&prefix)).await {
                Ok(removed) => debug!(namespace = %self.namespace, removed, "cleared distributed namespace"),
                Err(e) => self.tier_failed(&prefix, e),
            }
        }

        self.stats.reset();
        self.near.reset_evictions();
    }

    async fn stats(&self) -> CacheStats {
        let prefix = self.namespace_prefix();
        let mut snapshot = self
            .stats
            .snapshot(self.near.size_bytes(), self.near.count_prefix(&prefix) as u64);
        snapshot.evictions = self.near.evictions();

        if let Some(tier) = &self.distributed {
            let connected = self.call("ping", tier.ping()).await.is_ok();
            let key_count = if connected {
                self.call("count", tier.count_prefix(&prefix)).await.ok()
            } else {
                None
            };
            snapshot.distributed = Some(DistributedStats {
                backend: tier.name().to_string(),
                connected,
                key_count,
            });
        }

        snapshot
    }

    fn reset(&self) {
        self.near.remove_prefix(&self.namespace_prefix());
        self.stats.reset();
        self.near.reset_evictions();
    }
}
