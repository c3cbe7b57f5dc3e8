//! The cache contract consumed by the storage façade

use crate::entry::CacheEntry;
use crate::stats::CacheStats;
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

/// Keyed cache for one service namespace
///
/// Every method is infallible: tier errors are logged and surface as misses
/// (reads) or as silently skipped writes.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Fresh value for `key`, if any
    async fn get(&self, key: &str) -> Option<Value>;

    /// Entry for `key` while it is still servable, fresh or stale
    async fn get_entry(&self, key: &str) -> Option<CacheEntry<Value>>;

    async fn set(&self, key: &str, value: Value, ttl: Duration) {
        self.set_entry(key, value, ttl, None).await;
    }

    /// Store `value`, fresh for `ttl` and servable as stale until `stale_ttl`
    async fn set_entry(&self, key: &str, value: Value, ttl: Duration, stale_ttl: Option<Duration>);

    async fn delete(&self, key: &str);

    /// Drop the whole namespace from every tier and zero the counters
    async fn clear(&self);

    async fn stats(&self) -> CacheStats;

    /// Forget local state (near cache and counters) without touching shared tiers
    fn reset(&self);
}
