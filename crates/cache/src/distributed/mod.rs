//! Shared distributed cache tier
//!
//! The tier stores JSON-encoded entries under fully namespaced keys and is
//! responsible for expiring them itself (the TTL handed to
//! [`DistributedTier::set`] covers the whole servable lifetime, stale
//! window included).

mod memory;
#[cfg(feature = "redis")]
mod redis;

pub use memory::MemoryTier;
#[cfg(feature = "redis")]
pub use self::redis::RedisTier;

use crate::errors::Result;
use async_trait::async_trait;
use std::time::Duration;

#[async_trait]
pub trait DistributedTier: Send + Sync {
    /// Short name for logs and stats, e.g. `"redis"`
    fn name(&self) -> &'static str;

    /// Raw payload stored under `key`; `None` on a miss
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store `payload` under `key`, expiring after `ttl`
    async fn set(&self, key: &str, payload: String, ttl: Duration) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;

    /// Remove every key starting with `prefix`; returns how many were removed
    async fn clear_prefix(&self, prefix: &str) -> Result<u64>;

    /// Count keys starting with `prefix`
    async fn count_prefix(&self, prefix: &str) -> Result<u64>;

    /// Round-trip to check connectivity
    async fn ping(&self) -> Result<()>;
}
