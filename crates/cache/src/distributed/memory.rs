//! In-process stand-in for the distributed tier
//!
//! Shared between several `TieredCache`s in one process it behaves like a
//! networked key/value store, including the ability to go offline.

use super::DistributedTier;
use crate::entry::deadline;
use crate::errors::{CacheError, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Default)]
pub struct MemoryTier {
    entries: DashMap<String, (String, Instant)>,
    offline: AtomicBool,
    calls: AtomicU64,
}

impl MemoryTier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an outage: every call fails until set back online
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of calls received, including failed ones
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    fn check(&self, operation: &'static str) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.offline.load(Ordering::SeqCst) {
            return Err(CacheError::unavailable(operation, "memory tier offline"));
        }
        Ok(())
    }

    fn live_keys(&self, prefix: &str) -> Vec<String> {
        let now = Instant::now();
        self.entries
            .iter()
            .filter(|item| item.key().starts_with(prefix) && item.value().1 > now)
            .map(|item| item.key().clone())
            .collect()
    }
}

#[async_trait]
impl DistributedTier for MemoryTier {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.check("get")?;
        let now = Instant::now();
        let expired = match self.entries.get(key) {
            Some(item) if item.value().1 > now => return Ok(Some(item.value().0.clone())),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.entries.remove(key);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, payload: String, ttl: Duration) -> Result<()> {
        self.check("set")?;
        self.entries
            .insert(key.to_string(), (payload, deadline(Instant::now(), ttl)));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.check("delete")?;
        self.entries.remove(key);
        Ok(())
    }

    async fn clear_prefix(&self, prefix: &str) -> Result<u64> {
        self.check("clear")?;
        let keys: Vec<String> = self
            .entries
            .iter()
            .filter(|item| item.key().starts_with(prefix))
            .map(|item| item.key().clone())
            .collect();
        let removed = keys
            .iter()
            .filter(|key| self.entries.remove(key.as_str()).is_some())
            .count();
        Ok(removed as u64)
    }

    async fn count_prefix(&self, prefix: &str) -> Result<u64> {
        self.check("count")?;
        Ok(self.live_keys(prefix).len() as u64)
    }

    async fn ping(&self) -> Result<()> {
        self.check("ping")
    }
}
