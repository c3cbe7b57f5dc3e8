use super::LocalFallbackStore;
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use tierstore_core::{Result, StorageError};

/// Process-memory fallback, for runtimes without a writable filesystem
#[derive(Default)]
pub struct MemoryFallbackStore {
    entries: DashMap<String, Value>,
    failing: AtomicBool,
}

impl MemoryFallbackStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail, as a full or read-only medium would
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    fn is_failing(&self) -> bool {
        self.failing.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LocalFallbackStore for MemoryFallbackStore {
    async fn save(&self, key: &str, data: &Value) -> Result<()> {
        if self.is_failing() {
            return Err(StorageError::local_write(key, "local store unavailable"));
        }
        self.entries.insert(key.to_string(), data.clone());
        Ok(())
    }

    async fn load(&self, key: &str) -> Result<Option<Value>> {
        if self.is_failing() {
            return Err(StorageError::local_read(key, "local store unavailable"));
        }
        Ok(self.entries.get(key).map(|item| item.value().clone()))
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        if self.is_failing() {
            return Err(StorageError::local_write(key, "local store unavailable"));
        }
        Ok(self.entries.remove(key).is_some())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<Value>> {
        if self.is_failing() {
            return Err(StorageError::local_read(prefix, "local store unavailable"));
        }
        let mut matches: Vec<(String, Value)> = self
            .entries
            .iter()
            .filter(|item| item.key().starts_with(prefix))
            .map(|item| (item.key().clone(), item.value().clone()))
            .collect();
        matches.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(matches.into_iter().map(|(_, value)| value).collect())
    }
}
