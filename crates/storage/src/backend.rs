//! Primary backend contract and the in-process implementation

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tierstore_core::{scoped_key, EffectiveOptions, Result, StorageError};

/// Adapter to the durable primary store (object storage, a database, ...)
///
/// Implementations report failures through `Err` and never panic; the
/// façade decides what a failure means for the call.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Short name used in errors and logs
    fn name(&self) -> &str;

    async fn save_to_storage(&self, key: &str, data: &Value, options: &EffectiveOptions)
        -> Result<()>;

    /// Stored payload, `None` when the key does not exist
    async fn load_from_storage(&self, key: &str, options: &EffectiveOptions)
        -> Result<Option<Value>>;

    async fn delete_from_storage(&self, key: &str, options: &EffectiveOptions) -> Result<()>;

    /// Payloads of every key starting with `prefix`, ordered by key
    async fn list_from_storage(&self, prefix: &str, options: &EffectiveOptions)
        -> Result<Vec<Value>>;
}

/// Per-operation call counts of a [`MemoryBackend`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackendCalls {
    pub saves: u64,
    pub loads: u64,
    pub deletes: u64,
    pub lists: u64,
}

/// In-process primary backend
///
/// Keys are scoped by the call's `bucket` and `path` options. The backend can
/// be switched offline or slowed down to exercise the fallback chain.
#[derive(Default)]
pub struct MemoryBackend {
    objects: DashMap<String, Value>,
    offline: AtomicBool,
    latency_ms: AtomicU64,
    saves: AtomicU64,
    loads: AtomicU64,
    deletes: AtomicU64,
    lists: AtomicU64,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_available(&self, available: bool) {
        self.offline.store(!available, Ordering::SeqCst);
    }

    /// Delay every call by `latency`
    pub fn set_latency(&self, latency: Duration) {
        let millis = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
        self.latency_ms.store(millis, Ordering::SeqCst);
    }

    pub fn calls(&self) -> BackendCalls {
        BackendCalls {
            saves: self.saves.load(Ordering::SeqCst),
            loads: self.loads.load(Ordering::SeqCst),
            deletes: self.deletes.load(Ordering::SeqCst),
            lists: self.lists.load(Ordering::SeqCst),
        }
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    async fn enter(&self, counter: &AtomicU64, operation: &'static str) -> Result<()> {
        counter.fetch_add(1, Ordering::SeqCst);

        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }

        if self.offline.load(Ordering::SeqCst) {
            return Err(StorageError::backend_unavailable(
                self.name(),
                operation,
                "backend offline",
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    fn name(&self) -> &str {
        "memory"
    }

    async fn save_to_storage(
        &self,
        key: &str,
        data: &Value,
        options: &EffectiveOptions,
    ) -> Result<()> {
        self.enter(&self.saves, "save").await?;
        self.objects
            .insert(scoped_key(options, key), data.clone());
        Ok(())
    }

    async fn load_from_storage(
        &self,
        key: &str,
        options: &EffectiveOptions,
    ) -> Result<Option<Value>> {
        self.enter(&self.loads, "load").await?;
        Ok(self
            .objects
            .get(&scoped_key(options, key))
            .map(|item| item.value().clone()))
    }

    async fn delete_from_storage(&self, key: &str, options: &EffectiveOptions) -> Result<()> {
        self.enter(&self.deletes, "delete").await?;
        self.objects.remove(&scoped_key(options, key));
        Ok(())
    }

    async fn list_from_storage(
        &self,
        prefix: &str,
        options: &EffectiveOptions,
    ) -> Result<Vec<Value>> {
        self.enter(&self.lists, "list").await?;
        let full_prefix = scoped_key(options, prefix);
        let mut matches: Vec<(String, Value)> = self
            .objects
            .iter()
            .filter(|item| item.key().starts_with(&full_prefix))
            .map(|item| (item.key().clone(), item.value().clone()))
            .collect();
        matches.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(matches.into_iter().map(|(_, value)| value).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn buckets_scope_keys() {
        let backend = MemoryBackend::new();
        let plain = EffectiveOptions::default();
        let bucketed = EffectiveOptions {
            bucket: Some("content".into()),
            ..EffectiveOptions::default()
        };

        backend.save_to_storage("a", &json!(1), &plain).await.unwrap();
        backend.save_to_storage("a", &json!(2), &bucketed).await.unwrap();

        assert_eq!(backend.load_from_storage("a", &plain).await.unwrap(), Some(json!(1)));
        assert_eq!(backend.load_from_storage("a", &bucketed).await.unwrap(), Some(json!(2)));
        assert_eq!(backend.len(), 2);
    }

    #[tokio::test]
    async fn list_is_ordered_by_key() {
        let backend = MemoryBackend::new();
        let options = EffectiveOptions::default();
        for key in ["s:2", "s:1", "t:1"] {
            backend.save_to_storage(key, &json!(key), &options).await.unwrap();
        }

        let listed = backend.list_from_storage("s:", &options).await.unwrap();
        assert_eq!(listed, vec![json!("s:1"), json!("s:2")]);
        assert!(backend.list_from_storage("none", &options).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn offline_backend_fails_and_counts() {
        let backend = MemoryBackend::new();
        backend.set_available(false);

        let err = backend
            .load_from_storage("a", &EffectiveOptions::default())
            .await
            .unwrap_err();
        assert!(err.is_backend_failure());
        assert_eq!(backend.calls().loads, 1);
    }
}
