//! Stale-while-revalidate with single-flight loads
//!
//! At most one loader runs per key at any time. Callers that arrive while a
//! load is pending await the same shared future and observe the same value
//! or error. Loads are driven by a spawned task, so a refresh started for a
//! stale read completes even though nobody awaits it.

use crate::entry::Freshness;
use crate::store::CacheStore;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tierstore_core::StorageError;
use tokio::time::Instant;
use tracing::{debug, warn};

type SharedLoad = Shared<BoxFuture<'static, Result<Value, StorageError>>>;

/// Lifetimes applied to a value produced by a loader
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RevalidateOptions {
    /// Freshness window
    pub ttl: Duration,
    /// Window, measured from the write, during which the value may be served
    /// stale while a refresh runs; `None` disables stale serving
    pub stale_ttl: Option<Duration>,
}

impl RevalidateOptions {
    pub fn new(ttl: Duration, stale_ttl: Option<Duration>) -> Self {
        Self { ttl, stale_ttl }
    }
}

/// How a revalidated read was answered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Served {
    /// Fresh cache hit; no loader involved
    Fresh,
    /// Stale cache hit; a background refresh is running
    Stale,
    /// Produced by a loader this call awaited
    Loaded,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Revalidated<T> {
    pub value: T,
    pub served: Served,
}

struct Inner {
    store: Arc<dyn CacheStore>,
    in_flight: Mutex<HashMap<String, (u64, SharedLoad)>>,
    next_id: AtomicU64,
}

impl Inner {
    /// Drop the registry slot for `key` if it still belongs to load `id`
    fn finish(&self, key: &str, id: u64) {
        let mut in_flight = self.in_flight.lock();
        if in_flight.get(key).is_some_and(|(current, _)| *current == id) {
            in_flight.remove(key);
        }
    }
}

/// Wraps a [`CacheStore`] with stale-while-revalidate reads
#[derive(Clone)]
pub struct RevalidationCoordinator {
    inner: Arc<Inner>,
}

impl RevalidationCoordinator {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                in_flight: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.inner.store
    }

    /// Number of loads currently pending
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.lock().len()
    }

    /// Read `key`, serving fresh or stale cached values and loading otherwise
    ///
    /// Loader errors are returned only when this call had nothing to serve;
    /// a failed background refresh is logged and the stale value stays cached.
    pub async fn get_with_revalidation<T, F, Fut>(
        &self,
        key: &str,
        loader: F,
        options: RevalidateOptions,
    ) -> Result<Revalidated<T>, StorageError>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, StorageError>> + Send + 'static,
    {
        if let Some(entry) = self.inner.store.get_entry(key).await {
            let served = match entry.freshness(Instant::now()) {
                Freshness::Fresh => Some(Served::Fresh),
                Freshness::Stale => Some(Served::Stale),
                Freshness::Expired => None,
            };

            if let Some(served) = served {
                match serde_json::from_value::<T>(entry.value) {
                    Ok(value) => {
                        if served == Served::Stale {
                            let (_, started) = self.join_or_start(key, loader, options);
                            if started {
                                debug!(key, "serving stale value, refresh started");
                            }
                        }
                        return Ok(Revalidated { value, served });
                    }
                    Err(e) => {
                        warn!(key, error = %e, "cached value has unexpected shape, reloading");
                        let (load, _) = self.join_or_start(key, loader, options);
                        return Self::settle(key, load).await;
                    }
                }
            }
        }

        let (load, _) = self.join_or_start(key, loader, options);
        Self::settle(key, load).await
    }

    async fn settle<T: DeserializeOwned>(
        key: &str,
        load: SharedLoad,
    ) -> Result<Revalidated<T>, StorageError> {
        let value = load.await?;
        let value = serde_json::from_value(value).map_err(|e| StorageError::decode(key, &e))?;
        Ok(Revalidated {
            value,
            served: Served::Loaded,
        })
    }

    /// The pending load for `key`, starting one with `loader` if none exists
    fn join_or_start<T, F, Fut>(
        &self,
        key: &str,
        loader: F,
        options: RevalidateOptions,
    ) -> (SharedLoad, bool)
    where
        T: Serialize + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, StorageError>> + Send + 'static,
    {
        let mut in_flight = self.inner.in_flight.lock();
        if let Some((_, load)) = in_flight.get(key) {
            return (load.clone(), false);
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let owner: Weak<Inner> = Arc::downgrade(&self.inner);
        let cache_key = key.to_string();

        let load = async move {
            let outcome = loader().await.and_then(|data| {
                serde_json::to_value(&data).map_err(|e| StorageError::encode(&cache_key, &e))
            });

            if let Some(inner) = owner.upgrade() {
                match &outcome {
                    Ok(value) => {
                        inner
                            .store
                            .set_entry(&cache_key, value.clone(), options.ttl, options.stale_ttl)
                            .await;
                    }
                    Err(e) => warn!(key = %cache_key, error = %e, "loader failed"),
                }
                inner.finish(&cache_key, id);
            }

            outcome
        }
        .boxed()
        .shared();

        in_flight.insert(key.to_string(), (id, load.clone()));
        drop(in_flight);

        tokio::spawn(load.clone());
        (load, true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TieredCache;
    use std::sync::atomic::AtomicUsize;

    fn coordinator() -> RevalidationCoordinator {
        RevalidationCoordinator::new(Arc::new(TieredCache::new("scenarios", 100)))
    }

    async fn settle_background() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn serves_stale_then_refreshed_value() {
        let coordinator = coordinator();
        let calls = Arc::new(AtomicUsize::new(0));
        let options = RevalidateOptions::new(
            Duration::from_millis(100),
            Some(Duration::from_millis(1000)),
        );
        let loader = |calls: Arc<AtomicUsize>| {
            move || async move {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, StorageError>(if n == 0 { "A".to_string() } else { "B".to_string() })
            }
        };

        let first = coordinator
            .get_with_revalidation("k", loader(calls.clone()), options)
            .await
            .unwrap();
        assert_eq!(first.value, "A");
        assert_eq!(first.served, Served::Loaded);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_millis(150)).await;
        let second = coordinator
            .get_with_revalidation("k", loader(calls.clone()), options)
            .await
            .unwrap();
        assert_eq!(second.value, "A");
        assert_eq!(second.served, Served::Stale);

        settle_background().await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(coordinator.in_flight(), 0);

        tokio::time::advance(Duration::from_millis(50)).await;
        let third = coordinator
            .get_with_revalidation("k", loader(calls.clone()), options)
            .await
            .unwrap();
        assert_eq!(third.value, "B");
        assert_eq!(third.served, Served::Fresh);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_misses_share_one_load() {
        let coordinator = coordinator();
        let calls = Arc::new(AtomicUsize::new(0));
        let options = RevalidateOptions::new(Duration::from_secs(60), None);

        let requests = (0..10).map(|_| {
            let coordinator = coordinator.clone();
            let calls = calls.clone();
            async move {
                coordinator
                    .get_with_revalidation(
                        "absent",
                        move || async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(50)).await;
                            Ok::<_, StorageError>(serde_json::json!({ "title": "X" }))
                        },
                        options,
                    )
                    .await
            }
        });
        let results = futures::future::join_all(requests).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        for result in results {
            assert_eq!(result.unwrap().value, serde_json::json!({ "title": "X" }));
        }
        assert_eq!(coordinator.in_flight(), 0);
    }

    #[tokio::test]
    async fn synchronous_load_errors_propagate_and_clear_registry() {
        let coordinator = coordinator();
        let options = RevalidateOptions::new(Duration::from_secs(60), None);

        let err = coordinator
            .get_with_revalidation::<String, _, _>(
                "k",
                || async { Err(StorageError::not_found("k")) },
                options,
            )
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(coordinator.in_flight(), 0);

        let ok = coordinator
            .get_with_revalidation("k", || async { Ok("v".to_string()) }, options)
            .await
            .unwrap();
        assert_eq!(ok.value, "v");
    }

    #[tokio::test(start_paused = true)]
    async fn failed_refresh_keeps_serving_stale() {
        let coordinator = coordinator();
        let options = RevalidateOptions::new(
            Duration::from_millis(100),
            Some(Duration::from_millis(1000)),
        );
        coordinator
            .get_with_revalidation("k", || async { Ok(1u32) }, options)
            .await
            .unwrap();

        tokio::time::advance(Duration::from_millis(150)).await;
        let stale = coordinator
            .get_with_revalidation::<u32, _, _>(
                "k",
                || async { Err(StorageError::backend_unavailable("memory", "load", "down")) },
                options,
            )
            .await
            .unwrap();
        assert_eq!(stale.value, 1);
        assert_eq!(stale.served, Served::Stale);

        settle_background().await;
        assert_eq!(coordinator.in_flight(), 0);

        let again = coordinator
            .get_with_revalidation::<u32, _, _>(
                "k",
                || async { Err(StorageError::backend_unavailable("memory", "load", "down")) },
                options,
            )
            .await
            .unwrap();
        assert_eq!(again.value, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn past_stale_window_loads_synchronously() {
        let coordinator = coordinator();
        let options = RevalidateOptions::new(
            Duration::from_millis(100),
            Some(Duration::from_millis(1000)),
        );
        coordinator
            .get_with_revalidation("k", || async { Ok(1u32) }, options)
            .await
            .unwrap();

        tokio::time::advance(Duration::from_millis(1000)).await;
        let loaded = coordinator
            .get_with_revalidation("k", || async { Ok(2u32) }, options)
            .await
            .unwrap();
        assert_eq!(loaded.value, 2);
        assert_eq!(loaded.served, Served::Loaded);
    }
}
