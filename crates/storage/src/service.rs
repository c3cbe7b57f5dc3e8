//! The storage façade
//!
//! Every operation walks the same fixed chain: cache, then the primary
//! backend, then the local fallback store. Failures never escape as panics or
//! `Err`s; each call returns a [`StorageResult`] recording which tier
//! answered.

use crate::backend::StorageBackend;
use crate::fallback::{FsFallbackStore, LocalFallbackStore};
use dashmap::DashSet;
use futures::stream::{self, StreamExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tierstore_cache::{
    CacheStats, CacheStore, RevalidateOptions, RevalidationCoordinator, Served, TieredCache,
};
use tierstore_config::StorageConfig;
use tierstore_core::{
    list_cache_key, scoped_key, validate_key, EffectiveOptions, Result, ResultMetadata, Source,
    StorageError, StorageOptions, StorageResult,
};
use tracing::{debug, error, warn};

pub struct StorageService {
    config: StorageConfig,
    defaults: EffectiveOptions,
    backend: Arc<dyn StorageBackend>,
    local: Option<Arc<dyn LocalFallbackStore>>,
    cache: Arc<dyn CacheStore>,
    revalidation: RevalidationCoordinator,
    list_prefixes: DashSet<String>,
}

impl StorageService {
    /// Service over explicit tiers; no local fallback until
    /// [`with_local_fallback`](Self::with_local_fallback) is called
    pub fn new(
        config: StorageConfig,
        backend: Arc<dyn StorageBackend>,
        cache: Arc<dyn CacheStore>,
    ) -> Self {
        Self {
            defaults: config.default_options(),
            config,
            backend,
            local: None,
            revalidation: RevalidationCoordinator::new(Arc::clone(&cache)),
            cache,
            list_prefixes: DashSet::new(),
        }
    }

    pub fn with_local_fallback(mut self, store: Arc<dyn LocalFallbackStore>) -> Self {
        self.local = Some(store);
        self
    }

    /// Build every tier from a validated `config`
    ///
    /// The near cache is always present. A distributed tier is attached when
    /// `redis_url` is set and reachable; an unreachable one is logged and
    /// skipped. The local fallback lives under `config.local_namespace_dir()`.
    pub async fn from_config(config: StorageConfig, backend: Arc<dyn StorageBackend>) -> Result<Self> {
        config.validate()?;
        let cache = Arc::new(build_cache(&config).await);
        let local = Arc::new(FsFallbackStore::new(config.local_namespace_dir()));
        Ok(Self::new(config, backend, cache).with_local_fallback(local))
    }

    pub fn service_name(&self) -> &str {
        &self.config.service_name
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<dyn CacheStore> {
        &self.cache
    }

    pub async fn cache_stats(&self) -> CacheStats {
        self.cache.stats().await
    }

    /// Drop this service's namespace from every cache tier
    pub async fn clear_cache(&self) {
        self.cache.clear().await;
        self.list_prefixes.clear();
    }

    /// Forget in-process cache state, for test isolation
    pub fn reset(&self) {
        self.cache.reset();
        self.list_prefixes.clear();
    }

    fn resolve(&self, options: &StorageOptions) -> EffectiveOptions {
        options.resolve(&self.defaults)
    }

    /// Concurrent items per batch; never 0, which would stall the stream
    fn batch_width(&self) -> usize {
        self.config.batch_concurrency.max(1)
    }

    async fn backend_call<T, F>(&self, operation: &'static str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>> + Send,
    {
        with_deadline(operation, self.config.backend_timeout, fut).await
    }

    /// Drop cached list results that a write to the scoped `key` may have changed
    async fn invalidate_lists(&self, key: &str) {
        let stale: Vec<String> = self
            .list_prefixes
            .iter()
            .filter(|prefix| key.starts_with(prefix.key().as_str()))
            .map(|prefix| prefix.key().clone())
            .collect();

        for prefix in stale {
            self.list_prefixes.remove(&prefix);
            self.cache.delete(&list_cache_key(&prefix)).await;
            debug!(prefix = %prefix, "invalidated cached list");
        }
    }

    /// Persist `data` under `key`
    ///
    /// On success `data` is the key. A primary failure falls back to the local
    /// store when enabled; if that fails too the write is reported as lost.
    #[tracing::instrument(skip_all, fields(service = %self.config.service_name, key = %key))]
    pub async fn save<T>(&self, key: &str, data: &T, options: &StorageOptions) -> StorageResult<String>
    where
        T: Serialize + Sync + ?Sized,
    {
        if let Err(e) = validate_key(key) {
            return StorageResult::failed(e);
        }
        let value = match serde_json::to_value(data) {
            Ok(value) => value,
            Err(e) => return StorageResult::failed(StorageError::encode(key, &e)),
        };
        let size = encoded_size(&value);
        let options = self.resolve(options);
        let scoped = scoped_key(&options, key);

        let primary = self
            .backend_call("save", self.backend.save_to_storage(key, &value, &options))
            .await;

        match primary {
            Ok(()) => {
                if options.use_cache {
                    self.cache.set(&scoped, value.clone(), options.ttl).await;
                }
                if options.fallback_to_local {
                    if let Some(local) = &self.local {
                        if let Err(e) = local.save(&scoped, &value).await {
                            warn!(error = %e, "failed to mirror save into local fallback");
                        }
                    }
                }
                self.invalidate_lists(&scoped).await;
                debug!(source = %Source::Cloud, "saved");
                StorageResult::ok(key.to_string(), ResultMetadata::new(Source::Cloud).with_size(size))
            }
            Err(primary_err) => {
                warn!(error = %primary_err, "primary save failed");
                let local = match (&self.local, options.fallback_to_local) {
                    (Some(local), true) => local,
                    _ => return StorageResult::failed(primary_err),
                };

                match local.save(&scoped, &value).await {
                    Ok(()) => {
                        self.invalidate_lists(&scoped).await;
                        debug!(source = %Source::Local, "saved to local fallback");
                        StorageResult::ok(
                            key.to_string(),
                            ResultMetadata::new(Source::Local).with_size(size),
                        )
                    }
                    Err(local_err) => {
                        error!(
                            primary_error = %primary_err,
                            local_error = %local_err,
                            "save failed in every tier, data not persisted"
                        );
                        StorageResult::failed(as_local_write(key, local_err))
                    }
                }
            }
        }
    }

    /// Read `key` from the first tier that has it
    #[tracing::instrument(skip_all, fields(service = %self.config.service_name, key = %key))]
    pub async fn load<T>(&self, key: &str, options: &StorageOptions) -> StorageResult<T>
    where
        T: DeserializeOwned,
    {
        if let Err(e) = validate_key(key) {
            return StorageResult::failed(e);
        }
        let options = self.resolve(options);
        let scoped = scoped_key(&options, key);

        if options.use_cache {
            if let Some(value) = self.cache.get(&scoped).await {
                match decode::<T>(key, value) {
                    Ok((data, size)) => {
                        debug!(source = %Source::Cache, "cache hit");
                        return StorageResult::ok(data, ResultMetadata::new(Source::Cache).with_size(size));
                    }
                    Err(e) => warn!(error = %e, "cached value has unexpected shape, ignoring"),
                }
            }
        }

        let primary_err = match self
            .backend_call("load", self.backend.load_from_storage(key, &options))
            .await
        {
            Ok(Some(value)) => {
                if options.use_cache {
                    self.cache.set(&scoped, value.clone(), options.ttl).await;
                }
                return match decode::<T>(key, value) {
                    Ok((data, size)) => {
                        StorageResult::ok(data, ResultMetadata::new(Source::Cloud).with_size(size))
                    }
                    Err(e) => StorageResult::failed(e),
                };
            }
            Ok(None) => StorageError::not_found(key),
            Err(e) => {
                warn!(error = %e, "primary load failed");
                e
            }
        };

        self.load_local(key, &options, primary_err).await
    }

    async fn load_local<T>(
        &self,
        key: &str,
        options: &EffectiveOptions,
        primary_err: StorageError,
    ) -> StorageResult<T>
    where
        T: DeserializeOwned,
    {
        let local = match (&self.local, options.fallback_to_local) {
            (Some(local), true) => local,
            _ => return StorageResult::failed(primary_err),
        };

        match local.load(&scoped_key(options, key)).await {
            Ok(Some(value)) => match decode::<T>(key, value) {
                Ok((data, size)) => {
                    debug!(source = %Source::Local, "served from local fallback");
                    StorageResult::ok(data, ResultMetadata::new(Source::Local).with_size(size))
                }
                Err(e) => StorageResult::failed(e),
            },
            Ok(None) => StorageResult::failed(StorageError::not_found(key)),
            Err(e) => {
                warn!(error = %e, "local fallback load failed");
                StorageResult::failed(StorageError::not_found(key))
            }
        }
    }

    /// Read `key` with stale-while-revalidate semantics
    ///
    /// Uses the configured `stale_ttl`. Concurrent calls for the same key
    /// share one primary load. When the primary cannot produce the value the
    /// local fallback is consulted as in [`load`](Self::load).
    #[tracing::instrument(skip_all, fields(service = %self.config.service_name, key = %key))]
    pub async fn load_with_revalidation<T>(&self, key: &str, options: &StorageOptions) -> StorageResult<T>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
    {
        let resolved = self.resolve(options);
        if !resolved.use_cache {
            return self.load(key, options).await;
        }
        if let Err(e) = validate_key(key) {
            return StorageResult::failed(e);
        }

        let backend = Arc::clone(&self.backend);
        let timeout = self.config.backend_timeout;
        let loader_key = key.to_string();
        let loader_options = resolved.clone();
        let loader = move || async move {
            match with_deadline(
                "load",
                timeout,
                backend.load_from_storage(&loader_key, &loader_options),
            )
            .await?
            {
                Some(value) => Ok(value),
                None => Err(StorageError::not_found(loader_key.as_str())),
            }
        };

        let revalidate = RevalidateOptions::new(resolved.ttl, self.config.stale_ttl);
        match self
            .revalidation
            .get_with_revalidation::<Value, _, _>(&scoped_key(&resolved, key), loader, revalidate)
            .await
        {
            Ok(found) => {
                let source = match found.served {
                    Served::Fresh | Served::Stale => Source::Cache,
                    Served::Loaded => Source::Cloud,
                };
                match decode::<T>(key, found.value) {
                    Ok((data, size)) => StorageResult::ok(data, ResultMetadata::new(source).with_size(size)),
                    Err(e) => StorageResult::failed(e),
                }
            }
            Err(e) => {
                if !e.is_not_found() {
                    warn!(error = %e, "revalidated load failed");
                }
                self.load_local(key, &resolved, e).await
            }
        }
    }

    /// Remove `key` from every tier
    ///
    /// All tiers are attempted; `success` reflects the primary backend only.
    #[tracing::instrument(skip_all, fields(service = %self.config.service_name, key = %key))]
    pub async fn delete(&self, key: &str, options: &StorageOptions) -> StorageResult<()> {
        if let Err(e) = validate_key(key) {
            return StorageResult::failed(e);
        }
        let options = self.resolve(options);
        let scoped = scoped_key(&options, key);

        let primary = self
            .backend_call("delete", self.backend.delete_from_storage(key, &options))
            .await;

        if options.fallback_to_local {
            if let Some(local) = &self.local {
                if let Err(e) = local.delete(&scoped).await {
                    warn!(error = %e, "local fallback delete failed");
                }
            }
        }
        if options.use_cache {
            self.cache.delete(&scoped).await;
        }
        self.invalidate_lists(&scoped).await;

        let metadata = ResultMetadata::new(Source::Cloud);
        match primary {
            Ok(()) => StorageResult::done(metadata),
            Err(e) => {
                warn!(error = %e, "primary delete failed");
                StorageResult::failed_at(e, metadata)
            }
        }
    }

    /// Payloads of every key starting with `prefix`
    ///
    /// An empty match is a success with an empty list.
    #[tracing::instrument(skip_all, fields(service = %self.config.service_name, key = %prefix))]
    pub async fn list<T>(&self, prefix: &str, options: &StorageOptions) -> StorageResult<Vec<T>>
    where
        T: DeserializeOwned,
    {
        let options = self.resolve(options);
        let scoped_prefix = scoped_key(&options, prefix);
        let cache_key = list_cache_key(&scoped_prefix);

        if options.use_cache {
            if let Some(value) = self.cache.get(&cache_key).await {
                match decode::<Vec<T>>(&cache_key, value) {
                    Ok((items, size)) => {
                        debug!(source = %Source::Cache, count = items.len(), "list cache hit");
                        return StorageResult::ok(items, ResultMetadata::new(Source::Cache).with_size(size));
                    }
                    Err(e) => warn!(error = %e, "cached list has unexpected shape, ignoring"),
                }
            }
        }

        let primary_err = match self
            .backend_call("list", self.backend.list_from_storage(prefix, &options))
            .await
        {
            Ok(values) => {
                let listed = Value::Array(values);
                if options.use_cache {
                    self.cache.set(&cache_key, listed.clone(), options.ttl).await;
                    self.list_prefixes.insert(scoped_prefix.clone());
                }
                return match decode::<Vec<T>>(&cache_key, listed) {
                    Ok((items, size)) => {
                        StorageResult::ok(items, ResultMetadata::new(Source::Cloud).with_size(size))
                    }
                    Err(e) => StorageResult::failed(e),
                };
            }
            Err(e) => {
                warn!(error = %e, "primary list failed");
                e
            }
        };

        let local = match (&self.local, options.fallback_to_local) {
            (Some(local), true) => local,
            _ => return StorageResult::failed(primary_err),
        };

        match local.list(&scoped_prefix).await {
            Ok(values) => match decode::<Vec<T>>(&cache_key, Value::Array(values)) {
                Ok((items, size)) => {
                    StorageResult::ok(items, ResultMetadata::new(Source::Local).with_size(size))
                }
                Err(e) => StorageResult::failed(e),
            },
            Err(e) => {
                warn!(error = %e, "local fallback list failed");
                StorageResult::failed(e)
            }
        }
    }

    /// Save every item, at most `batch_concurrency` at a time
    ///
    /// Succeeds only if every item was persisted; otherwise `data` holds the
    /// keys that were saved and the error lists the failures.
    #[tracing::instrument(skip_all, fields(service = %self.config.service_name, items = items.len()))]
    pub async fn batch_save<T>(&self, items: &[(String, T)], options: &StorageOptions) -> StorageResult<Vec<String>>
    where
        T: Serialize + Sync,
    {
        let results: Vec<(&str, StorageResult<String>)> = stream::iter(items)
            .map(|(key, data)| async move { (key.as_str(), self.save(key, data, options).await) })
            .buffered(self.batch_width())
            .collect()
            .await;

        let total = results.len();
        let mut saved = Vec::with_capacity(total);
        let mut sources = Vec::with_capacity(total);
        let mut failures = Vec::new();
        for (key, result) in results {
            sources.extend(result.source());
            match result.into_result() {
                Ok(key) => saved.push(key),
                Err(e) => failures.push((key.to_string(), e)),
            }
        }

        let metadata = ResultMetadata::new(deepest_source(&sources));
        if failures.is_empty() {
            return StorageResult::ok(saved, metadata);
        }
        warn!(failed = failures.len(), total, "batch save incomplete");
        let error = StorageError::Batch {
            operation: "save",
            total,
            failures,
        };
        if saved.is_empty() {
            StorageResult::failed(error)
        } else {
            StorageResult::partial(saved, error, metadata)
        }
    }

    /// Load every key, at most `batch_concurrency` at a time
    ///
    /// `data` always holds the items that resolved, in request order;
    /// `success` is true only when every key resolved.
    #[tracing::instrument(skip_all, fields(service = %self.config.service_name, keys = keys.len()))]
    pub async fn batch_load<T, K>(&self, keys: &[K], options: &StorageOptions) -> StorageResult<Vec<T>>
    where
        T: DeserializeOwned + Send,
        K: AsRef<str> + Sync,
    {
        let results: Vec<(&str, StorageResult<T>)> = stream::iter(keys)
            .map(|key| async move {
                let key = key.as_ref();
                (key, self.load::<T>(key, options).await)
            })
            .buffered(self.batch_width())
            .collect()
            .await;

        let total = results.len();
        let mut loaded = Vec::with_capacity(total);
        let mut sources = Vec::with_capacity(total);
        let mut failures = Vec::new();
        for (key, result) in results {
            sources.extend(result.source());
            match result.into_result() {
                Ok(data) => loaded.push(data),
                Err(e) => failures.push((key.to_string(), e)),
            }
        }

        let metadata = ResultMetadata::new(deepest_source(&sources));
        if failures.is_empty() {
            return StorageResult::ok(loaded, metadata);
        }
        debug!(missing = failures.len(), total, "batch load incomplete");
        let error = StorageError::Batch {
            operation: "load",
            total,
            failures,
        };
        StorageResult::partial(loaded, error, metadata)
    }
}

/// Build the cache tiers described by `config`
pub async fn build_cache(config: &StorageConfig) -> TieredCache {
    let cache = TieredCache::new(&config.service_name, config.near_cache_max_entries)
        .with_timeout(config.cache_timeout);

    #[cfg(feature = "redis")]
    let cache = match &config.redis_url {
        Some(url) => match tierstore_cache::RedisTier::connect(url).await {
            Ok(tier) => cache.with_distributed(Arc::new(tier)),
            Err(e) => {
                warn!(error = %e, "distributed cache unreachable, continuing with near cache only");
                cache
            }
        },
        None => cache,
    };

    #[cfg(not(feature = "redis"))]
    let cache = {
        if config.redis_url.is_some() {
            warn!("redis_url is set but the redis feature is disabled");
        }
        cache
    };

    cache.start_cleanup(config.cleanup_interval);
    cache
}

async fn with_deadline<T, F>(operation: &'static str, timeout: Option<Duration>, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match timeout {
        Some(duration) => tokio::time::timeout(duration, fut)
            .await
            .map_err(|_| StorageError::timeout(operation, duration))?,
        None => fut.await,
    }
}

fn decode<T: DeserializeOwned>(key: &str, value: Value) -> Result<(T, u64)> {
    let size = encoded_size(&value);
    let data = serde_json::from_value(value).map_err(|e| StorageError::decode(key, &e))?;
    Ok((data, size))
}

fn encoded_size(value: &Value) -> u64 {
    serde_json::to_vec(value).map(|bytes| bytes.len() as u64).unwrap_or(0)
}

fn as_local_write(key: &str, error: StorageError) -> StorageError {
    match error {
        StorageError::LocalWriteFailure { .. } => error,
        other => StorageError::local_write(key, other.to_string()),
    }
}

/// The furthest tier down the chain that answered any item of a batch
fn deepest_source(sources: &[Source]) -> Source {
    if sources.contains(&Source::Local) {
        Source::Local
    } else if sources.contains(&Source::Cloud) || sources.is_empty() {
        Source::Cloud
    } else {
        Source::Cache
    }
}
