//! Storage service configuration with defaults and validation

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tierstore_core::{EffectiveOptions, Result, StorageError, DEFAULT_TTL, MAX_TTL};

/// Where the effective configuration came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Built-in defaults only
    Default,
    /// A JSON configuration file
    ConfigFile(PathBuf),
    /// `TIERSTORE_*` environment variables
    EnvironmentVariable(String),
    /// Constructed programmatically
    Programmatic,
}

/// Configuration for one `StorageService` instance
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Logical domain, also the cache namespace (`"<service_name>:<key>"`)
    pub service_name: String,
    /// Freshness TTL applied when a call does not specify one
    pub default_ttl: Duration,
    /// Stale window for revalidated loads; `None` disables stale serving
    pub stale_ttl: Option<Duration>,
    /// Default for `StorageOptions::use_cache`
    pub use_cache: bool,
    /// Default for `StorageOptions::fallback_to_local`
    pub fallback_to_local: bool,
    /// Root directory of the filesystem fallback store
    pub local_dir: PathBuf,
    /// Capacity of the in-process near cache
    pub near_cache_max_entries: usize,
    /// Interval of the near-cache expiry sweep
    pub cleanup_interval: Duration,
    /// Maximum number of concurrent backend calls issued by a batch
    pub batch_concurrency: usize,
    /// Deadline for each primary backend call
    pub backend_timeout: Option<Duration>,
    /// Deadline for each distributed cache call
    pub cache_timeout: Option<Duration>,
    /// Connection URL of the distributed cache tier
    pub redis_url: Option<String>,
    /// Configuration source for debugging
    pub source: ConfigSource,
}

impl StorageConfig {
    /// Defaults for the given service
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            default_ttl: DEFAULT_TTL,
            stale_ttl: None,
            use_cache: true,
            fallback_to_local: true,
            local_dir: default_local_dir(),
            near_cache_max_entries: 10_000,
            cleanup_interval: Duration::from_secs(60),
            batch_concurrency: 8,
            backend_timeout: Some(Duration::from_secs(10)),
            cache_timeout: Some(Duration::from_secs(2)),
            redis_url: None,
            source: ConfigSource::Default,
        }
    }

    /// Start a builder for the given service
    pub fn builder(service_name: impl Into<String>) -> StorageConfigBuilder {
        StorageConfigBuilder::new(service_name)
    }

    /// Service-level defaults every call is merged with
    pub fn default_options(&self) -> EffectiveOptions {
        EffectiveOptions {
            bucket: None,
            path: None,
            ttl: self.default_ttl,
            use_cache: self.use_cache,
            fallback_to_local: self.fallback_to_local,
        }
    }

    /// Directory holding this service's local fallback entries
    pub fn local_namespace_dir(&self) -> PathBuf {
        self.local_dir.join(&self.service_name)
    }

    /// Reject configurations the service cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.service_name.trim().is_empty() {
            return Err(StorageError::configuration("service_name must not be empty"));
        }
        if self.service_name.contains(':') {
            return Err(StorageError::configuration(
                "service_name must not contain ':' (used as the cache namespace separator)",
            ));
        }
        if self.default_ttl.is_zero() {
            return Err(StorageError::configuration("default_ttl must be greater than zero"));
        }
        if self.default_ttl > MAX_TTL {
            return Err(StorageError::configuration(format!(
                "default_ttl ({:?}) must not exceed {MAX_TTL:?}",
                self.default_ttl
            )));
        }
        if let Some(stale) = self.stale_ttl {
            if stale > MAX_TTL {
                return Err(StorageError::configuration(format!(
                    "stale_ttl ({stale:?}) must not exceed {MAX_TTL:?}"
                )));
            }
            if stale < self.default_ttl {
                return Err(StorageError::configuration(format!(
                    "stale_ttl ({stale:?}) must not be shorter than default_ttl ({:?})",
                    self.default_ttl
                )));
            }
        }
        if self.batch_concurrency == 0 {
            return Err(StorageError::configuration(
                "batch_concurrency must be at least 1",
            ));
        }
        if self.near_cache_max_entries == 0 {
            return Err(StorageError::configuration(
                "near_cache_max_entries must be at least 1",
            ));
        }
        Ok(())
    }
}

fn default_local_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|dir| dir.join("tierstore"))
        .unwrap_or_else(|| PathBuf::from(".tierstore"))
}

/// Builder for [`StorageConfig`]
pub struct StorageConfigBuilder {
    config: StorageConfig,
}

impl StorageConfigBuilder {
    pub fn new(service_name: impl Into<String>) -> Self {
        let mut config = StorageConfig::new(service_name);
        config.source = ConfigSource::Programmatic;
        Self { config }
    }

    pub fn default_ttl(mut self, ttl: Duration) -> Self {
        self.config.default_ttl = ttl;
        self
    }

    pub fn stale_ttl(mut self, stale_ttl: Duration) -> Self {
        self.config.stale_ttl = Some(stale_ttl);
        self
    }

    pub fn use_cache(mut self, enabled: bool) -> Self {
        self.config.use_cache = enabled;
        self
    }

    pub fn fallback_to_local(mut self, enabled: bool) -> Self {
        self.config.fallback_to_local = enabled;
        self
    }

    pub fn local_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.local_dir = dir.into();
        self
    }

    pub fn near_cache_max_entries(mut self, max: usize) -> Self {
        self.config.near_cache_max_entries = max;
        self
    }

    pub fn cleanup_interval(mut self, interval: Duration) -> Self {
        self.config.cleanup_interval = interval;
        self
    }

    pub fn batch_concurrency(mut self, concurrency: usize) -> Self {
        self.config.batch_concurrency = concurrency;
        self
    }

    pub fn backend_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.backend_timeout = timeout;
        self
    }

    pub fn cache_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.cache_timeout = timeout;
        self
    }

    pub fn redis_url(mut self, url: impl Into<String>) -> Self {
        self.config.redis_url = Some(url.into());
        self
    }

    /// Validate and return the configuration
    pub fn build(self) -> Result<StorageConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
