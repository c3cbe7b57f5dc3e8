//! Per-call storage options and their resolution against service defaults

use std::time::Duration;

/// Default time-to-live for cached payloads
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

/// Longest lifetime any cache entry is kept for; longer TTLs are capped
pub const MAX_TTL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Options supplied with a single storage call
///
/// Every field is optional; unset fields inherit the service-level
/// defaults when the call is resolved with [`StorageOptions::resolve`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StorageOptions {
    pub bucket: Option<String>,
    pub path: Option<String>,
    pub ttl: Option<Duration>,
    pub use_cache: Option<bool>,
    pub fallback_to_local: Option<bool>,
}

impl StorageOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_bucket(mut self, bucket: impl Into<String>) -> Self {
        self.bucket = Some(bucket.into());
        self
    }

    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    #[must_use]
    pub fn with_cache(mut self, use_cache: bool) -> Self {
        self.use_cache = Some(use_cache);
        self
    }

    #[must_use]
    pub fn with_fallback_to_local(mut self, fallback: bool) -> Self {
        self.fallback_to_local = Some(fallback);
        self
    }

    /// Resolve against service defaults into fully-populated options
    #[must_use]
    pub fn resolve(&self, defaults: &EffectiveOptions) -> EffectiveOptions {
        EffectiveOptions {
            bucket: self.bucket.clone().or_else(|| defaults.bucket.clone()),
            path: self.path.clone().or_else(|| defaults.path.clone()),
            ttl: self.ttl.unwrap_or(defaults.ttl),
            use_cache: self.use_cache.unwrap_or(defaults.use_cache),
            fallback_to_local: self.fallback_to_local.unwrap_or(defaults.fallback_to_local),
        }
    }
}

/// Options after merging with service defaults; what the tiers actually see
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectiveOptions {
    pub bucket: Option<String>,
    pub path: Option<String>,
    pub ttl: Duration,
    pub use_cache: bool,
    pub fallback_to_local: bool,
}

impl Default for EffectiveOptions {
    fn default() -> Self {
        Self {
            bucket: None,
            path: None,
            ttl: DEFAULT_TTL,
            use_cache: true,
            fallback_to_local: true,
        }
    }
}
