//! Configuration loader with precedence handling
//!
//! Precedence, lowest to highest: built-in defaults, the JSON config file
//! (global `storage` section, then the `services.<name>` section), and
//! finally `TIERSTORE_*` environment variables.

use crate::config::{ConfigSource, StorageConfig};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tierstore_core::{Result, StorageError};
use tracing::debug;

/// Environment variable naming an explicit config file
pub const CONFIG_PATH_VAR: &str = "TIERSTORE_CONFIG";

const ENV_DEFAULT_TTL_SECS: &str = "TIERSTORE_DEFAULT_TTL_SECS";
const ENV_STALE_TTL_SECS: &str = "TIERSTORE_STALE_TTL_SECS";
const ENV_USE_CACHE: &str = "TIERSTORE_USE_CACHE";
const ENV_FALLBACK_TO_LOCAL: &str = "TIERSTORE_FALLBACK_TO_LOCAL";
const ENV_LOCAL_DIR: &str = "TIERSTORE_LOCAL_DIR";
const ENV_NEAR_CACHE_MAX_ENTRIES: &str = "TIERSTORE_NEAR_CACHE_MAX_ENTRIES";
const ENV_BATCH_CONCURRENCY: &str = "TIERSTORE_BATCH_CONCURRENCY";
const ENV_BACKEND_TIMEOUT_MS: &str = "TIERSTORE_BACKEND_TIMEOUT_MS";
const ENV_CACHE_TIMEOUT_MS: &str = "TIERSTORE_CACHE_TIMEOUT_MS";
const ENV_REDIS_URL: &str = "TIERSTORE_REDIS_URL";

/// On-disk representation; every field optional so sections can be partial
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub(crate) struct FileSection {
    pub default_ttl_secs: Option<u64>,
    pub stale_ttl_secs: Option<u64>,
    pub use_cache: Option<bool>,
    pub fallback_to_local: Option<bool>,
    pub local_dir: Option<PathBuf>,
    pub near_cache_max_entries: Option<usize>,
    pub cleanup_interval_secs: Option<u64>,
    pub batch_concurrency: Option<usize>,
    pub backend_timeout_ms: Option<u64>,
    pub cache_timeout_ms: Option<u64>,
    pub redis_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct ConfigFile {
    pub storage: FileSection,
    pub services: HashMap<String, FileSection>,
}

impl FileSection {
    fn apply(&self, config: &mut StorageConfig) {
        if let Some(secs) = self.default_ttl_secs {
            config.default_ttl = Duration::from_secs(secs);
        }
        // 0 disables stale serving
        if let Some(secs) = self.stale_ttl_secs {
            config.stale_ttl = (secs > 0).then(|| Duration::from_secs(secs));
        }
        if let Some(enabled) = self.use_cache {
            config.use_cache = enabled;
        }
        if let Some(enabled) = self.fallback_to_local {
            config.fallback_to_local = enabled;
        }
        if let Some(dir) = &self.local_dir {
            config.local_dir = dir.clone();
        }
        if let Some(max) = self.near_cache_max_entries {
            config.near_cache_max_entries = max;
        }
        if let Some(secs) = self.cleanup_interval_secs {
            config.cleanup_interval = Duration::from_secs(secs);
        }
        if let Some(concurrency) = self.batch_concurrency {
            config.batch_concurrency = concurrency;
        }
        // 0 disables the deadline
        if let Some(ms) = self.backend_timeout_ms {
            config.backend_timeout = (ms > 0).then(|| Duration::from_millis(ms));
        }
        if let Some(ms) = self.cache_timeout_ms {
            config.cache_timeout = (ms > 0).then(|| Duration::from_millis(ms));
        }
        if let Some(url) = &self.redis_url {
            config.redis_url = Some(url.clone());
        }
    }
}

/// Loads a [`StorageConfig`] for one service
pub struct StorageConfigLoader {
    service_name: String,
    config_file: Option<PathBuf>,
    read_env: bool,
}

impl StorageConfigLoader {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            config_file: None,
            read_env: true,
        }
    }

    /// Use an explicit config file instead of `TIERSTORE_CONFIG` / the default path
    pub fn with_config_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_file = Some(path.into());
        self
    }

    /// Skip environment variable overrides
    pub fn without_env(mut self) -> Self {
        self.read_env = false;
        self
    }

    /// Load configuration with full precedence handling
    pub fn load(self) -> Result<StorageConfig> {
        let mut config = StorageConfig::new(&self.service_name);

        let path = self.resolve_config_path();
        if let Some(path) = path.filter(|p| p.exists()) {
            let file = Self::read_config_file(&path)?;
            file.storage.apply(&mut config);
            if let Some(section) = file.services.get(&self.service_name) {
                section.apply(&mut config);
            }
            debug!(path = %path.display(), service = %self.service_name, "applied config file");
            config.source = ConfigSource::ConfigFile(path);
        }

        if self.read_env && Self::apply_env(&mut config, |name| std::env::var(name).ok())? {
            config.source = ConfigSource::EnvironmentVariable("TIERSTORE_*".to_string());
        }

        config.validate()?;
        Ok(config)
    }

    fn resolve_config_path(&self) -> Option<PathBuf> {
        if let Some(path) = &self.config_file {
            return Some(path.clone());
        }
        if self.read_env {
            if let Ok(path) = std::env::var(CONFIG_PATH_VAR) {
                return Some(PathBuf::from(path));
            }
        }
        dirs::config_dir().map(|dir| dir.join("tierstore").join("config.json"))
    }

    pub(crate) fn read_config_file(path: &Path) -> Result<ConfigFile> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            StorageError::configuration(format!(
                "failed to read config file '{}': {e}",
                path.display()
            ))
        })?;

        serde_json::from_str(&content).map_err(|e| {
            StorageError::configuration(format!(
                "invalid config file '{}': {e}",
                path.display()
            ))
        })
    }

    /// Apply environment overrides through `lookup`; returns whether any applied
    pub(crate) fn apply_env<F>(config: &mut StorageConfig, lookup: F) -> Result<bool>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut applied = false;

        if let Some(secs) = parse_env::<u64>(&lookup, ENV_DEFAULT_TTL_SECS)? {
            config.default_ttl = Duration::from_secs(secs);
            applied = true;
        }
        if let Some(secs) = parse_env::<u64>(&lookup, ENV_STALE_TTL_SECS)? {
            config.stale_ttl = (secs > 0).then(|| Duration::from_secs(secs));
            applied = true;
        }
        if let Some(value) = lookup(ENV_USE_CACHE) {
            config.use_cache = parse_bool(ENV_USE_CACHE, &value)?;
            applied = true;
        }
        if let Some(value) = lookup(ENV_FALLBACK_TO_LOCAL) {
            config.fallback_to_local = parse_bool(ENV_FALLBACK_TO_LOCAL, &value)?;
            applied = true;
        }
        if let Some(dir) = lookup(ENV_LOCAL_DIR) {
            config.local_dir = PathBuf::from(dir);
            applied = true;
        }
        if let Some(max) = parse_env::<usize>(&lookup, ENV_NEAR_CACHE_MAX_ENTRIES)? {
            config.near_cache_max_entries = max;
            applied = true;
        }
        if let Some(concurrency) = parse_env::<usize>(&lookup, ENV_BATCH_CONCURRENCY)? {
            config.batch_concurrency = concurrency;
            applied = true;
        }
        if let Some(ms) = parse_env::<u64>(&lookup, ENV_BACKEND_TIMEOUT_MS)? {
            config.backend_timeout = (ms > 0).then(|| Duration::from_millis(ms));
            applied = true;
        }
        if let Some(ms) = parse_env::<u64>(&lookup, ENV_CACHE_TIMEOUT_MS)? {
            config.cache_timeout = (ms > 0).then(|| Duration::from_millis(ms));
            applied = true;
        }
        if let Some(url) = lookup(ENV_REDIS_URL).filter(|u| !u.is_empty()) {
            config.redis_url = Some(url);
            applied = true;
        }

        Ok(applied)
    }
}

fn parse_env<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
) -> Result<Option<T>> {
    match lookup(name) {
        None => Ok(None),
        Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|_| {
            StorageError::configuration(format!("{name} has invalid value '{raw}'"))
        }),
    }
}

fn parse_bool(name: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(StorageError::configuration(format!(
            "{name} has invalid boolean '{raw}'"
        ))),
    }
}
