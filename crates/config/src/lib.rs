//! Configuration for tierstore storage services
//!
//! A [`StorageConfig`] is built once per logical domain (for example
//! `"scenarios"` or `"user-progress"`). [`StorageConfigLoader`] resolves it
//! from defaults, an optional JSON file and `TIERSTORE_*` environment
//! variables, in that order of precedence.

pub mod config;
pub mod loader;


pub use config::{ConfigSource, StorageConfig, StorageConfigBuilder};
pub use loader::{StorageConfigLoader, CONFIG_PATH_VAR};
