//! Last-resort local persistence
//!
//! The medium is chosen once when the service is built: a directory per
//! service namespace on the filesystem, or process memory.

mod fs;
mod memory;

pub use fs::FsFallbackStore;
pub use memory::MemoryFallbackStore;

use async_trait::async_trait;
use serde_json::Value;
use tierstore_core::Result;

/// Local key/value store mirroring the primary backend contract
///
/// Failures are returned as `LocalWriteFailure`/`LocalReadFailure` errors;
/// nothing panics past this boundary.
#[async_trait]
pub trait LocalFallbackStore: Send + Sync {
    async fn save(&self, key: &str, data: &Value) -> Result<()>;

    async fn load(&self, key: &str) -> Result<Option<Value>>;

    /// Remove `key`; returns whether it existed
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Payloads of every key starting with `prefix`, ordered by key
    async fn list(&self, prefix: &str) -> Result<Vec<Value>>;
}
