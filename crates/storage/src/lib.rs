//! Storage façade for tierstore
//!
//! [`StorageService`] mediates every keyed read and write between the cache
//! tiers, a durable [`StorageBackend`] and a [`LocalFallbackStore`], so that a
//! single backend outage never becomes a user-visible failure.

pub mod backend;
pub mod fallback;
pub mod service;

pub use backend::{BackendCalls, MemoryBackend, StorageBackend};
pub use fallback::{FsFallbackStore, LocalFallbackStore, MemoryFallbackStore};
pub use service::{build_cache, StorageService};

pub use tierstore_core::{
    ErrorKind, ResultMetadata, Source, StorageError, StorageOptions, StorageResult,
};
