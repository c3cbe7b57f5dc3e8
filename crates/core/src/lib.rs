//! Core types shared by every tierstore crate.
//!
//! - **`errors`**: the [`StorageError`] taxonomy and its [`ErrorKind`] projection.
//! - **`options`**: per-call [`StorageOptions`] and their resolved form.
//! - **`result`**: the uniform [`StorageResult`] with provenance metadata.
//! - **`keys`**: key validation and service namespacing.

pub mod errors;
pub mod keys;
pub mod options;
pub mod result;

pub use self::{
    errors::{ErrorKind, Result, SerializationOp, StorageError},
    keys::{
        list_cache_key, namespaced_key, scoped_key, validate_key, LIST_KEY_PREFIX, SCOPE_SEPARATOR,
    },
    options::{EffectiveOptions, StorageOptions, DEFAULT_TTL, MAX_TTL},
    result::{ResultMetadata, Source, StorageResult},
};
