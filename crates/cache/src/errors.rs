//! Error types for the cache tiers
//!
//! These never cross a [`CacheStore`](crate::CacheStore) boundary: the tiered
//! store logs them and reports a miss instead.

use std::time::Duration;
use tierstore_core::{SerializationOp, StorageError};

/// Result type for distributed tier calls
pub type Result<T> = std::result::Result<T, CacheError>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CacheError {
    /// The distributed tier refused or dropped the call
    #[error("distributed cache unavailable during {operation}: {message}")]
    Unavailable {
        operation: &'static str,
        message: String,
    },

    /// The distributed tier did not answer in time
    #[error("distributed cache {operation} timed out after {duration:?}")]
    Timeout {
        operation: &'static str,
        duration: Duration,
    },

    /// A stored entry could not be encoded or decoded
    #[error("failed to {operation} cache entry '{key}': {message}")]
    Serialization {
        key: String,
        operation: SerializationOp,
        message: String,
    },
}

impl CacheError {
    pub fn unavailable(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Unavailable {
            operation,
            message: message.into(),
        }
    }

    pub fn decode(key: impl Into<String>, source: &serde_json::Error) -> Self {
        Self::Serialization {
            key: key.into(),
            operation: SerializationOp::Decode,
            message: source.to_string(),
        }
    }

    pub fn encode(key: impl Into<String>, source: &serde_json::Error) -> Self {
        Self::Serialization {
            key: key.into(),
            operation: SerializationOp::Encode,
            message: source.to_string(),
        }
    }
}

impl From<CacheError> for StorageError {
    fn from(error: CacheError) -> Self {
        match error {
            CacheError::Unavailable { operation, message } => {
                StorageError::cache_unavailable(operation, message)
            }
            CacheError::Timeout {
                operation,
                duration,
            } => StorageError::cache_unavailable(operation, format!("timed out after {duration:?}")),
            CacheError::Serialization {
                key,
                operation,
                message,
            } => StorageError::Serialization {
                key,
                operation,
                message,
            },
        }
    }
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for CacheError {
    fn from(error: redis::RedisError) -> Self {
        Self::Unavailable {
            operation: "redis",
            message: error.to_string(),
        }
    }
}
