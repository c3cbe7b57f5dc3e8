use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Result type alias for tierstore operations
pub type Result<T> = std::result::Result<T, StorageError>;

/// Core error type for storage and cache operations
///
/// Messages are carried as strings so a single failure can be cloned into
/// every [`StorageResult`](crate::StorageResult) and shared between the
/// waiters of a single-flight load.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    /// The primary backend is unreachable or returned an error
    #[error("backend '{backend}' unavailable during {operation}: {message}")]
    BackendUnavailable {
        backend: String,
        operation: &'static str,
        message: String,
    },

    /// The key is absent in every consulted tier
    #[error("key '{key}' not found")]
    NotFound { key: String },

    /// The last-resort local write failed
    #[error("local fallback write failed for '{key}': {message}")]
    LocalWriteFailure { key: String, message: String },

    /// The local fallback medium could not be read
    #[error("local fallback read failed for '{key}': {message}")]
    LocalReadFailure { key: String, message: String },

    /// A cache tier failed; never fatal to a storage operation
    #[error("cache unavailable during {operation}: {message}")]
    CacheUnavailable {
        operation: &'static str,
        message: String,
    },

    /// The payload could not be encoded or decoded
    #[error("failed to {operation} payload for '{key}': {message}")]
    Serialization {
        key: String,
        operation: SerializationOp,
        message: String,
    },

    /// A backend or cache call exceeded its deadline
    #[error("{operation} timed out after {duration:?}")]
    Timeout {
        operation: &'static str,
        duration: Duration,
    },

    /// The key cannot be stored in any tier
    #[error("invalid key '{key}': {reason}")]
    InvalidKey { key: String, reason: String },

    /// One or more items of a batch operation failed
    #[error("batch {operation} failed for {} of {total} items: {}", .failures.len(), format_failures(.failures))]
    Batch {
        operation: &'static str,
        total: usize,
        failures: Vec<(String, StorageError)>,
    },

    /// Invalid service configuration
    #[error("configuration error: {message}")]
    Configuration { message: String },
}

/// Direction of a failed (de)serialization
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SerializationOp {
    Encode,
    Decode,
}

impl fmt::Display for SerializationOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Encode => f.write_str("encode"),
            Self::Decode => f.write_str("decode"),
        }
    }
}

/// Coarse classification callers match on instead of the full error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    BackendUnavailable,
    NotFound,
    LocalWriteFailure,
    LocalReadFailure,
    CacheUnavailable,
    SerializationError,
    Timeout,
    InvalidKey,
    Batch,
    Configuration,
}

fn format_failures(failures: &[(String, StorageError)]) -> String {
    failures
        .iter()
        .map(|(key, error)| format!("{key} ({})", error.kind().as_str()))
        .collect::<Vec<_>>()
        .join(", ")
}

impl ErrorKind {
    /// Stable identifier used in logs and JSON bodies
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::BackendUnavailable => "backend_unavailable",
            Self::NotFound => "not_found",
            Self::LocalWriteFailure => "local_write_failure",
            Self::LocalReadFailure => "local_read_failure",
            Self::CacheUnavailable => "cache_unavailable",
            Self::SerializationError => "serialization_error",
            Self::Timeout => "timeout",
            Self::InvalidKey => "invalid_key",
            Self::Batch => "batch",
            Self::Configuration => "configuration",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl StorageError {
    /// Classify this error
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::BackendUnavailable { .. } => ErrorKind::BackendUnavailable,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::LocalWriteFailure { .. } => ErrorKind::LocalWriteFailure,
            Self::LocalReadFailure { .. } => ErrorKind::LocalReadFailure,
            Self::CacheUnavailable { .. } => ErrorKind::CacheUnavailable,
            Self::Serialization { .. } => ErrorKind::SerializationError,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::InvalidKey { .. } => ErrorKind::InvalidKey,
            Self::Batch { .. } => ErrorKind::Batch,
            Self::Configuration { .. } => ErrorKind::Configuration,
        }
    }

    /// Whether the fallback chain should treat this as a primary backend failure.
    /// Timeouts are not distinguished from other backend errors.
    #[must_use]
    pub const fn is_backend_failure(&self) -> bool {
        matches!(
            self,
            Self::BackendUnavailable { .. } | Self::Timeout { .. }
        )
    }

    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Create a backend unavailable error
    #[must_use]
    pub fn backend_unavailable(
        backend: impl Into<String>,
        operation: &'static str,
        message: impl Into<String>,
    ) -> Self {
        Self::BackendUnavailable {
            backend: backend.into(),
            operation,
            message: message.into(),
        }
    }

    /// Create a not found error
    #[must_use]
    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound { key: key.into() }
    }

    /// Create a local write failure
    #[must_use]
    pub fn local_write(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::LocalWriteFailure {
            key: key.into(),
            message: message.into(),
        }
    }

    /// Create a local read failure
    #[must_use]
    pub fn local_read(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::LocalReadFailure {
            key: key.into(),
            message: message.into(),
        }
    }

    /// Create a cache unavailable error
    #[must_use]
    pub fn cache_unavailable(operation: &'static str, message: impl Into<String>) -> Self {
        Self::CacheUnavailable {
            operation,
            message: message.into(),
        }
    }

    /// Create an encode error
    #[must_use]
    pub fn encode(key: impl Into<String>, source: &serde_json::Error) -> Self {
        Self::Serialization {
            key: key.into(),
            operation: SerializationOp::Encode,
            message: source.to_string(),
        }
    }

    /// Create a decode error
    #[must_use]
    pub fn decode(key: impl Into<String>, source: &serde_json::Error) -> Self {
        Self::Serialization {
            key: key.into(),
            operation: SerializationOp::Decode,
            message: source.to_string(),
        }
    }

    /// Create a timeout error
    #[must_use]
    pub const fn timeout(operation: &'static str, duration: Duration) -> Self {
        Self::Timeout {
            operation,
            duration,
        }
    }

    /// Create an invalid key error
    #[must_use]
    pub fn invalid_key(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidKey {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Create a configuration error
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }
}
