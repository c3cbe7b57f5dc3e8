//! Uniform result type returned by every storage operation

use crate::errors::StorageError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The tier that actually answered a call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Cloud,
    Local,
    Cache,
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cloud => f.write_str("cloud"),
            Self::Local => f.write_str("local"),
            Self::Cache => f.write_str("cache"),
        }
    }
}

/// Provenance of a successful result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultMetadata {
    pub source: Source,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

impl ResultMetadata {
    #[must_use]
    pub fn new(source: Source) -> Self {
        Self {
            source,
            timestamp: Utc::now(),
            size: None,
        }
    }

    #[must_use]
    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }
}

/// Outcome of a storage call
///
/// Construct through [`StorageResult::ok`], [`StorageResult::done`] or
/// [`StorageResult::failed`] so that a successful load always carries data
/// and a failure always carries an error.
#[derive(Debug, Clone, PartialEq)]
pub struct StorageResult<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<StorageError>,
    pub metadata: Option<ResultMetadata>,
}

impl<T> StorageResult<T> {
    /// Successful call that produced data
    #[must_use]
    pub fn ok(data: T, metadata: ResultMetadata) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            metadata: Some(metadata),
        }
    }

    /// Successful call with partial data and a non-fatal error attached
    #[must_use]
    pub fn partial(data: T, error: StorageError, metadata: ResultMetadata) -> Self {
        Self {
            success: false,
            data: Some(data),
            error: Some(error),
            metadata: Some(metadata),
        }
    }

    /// Failed call
    #[must_use]
    pub fn failed(error: StorageError) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error),
            metadata: None,
        }
    }

    /// Tier that answered, if any
    #[must_use]
    pub fn source(&self) -> Option<Source> {
        self.metadata.as_ref().map(|m| m.source)
    }

    /// Classification of the failure, if any
    #[must_use]
    pub fn error_kind(&self) -> Option<crate::ErrorKind> {
        self.error.as_ref().map(StorageError::kind)
    }

    /// Convert a data-carrying result into a plain `Result`, discarding metadata
    pub fn into_result(self) -> crate::Result<T> {
        match (self.success, self.data, self.error) {
            (true, Some(data), _) => Ok(data),
            (_, _, Some(error)) => Err(error),
            (_, _, None) => Err(StorageError::configuration(
                "storage result carried neither data nor error",
            )),
        }
    }

    /// Map the payload, keeping status and provenance
    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> StorageResult<U> {
        StorageResult {
            success: self.success,
            data: self.data.map(f),
            error: self.error,
            metadata: self.metadata,
        }
    }
}

impl StorageResult<()> {
    /// Successful call with no payload (delete)
    #[must_use]
    pub fn done(metadata: ResultMetadata) -> Self {
        Self {
            success: true,
            data: None,
            error: None,
            metadata: Some(metadata),
        }
    }

    /// Failed delete that still records the tier consulted
    #[must_use]
    pub fn failed_at(error: StorageError, metadata: ResultMetadata) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error),
            metadata: Some(metadata),
        }
    }
}
