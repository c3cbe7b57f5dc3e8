//! Key validation and namespacing shared by every tier

use crate::errors::{Result, StorageError};
use crate::options::EffectiveOptions;

/// Reserved prefix for cached list results; user keys may not start with it
pub const LIST_KEY_PREFIX: &str = "list:";

/// Separates bucket, path and key in a scoped key. Valid keys never contain
/// control characters, so a scoped key cannot collide with an unscoped one.
pub const SCOPE_SEPARATOR: char = '\u{1f}';

/// Longest key accepted by any tier
pub const MAX_KEY_LEN: usize = 1024;

/// Prefix a key with its owning service so services never collide in a shared cache
#[must_use]
pub fn namespaced_key(service: &str, key: &str) -> String {
    format!("{service}:{key}")
}

/// Cache key under which the result of `list(prefix)` is stored
#[must_use]
pub fn list_cache_key(prefix: &str) -> String {
    format!("{LIST_KEY_PREFIX}{prefix}")
}

/// `key` qualified by the call's bucket and path
///
/// Cache and local fallback entries are stored under this form so a value
/// saved in one bucket is never served for another. Without a bucket or path
/// the key is returned unchanged.
#[must_use]
pub fn scoped_key(options: &EffectiveOptions, key: &str) -> String {
    if options.bucket.is_none() && options.path.is_none() {
        return key.to_string();
    }
    format!(
        "{}{SCOPE_SEPARATOR}{}{SCOPE_SEPARATOR}{key}",
        options.bucket.as_deref().unwrap_or_default(),
        options.path.as_deref().unwrap_or_default(),
    )
}

/// Reject keys that cannot round-trip through every tier
pub fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(StorageError::invalid_key(key, "key must not be empty"));
    }
    if key.len() > MAX_KEY_LEN {
        return Err(StorageError::invalid_key(
            key,
            format!("key exceeds {MAX_KEY_LEN} bytes"),
        ));
    }
    if key.chars().any(char::is_control) {
        return Err(StorageError::invalid_key(
            key,
            "key contains control characters",
        ));
    }
    if key.starts_with(LIST_KEY_PREFIX) {
        return Err(StorageError::invalid_key(
            key,
            format!("'{LIST_KEY_PREFIX}' is reserved for cached list results"),
        ));
    }
    Ok(())
}
