//! Cache entries and their freshness windows

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tierstore_core::MAX_TTL;
use tokio::time::Instant;

/// Where an entry sits relative to its freshness and stale windows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// `now < expires_at`
    Fresh,
    /// `expires_at <= now < stale_at`
    Stale,
    /// Past every window; must not be served
    Expired,
}

/// A cached value with its lifetime
///
/// Deadlines are `tokio::time::Instant`s so that paused-clock tests drive
/// expiry deterministically.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry<V = Value> {
    pub key: String,
    pub value: V,
    pub created_at: DateTime<Utc>,
    pub expires_at: Instant,
    pub stale_at: Option<Instant>,
}

impl<V> CacheEntry<V> {
    /// Entry fresh for `ttl` and, if `stale_ttl` is set, servable as stale
    /// until `stale_ttl` after creation (never shorter than `ttl`)
    ///
    /// Both windows are capped at [`MAX_TTL`].
    pub fn new(key: impl Into<String>, value: V, ttl: Duration, stale_ttl: Option<Duration>) -> Self {
        let now = Instant::now();
        Self {
            key: key.into(),
            value,
            created_at: Utc::now(),
            expires_at: deadline(now, ttl),
            stale_at: stale_ttl.map(|stale| deadline(now, stale.max(ttl))),
        }
    }

    pub fn freshness(&self, now: Instant) -> Freshness {
        if now < self.expires_at {
            Freshness::Fresh
        } else if self.stale_at.is_some_and(|stale_at| now < stale_at) {
            Freshness::Stale
        } else {
            Freshness::Expired
        }
    }

    pub fn is_fresh(&self) -> bool {
        self.freshness(Instant::now()) == Freshness::Fresh
    }

    /// Last instant at which the entry may be served at all
    pub fn retain_until(&self) -> Instant {
        self.stale_at.unwrap_or(self.expires_at).max(self.expires_at)
    }

    /// Time left before the entry can no longer be served
    pub fn remaining_retention(&self, now: Instant) -> Duration {
        self.retain_until().saturating_duration_since(now)
    }
}

/// `now + after`, with `after` capped at [`MAX_TTL`]
pub(crate) fn deadline(now: Instant, after: Duration) -> Instant {
    now.checked_add(after.min(MAX_TTL)).unwrap_or(now)
}

/// Wall-clock form of an entry as stored in the distributed tier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct WireEntry {
    pub value: Value,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stale_at: Option<DateTime<Utc>>,
}

impl WireEntry {
    pub fn from_entry(entry: &CacheEntry<Value>) -> Self {
        let now = Instant::now();
        let wall_now = Utc::now();
        let to_wall = |deadline: Instant| {
            let remaining = deadline.saturating_duration_since(now);
            chrono::Duration::from_std(remaining)
                .ok()
                .and_then(|remaining| wall_now.checked_add_signed(remaining))
                .unwrap_or(wall_now)
        };

        Self {
            value: entry.value.clone(),
            created_at: entry.created_at,
            expires_at: to_wall(entry.expires_at),
            stale_at: entry.stale_at.map(to_wall),
        }
    }

    pub fn into_entry(self, key: impl Into<String>) -> CacheEntry<Value> {
        let now = Instant::now();
        let wall_now = Utc::now();
        let to_instant = |deadline: DateTime<Utc>| {
            let remaining = (deadline - wall_now).to_std().unwrap_or(Duration::ZERO);
            self::deadline(now, remaining)
        };

        CacheEntry {
            key: key.into(),
            value: self.value,
            created_at: self.created_at,
            expires_at: to_instant(self.expires_at),
            stale_at: self.stale_at.map(to_instant),
        }
    }
}
