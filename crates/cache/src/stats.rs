//! Hit/miss statistics for monitoring

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe hit/miss counters
///
/// Counters only grow; [`StatsCollector::reset`] is the single way to zero them.
#[derive(Debug, Default)]
pub struct StatsCollector {
    hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
    errors: AtomicU64,
}

impl StatsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_write(&self) {
        self.writes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Hit rate in `[0.0, 1.0]`; `0.0` before any lookup
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits();
        let total = hits + self.misses();
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }

    pub fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.writes.store(0, Ordering::Relaxed);
        self.errors.store(0, Ordering::Relaxed);
    }

    /// Snapshot the counters together with the current tier sizes
    pub fn snapshot(&self, size: u64, key_count: u64) -> CacheStats {
        CacheStats {
            hits: self.hits(),
            misses: self.misses(),
            hit_rate: self.hit_rate(),
            size,
            key_count,
            writes: self.writes.load(Ordering::Relaxed),
            evictions: 0,
            errors: self.errors.load(Ordering::Relaxed),
            distributed: None,
        }
    }
}

/// Point-in-time cache statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    /// Encoded bytes held by the near cache
    pub size: u64,
    pub key_count: u64,
    pub writes: u64,
    /// Entries dropped from the near cache to make room
    pub evictions: u64,
    /// Swallowed tier errors
    pub errors: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distributed: Option<DistributedStats>,
}

/// Health of the shared distributed tier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DistributedStats {
    pub backend: String,
    pub connected: bool,
    /// Keys in this service's namespace, when the tier could count them
    pub key_count: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn counts_and_resets() {
        let stats = StatsCollector::new();
        stats.record_hit();
        stats.record_hit();
        stats.record_miss();
        stats.record_write();

        let snapshot = stats.snapshot(42, 1);
        assert_eq!(snapshot.hits, 2);
        assert_eq!(snapshot.misses, 1);
        assert_eq!(snapshot.writes, 1);
        assert_eq!(snapshot.size, 42);
        assert!((snapshot.hit_rate - 2.0 / 3.0).abs() < f64::EPSILON);

        stats.reset();
        let snapshot = stats.snapshot(0, 0);
        assert_eq!(snapshot.hits, 0);
        assert_eq!(snapshot.misses, 0);
        assert_eq!(snapshot.hit_rate, 0.0);
    }

    #[test]
    fn serializes_camel_case() {
        let json = serde_json::to_value(StatsCollector::new().snapshot(0, 0)).unwrap();
        assert!(json.get("hitRate").is_some());
        assert!(json.get("keyCount").is_some());
        assert!(json.get("distributed").is_none());
    }

    #[test]
    fn concurrent_increments_are_not_lost() {
        let stats = std::sync::Arc::new(StatsCollector::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let stats = std::sync::Arc::clone(&stats);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        stats.record_hit();
                        stats.record_miss();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(stats.hits(), 8000);
        assert_eq!(stats.misses(), 8000);
    }

    proptest! {
        #[test]
        fn hit_rate_always_between_0_and_1(hits in 0u64..500, misses in 0u64..500) {
            let stats = StatsCollector::new();
            for _ in 0..hits {
                stats.record_hit();
            }
            for _ in 0..misses {
                stats.record_miss();
            }

            let rate = stats.hit_rate();
            prop_assert!((0.0..=1.0).contains(&rate));
            if hits + misses > 0 {
                let expected = hits as f64 / (hits + misses) as f64;
                prop_assert!((rate - expected).abs() < f64::EPSILON);
            }
        }
    }
}
