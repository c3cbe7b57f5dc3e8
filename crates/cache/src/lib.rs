//! Cache tiers for tierstore
//!
//! This crate provides the caching half of the storage layer:
//! - An in-process near cache with bounded size and background expiry
//! - A pluggable distributed tier (Redis-compatible by default)
//! - [`TieredCache`], the [`CacheStore`] combining the two per service namespace
//! - Stale-while-revalidate reads with single-flight loads
//! - Hit/miss statistics for monitoring

pub mod distributed;
pub mod entry;
pub mod errors;
pub mod near;
pub mod revalidate;
pub mod stats;
pub mod store;
pub mod tiered;

pub use distributed::{DistributedTier, MemoryTier};
#[cfg(feature = "redis")]
pub use distributed::RedisTier;
pub use entry::{CacheEntry, Freshness};
pub use errors::{CacheError, Result};
pub use near::NearCache;
pub use revalidate::{RevalidateOptions, Revalidated, RevalidationCoordinator, Served};
pub use stats::{CacheStats, DistributedStats, StatsCollector};
pub use store::CacheStore;
pub use tiered::TieredCache;
