//! HTTP monitoring surface for tierstore caches

pub mod routes;

pub use routes::{cache_router, ApiError, CacheState, StatsResponse};
