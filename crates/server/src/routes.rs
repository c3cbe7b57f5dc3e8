//! `/cache` monitoring endpoint
//!
//! - `GET /cache?action=stats` returns near-cache counters, distributed tier
//!   health and a timestamp
//! - `GET /cache?action=clear` clears the namespace in every tier
//! - `DELETE /cache?key=K` deletes one key, or the whole namespace when `key`
//!   is omitted
//!
//! Errors are JSON `{ "error": "..." }` bodies.

use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tierstore_cache::{CacheStats, CacheStore, DistributedStats};
use tracing::{error, info};

#[derive(Clone)]
pub struct CacheState {
    cache: Arc<dyn CacheStore>,
}

pub fn cache_router(cache: Arc<dyn CacheStore>) -> Router {
    Router::new()
        .route("/cache", get(handle_get).delete(handle_delete))
        .with_state(CacheState { cache })
}

/// Body of `GET /cache?action=stats`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsResponse {
    /// Counters of this process's cache tiers
    pub distributed: CacheStats,
    /// Shared tier health; `null` when no distributed tier is configured
    pub redis: Option<DistributedStats>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct GetParams {
    action: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DeleteParams {
    key: Option<String>,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn internal(message: impl std::fmt::Display) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!(error = %self.message, "cache endpoint failed");
        }
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

async fn handle_get(
    State(state): State<CacheState>,
    params: Result<Query<GetParams>, QueryRejection>,
) -> Result<Json<Value>, ApiError> {
    let Query(params) = params?;

    match params.action.as_deref().unwrap_or("stats") {
        "stats" => {
            let mut stats = state.cache.stats().await;
            let response = StatsResponse {
                redis: stats.distributed.take(),
                distributed: stats,
                timestamp: Utc::now(),
            };
            serde_json::to_value(response)
                .map(Json)
                .map_err(ApiError::internal)
        }
        "clear" => {
            state.cache.clear().await;
            info!("cache cleared through monitoring endpoint");
            Ok(Json(json!({ "success": true, "message": "All caches cleared" })))
        }
        other => Err(ApiError::bad_request(format!(
            "unknown action '{other}', expected 'stats' or 'clear'"
        ))),
    }
}

async fn handle_delete(
    State(state): State<CacheState>,
    params: Result<Query<DeleteParams>, QueryRejection>,
) -> Result<Json<Value>, ApiError> {
    let Query(params) = params?;

    match params.key {
        Some(key) if !key.is_empty() => {
            state.cache.delete(&key).await;
            info!(key = %key, "cache key deleted through monitoring endpoint");
            Ok(Json(json!({ "success": true, "key": key })))
        }
        _ => {
            state.cache.clear().await;
            info!("cache cleared through monitoring endpoint");
            Ok(Json(json!({ "success": true, "message": "All caches cleared" })))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Method, Request};
    use std::time::Duration;
    use tierstore_cache::{DistributedTier, MemoryTier, TieredCache};
    use tower::ServiceExt;

    async fn call(router: Router, method: Method, uri: &str) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap();
        let response = router.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn near_only() -> Arc<TieredCache> {
        Arc::new(TieredCache::new("scenarios", 100))
    }

    #[tokio::test]
    async fn stats_reports_counters_and_timestamp() {
        let cache = near_only();
        cache.set("a", json!(1), Duration::from_secs(60)).await;
        cache.get("a").await;
        cache.get("b").await;

        let (status, body) = call(cache_router(cache), Method::GET, "/cache?action=stats").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["distributed"]["hits"], 1);
        assert_eq!(body["distributed"]["misses"], 1);
        assert_eq!(body["distributed"]["hitRate"], 0.5);
        assert_eq!(body["distributed"]["keyCount"], 1);
        assert!(body["redis"].is_null());
        assert!(body["timestamp"].is_string());
    }

    #[tokio::test]
    async fn stats_include_distributed_tier_health() {
        let tier = Arc::new(MemoryTier::new());
        let cache = Arc::new(
            TieredCache::new("scenarios", 100).with_distributed(tier.clone() as Arc<dyn DistributedTier>),
        );
        cache.set("a", json!(1), Duration::from_secs(60)).await;

        let (_, body) = call(cache_router(cache), Method::GET, "/cache?action=stats").await;

        assert_eq!(body["redis"]["backend"], "memory");
        assert_eq!(body["redis"]["connected"], true);
        assert_eq!(body["redis"]["keyCount"], 1);
    }

    #[tokio::test]
    async fn clear_action_empties_the_namespace() {
        let cache = near_only();
        cache.set("a", json!(1), Duration::from_secs(60)).await;

        let (status, body) = call(cache_router(cache.clone()), Method::GET, "/cache?action=clear").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert!(cache.near().is_empty());
    }

    #[tokio::test]
    async fn unknown_action_is_a_bad_request() {
        let (status, body) = call(cache_router(near_only()), Method::GET, "/cache?action=explode").await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("explode"));
    }

    #[tokio::test]
    async fn delete_with_key_removes_only_that_key() {
        let cache = near_only();
        cache.set("a", json!(1), Duration::from_secs(60)).await;
        cache.set("b", json!(2), Duration::from_secs(60)).await;

        let (status, body) = call(cache_router(cache.clone()), Method::DELETE, "/cache?key=a").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["key"], "a");
        assert_eq!(cache.get("a").await, None);
        assert_eq!(cache.get("b").await, Some(json!(2)));
    }

    #[tokio::test]
    async fn delete_without_key_clears_everything() {
        let cache = near_only();
        cache.set("a", json!(1), Duration::from_secs(60)).await;
        cache.set("b", json!(2), Duration::from_secs(60)).await;

        let (status, _) = call(cache_router(cache.clone()), Method::DELETE, "/cache").await;

        assert_eq!(status, StatusCode::OK);
        assert!(cache.near().is_empty());
    }
}
