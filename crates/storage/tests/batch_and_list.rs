//! Batch fan-out and list caching
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tierstore_cache::{CacheStore, TieredCache};
use tierstore_config::StorageConfig;
use tierstore_core::EffectiveOptions;
use tierstore_storage::{
    ErrorKind, LocalFallbackStore, MemoryBackend, MemoryFallbackStore, Source, StorageBackend,
    StorageError, StorageOptions, StorageService,
};
use tokio::time::Instant;

fn service_with(config: StorageConfig) -> (StorageService, Arc<MemoryBackend>, Arc<MemoryFallbackStore>) {
    let backend = Arc::new(MemoryBackend::new());
    let local = Arc::new(MemoryFallbackStore::new());
    let cache = Arc::new(TieredCache::new(&config.service_name, 1_000));
    let service = StorageService::new(config, backend.clone(), cache).with_local_fallback(local.clone());
    (service, backend, local)
}

fn service() -> (StorageService, Arc<MemoryBackend>, Arc<MemoryFallbackStore>) {
    service_with(StorageConfig::new("scenarios"))
}

#[tokio::test]
async fn batch_load_returns_partial_results() {
    let (service, _, _) = service();
    service.save("k1", &json!(1), &StorageOptions::default()).await;
    service.save("k3", &json!(3), &StorageOptions::default()).await;

    let result = service
        .batch_load::<u32, _>(&["k1", "k2", "k3"], &StorageOptions::default())
        .await;

    assert!(!result.success);
    assert_eq!(result.data, Some(vec![1, 3]));
    match result.error {
        Some(StorageError::Batch {
            operation,
            total,
            failures,
        }) => {
            assert_eq!(operation, "load");
            assert_eq!(total, 3);
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].0, "k2");
            assert_eq!(failures[0].1.kind(), ErrorKind::NotFound);
        }
        other => panic!("expected batch error, got {other:?}"),
    }
}

#[tokio::test]
async fn batch_load_of_present_keys_succeeds_in_request_order() {
    let (service, _, _) = service();
    for (key, value) in [("a", 1), ("b", 2), ("c", 3)] {
        service.save(key, &json!(value), &StorageOptions::default()).await;
    }

    let result = service
        .batch_load::<u32, _>(&["c", "a", "b"], &StorageOptions::default())
        .await;

    assert!(result.success);
    assert_eq!(result.data, Some(vec![3, 1, 2]));
    assert_eq!(result.source(), Some(Source::Cache));
}

#[tokio::test]
async fn batch_save_requires_every_item() {
    let (service, backend, _) = service();
    let items = vec![
        ("a".to_string(), json!(1)),
        ("b".to_string(), json!(2)),
    ];

    let saved = service.batch_save(&items, &StorageOptions::default()).await;
    assert!(saved.success);
    assert_eq!(saved.data, Some(vec!["a".to_string(), "b".to_string()]));
    assert_eq!(backend.len(), 2);

    let with_bad_key = vec![("c".to_string(), json!(3)), (String::new(), json!(4))];
    let partial = service.batch_save(&with_bad_key, &StorageOptions::default()).await;
    assert!(!partial.success);
    assert_eq!(partial.data, Some(vec!["c".to_string()]));
    assert_eq!(partial.error_kind(), Some(ErrorKind::Batch));
}

#[tokio::test]
async fn batch_save_reports_local_when_primary_is_down() {
    let (service, backend, local) = service();
    backend.set_available(false);
    let items = vec![("a".to_string(), json!(1))];

    let saved = service.batch_save(&items, &StorageOptions::default()).await;

    assert!(saved.success);
    assert_eq!(saved.source(), Some(Source::Local));
    assert!(local.contains("a"));
}

#[tokio::test(start_paused = true)]
async fn batch_fan_out_is_bounded() {
    let config = StorageConfig::builder("scenarios")
        .batch_concurrency(2)
        .build()
        .unwrap();
    let (service, backend, _) = service_with(config);
    let scope = EffectiveOptions::default();
    let keys: Vec<String> = (0..6).map(|i| format!("k{i}")).collect();
    for key in &keys {
        backend.save_to_storage(key, &json!(1), &scope).await.unwrap();
    }
    backend.set_latency(Duration::from_millis(50));

    let started = Instant::now();
    let result = service
        .batch_load::<u32, _>(&keys, &StorageOptions::default().with_cache(false))
        .await;

    assert!(result.success);
    assert_eq!(result.data.map(|items| items.len()), Some(6));
    assert!(started.elapsed() >= Duration::from_millis(150));
}

#[tokio::test]
async fn zero_batch_concurrency_still_completes() {
    let mut config = StorageConfig::new("scenarios");
    config.batch_concurrency = 0;
    let (service, _, _) = service_with(config);
    let items = vec![("a".to_string(), json!(1)), ("b".to_string(), json!(2))];

    let saved = tokio::time::timeout(
        Duration::from_secs(2),
        service.batch_save(&items, &StorageOptions::default()),
    )
    .await
    .expect("batch save stalled");
    assert!(saved.success);

    let loaded = tokio::time::timeout(
        Duration::from_secs(2),
        service.batch_load::<u32, _>(&["a", "b"], &StorageOptions::default()),
    )
    .await
    .expect("batch load stalled");
    assert_eq!(loaded.data, Some(vec![1, 2]));
}

#[tokio::test]
async fn from_config_rejects_invalid_configuration() {
    let mut config = StorageConfig::new("scenarios");
    config.batch_concurrency = 0;

    let result = StorageService::from_config(config, Arc::new(MemoryBackend::new())).await;

    match result {
        Err(e) => assert_eq!(e.kind(), ErrorKind::Configuration),
        Ok(_) => panic!("invalid configuration was accepted"),
    }
}

#[tokio::test]
async fn empty_list_is_success() {
    let (service, _, _) = service();

    let result = service
        .list::<Value>("no-such-prefix", &StorageOptions::default())
        .await;

    assert!(result.success);
    assert_eq!(result.data, Some(Vec::new()));
}

#[tokio::test]
async fn list_is_cached_and_invalidated_by_writes() {
    let (service, backend, _) = service();
    service.save("scenario:1", &json!(1), &StorageOptions::default()).await;
    service.save("scenario:2", &json!(2), &StorageOptions::default()).await;

    let first = service.list::<u32>("scenario:", &StorageOptions::default()).await;
    assert_eq!(first.data, Some(vec![1, 2]));
    assert_eq!(first.source(), Some(Source::Cloud));

    let second = service.list::<u32>("scenario:", &StorageOptions::default()).await;
    assert_eq!(second.source(), Some(Source::Cache));
    assert_eq!(backend.calls().lists, 1);

    service.save("scenario:3", &json!(3), &StorageOptions::default()).await;
    let third = service.list::<u32>("scenario:", &StorageOptions::default()).await;
    assert_eq!(third.data, Some(vec![1, 2, 3]));
    assert_eq!(third.source(), Some(Source::Cloud));

    service.delete("scenario:1", &StorageOptions::default()).await;
    let fourth = service.list::<u32>("scenario:", &StorageOptions::default()).await;
    assert_eq!(fourth.data, Some(vec![2, 3]));
}

#[tokio::test]
async fn list_cache_uses_reserved_key() {
    let (service, _, _) = service();
    service.save("scenario:1", &json!(1), &StorageOptions::default()).await;
    service.list::<u32>("scenario:", &StorageOptions::default()).await;

    assert_eq!(
        service.cache().get("list:scenario:").await,
        Some(json!([1]))
    );
}

#[tokio::test]
async fn list_falls_back_to_local() {
    let (service, backend, local) = service();
    local.save("scenario:1", &json!(1)).await.unwrap();
    backend.set_available(false);

    let result = service.list::<u32>("scenario:", &StorageOptions::default()).await;

    assert!(result.success);
    assert_eq!(result.data, Some(vec![1]));
    assert_eq!(result.source(), Some(Source::Local));
}

#[tokio::test]
async fn clear_cache_forces_primary_reads() {
    let (service, backend, _) = service();
    service.save("scenario:1", &json!(1), &StorageOptions::default()).await;

    service.clear_cache().await;
    let loaded = service.load::<u32>("scenario:1", &StorageOptions::default()).await;

    assert_eq!(loaded.source(), Some(Source::Cloud));
    assert_eq!(backend.calls().loads, 1);
    let stats = service.cache_stats().await;
    assert_eq!(stats.misses, 1);
}
