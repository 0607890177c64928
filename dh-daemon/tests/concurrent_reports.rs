//! Concurrent report integration tests.
//!
//! Tests that identical reports requested at the same time share one
//! pipeline execution:
//! - Every caller gets the same payload
//! - The engine runs once per key
//! - Different reports do not coalesce

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

use dh_core::{AggregationRequest, PipelineBuilder};
use dh_daemon::aggregator::Aggregator;
use dh_daemon::server::DatabaseManager;
use dh_daemon::store::MemoryStore;

fn events_store() -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    let events: Vec<_> = (0..200)
        .map(|i| {
            json!({
                "@type": if i % 2 == 0 { "Receive" } else { "Recycle" },
                "_created": format!("2026-{:02}-15T12:00:00Z", i % 12 + 1),
                "receiverOrganization": format!("Org{}", i % 5),
                "byOrganization": format!("Org{}", i % 3),
                "devices": [format!("d{}", i), format!("e{}", i)],
            })
        })
        .collect();
    store.insert_value("events", json!(events)).unwrap();
    store
}

fn request(event: &str) -> AggregationRequest {
    let start = chrono::DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
        .unwrap()
        .with_timezone(&chrono::Utc);
    AggregationRequest::new("events", event, "organization", start)
}

/// Test that many concurrent identical reports run the pipeline once.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_identical_reports() {
    let aggregator = Arc::new(Aggregator::from_store(events_store(), Duration::from_secs(60)));

    let handles: Vec<_> = (0..32)
        .map(|_| {
            let aggregator = Arc::clone(&aggregator);
            tokio::spawn(async move {
                aggregator
                    .devices_per_event_subject_month(&request("Receive"))
                    .await
            })
        })
        .collect();

    let mut payloads = Vec::new();
    for handle in handles {
        let matrix = handle.await.expect("task panicked").expect("report failed");
        payloads.push(serde_json::to_string(&matrix).unwrap());
    }

    assert!(payloads.windows(2).all(|w| w[0] == w[1]));
    let stats = aggregator.cache().stats();
    assert_eq!(stats.engine_calls, 1);
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.hits + stats.joins, 31);
}

/// Test that different reports are cached under different keys.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_distinct_reports() {
    let aggregator = Arc::new(Aggregator::from_store(events_store(), Duration::from_secs(60)));

    let handles: Vec<_> = ["Receive", "Recycle", "Receive", "Recycle"]
        .into_iter()
        .map(|event| {
            let aggregator = Arc::clone(&aggregator);
            tokio::spawn(async move {
                aggregator
                    .devices_per_event_subject_month(&request(event))
                    .await
            })
        })
        .collect();

    for handle in handles {
        let matrix = handle.await.expect("task panicked").expect("report failed");
        assert_eq!(matrix.labels.len(), 12);
    }

    assert_eq!(aggregator.cache().stats().engine_calls, 2);
    assert_eq!(aggregator.cache().len(), 2);

    let receive = PipelineBuilder::devices_per_event_subject_month(&request("Receive")).unwrap();
    let key = dh_daemon::cache::ResultCache::key_for("events", &receive);
    assert!(aggregator.cache().entry(&key).is_some());
}

/// Test that concurrent first requests for a database open it once.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_database_open() {
    let dir = tempdir().expect("Failed to create temp dir");
    let db_dir = dir.path().join("acme");
    std::fs::create_dir_all(&db_dir).unwrap();
    std::fs::write(db_dir.join("devices.json"), r#"[{"_id": "pc-1", "events": []}]"#).unwrap();

    let manager = Arc::new(DatabaseManager::new(
        dir.path().to_path_buf(),
        Duration::from_secs(60),
    ));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.get("acme").await.map_err(|e| e.to_string()) })
        })
        .collect();

    let mut dbs = Vec::new();
    for handle in handles {
        dbs.push(handle.await.expect("task panicked").expect("open failed"));
    }

    assert!(dbs.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    assert_eq!(manager.database_count().await, 1);
}
