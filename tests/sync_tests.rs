//! Cross-instance synchronization tests
//!
//! Several `ConfigSync` instances share one in-process store, which stands in
//! for the shared key-value / pub-sub service.

mod common;

use common::fixtures::*;
use serde_json::json;
use settings_sync::{
    ChangeSource, ConfigSync, MemoryStore, SettingsSnapshot, SharedStore, SyncError,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

async fn stored_snapshot(store: &MemoryStore) -> Option<SettingsSnapshot> {
    store
        .get("system_settings")
        .await
        .unwrap()
        .map(|bytes| serde_json::from_slice(&bytes).unwrap())
}

// ============================================================================
// Local Update Path
// ============================================================================

#[tokio::test]
async fn test_update_visible_immediately() {
    let sync = start_instance(Arc::new(MemoryStore::new()), "a").await;

    sync.update_settings(delta(&[("request_timeout", json!(30))]))
        .await
        .unwrap();

    assert_eq!(sync.get_settings().request_timeout, 30);
    assert_eq!(sync.get_settings().request_timeout().as_secs(), 30);
    sync.stop();
}

#[tokio::test]
async fn test_unknown_field_tolerated() {
    let sync = start_instance(Arc::new(MemoryStore::new()), "a").await;

    let outcome = sync
        .update_settings(delta(&[("max_retries", json!(6)), ("no_such_field", json!(true))]))
        .await
        .unwrap();

    assert_eq!(outcome.applied, vec!["max_retries".to_string()]);
    assert_eq!(outcome.ignored, vec!["no_such_field".to_string()]);
    assert_eq!(sync.get_settings().max_retries, 6);
    assert_eq!(sync.metrics().snapshot().unknown_fields_ignored, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_disjoint_updates_union() {
    let store = MemoryStore::new();
    let sync = start_instance(Arc::new(store.clone()), "a").await;

    let updates = [
        ("request_log_retention_days", 30),
        ("request_log_write_interval_minutes", 5),
        ("max_retries", 9),
        ("blacklist_threshold", 12),
        ("request_timeout", 120),
        ("connect_timeout", 10),
    ];

    let tasks = updates.iter().map(|(field, value)| {
        let sync = Arc::clone(&sync);
        let field = field.to_string();
        let value = *value;
        tokio::spawn(async move {
            let outcome = sync
                .update_settings(delta(&[(field.as_str(), json!(value))]))
                .await
                .unwrap();
            (field, outcome.version)
        })
    });
    let results: Vec<(String, u64)> = futures::future::join_all(tasks)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    let snapshot = sync.snapshot();
    for (field, value) in updates {
        assert_eq!(snapshot.settings.number(field), Some(value), "{} lost", field);
    }
    for (field, version) in &results {
        assert_eq!(snapshot.field_version(field), *version);
    }

    let max_version = results.iter().map(|(_, v)| *v).max().unwrap();
    assert_eq!(snapshot.version, max_version);
    assert_eq!(stored_snapshot(&store).await.unwrap(), *snapshot);
}

// ============================================================================
// Publish Failure
// ============================================================================

#[tokio::test]
async fn test_publish_failure_rolls_back() {
    let store = FlakyStore::new(MemoryStore::new());
    let sync = start_instance(Arc::new(store.clone()), "a").await;

    sync.update_settings(delta(&[("max_retries", json!(4))]))
        .await
        .unwrap();
    let before = sync.snapshot();

    store.fail_publish(true);
    let err = sync
        .update_settings(delta(&[("max_retries", json!(8))]))
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Publish(_)));

    // Neither the local cache nor the authoritative value moved
    assert_eq!(sync.snapshot(), before);
    assert_eq!(stored_snapshot(store.memory()).await.unwrap(), *before);
    assert_eq!(sync.metrics().snapshot().publish_failures, 1);

    store.fail_publish(false);
    sync.update_settings(delta(&[("max_retries", json!(8))]))
        .await
        .unwrap();
    assert_eq!(sync.get_settings().max_retries, 8);
}

#[tokio::test]
async fn test_publish_failure_skips_callbacks() {
    let store = FlakyStore::new(MemoryStore::new());
    let sync = start_instance(Arc::new(store.clone()), "a").await;
    let calls = Arc::new(AtomicUsize::new(0));
    {
        let calls = Arc::clone(&calls);
        sync.add_callback(move |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
    }

    store.fail_publish(true);
    assert!(
        sync.update_settings(delta(&[("max_retries", json!(8))]))
            .await
            .is_err()
    );
    tokio::task::yield_now().await;
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

// ============================================================================
// Fail-Open Cache
// ============================================================================

#[tokio::test]
async fn test_refresh_failure_serves_last_snapshot() {
    let store = FlakyStore::new(MemoryStore::new());
    let writer = start_instance(Arc::new(store.clone()), "writer").await;
    let reader = start_instance(Arc::new(store.clone()), "reader").await;

    writer
        .update_settings(delta(&[("blacklist_threshold", json!(11))]))
        .await
        .unwrap();
    eventually(|| reader.get_settings().blacklist_threshold == 11).await;

    store.fail_get(true);
    assert!(reader.refresh().await.is_err());
    assert_eq!(reader.get_settings().blacklist_threshold, 11);
    assert_eq!(reader.metrics().snapshot().refresh_failures, 1);
}

#[tokio::test]
async fn test_start_with_unreachable_store_serves_defaults() {
    let store = FlakyStore::new(MemoryStore::new());
    store.fail_get(true);

    let sync = ConfigSync::start(Arc::new(store.clone()), config("a"))
        .await
        .unwrap();
    assert_eq!(sync.snapshot().version, 0);
    assert_eq!(sync.get_settings().request_timeout, 600);

    store.fail_get(false);
    sync.refresh().await.unwrap();
}

// ============================================================================
// Peer Propagation
// ============================================================================

#[tokio::test]
async fn test_update_reaches_peer() {
    let store: Arc<dyn SharedStore> = Arc::new(MemoryStore::new());
    let a = start_instance(Arc::clone(&store), "a").await;
    let b = start_instance(Arc::clone(&store), "b").await;

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    b.add_callback(move |change| {
        tx.send(change.source.clone())?;
        Ok(())
    });

    let outcome = a
        .update_settings(delta(&[("app_url", json!("https://api.example.com"))]))
        .await
        .unwrap();

    eventually(|| b.snapshot().version == outcome.version).await;
    assert_eq!(b.get_settings().app_url, "https://api.example.com");
    assert_eq!(
        rx.recv().await.unwrap(),
        ChangeSource::Notification {
            origin: "a".to_string()
        }
    );
}

#[tokio::test]
async fn test_late_joiner_loads_authoritative_snapshot() {
    let store: Arc<dyn SharedStore> = Arc::new(MemoryStore::new());
    let a = start_instance(Arc::clone(&store), "a").await;
    a.update_settings(delta(&[("proxy_keys", json!("k1,k2"))]))
        .await
        .unwrap();

    let late = start_instance(Arc::clone(&store), "late").await;
    assert_eq!(late.get_settings().proxy_keys, "k1,k2");
    assert_eq!(late.snapshot().version, a.snapshot().version);
}

#[tokio::test]
async fn test_disjoint_updates_from_two_instances_converge() {
    let store: Arc<dyn SharedStore> = Arc::new(MemoryStore::new());
    let a = start_instance(Arc::clone(&store), "a").await;
    let b = start_instance(Arc::clone(&store), "b").await;

    a.update_settings(delta(&[("max_retries", json!(1))]))
        .await
        .unwrap();
    b.update_settings(delta(&[("blacklist_threshold", json!(2))]))
        .await
        .unwrap();

    for sync in [&a, &b] {
        eventually(|| {
            let settings = sync.get_settings();
            settings.max_retries == 1 && settings.blacklist_threshold == 2
        })
        .await;
    }
}

#[tokio::test]
async fn test_unseen_peer_writes_survive_in_shared_store() {
    let memory = MemoryStore::new();
    let store: Arc<dyn SharedStore> = Arc::new(memory.clone());

    // Neither instance listens, so neither sees the other's record
    let a = Arc::new(ConfigSync::new(Arc::clone(&store), config("a")));
    let b = Arc::new(ConfigSync::new(Arc::clone(&store), config("b")));
    a.update_settings(delta(&[("max_retries", json!(1))]))
        .await
        .unwrap();
    b.update_settings(delta(&[("blacklist_threshold", json!(2))]))
        .await
        .unwrap();

    let stored = stored_snapshot(&memory).await.unwrap();
    assert_eq!(stored.settings.max_retries, 1);
    assert_eq!(stored.settings.blacklist_threshold, 2);

    let late = start_instance(Arc::clone(&store), "late").await;
    assert_eq!(late.get_settings().max_retries, 1);
    assert_eq!(late.get_settings().blacklist_threshold, 2);

    // A forced reload everywhere must not drop either write
    let listener = start_instance(Arc::clone(&store), "listener").await;
    a.force_sync().await.unwrap();
    b.refresh().await.unwrap();
    for sync in [&a, &b, &late] {
        let settings = sync.get_settings();
        assert_eq!((settings.max_retries, settings.blacklist_threshold), (1, 2));
    }
    eventually(|| {
        let settings = listener.get_settings();
        settings.max_retries == 1 && settings.blacklist_threshold == 2
    })
    .await;
}

#[tokio::test]
async fn test_caches_converge_with_store_after_concurrent_writes() {
    let memory = MemoryStore::new();
    let store: Arc<dyn SharedStore> = Arc::new(memory.clone());
    let a = start_instance(Arc::clone(&store), "a").await;
    let b = start_instance(Arc::clone(&store), "b").await;

    let (first, second) = tokio::join!(
        a.update_settings(delta(&[("max_retries", json!(1))])),
        b.update_settings(delta(&[("blacklist_threshold", json!(2))])),
    );
    first.unwrap();
    second.unwrap();

    for sync in [&a, &b] {
        eventually(|| {
            let settings = sync.get_settings();
            settings.max_retries == 1 && settings.blacklist_threshold == 2
        })
        .await;
    }

    // One more write carries anything the store missed
    a.update_settings(delta(&[("request_log_retention_days", json!(14))]))
        .await
        .unwrap();
    let stored = stored_snapshot(&memory).await.unwrap();
    assert_eq!(stored.settings.max_retries, 1);
    assert_eq!(stored.settings.blacklist_threshold, 2);

    let late = start_instance(Arc::clone(&store), "late").await;
    eventually(|| late.get_settings() == a.get_settings()).await;
}

#[tokio::test]
async fn test_force_sync_reloads_peers() {
    let memory = MemoryStore::new();
    let store: Arc<dyn SharedStore> = Arc::new(memory.clone());
    let a = start_instance(Arc::clone(&store), "a").await;
    let b = start_instance(Arc::clone(&store), "b").await;

    // Written behind everyone's back, no notification
    let mut snapshot = SettingsSnapshot::default();
    snapshot.settings.max_retries = 42;
    snapshot.version = 1;
    memory
        .set("system_settings", serde_json::to_vec(&snapshot).unwrap())
        .await
        .unwrap();

    a.force_sync().await.unwrap();
    assert_eq!(a.get_settings().max_retries, 42);
    eventually(|| b.get_settings().max_retries == 42).await;
}

#[tokio::test]
async fn test_stopped_instance_misses_notifications() {
    let store: Arc<dyn SharedStore> = Arc::new(MemoryStore::new());
    let a = start_instance(Arc::clone(&store), "a").await;
    let b = start_instance(Arc::clone(&store), "b").await;
    b.stop();

    a.update_settings(delta(&[("max_retries", json!(7))]))
        .await
        .unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert_eq!(b.get_settings().max_retries, 3);

    // A manual refresh catches up from the shared store
    assert!(b.refresh().await.unwrap());
    assert_eq!(b.get_settings().max_retries, 7);
}

// ============================================================================
// Callbacks
// ============================================================================

#[tokio::test]
async fn test_unregistered_callback_not_invoked() {
    let sync = start_instance(Arc::new(MemoryStore::new()), "a").await;
    let kept = Arc::new(AtomicUsize::new(0));
    let removed = Arc::new(AtomicUsize::new(0));

    {
        let kept = Arc::clone(&kept);
        sync.add_callback(move |_| {
            kept.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
    }
    let token = {
        let removed = Arc::clone(&removed);
        sync.add_callback(move |_| {
            removed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    };
    assert!(sync.remove_callback(token));

    let outcome = sync
        .update_settings(delta(&[("max_retries", json!(2))]))
        .await
        .unwrap();
    let report = outcome.callbacks.wait().await;

    assert_eq!(report.invoked, 1);
    assert_eq!(kept.load(Ordering::SeqCst), 1);
    assert_eq!(removed.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_failing_callback_does_not_fail_update() {
    let sync = start_instance(Arc::new(MemoryStore::new()), "a").await;
    sync.add_callback(|_| Err("listener unavailable".into()));

    let outcome = sync
        .update_settings(delta(&[("max_retries", json!(2))]))
        .await
        .unwrap();
    let report = outcome.callbacks.wait().await;

    assert_eq!(report.failures.len(), 1);
    assert_eq!(sync.get_settings().max_retries, 2);
    assert_eq!(sync.status().metrics.callback_failures, 1);
}
