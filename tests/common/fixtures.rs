//! Test fixtures for settings-sync tests.

use async_trait::async_trait;
use serde_json::Value;
use settings_sync::store::Subscription;
use settings_sync::{
    ConfigSync, MemoryStore, SettingsDelta, SharedStore, StoreError, SyncConfig,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

// ============================================================================
// Key Material and Secrets
// ============================================================================

/// Operator secret used by most encryption tests
pub const TEST_SECRET: &str = "test-operator-secret-for-settings";

/// A second, unrelated secret (wrong-key tests)
pub const OTHER_SECRET: &str = "another-operator-secret";

/// DSN used by the end-to-end scenarios
pub const TEST_DSN: &str = "postgres://u:p@host/db";

/// Unicode payload for codec tests
pub const UNICODE_TEXT: &str = "Hello 世界 🚀 Rust";

// ============================================================================
// Shared Store Double
// ============================================================================

/// `MemoryStore` wrapper that fails selected operations on demand
#[derive(Clone, Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    fail_publish: Arc<AtomicBool>,
    fail_get: Arc<AtomicBool>,
    sets: Arc<AtomicUsize>,
}

impl FlakyStore {
    pub fn new(inner: MemoryStore) -> Self {
        Self {
            inner,
            ..Self::default()
        }
    }

    pub fn fail_publish(&self, fail: bool) {
        self.fail_publish.store(fail, Ordering::SeqCst);
    }

    pub fn fail_get(&self, fail: bool) {
        self.fail_get.store(fail, Ordering::SeqCst);
    }

    /// Number of `set` calls seen so far
    pub fn set_count(&self) -> usize {
        self.sets.load(Ordering::SeqCst)
    }

    pub fn memory(&self) -> &MemoryStore {
        &self.inner
    }
}

#[async_trait]
impl SharedStore for FlakyStore {
    async fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<(), StoreError> {
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("publish disabled by test".into()));
        }
        self.inner.publish(channel, payload).await
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription, StoreError> {
        self.inner.subscribe(channel).await
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        if self.fail_get.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("get disabled by test".into()));
        }
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError> {
        self.sets.fetch_add(1, Ordering::SeqCst);
        self.inner.set(key, value).await
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Config for a named instance with periodic refresh disabled
pub fn config(instance_id: &str) -> SyncConfig {
    SyncConfig::default()
        .with_instance_id(instance_id)
        .with_refresh_interval(None)
}

/// Start a listening instance on `store`
pub async fn start_instance(store: Arc<dyn SharedStore>, instance_id: &str) -> Arc<ConfigSync> {
    ConfigSync::start(store, config(instance_id))
        .await
        .expect("instance should start")
}

pub fn delta(pairs: &[(&str, Value)]) -> SettingsDelta {
    pairs
        .iter()
        .map(|(name, value)| (name.to_string(), value.clone()))
        .collect()
}

/// Poll `condition` until it holds or two seconds pass
pub async fn eventually<F>(mut condition: F)
where
    F: FnMut() -> bool,
{
    tokio::time::timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not met within 2s");
}
