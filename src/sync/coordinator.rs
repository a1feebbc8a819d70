//! Authoritative update path
//!
//! [`ConfigSync`] owns the version clock and the publish path. An update runs
//! under one async mutex from validation to local install:
//!
//! 1. validate the delta (unknown keys are ignored with a warning)
//! 2. read the stored snapshot, fold the delta into it and stamp a new version
//! 3. write the draft to the shared store, then publish a [`ChangeRecord`]
//! 4. if publishing fails, write the previous snapshot back and fail
//! 5. install the draft locally and hand it to callbacks without waiting
//!
//! There is no cross-process lock. Two instances updating the same field race,
//! and peers keep whichever write carries the higher version. Every draft also
//! carries the fields this cache holds, so a write lost between another
//! instance's read and write of the store reappears with the next update.

use super::cache::SettingsCache;
use super::callbacks::{CallbackError, CallbackToken, DispatchHandle, SettingsChange};
use super::record::ChangeRecord;
use super::version::VersionClock;
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::metrics::{MetricsSnapshot, SyncMetrics};
use crate::settings::{SettingsDelta, SettingsSnapshot, SystemSettings, validate_delta};
use crate::store::SharedStore;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

/// Result of a successful `update_settings`
#[derive(Debug)]
pub struct UpdateOutcome {
    /// Fields merged into the new snapshot
    pub applied: Vec<String>,
    /// Unknown keys that were skipped
    pub ignored: Vec<String>,
    /// Version of the snapshot after the update
    pub version: u64,
    /// Local callback fan-out; may be dropped
    pub callbacks: DispatchHandle,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncStatus {
    pub instance_id: String,
    pub channel: String,
    pub version: u64,
    pub updated_at: Option<DateTime<Utc>>,
    pub updated_by: Option<String>,
    pub listening: bool,
    pub callbacks: usize,
    pub metrics: MetricsSnapshot,
}

pub struct ConfigSync {
    config: SyncConfig,
    store: Arc<dyn SharedStore>,
    cache: Arc<SettingsCache>,
    clock: VersionClock,
    update_lock: Mutex<()>,
    metrics: Arc<SyncMetrics>,
}

impl ConfigSync {
    /// Coordinator with an empty cache and no listener
    pub fn new(store: Arc<dyn SharedStore>, config: SyncConfig) -> Self {
        let metrics = Arc::new(SyncMetrics::new());
        let cache = Arc::new(SettingsCache::new(
            Arc::clone(&store),
            config.settings_key.clone(),
            config.instance_id.clone(),
            config.callback_concurrency,
            Arc::clone(&metrics),
        ));

        Self {
            config,
            store,
            cache,
            clock: VersionClock::new(),
            update_lock: Mutex::new(()),
            metrics,
        }
    }

    /// Load the authoritative snapshot and start listening for peer changes.
    ///
    /// An unreachable store during the initial load is tolerated: the cache
    /// serves defaults until a later refresh succeeds. Failing to subscribe is
    /// an error.
    pub async fn start(store: Arc<dyn SharedStore>, config: SyncConfig) -> SyncResult<Arc<Self>> {
        let sync = Arc::new(Self::new(store, config));
        // Failures are logged by the cache
        let _ = sync.cache.refresh().await;
        sync.cache
            .start(&sync.config.channel, sync.config.refresh_interval())
            .await?;

        info!(
            component = "config_sync",
            instance_id = %sync.config.instance_id,
            channel = %sync.config.channel,
            version = sync.cache.version(),
            "config sync started"
        );
        Ok(sync)
    }

    pub fn instance_id(&self) -> &str {
        &self.config.instance_id
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn metrics(&self) -> &Arc<SyncMetrics> {
        &self.metrics
    }

    pub fn cache(&self) -> &Arc<SettingsCache> {
        &self.cache
    }

    /// Current settings, served from the local cache
    pub fn get_settings(&self) -> SystemSettings {
        self.cache.settings()
    }

    pub fn snapshot(&self) -> Arc<SettingsSnapshot> {
        self.cache.get()
    }

    /// Apply a partial update, persist it and notify every instance.
    pub async fn update_settings(&self, delta: SettingsDelta) -> SyncResult<UpdateOutcome> {
        let _guard = self.update_lock.lock().await;

        let validated = validate_delta(&delta)?;
        for field in &validated.ignored {
            self.metrics.add_unknown_fields_ignored(1);
            warn!(component = "config_sync", field = %field, "ignoring unknown settings field");
        }

        if validated.is_empty() {
            return Ok(UpdateOutcome {
                applied: Vec::new(),
                ignored: validated.ignored,
                version: self.cache.version(),
                callbacks: DispatchHandle::empty(),
            });
        }

        // Fold into the stored snapshot rather than the local copy, so that
        // writes this cache has not seen yet survive
        let stored = self.cache.load_authoritative().await?;
        let base = match &stored {
            Some(stored) => stored.reconciled(&self.cache.get()),
            None => (*self.cache.get()).clone(),
        };

        let version = self.clock.next(base.version);
        let now = Utc::now();
        let draft = base.merged(&validated, version, &self.config.instance_id, now);
        draft
            .settings
            .validate_fields(|field| validated.fields.contains_key(field))?;

        // Forward the accepted fields only
        let changes: SettingsDelta = delta
            .into_iter()
            .filter(|(name, _)| validated.fields.contains_key(name.as_str()))
            .collect();
        let record = ChangeRecord::new(self.config.instance_id.clone(), changes, version);
        let payload = record.encode()?;
        let encoded = serde_json::to_vec(&draft)?;

        self.store
            .set(&self.config.settings_key, encoded)
            .await
            .map_err(SyncError::Store)?;

        if let Err(e) = self.store.publish(&self.config.channel, payload).await {
            self.metrics.add_publish_failures(1);
            warn!(
                component = "config_sync",
                version,
                error = %e,
                "publish failed, restoring previous snapshot"
            );
            self.rollback(stored.as_ref().unwrap_or(&base)).await;
            return Err(SyncError::Publish(e));
        }
        self.metrics.add_updates_published(1);

        let applied = validated.field_names();
        let callbacks = self
            .cache
            .apply_local(&draft)
            .unwrap_or_else(DispatchHandle::empty);

        info!(
            component = "config_sync",
            version,
            fields = ?applied,
            "settings update published"
        );

        Ok(UpdateOutcome {
            applied,
            ignored: validated.ignored,
            version,
            callbacks,
        })
    }

    async fn rollback(&self, previous: &SettingsSnapshot) {
        let restored = match serde_json::to_vec(previous) {
            Ok(bytes) => self
                .store
                .set(&self.config.settings_key, bytes)
                .await
                .map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };
        if let Err(e) = restored {
            self.metrics.add_rollback_failures(1);
            error!(
                component = "config_sync",
                version = previous.version,
                error = %e,
                "failed to restore previous settings snapshot"
            );
        }
    }

    /// Register a callback run for every newer snapshot installed locally
    pub fn add_callback<F>(&self, callback: F) -> CallbackToken
    where
        F: Fn(&SettingsChange) -> Result<(), CallbackError> + Send + Sync + 'static,
    {
        self.cache.callbacks().register(callback)
    }

    pub fn remove_callback(&self, token: CallbackToken) -> bool {
        self.cache.callbacks().unregister(token)
    }

    pub fn clear_callbacks(&self) {
        self.cache.callbacks().clear();
    }

    /// Reload the local cache from the shared store
    pub async fn refresh(&self) -> SyncResult<bool> {
        self.cache.refresh().await
    }

    /// Reload this instance from the shared store and ask every peer to do
    /// the same. The version is left unchanged.
    pub async fn force_sync(&self) -> SyncResult<()> {
        let _guard = self.update_lock.lock().await;

        self.cache.force_refresh().await?;
        let record = ChangeRecord::new(
            self.config.instance_id.clone(),
            SettingsDelta::new(),
            self.cache.version(),
        );
        self.store
            .publish(&self.config.channel, record.encode()?)
            .await
            .map_err(|e| {
                self.metrics.add_publish_failures(1);
                SyncError::Publish(e)
            })?;

        info!(
            component = "config_sync",
            version = record.version,
            "forced resync of all instances"
        );
        Ok(())
    }

    pub fn status(&self) -> SyncStatus {
        let snapshot = self.cache.get();
        SyncStatus {
            instance_id: self.config.instance_id.clone(),
            channel: self.config.channel.clone(),
            version: snapshot.version,
            updated_at: snapshot.updated_at,
            updated_by: snapshot.updated_by.clone(),
            listening: self.cache.is_running(),
            callbacks: self.cache.callbacks().len(),
            metrics: self.metrics.snapshot(),
        }
    }

    /// Stop listening for peer changes. Idempotent.
    pub fn stop(&self) {
        self.cache.stop();
    }
}

impl std::fmt::Debug for ConfigSync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigSync")
            .field("config", &self.config)
            .field("cache", &self.cache)
            .finish()
    }
}
