//! In-process settings cache
//!
//! Holds the current [`SettingsSnapshot`] behind a `RwLock<Arc<_>>`: readers
//! clone the `Arc` and never observe a half-installed snapshot, writers swap
//! the pointer. The cache is fail-open. A failed load leaves the last good
//! snapshot in place and is only reported through logs and [`SyncMetrics`].
//!
//! Once started, a single listener task applies change records received on the
//! sync channel and, if configured, reloads the snapshot on a fixed interval.

use super::callbacks::{CallbackRegistry, ChangeSource, DispatchHandle, SettingsChange};
use super::record::ChangeRecord;
use crate::error::{SyncError, SyncResult};
use crate::metrics::SyncMetrics;
use crate::settings::{SettingsSnapshot, SystemSettings, validate_delta};
use crate::store::{SharedStore, Subscription};
use parking_lot::{Mutex, RwLock};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

pub struct SettingsCache {
    store: Arc<dyn SharedStore>,
    settings_key: String,
    instance_id: String,
    snapshot: RwLock<Arc<SettingsSnapshot>>,
    callbacks: CallbackRegistry,
    metrics: Arc<SyncMetrics>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl SettingsCache {
    /// Cache serving default settings until the first successful load
    pub fn new(
        store: Arc<dyn SharedStore>,
        settings_key: impl Into<String>,
        instance_id: impl Into<String>,
        callback_concurrency: usize,
        metrics: Arc<SyncMetrics>,
    ) -> Self {
        Self {
            store,
            settings_key: settings_key.into(),
            instance_id: instance_id.into(),
            snapshot: RwLock::new(Arc::new(SettingsSnapshot::default())),
            callbacks: CallbackRegistry::new(callback_concurrency, Arc::clone(&metrics)),
            metrics,
            listener: Mutex::new(None),
        }
    }

    /// Current snapshot. Never blocks on I/O and never fails.
    pub fn get(&self) -> Arc<SettingsSnapshot> {
        Arc::clone(&self.snapshot.read())
    }

    pub fn settings(&self) -> SystemSettings {
        self.get().settings.clone()
    }

    pub fn version(&self) -> u64 {
        self.snapshot.read().version
    }

    pub fn callbacks(&self) -> &CallbackRegistry {
        &self.callbacks
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Reload from the shared store and fold it in field by field.
    ///
    /// A field is taken from the store when the store holds a later write of
    /// it than this cache. Returns whether a new snapshot was installed. On
    /// error the current snapshot keeps serving reads.
    pub async fn refresh(&self) -> SyncResult<bool> {
        self.reload(false).await
    }

    /// Reload from the shared store and install whatever it holds
    pub async fn force_refresh(&self) -> SyncResult<bool> {
        self.reload(true).await
    }

    async fn reload(&self, force: bool) -> SyncResult<bool> {
        self.metrics.add_refreshes(1);

        let loaded = match self.load_authoritative().await {
            Ok(loaded) => loaded,
            Err(e) => {
                self.metrics.add_refresh_failures(1);
                warn!(
                    component = "settings_cache",
                    error = %e,
                    version = self.version(),
                    "settings refresh failed, serving last known snapshot"
                );
                return Err(e);
            }
        };

        // Nothing has been written yet
        let Some(loaded) = loaded else {
            return Ok(false);
        };

        let installed = self
            .install_with(ChangeSource::Refresh, |current| {
                let next = if force {
                    loaded
                } else {
                    current.reconciled(&loaded)
                };
                (next != *current).then_some(next)
            })
            .is_some();

        if installed {
            info!(
                component = "settings_cache",
                version = self.version(),
                forced = force,
                "installed settings snapshot from shared store"
            );
        }
        Ok(installed)
    }

    /// Snapshot currently held by the shared store, if any
    pub(crate) async fn load_authoritative(&self) -> SyncResult<Option<SettingsSnapshot>> {
        let bytes = self
            .store
            .get(&self.settings_key)
            .await
            .map_err(SyncError::Store)?;
        match bytes {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Fold a snapshot this instance has just committed to the shared store
    /// into the cache and notify callbacks
    pub(crate) fn apply_local(&self, committed: &SettingsSnapshot) -> Option<DispatchHandle> {
        self.install_with(ChangeSource::LocalUpdate, |current| {
            let next = current.reconciled(committed);
            (next != *current).then_some(next)
        })
    }

    /// Handle one payload received on the sync channel
    pub(crate) async fn handle_notification(&self, payload: &[u8]) {
        self.metrics.add_notifications_received(1);

        let record = match ChangeRecord::decode(payload) {
            Ok(record) => record,
            Err(e) => {
                self.metrics.add_notifications_rejected(1);
                warn!(component = "settings_cache", error = %e, "discarding undecodable change record");
                return;
            }
        };

        if record.origin_instance_id == self.instance_id {
            debug!(
                component = "settings_cache",
                version = record.version,
                "ignoring own change record"
            );
            return;
        }

        if record.is_resync() {
            info!(
                component = "settings_cache",
                origin = %record.origin_instance_id,
                "resync requested by peer"
            );
            // Failures are already logged and counted
            let _ = self.force_refresh().await;
            return;
        }

        let delta = match validate_delta(&record.changed_fields) {
            Ok(delta) => delta,
            Err(e) => {
                // The store holds the authoritative value; take it from there
                self.metrics.add_notifications_rejected(1);
                warn!(
                    component = "settings_cache",
                    origin = %record.origin_instance_id,
                    error = %e,
                    "invalid change record, reloading from shared store"
                );
                let _ = self.refresh().await;
                return;
            }
        };

        let origin = record.origin_instance_id.clone();
        let source = ChangeSource::Notification {
            origin: origin.clone(),
        };
        let mut invalid = None;
        let applied = self
            .install_with(source, |current| {
                let merged =
                    current.merged_if_newer(&delta, record.version, &origin, record.timestamp)?;
                match merged.settings.validate() {
                    Ok(()) => Some(merged),
                    Err(e) => {
                        invalid = Some(e);
                        None
                    }
                }
            })
            .is_some();

        if applied {
            info!(
                component = "settings_cache",
                origin = %origin,
                version = record.version,
                fields = ?delta.field_names(),
                "applied change record from peer"
            );
        } else if let Some(e) = invalid {
            // The merge raced with another write; the store settles it
            self.metrics.add_notifications_rejected(1);
            warn!(
                component = "settings_cache",
                origin = %origin,
                version = record.version,
                error = %e,
                "change record leaves settings invalid, reloading from shared store"
            );
            let _ = self.refresh().await;
        } else {
            debug!(
                component = "settings_cache",
                origin = %origin,
                version = record.version,
                "ignoring stale change record"
            );
        }
    }

    /// Swap in the snapshot produced by `next`, if any, then fan out callbacks.
    ///
    /// `next` runs under the write lock so that concurrent installs serialize.
    fn install_with<F>(&self, source: ChangeSource, next: F) -> Option<DispatchHandle>
    where
        F: FnOnce(&SettingsSnapshot) -> Option<SettingsSnapshot>,
    {
        let (previous, current) = {
            let mut guard = self.snapshot.write();
            let current = Arc::new(next(&guard)?);
            let previous = std::mem::replace(&mut *guard, Arc::clone(&current));
            (previous, current)
        };

        let changed_fields = previous.settings.changed_fields(&current.settings);
        Some(self.callbacks.dispatch(SettingsChange {
            previous,
            current,
            changed_fields,
            source,
        }))
    }

    /// Spawn the listener task. Calling it again replaces the previous listener.
    pub async fn start(
        self: &Arc<Self>,
        channel: &str,
        refresh_interval: Option<Duration>,
    ) -> SyncResult<()> {
        let subscription = self
            .store
            .subscribe(channel)
            .await
            .map_err(SyncError::Store)?;

        let ticker = refresh_interval.filter(|d| !d.is_zero()).map(|period| {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });

        let handle = tokio::spawn(listen(Arc::downgrade(self), subscription, ticker));
        if let Some(old) = self.listener.lock().replace(handle) {
            old.abort();
        }

        info!(
            component = "settings_cache",
            channel,
            refresh_interval_secs = refresh_interval.map(|d| d.as_secs()),
            "settings cache listening"
        );
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.listener
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Stop the listener task. Safe to call any number of times.
    pub fn stop(&self) {
        if let Some(handle) = self.listener.lock().take() {
            handle.abort();
            info!(component = "settings_cache", "settings cache stopped");
        }
    }
}

impl Drop for SettingsCache {
    fn drop(&mut self) {
        if let Some(handle) = self.listener.get_mut().take() {
            handle.abort();
        }
    }
}

impl std::fmt::Debug for SettingsCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SettingsCache")
            .field("instance_id", &self.instance_id)
            .field("settings_key", &self.settings_key)
            .field("version", &self.version())
            .field("callbacks", &self.callbacks)
            .finish()
    }
}

async fn listen(cache: Weak<SettingsCache>, mut subscription: Subscription, mut ticker: Option<Interval>) {
    let mut subscribed = true;
    loop {
        tokio::select! {
            payload = subscription.recv(), if subscribed => {
                let Some(payload) = payload else {
                    warn!(component = "settings_cache", "sync channel closed, relying on periodic refresh");
                    subscribed = false;
                    if ticker.is_none() {
                        return;
                    }
                    continue;
                };
                let Some(cache) = cache.upgrade() else { return };
                cache.handle_notification(&payload).await;
            }
            _ = tick(&mut ticker) => {
                let Some(cache) = cache.upgrade() else { return };
                let _ = cache.refresh().await;
            }
        }
    }
}

async fn tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}
