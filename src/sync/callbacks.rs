//! Change callbacks with token-based registration and bounded fan-out
//!
//! Each dispatch runs every registered callback on the blocking pool, at most
//! `concurrency` at a time. Callbacks are independent: an error or a panic in
//! one is recorded in [`SyncMetrics`] and logged, and never stops the others.
//! Dispatch returns immediately; the [`DispatchHandle`] can be awaited for the
//! collected results or simply dropped.

use crate::metrics::SyncMetrics;
use crate::settings::SettingsSnapshot;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};

pub type CallbackError = Box<dyn std::error::Error + Send + Sync>;

pub type SettingsCallback =
    Arc<dyn Fn(&SettingsChange) -> Result<(), CallbackError> + Send + Sync>;

/// Handle returned by registration, used to unregister exactly one callback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallbackToken(u64);

/// What installed the new snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeSource {
    /// `update_settings` on this instance
    LocalUpdate,
    /// A change record published by another instance
    Notification { origin: String },
    /// A reload from the shared store
    Refresh,
}

/// Passed to every callback when a newer snapshot is installed
#[derive(Debug, Clone)]
pub struct SettingsChange {
    /// Snapshot in place before this change
    pub previous: Arc<SettingsSnapshot>,
    pub current: Arc<SettingsSnapshot>,
    pub changed_fields: Vec<String>,
    pub source: ChangeSource,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackFailure {
    pub token: Option<CallbackToken>,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub invoked: usize,
    pub failures: Vec<CallbackFailure>,
}

impl DispatchReport {
    pub fn succeeded(&self) -> usize {
        self.invoked.saturating_sub(self.failures.len())
    }
}

/// Completion of one fan-out
#[derive(Debug)]
pub struct DispatchHandle(Option<JoinHandle<DispatchReport>>);

impl DispatchHandle {
    pub(crate) fn empty() -> Self {
        Self(None)
    }

    /// Wait for every callback of this dispatch to finish
    pub async fn wait(self) -> DispatchReport {
        match self.0 {
            Some(handle) => handle.await.unwrap_or_else(|e| DispatchReport {
                invoked: 0,
                failures: vec![CallbackFailure {
                    token: None,
                    message: format!("dispatch task failed: {}", e),
                }],
            }),
            None => DispatchReport::default(),
        }
    }
}

pub struct CallbackRegistry {
    next_token: AtomicU64,
    // Ordered by token, i.e. by registration order
    callbacks: RwLock<BTreeMap<CallbackToken, SettingsCallback>>,
    permits: Arc<Semaphore>,
    metrics: Arc<SyncMetrics>,
}

impl CallbackRegistry {
    pub fn new(concurrency: usize, metrics: Arc<SyncMetrics>) -> Self {
        Self {
            next_token: AtomicU64::new(1),
            callbacks: RwLock::new(BTreeMap::new()),
            permits: Arc::new(Semaphore::new(concurrency.max(1))),
            metrics,
        }
    }

    pub fn register<F>(&self, callback: F) -> CallbackToken
    where
        F: Fn(&SettingsChange) -> Result<(), CallbackError> + Send + Sync + 'static,
    {
        let token = CallbackToken(self.next_token.fetch_add(1, Ordering::Relaxed));
        self.callbacks.write().insert(token, Arc::new(callback));
        token
    }

    /// Remove one callback. Returns false if the token is unknown.
    pub fn unregister(&self, token: CallbackToken) -> bool {
        self.callbacks.write().remove(&token).is_some()
    }

    pub fn clear(&self) {
        self.callbacks.write().clear();
    }

    pub fn len(&self) -> usize {
        self.callbacks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.read().is_empty()
    }

    /// Start every registered callback for `change` without waiting for them.
    ///
    /// Must be called from within a tokio runtime; outside one the change is
    /// dropped with a warning.
    pub fn dispatch(&self, change: SettingsChange) -> DispatchHandle {
        let callbacks: Vec<(CallbackToken, SettingsCallback)> = self
            .callbacks
            .read()
            .iter()
            .map(|(token, cb)| (*token, Arc::clone(cb)))
            .collect();

        if callbacks.is_empty() {
            return DispatchHandle::empty();
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(
                component = "settings_cache",
                "no async runtime available, skipping settings callbacks"
            );
            return DispatchHandle::empty();
        };

        let change = Arc::new(change);
        let permits = Arc::clone(&self.permits);
        let metrics = Arc::clone(&self.metrics);

        let supervisor = runtime.spawn(async move {
            let mut tasks = JoinSet::new();
            for (token, callback) in callbacks {
                let permits = Arc::clone(&permits);
                let change = Arc::clone(&change);
                tasks.spawn(async move {
                    // The semaphore is never closed
                    let _permit = permits.acquire_owned().await.ok();
                    let outcome = tokio::task::spawn_blocking(move || callback(&change)).await;
                    (token, outcome)
                });
            }

            let mut report = DispatchReport::default();
            while let Some(joined) = tasks.join_next().await {
                report.invoked += 1;
                let failure = match joined {
                    Ok((_, Ok(Ok(())))) => None,
                    Ok((token, Ok(Err(e)))) => Some(CallbackFailure {
                        token: Some(token),
                        message: e.to_string(),
                    }),
                    Ok((token, Err(e))) => Some(CallbackFailure {
                        token: Some(token),
                        message: format!("callback panicked: {}", e),
                    }),
                    Err(e) => Some(CallbackFailure {
                        token: None,
                        message: format!("callback task failed: {}", e),
                    }),
                };
                if let Some(failure) = failure {
                    tracing::warn!(
                        component = "settings_cache",
                        token = ?failure.token,
                        error = %failure.message,
                        "settings callback failed"
                    );
                    report.failures.push(failure);
                }
            }

            metrics.add_callbacks_invoked(report.invoked as u64);
            metrics.add_callback_failures(report.failures.len() as u64);
            report
        });

        DispatchHandle(Some(supervisor))
    }
}

impl std::fmt::Debug for CallbackRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackRegistry")
            .field("registered", &self.len())
            .field("available_permits", &self.permits.available_permits())
            .finish()
    }
}
