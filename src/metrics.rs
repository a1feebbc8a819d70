//! Observability metrics for settings synchronization
//!
//! Tracks the update path (publishes, rollbacks), the cache refresh loop and
//! callback fan-out. Counters are lock-free so hot paths never contend on them;
//! [`SyncMetrics::snapshot`] produces a serializable copy for status endpoints.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Timing of the most recent field encryption or decryption
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OperationMetrics {
    /// Encryption operation time in microseconds (None if not performed)
    pub encryption_time_micros: Option<u64>,

    /// Whether hardware acceleration was available (AES-NI and friends)
    pub hardware_accelerated: bool,
}

impl OperationMetrics {
    /// Create new empty metrics
    pub fn new() -> Self {
        Self::default()
    }

    /// Set encryption metrics
    pub fn with_encryption(mut self, time_micros: u64, hw_accel: bool) -> Self {
        self.encryption_time_micros = Some(time_micros);
        self.hardware_accelerated = hw_accel;
        self
    }
}

/// Process-wide counters for one sync service
#[derive(Debug, Default)]
pub struct SyncMetrics {
    updates_published: AtomicU64,
    publish_failures: AtomicU64,
    rollback_failures: AtomicU64,
    unknown_fields_ignored: AtomicU64,
    refreshes: AtomicU64,
    refresh_failures: AtomicU64,
    notifications_received: AtomicU64,
    notifications_rejected: AtomicU64,
    callbacks_invoked: AtomicU64,
    callback_failures: AtomicU64,
}

/// Point-in-time copy of [`SyncMetrics`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub updates_published: u64,
    pub publish_failures: u64,
    pub rollback_failures: u64,
    pub unknown_fields_ignored: u64,
    pub refreshes: u64,
    pub refresh_failures: u64,
    pub notifications_received: u64,
    pub notifications_rejected: u64,
    pub callbacks_invoked: u64,
    pub callback_failures: u64,
}

macro_rules! counter {
    ($($field:ident => $incr:ident),* $(,)?) => {
        $(
            pub fn $incr(&self, n: u64) {
                self.$field.fetch_add(n, Ordering::Relaxed);
            }
        )*
    };
}

impl SyncMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    counter! {
        updates_published => add_updates_published,
        publish_failures => add_publish_failures,
        rollback_failures => add_rollback_failures,
        unknown_fields_ignored => add_unknown_fields_ignored,
        refreshes => add_refreshes,
        refresh_failures => add_refresh_failures,
        notifications_received => add_notifications_received,
        notifications_rejected => add_notifications_rejected,
        callbacks_invoked => add_callbacks_invoked,
        callback_failures => add_callback_failures,
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            updates_published: self.updates_published.load(Ordering::Relaxed),
            publish_failures: self.publish_failures.load(Ordering::Relaxed),
            rollback_failures: self.rollback_failures.load(Ordering::Relaxed),
            unknown_fields_ignored: self.unknown_fields_ignored.load(Ordering::Relaxed),
            refreshes: self.refreshes.load(Ordering::Relaxed),
            refresh_failures: self.refresh_failures.load(Ordering::Relaxed),
            notifications_received: self.notifications_received.load(Ordering::Relaxed),
            notifications_rejected: self.notifications_rejected.load(Ordering::Relaxed),
            callbacks_invoked: self.callbacks_invoked.load(Ordering::Relaxed),
            callback_failures: self.callback_failures.load(Ordering::Relaxed),
        }
    }
}
