//! Strictly monotonic version stamps
//!
//! Versions are microseconds since the Unix epoch, bumped past the previous
//! stamp when the clock has not advanced (or went backwards). Two updates in
//! the same clock tick therefore never share a version, while stamps from
//! different instances stay roughly ordered by wall-clock time.

use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct VersionClock {
    last: AtomicU64,
}

impl VersionClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next version, strictly greater than every version this clock returned
    /// before and than `floor`.
    pub fn next(&self, floor: u64) -> u64 {
        let now = now_micros();
        let previous = self
            .last
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| {
                Some(now.max(last.saturating_add(1)).max(floor.saturating_add(1)))
            })
            // The closure always returns Some
            .unwrap_or_else(|last| last);
        now.max(previous.saturating_add(1))
            .max(floor.saturating_add(1))
    }

    /// Last issued version (0 before the first call)
    pub fn last(&self) -> u64 {
        self.last.load(Ordering::Acquire)
    }
}

fn now_micros() -> u64 {
    u64::try_from(Utc::now().timestamp_micros()).unwrap_or(0)
}
