//! Cross-instance settings synchronization
//!
//! - [`ConfigSync`] owns the update path and the version clock
//! - [`SettingsCache`] serves the local snapshot and applies peer changes
//! - [`CallbackRegistry`] fans changes out to in-process listeners
//! - [`ChangeRecord`] is the message exchanged on the sync channel

pub mod cache;
pub mod callbacks;
pub mod coordinator;
pub mod record;
pub mod version;

pub use cache::SettingsCache;
pub use callbacks::{
    CallbackError, CallbackFailure, CallbackRegistry, CallbackToken, ChangeSource, DispatchHandle,
    DispatchReport, SettingsCallback, SettingsChange,
};
pub use coordinator::{ConfigSync, SyncStatus, UpdateOutcome};
pub use record::ChangeRecord;
pub use version::VersionClock;
