//! # settings-sync
//!
//! Versioned system settings kept consistent across service instances, with
//! AES-256-GCM encryption of sensitive fields.
//!
//! Every instance serves reads from a local snapshot. Updates go through
//! [`ConfigSync`], which stamps a strictly increasing version, writes the
//! snapshot to a [`SharedStore`] and publishes a [`ChangeRecord`] that peers
//! fold into their own cache.
//!
//! ## Features
//!
//! | Feature | Description | Default |
//! |:--------|:------------|:-------:|
//! | `encryption` | AES-256-GCM field cipher and [`SecureSettings`] | Yes |
//! | `http` | axum routes for reading and updating settings | No |
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use settings_sync::{ConfigSync, MemoryStore, SettingsDelta, SyncConfig};
//! use std::sync::Arc;
//!
//! # async fn run() -> settings_sync::SyncResult<()> {
//! let store = Arc::new(MemoryStore::new());
//! let sync = ConfigSync::start(store, SyncConfig::from_env()).await?;
//!
//! let token = sync.add_callback(|change| {
//!     println!("settings now at version {}", change.current.version);
//!     Ok(())
//! });
//!
//! let mut delta = SettingsDelta::new();
//! delta.insert("request_timeout".into(), 30.into());
//! sync.update_settings(delta).await?;
//! assert_eq!(sync.get_settings().request_timeout, 30);
//!
//! sync.remove_callback(token);
//! sync.stop();
//! # Ok(())
//! # }
//! ```
//!
//! ## With Encryption
//!
//! ```rust,ignore
//! use settings_sync::SecureSettings;
//!
//! let secure = SecureSettings::from_config(sync)?;
//! secure.update_database_config("postgres://u:p@host/db").await?;
//! let db = secure.get_secure_database_config()?;
//! ```
//!
//! ## Security Properties
//!
//! - **AES-256-GCM**: authenticated encryption via `ring`, fresh random nonce per value
//! - **Envelope**: `encrypted:` + base64(nonce ‖ ciphertext ‖ tag); unprefixed values are legacy plaintext
//! - **Schema-driven secrets**: sensitive fields must arrive encrypted and are redacted from `Debug` output
//! - **Memory safety**: `zeroize` on drop for key material

/// Marker prefix of an encrypted field value
pub const ENCRYPTED_PREFIX: &str = "encrypted:";

pub mod config;
pub mod error;
pub mod metrics;
pub mod settings;
pub mod store;
pub mod sync;

pub use config::SyncConfig;
pub use error::{SyncError, SyncResult, ValidationError};
pub use metrics::{MetricsSnapshot, OperationMetrics, SyncMetrics};
pub use settings::{SettingsDelta, SettingsSnapshot, SystemSettings};
pub use store::{MemoryStore, SharedStore, StoreError};
pub use sync::{
    CallbackToken, ChangeRecord, ChangeSource, ConfigSync, DispatchReport, SettingsChange,
    SyncStatus, UpdateOutcome,
};

// Field encryption (feature-gated)
#[cfg(feature = "encryption")]
pub mod encryption;
#[cfg(feature = "encryption")]
pub mod secure;
#[cfg(feature = "encryption")]
pub use encryption::{EncryptionError, EncryptionKey, FieldCipher};
#[cfg(feature = "encryption")]
pub use secure::{ConfigWarning, DatabaseConfig, SecureSettings};

// HTTP boundary (feature-gated)
#[cfg(feature = "http")]
pub mod http;
