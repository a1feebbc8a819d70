//! Error taxonomy for settings synchronization

use crate::store::StoreError;
use thiserror::Error;

#[cfg(feature = "encryption")]
use crate::encryption::EncryptionError;

/// A settings update or settings value failed validation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("invalid value for '{field}': {reason}")]
    InvalidField { field: String, reason: String },

    /// A sensitive field was submitted without the `encrypted:` envelope
    #[error("sensitive field '{0}' must be submitted encrypted")]
    PlaintextSecret(String),

    #[error("invalid settings: {0}")]
    InvalidSettings(String),
}

impl ValidationError {
    pub fn invalid_field(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Errors surfaced by the sync coordinator and the secure facade
#[derive(Error, Debug)]
pub enum SyncError {
    /// Update rejected before merge
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Publishing the change failed; the authoritative value is unchanged
    #[error("publish failed: {0}")]
    Publish(#[source] StoreError),

    #[error("shared store error: {0}")]
    Store(#[source] StoreError),

    #[cfg(feature = "encryption")]
    #[error("encryption failed: {0}")]
    Encryption(#[from] EncryptionError),

    /// A stored secret could not be decrypted
    #[cfg(feature = "encryption")]
    #[error("failed to decrypt '{field}': {source}")]
    Decryption {
        field: &'static str,
        #[source]
        source: EncryptionError,
    },

    /// A sensitive field is empty after decryption
    #[error("'{0}' must not be empty")]
    MissingSecret(&'static str),

    #[error("not implemented: {0}")]
    NotImplemented(String),
}

pub type SyncResult<T> = Result<T, SyncError>;
