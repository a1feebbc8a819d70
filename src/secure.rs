//! Secure settings facade
//!
//! Sensitive fields (see [`schema::sensitive_fields`]) are encrypted before
//! they reach the sync coordinator and decrypted only when a caller asks for
//! them. The shared store and the sync channel only ever carry the
//! `encrypted:` envelope.

use crate::encryption::{EncryptionError, FieldCipher, is_encrypted};
use crate::error::{SyncError, SyncResult, ValidationError};
use crate::settings::{SettingsDelta, schema};
use crate::sync::{ConfigSync, UpdateOutcome};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};

/// Decrypted database connection settings
#[derive(Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub dsn: String,
}

impl std::fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("dsn", &"<redacted>")
            .finish()
    }
}

/// Non-fatal findings of [`SecureSettings::validate_secure_config`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConfigWarning {
    /// The well-known fallback key is in use
    DefaultEncryptionKey,
    /// A sensitive field is stored without the ciphertext envelope
    PlaintextSecret { field: &'static str },
}

pub struct SecureSettings {
    cipher: Arc<FieldCipher>,
    sync: Arc<ConfigSync>,
}

impl SecureSettings {
    pub fn new(cipher: Arc<FieldCipher>, sync: Arc<ConfigSync>) -> Self {
        Self { cipher, sync }
    }

    /// Facade keyed by the secret in the coordinator's [`SyncConfig`](crate::SyncConfig)
    pub fn from_config(sync: Arc<ConfigSync>) -> SyncResult<Self> {
        let cipher = FieldCipher::from_secret(sync.config().encryption_secret.as_deref())?;
        info!(
            component = "secure_config",
            key_fingerprint = %cipher.key_fingerprint(),
            "secure settings ready"
        );
        Ok(Self::new(Arc::new(cipher), sync))
    }

    pub fn cipher(&self) -> &FieldCipher {
        &self.cipher
    }

    pub fn sync(&self) -> &Arc<ConfigSync> {
        &self.sync
    }

    /// Seal a DSN for storage. Empty and already sealed values pass through.
    pub fn encrypt_database_config(&self, dsn: &str) -> SyncResult<String> {
        Ok(self.cipher.encrypt(dsn)?)
    }

    /// Open a stored DSN. Values without the envelope are returned as is.
    pub fn decrypt_database_config(&self, stored: &str) -> SyncResult<String> {
        self.decrypt_field(schema::DATABASE_DSN, stored)
    }

    /// Decrypted database settings from the current snapshot.
    ///
    /// Fails with [`SyncError::Decryption`] rather than handing out a garbled
    /// DSN when the stored value cannot be opened.
    pub fn get_secure_database_config(&self) -> SyncResult<DatabaseConfig> {
        let dsn = self.reveal(schema::DATABASE_DSN)?;
        Ok(DatabaseConfig { dsn })
    }

    /// Encrypt `dsn` and push it through the sync coordinator
    pub async fn update_database_config(&self, dsn: &str) -> SyncResult<UpdateOutcome> {
        let sealed = self.encrypt_database_config(dsn)?;
        let mut delta = SettingsDelta::new();
        delta.insert(schema::DATABASE_DSN.to_string(), Value::String(sealed));

        let outcome = self.sync.update_settings(delta).await?;
        info!(
            component = "secure_config",
            version = outcome.version,
            "database configuration updated and published"
        );
        Ok(outcome)
    }

    /// Decrypted value of a sensitive field in the current snapshot
    pub fn reveal(&self, field: &str) -> SyncResult<String> {
        let spec = schema::field(field)
            .filter(|spec| spec.is_sensitive())
            .ok_or_else(|| ValidationError::invalid_field(field, "not a sensitive field"))?;

        let snapshot = self.sync.snapshot();
        let stored = snapshot.settings.text(spec.name).unwrap_or_default();
        self.decrypt_field(spec.name, stored)
    }

    /// Encrypt every sensitive string value in `delta`
    pub fn encrypt_delta(&self, mut delta: SettingsDelta) -> SyncResult<SettingsDelta> {
        for spec in schema::sensitive_fields() {
            if let Some(Value::String(value)) = delta.get_mut(spec.name) {
                *value = self.cipher.encrypt(value)?;
            }
        }
        Ok(delta)
    }

    /// `update_settings` with sensitive fields encrypted first
    pub async fn update_secure(&self, delta: SettingsDelta) -> SyncResult<UpdateOutcome> {
        let delta = self.encrypt_delta(delta)?;
        self.sync.update_settings(delta).await
    }

    /// Check the configuration as a whole.
    ///
    /// Hard failures: invalid base settings, an undecryptable secret, or an
    /// empty database DSN. Default key usage and plaintext secrets are
    /// returned as warnings and logged.
    pub fn validate_secure_config(&self) -> SyncResult<Vec<ConfigWarning>> {
        let settings = self.sync.get_settings();
        settings.validate()?;

        let mut warnings = Vec::new();
        if self.cipher.uses_default_key() {
            warn!(
                component = "secure_config",
                "default encryption key in use, set CONFIG_ENCRYPTION_KEY in production"
            );
            warnings.push(ConfigWarning::DefaultEncryptionKey);
        }

        for spec in schema::sensitive_fields() {
            let stored = settings.text(spec.name).unwrap_or_default();
            if !stored.is_empty() && !is_encrypted(stored) {
                warn!(
                    component = "secure_config",
                    field = spec.name,
                    "sensitive field stored without encryption"
                );
                warnings.push(ConfigWarning::PlaintextSecret { field: spec.name });
            }
        }

        let database = self.get_secure_database_config()?;
        if database.dsn.is_empty() {
            return Err(SyncError::MissingSecret(schema::DATABASE_DSN));
        }

        Ok(warnings)
    }

    /// Key rotation is not supported; always fails
    pub fn rotate_encryption_key(&self, new_secret: &str) -> SyncResult<()> {
        match self.cipher.rotate_key(new_secret) {
            Err(EncryptionError::NotImplemented(reason)) => {
                warn!(component = "secure_config", "encryption key rotation requested");
                Err(SyncError::NotImplemented(reason))
            }
            other => Ok(other?),
        }
    }

    fn decrypt_field(&self, field: &'static str, stored: &str) -> SyncResult<String> {
        self.cipher
            .decrypt(stored)
            .map_err(|source| SyncError::Decryption { field, source })
    }
}

impl std::fmt::Debug for SecureSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureSettings")
            .field("cipher", &self.cipher)
            .field("instance_id", &self.sync.instance_id())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncConfig;
    use crate::store::MemoryStore;
    use serde_json::json;

    const DSN: &str = "postgres://u:p@host/db";

    fn secure(secret: Option<&str>) -> SecureSettings {
        let config = SyncConfig {
            encryption_secret: secret.map(str::to_string),
            ..SyncConfig::default().with_refresh_interval(None)
        };
        let sync = Arc::new(ConfigSync::new(Arc::new(MemoryStore::new()), config));
        SecureSettings::from_config(sync).unwrap()
    }

    #[tokio::test]
    async fn test_database_dsn_end_to_end() {
        let secure = secure(Some("operator-secret"));
        secure.update_database_config(DSN).await.unwrap();

        let stored = secure.sync().get_settings().database_dsn;
        assert!(stored.starts_with("encrypted:"));
        assert_eq!(secure.get_secure_database_config().unwrap().dsn, DSN);
    }

    #[tokio::test]
    async fn test_plaintext_secret_rejected_by_coordinator() {
        let secure = secure(Some("operator-secret"));
        let mut delta = SettingsDelta::new();
        delta.insert("database_dsn".into(), json!(DSN));

        let err = secure.sync().update_settings(delta.clone()).await.unwrap_err();
        assert!(matches!(
            err,
            SyncError::Validation(ValidationError::PlaintextSecret(_))
        ));

        // Same delta through the facade is sealed first
        secure.update_secure(delta).await.unwrap();
        assert_eq!(secure.reveal("database_dsn").unwrap(), DSN);
    }

    #[test]
    fn test_reveal_rejects_public_fields() {
        let secure = secure(None);
        assert!(matches!(
            secure.reveal("app_url"),
            Err(SyncError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_validate_secure_config() {
        let secure = secure(None);
        assert!(matches!(
            secure.validate_secure_config(),
            Err(SyncError::MissingSecret("database_dsn"))
        ));

        secure.update_database_config(DSN).await.unwrap();
        let warnings = secure.validate_secure_config().unwrap();
        assert_eq!(warnings, vec![ConfigWarning::DefaultEncryptionKey]);
    }

    #[test]
    fn test_rotation_not_implemented() {
        let secure = secure(Some("k"));
        assert!(matches!(
            secure.rotate_encryption_key("k2"),
            Err(SyncError::NotImplemented(_))
        ));
    }

    #[test]
    fn test_database_config_debug_redacted() {
        let config = DatabaseConfig { dsn: DSN.into() };
        assert!(!format!("{:?}", config).contains("u:p@host"));
    }
}
