//! The system settings record, its versioned snapshot, and delta merging

use super::schema::{self, FieldKind, FieldSpec};
use crate::error::ValidationError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

/// A partial update: field name to new value
pub type SettingsDelta = BTreeMap<String, Value>;

const REDACTED: &str = "<redacted>";

/// The cluster-wide settings record
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemSettings {
    pub app_url: String,
    pub request_log_retention_days: u64,
    pub request_log_write_interval_minutes: u64,
    /// Seconds
    pub request_timeout: u64,
    /// Seconds
    pub connect_timeout: u64,
    pub max_retries: u64,
    pub blacklist_threshold: u64,
    pub proxy_keys: String,
    /// Ciphertext envelope (or legacy plaintext)
    pub database_dsn: String,
}

impl Default for SystemSettings {
    fn default() -> Self {
        Self {
            app_url: "http://localhost:3001".to_string(),
            request_log_retention_days: 7,
            request_log_write_interval_minutes: 1,
            request_timeout: 600,
            connect_timeout: 15,
            max_retries: 3,
            blacklist_threshold: 3,
            proxy_keys: String::new(),
            database_dsn: String::new(),
        }
    }
}

/// Parsed, type-checked value of one field
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Text(String),
    Number(u64),
}

impl SystemSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout)
    }

    /// Current value of a text field, by schema name
    pub fn text(&self, name: &str) -> Option<&str> {
        match name {
            schema::APP_URL => Some(&self.app_url),
            schema::PROXY_KEYS => Some(&self.proxy_keys),
            schema::DATABASE_DSN => Some(&self.database_dsn),
            _ => None,
        }
    }

    /// Current value of a numeric field, by schema name
    pub fn number(&self, name: &str) -> Option<u64> {
        match name {
            schema::REQUEST_LOG_RETENTION_DAYS => Some(self.request_log_retention_days),
            schema::REQUEST_LOG_WRITE_INTERVAL_MINUTES => {
                Some(self.request_log_write_interval_minutes)
            }
            schema::REQUEST_TIMEOUT => Some(self.request_timeout),
            schema::CONNECT_TIMEOUT => Some(self.connect_timeout),
            schema::MAX_RETRIES => Some(self.max_retries),
            schema::BLACKLIST_THRESHOLD => Some(self.blacklist_threshold),
            _ => None,
        }
    }

    /// Current value of any field, by schema name
    pub fn value(&self, name: &str) -> Option<FieldValue> {
        self.text(name)
            .map(|text| FieldValue::Text(text.to_string()))
            .or_else(|| self.number(name).map(FieldValue::Number))
    }

    /// Names of the schema fields whose value differs from `other`
    pub fn changed_fields(&self, other: &SystemSettings) -> Vec<String> {
        schema::SCHEMA
            .iter()
            .filter(|spec| {
                self.text(spec.name) != other.text(spec.name)
                    || self.number(spec.name) != other.number(spec.name)
            })
            .map(|spec| spec.name.to_string())
            .collect()
    }

    fn number_mut(&mut self, name: &str) -> Option<&mut u64> {
        match name {
            schema::REQUEST_LOG_RETENTION_DAYS => Some(&mut self.request_log_retention_days),
            schema::REQUEST_LOG_WRITE_INTERVAL_MINUTES => {
                Some(&mut self.request_log_write_interval_minutes)
            }
            schema::REQUEST_TIMEOUT => Some(&mut self.request_timeout),
            schema::CONNECT_TIMEOUT => Some(&mut self.connect_timeout),
            schema::MAX_RETRIES => Some(&mut self.max_retries),
            schema::BLACKLIST_THRESHOLD => Some(&mut self.blacklist_threshold),
            _ => None,
        }
    }

    fn text_mut(&mut self, name: &str) -> Option<&mut String> {
        match name {
            schema::APP_URL => Some(&mut self.app_url),
            schema::PROXY_KEYS => Some(&mut self.proxy_keys),
            schema::DATABASE_DSN => Some(&mut self.database_dsn),
            _ => None,
        }
    }

    /// Write a validated value into the named field. Returns false if the
    /// field does not exist or has another kind.
    pub fn set(&mut self, name: &str, value: &FieldValue) -> bool {
        match value {
            FieldValue::Text(text) => match self.text_mut(name) {
                Some(slot) => {
                    slot.clone_from(text);
                    true
                }
                None => false,
            },
            FieldValue::Number(n) => match self.number_mut(name) {
                Some(slot) => {
                    *slot = *n;
                    true
                }
                None => false,
            },
        }
    }

    /// Check the record as a whole
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.validate_fields(|_| true)
    }

    /// Check only the rules that involve at least one field selected by
    /// `touches`. A violation among untouched fields is left alone.
    pub fn validate_fields<F>(&self, touches: F) -> Result<(), ValidationError>
    where
        F: Fn(&str) -> bool,
    {
        let involves = |fields: &[&str]| fields.iter().any(|&field| touches(field));

        if involves(&[schema::APP_URL]) {
            if self.app_url.is_empty() {
                return Err(ValidationError::invalid_field(schema::APP_URL, "must not be empty"));
            }
            if !(self.app_url.starts_with("http://") || self.app_url.starts_with("https://")) {
                return Err(ValidationError::invalid_field(
                    schema::APP_URL,
                    "must start with http:// or https://",
                ));
            }
        }
        if involves(&[schema::REQUEST_TIMEOUT]) && self.request_timeout == 0 {
            return Err(ValidationError::invalid_field(
                schema::REQUEST_TIMEOUT,
                "must be at least one second",
            ));
        }
        if involves(&[schema::CONNECT_TIMEOUT]) && self.connect_timeout == 0 {
            return Err(ValidationError::invalid_field(
                schema::CONNECT_TIMEOUT,
                "must be at least one second",
            ));
        }
        if involves(&[schema::CONNECT_TIMEOUT, schema::REQUEST_TIMEOUT])
            && self.connect_timeout > self.request_timeout
        {
            return Err(ValidationError::InvalidSettings(format!(
                "connect_timeout ({}s) exceeds request_timeout ({}s)",
                self.connect_timeout, self.request_timeout
            )));
        }
        Ok(())
    }

    /// JSON view with every sensitive field removed
    pub fn to_public_json(&self) -> Result<Value, serde_json::Error> {
        let mut value = serde_json::to_value(self)?;
        if let Value::Object(map) = &mut value {
            for spec in schema::sensitive_fields() {
                map.remove(spec.name);
            }
        }
        Ok(value)
    }
}

fn redact(value: &str) -> &str {
    if value.is_empty() { "" } else { REDACTED }
}

impl std::fmt::Debug for SystemSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut out = f.debug_struct("SystemSettings");
        for spec in schema::SCHEMA {
            if spec.is_redacted() {
                out.field(spec.name, &self.text(spec.name).map_or(REDACTED, redact));
            } else if let Some(text) = self.text(spec.name) {
                out.field(spec.name, &text);
            } else if let Some(n) = self.number(spec.name) {
                out.field(spec.name, &n);
            }
        }
        out.finish()
    }
}

/// Type-check a single incoming value against its schema entry
pub fn parse_field(spec: &FieldSpec, value: &Value) -> Result<FieldValue, ValidationError> {
    match spec.kind {
        FieldKind::Text | FieldKind::NonEmptyText => {
            let Some(text) = value.as_str() else {
                return Err(ValidationError::invalid_field(
                    spec.name,
                    format!("expected {}", spec.kind.as_str()),
                ));
            };
            if spec.kind == FieldKind::NonEmptyText && text.is_empty() {
                return Err(ValidationError::invalid_field(spec.name, "must not be empty"));
            }
            if spec.is_sensitive() && !text.is_empty() && !is_envelope(text) {
                return Err(ValidationError::PlaintextSecret(spec.name.to_string()));
            }
            Ok(FieldValue::Text(text.to_string()))
        }
        FieldKind::Count | FieldKind::Seconds => parse_non_negative(value)
            .map(FieldValue::Number)
            .ok_or_else(|| {
                ValidationError::invalid_field(spec.name, format!("expected {}", spec.kind.as_str()))
            }),
    }
}

// JSON numbers arrive as u64, i64 or f64 depending on the producer
fn parse_non_negative(value: &Value) -> Option<u64> {
    if let Some(n) = value.as_u64() {
        return Some(n);
    }
    let f = value.as_f64()?;
    (f >= 0.0 && f.fract() == 0.0 && f <= u64::MAX as f64).then_some(f as u64)
}

fn is_envelope(value: &str) -> bool {
    value.starts_with(crate::ENCRYPTED_PREFIX)
}

/// Result of validating a delta: accepted fields and ignored unknown keys
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidatedDelta {
    pub fields: BTreeMap<&'static str, FieldValue>,
    pub ignored: Vec<String>,
}

impl ValidatedDelta {
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn field_names(&self) -> Vec<String> {
        self.fields.keys().map(|k| k.to_string()).collect()
    }
}

/// Validate every known field of a delta.
///
/// A malformed known field rejects the whole delta. Unknown keys never do;
/// they are collected in [`ValidatedDelta::ignored`].
pub fn validate_delta(delta: &SettingsDelta) -> Result<ValidatedDelta, ValidationError> {
    let mut validated = ValidatedDelta::default();
    for (name, value) in delta {
        match schema::field(name) {
            Some(spec) => {
                let parsed = parse_field(spec, value)?;
                validated.fields.insert(spec.name, parsed);
            }
            None => validated.ignored.push(name.clone()),
        }
    }
    Ok(validated)
}

/// Versioned settings as held by caches and the shared store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingsSnapshot {
    pub settings: SystemSettings,
    /// Version of the last write folded into this snapshot (0 = never written)
    pub version: u64,
    /// Version of the write that produced each field
    #[serde(default)]
    pub field_versions: BTreeMap<String, u64>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_by: Option<String>,
}

impl Default for SettingsSnapshot {
    fn default() -> Self {
        Self::initial(SystemSettings::default())
    }
}

impl SettingsSnapshot {
    pub fn initial(settings: SystemSettings) -> Self {
        Self {
            settings,
            version: 0,
            field_versions: BTreeMap::new(),
            updated_at: None,
            updated_by: None,
        }
    }

    /// Version of the write that last set `field` (0 if never written)
    pub fn field_version(&self, field: &str) -> u64 {
        self.field_versions.get(field).copied().unwrap_or(0)
    }

    /// Field-scoped union of two snapshots.
    ///
    /// Every field is taken from the side that wrote it last. On a tie the
    /// snapshot with the higher version wins (`self` if both are equal), so a
    /// snapshot stored without per-field versions still takes over fields
    /// nobody has written since.
    pub fn reconciled(&self, other: &SettingsSnapshot) -> Self {
        let (leader, trailing) = if other.version > self.version {
            (other, self)
        } else {
            (self, other)
        };

        let mut merged = leader.clone();
        for spec in schema::SCHEMA {
            let written = trailing.field_version(spec.name);
            if written <= merged.field_version(spec.name) {
                continue;
            }
            if let Some(value) = trailing.settings.value(spec.name) {
                merged.settings.set(spec.name, &value);
                merged.field_versions.insert(spec.name.to_string(), written);
            }
        }
        merged
    }

    /// Draft with every field of `delta` applied and stamped with `version`
    pub fn merged(
        &self,
        delta: &ValidatedDelta,
        version: u64,
        origin: &str,
        at: DateTime<Utc>,
    ) -> Self {
        let mut draft = self.clone();
        for (name, value) in &delta.fields {
            if draft.settings.set(name, value) {
                draft.field_versions.insert(name.to_string(), version);
            }
        }
        draft.version = draft.version.max(version);
        draft.updated_at = Some(at);
        draft.updated_by = Some(origin.to_string());
        draft
    }

    /// Apply fields that are newer than what this snapshot holds.
    ///
    /// Field-scoped last-write-wins: a field is taken only when `version`
    /// exceeds that field's recorded version. Returns `None` when nothing changed.
    pub fn merged_if_newer(
        &self,
        delta: &ValidatedDelta,
        version: u64,
        origin: &str,
        at: DateTime<Utc>,
    ) -> Option<Self> {
        let newer = ValidatedDelta {
            fields: delta
                .fields
                .iter()
                .filter(|(name, _)| version > self.field_version(name))
                .map(|(name, value)| (*name, value.clone()))
                .collect(),
            ignored: Vec::new(),
        };
        if newer.is_empty() {
            return None;
        }
        Some(self.merged(&newer, version, origin, at))
    }
}
