//! Change notification published on the sync channel

use crate::settings::{SettingsDelta, schema};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One published settings change. Immutable once published.
///
/// An empty `changes` map is a resync request: receivers reload the whole
/// snapshot from the shared store.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "instance_id")]
    pub origin_instance_id: String,
    #[serde(rename = "changes")]
    pub changed_fields: SettingsDelta,
    pub version: u64,
}

impl ChangeRecord {
    pub fn new(origin: impl Into<String>, changed_fields: SettingsDelta, version: u64) -> Self {
        Self {
            timestamp: Utc::now(),
            origin_instance_id: origin.into(),
            changed_fields,
            version,
        }
    }

    pub fn is_resync(&self) -> bool {
        self.changed_fields.is_empty()
    }

    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn decode(payload: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(payload)
    }
}

static HIDDEN: Value = Value::Null;

impl std::fmt::Debug for ChangeRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let changes: Vec<(&str, &Value)> = self
            .changed_fields
            .iter()
            .map(|(name, value)| {
                let shown = if schema::is_redacted(name) {
                    &HIDDEN
                } else {
                    value
                };
                (name.as_str(), shown)
            })
            .collect();

        f.debug_struct("ChangeRecord")
            .field("timestamp", &self.timestamp)
            .field("origin_instance_id", &self.origin_instance_id)
            .field("changed_fields", &changes)
            .field("version", &self.version)
            .finish()
    }
}
