//! Environment-level configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const INSTANCE_ID_ENV: &str = "SETTINGS_SYNC_INSTANCE_ID";
pub const CHANNEL_ENV: &str = "SETTINGS_SYNC_CHANNEL";
pub const REFRESH_SECS_ENV: &str = "SETTINGS_SYNC_REFRESH_SECS";
pub const CALLBACK_CONCURRENCY_ENV: &str = "SETTINGS_SYNC_CALLBACK_CONCURRENCY";
pub const ENCRYPTION_KEY_ENV: &str = "CONFIG_ENCRYPTION_KEY";

pub const DEFAULT_CHANNEL: &str = "config_updates";
pub const DEFAULT_SETTINGS_KEY: &str = "system_settings";
pub const DEFAULT_REFRESH_SECS: u64 = 60;
pub const DEFAULT_CALLBACK_CONCURRENCY: usize = 8;

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Identity stamped on published change records
    pub instance_id: String,
    /// Pub/sub channel carrying change records
    pub channel: String,
    /// Shared store key of the authoritative snapshot
    pub settings_key: String,
    /// Periodic refresh period in seconds, 0 disables it
    pub refresh_interval_secs: u64,
    pub callback_concurrency: usize,
    /// Operator secret for the field encryption key
    #[serde(skip_serializing)]
    pub encryption_secret: Option<String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            instance_id: uuid::Uuid::new_v4().to_string(),
            channel: DEFAULT_CHANNEL.to_string(),
            settings_key: DEFAULT_SETTINGS_KEY.to_string(),
            refresh_interval_secs: DEFAULT_REFRESH_SECS,
            callback_concurrency: DEFAULT_CALLBACK_CONCURRENCY,
            encryption_secret: None,
        }
    }
}

impl SyncConfig {
    /// Defaults overridden by the process environment.
    ///
    /// Empty variables count as unset; unparsable numbers keep the default.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(id) = get(INSTANCE_ID_ENV) {
            config.instance_id = id;
        }
        if let Some(channel) = get(CHANNEL_ENV) {
            config.channel = channel;
        }
        if let Some(secs) = get(REFRESH_SECS_ENV) {
            match secs.trim().parse() {
                Ok(secs) => config.refresh_interval_secs = secs,
                Err(_) => tracing::warn!(
                    component = "config_sync",
                    variable = REFRESH_SECS_ENV,
                    "ignoring non-numeric value"
                ),
            }
        }
        if let Some(n) = get(CALLBACK_CONCURRENCY_ENV) {
            match n.trim().parse::<usize>() {
                Ok(n) if n > 0 => config.callback_concurrency = n,
                _ => tracing::warn!(
                    component = "config_sync",
                    variable = CALLBACK_CONCURRENCY_ENV,
                    "ignoring invalid value"
                ),
            }
        }
        config.encryption_secret = get(ENCRYPTION_KEY_ENV);
        config
    }

    pub fn refresh_interval(&self) -> Option<Duration> {
        (self.refresh_interval_secs > 0).then(|| Duration::from_secs(self.refresh_interval_secs))
    }

    pub fn with_instance_id(mut self, instance_id: impl Into<String>) -> Self {
        self.instance_id = instance_id.into();
        self
    }

    pub fn with_refresh_interval(mut self, interval: Option<Duration>) -> Self {
        self.refresh_interval_secs = interval.map_or(0, |d| d.as_secs());
        self
    }
}

impl std::fmt::Debug for SyncConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncConfig")
            .field("instance_id", &self.instance_id)
            .field("channel", &self.channel)
            .field("settings_key", &self.settings_key)
            .field("refresh_interval_secs", &self.refresh_interval_secs)
            .field("callback_concurrency", &self.callback_concurrency)
            .field(
                "encryption_secret",
                &self.encryption_secret.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}
