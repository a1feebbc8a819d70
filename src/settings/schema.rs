//! Declarative schema of the settings fields
//!
//! Every field the sync protocol accepts is listed here together with its value
//! kind and sensitivity. Validation, merging, masking for display and the
//! encryption obligation of the secure facade are all driven from [`SCHEMA`],
//! so adding a sensitive field is a one-line change that cannot skip encryption.

pub const APP_URL: &str = "app_url";
pub const REQUEST_LOG_RETENTION_DAYS: &str = "request_log_retention_days";
pub const REQUEST_LOG_WRITE_INTERVAL_MINUTES: &str = "request_log_write_interval_minutes";
pub const REQUEST_TIMEOUT: &str = "request_timeout";
pub const CONNECT_TIMEOUT: &str = "connect_timeout";
pub const MAX_RETRIES: &str = "max_retries";
pub const BLACKLIST_THRESHOLD: &str = "blacklist_threshold";
pub const PROXY_KEYS: &str = "proxy_keys";
pub const DATABASE_DSN: &str = "database_dsn";

/// Value kind of a settings field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Any string, including empty
    Text,
    /// String that must not be empty
    NonEmptyText,
    /// Non-negative integer
    Count,
    /// Non-negative integer number of seconds
    Seconds,
}

impl FieldKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldKind::Text => "string",
            FieldKind::NonEmptyText => "non-empty string",
            FieldKind::Count => "non-negative integer",
            FieldKind::Seconds => "non-negative number of seconds",
        }
    }

    pub fn is_text(&self) -> bool {
        matches!(self, FieldKind::Text | FieldKind::NonEmptyText)
    }
}

/// Whether a field may travel in plaintext
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sensitivity {
    Public,
    /// Plaintext at rest, but never written to logs
    Masked,
    /// Stored and transmitted only as an `encrypted:` envelope
    Secret,
}

/// One entry of the settings schema
#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
    pub sensitivity: Sensitivity,
    pub description: &'static str,
}

impl FieldSpec {
    pub fn is_sensitive(&self) -> bool {
        self.sensitivity == Sensitivity::Secret
    }

    /// Whether `Debug` output must hide the value
    pub fn is_redacted(&self) -> bool {
        self.sensitivity != Sensitivity::Public
    }
}

const fn spec(
    name: &'static str,
    kind: FieldKind,
    sensitivity: Sensitivity,
    description: &'static str,
) -> FieldSpec {
    FieldSpec {
        name,
        kind,
        sensitivity,
        description,
    }
}

pub static SCHEMA: &[FieldSpec] = &[
    spec(APP_URL, FieldKind::NonEmptyText, Sensitivity::Public, "Public base URL of the service"),
    spec(
        REQUEST_LOG_RETENTION_DAYS,
        FieldKind::Count,
        Sensitivity::Public,
        "Days to keep request logs",
    ),
    spec(
        REQUEST_LOG_WRITE_INTERVAL_MINUTES,
        FieldKind::Count,
        Sensitivity::Public,
        "Minutes between request log flushes",
    ),
    spec(REQUEST_TIMEOUT, FieldKind::Seconds, Sensitivity::Public, "Upstream request timeout"),
    spec(CONNECT_TIMEOUT, FieldKind::Seconds, Sensitivity::Public, "Upstream connect timeout"),
    spec(MAX_RETRIES, FieldKind::Count, Sensitivity::Public, "Retries per upstream request"),
    spec(
        BLACKLIST_THRESHOLD,
        FieldKind::Count,
        Sensitivity::Public,
        "Consecutive failures before a key is blacklisted",
    ),
    spec(PROXY_KEYS, FieldKind::Text, Sensitivity::Masked, "Comma separated proxy access keys"),
    spec(DATABASE_DSN, FieldKind::Text, Sensitivity::Secret, "Database connection string"),
];

/// Look up a field by name
pub fn field(name: &str) -> Option<&'static FieldSpec> {
    SCHEMA.iter().find(|spec| spec.name == name)
}

pub fn is_sensitive(name: &str) -> bool {
    field(name).is_some_and(FieldSpec::is_sensitive)
}

pub fn is_redacted(name: &str) -> bool {
    field(name).is_some_and(FieldSpec::is_redacted)
}

/// All fields that must be encrypted at rest
pub fn sensitive_fields() -> impl Iterator<Item = &'static FieldSpec> {
    SCHEMA.iter().filter(|spec| spec.is_sensitive())
}
