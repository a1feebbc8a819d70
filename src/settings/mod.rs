//! System settings: field schema, value model and delta validation

pub mod model;
pub mod schema;

pub use model::{
    FieldValue, SettingsDelta, SettingsSnapshot, SystemSettings, ValidatedDelta, parse_field,
    validate_delta,
};
pub use schema::{FieldKind, FieldSpec, SCHEMA, Sensitivity};
