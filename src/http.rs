//! REST boundary for settings management
//!
//! | Method | Path | |
//! |:--|:--|:--|
//! | GET | `/config` | current settings, secrets masked |
//! | PUT | `/config` | partial update (field → value) |
//! | PUT | `/config/database` | replace the database DSN (`{"dsn": "..."}`) |
//! | GET | `/config/status` | sync status |
//! | POST | `/config/sync` | force every instance to reload |
//!
//! Every body carries `"status"`: `"success"` or `"error"`. Validation
//! failures map to 400, internal failures to 500, and a disabled sync
//! service to 503.

use crate::error::SyncError;
use crate::secure::SecureSettings;
use crate::settings::{SettingsDelta, SystemSettings, schema};
use crate::sync::ConfigSync;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;

const MASK: &str = "********";

#[derive(Clone, Default)]
pub struct AppState {
    pub sync: Option<Arc<ConfigSync>>,
    pub secure: Option<Arc<SecureSettings>>,
}

impl AppState {
    pub fn new(sync: Arc<ConfigSync>, secure: Arc<SecureSettings>) -> Self {
        Self {
            sync: Some(sync),
            secure: Some(secure),
        }
    }

    /// State answering 503 on every sync route
    pub fn disabled() -> Self {
        Self::default()
    }

    fn sync(&self) -> Result<&Arc<ConfigSync>, ApiError> {
        self.sync
            .as_ref()
            .ok_or(ApiError::Disabled("config sync service is not enabled"))
    }

    fn secure(&self) -> Result<&Arc<SecureSettings>, ApiError> {
        self.secure
            .as_ref()
            .ok_or(ApiError::Disabled("secure config manager is not enabled"))
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/config", get(get_config).put(update_config))
        .route("/config/database", put(update_database_config))
        .route("/config/status", get(get_sync_status))
        .route("/config/sync", post(force_sync))
        .with_state(state)
}

#[derive(Debug)]
pub enum ApiError {
    Disabled(&'static str),
    BadRequest(String),
    Sync(SyncError),
}

impl From<SyncError> for ApiError {
    fn from(err: SyncError) -> Self {
        Self::Sync(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::BadRequest(format!("invalid request body: {}", rejection.body_text()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            ApiError::Disabled(message) => {
                (StatusCode::SERVICE_UNAVAILABLE, "disabled", message.to_string())
            }
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, "bad_request", message),
            ApiError::Sync(SyncError::Validation(e)) => {
                (StatusCode::BAD_REQUEST, "validation_failed", e.to_string())
            }
            ApiError::Sync(e) => {
                tracing::error!(component = "config_sync", error = %e, "settings request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal",
                    "settings operation failed".to_string(),
                )
            }
        };

        let body = json!({
            "status": "error",
            "error": { "code": code, "message": message },
        });
        (status, Json(body)).into_response()
    }
}

/// Settings as JSON with every non-empty sensitive value replaced by a mask
fn masked(settings: &SystemSettings) -> Result<Value, SyncError> {
    let mut value = serde_json::to_value(settings)?;
    if let Value::Object(map) = &mut value {
        for spec in schema::sensitive_fields() {
            if let Some(entry) = map.get_mut(spec.name) {
                if entry.as_str().is_some_and(|s| !s.is_empty()) {
                    *entry = Value::String(MASK.to_string());
                }
            }
        }
    }
    Ok(value)
}

async fn get_config(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let sync = state.sync()?;
    let snapshot = sync.snapshot();
    Ok(Json(json!({
        "status": "success",
        "version": snapshot.version,
        "config": masked(&snapshot.settings)?,
    })))
}

async fn update_config(
    State(state): State<AppState>,
    body: Result<Json<SettingsDelta>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let sync = state.sync()?;
    let Json(delta) = body?;

    let outcome = match &state.secure {
        Some(secure) => secure.update_secure(delta).await?,
        None => sync.update_settings(delta).await?,
    };

    Ok(Json(json!({
        "status": "success",
        "message": "settings updated",
        "applied": outcome.applied,
        "ignored": outcome.ignored,
        "version": outcome.version,
    })))
}

#[derive(Debug, Deserialize)]
struct DatabaseUpdate {
    dsn: String,
}

async fn update_database_config(
    State(state): State<AppState>,
    body: Result<Json<DatabaseUpdate>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let secure = state.secure()?;
    let Json(request) = body?;
    if request.dsn.trim().is_empty() {
        return Err(ApiError::BadRequest("dsn must not be empty".into()));
    }

    let outcome = secure.update_database_config(&request.dsn).await?;
    Ok(Json(json!({
        "status": "success",
        "message": "database configuration updated",
        "version": outcome.version,
    })))
}

async fn get_sync_status(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let Some(sync) = &state.sync else {
        return Ok(Json(json!({ "enabled": false, "status": "disabled" })));
    };

    let settings = sync.get_settings();
    Ok(Json(json!({
        "enabled": true,
        "status": "active",
        "sync": sync.status(),
        "config": settings.to_public_json().map_err(SyncError::from)?,
    })))
}

async fn force_sync(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    state.sync()?.force_sync().await?;
    Ok(Json(json!({
        "status": "success",
        "message": "resync requested",
    })))
}
