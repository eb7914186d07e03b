//! Settings endpoints
//!
//! The database copy of a key is authoritative; the TOML mirror is a
//! best-effort backup and its failure does not fail the request.

use axum::{extract::State, routing::post, Json, Router};
use serde::{Deserialize, Serialize};

use crate::config::{is_valid_key, sync_gemini_key_to_toml};
use crate::error::{ApiError, ApiResult};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct SetApiKeyRequest {
    pub api_key: String,
}

#[derive(Debug, Serialize)]
pub struct SetApiKeyResponse {
    pub success: bool,
    /// Whether the TOML mirror was updated
    pub synced_to_toml: bool,
    pub message: String,
}

/// POST /settings/gemini-api-key
///
/// The running analyzer keeps its key; the new one is used after a restart.
pub async fn set_gemini_api_key(
    State(state): State<AppState>,
    Json(request): Json<SetApiKeyRequest>,
) -> ApiResult<Json<SetApiKeyResponse>> {
    let key = request.api_key.trim();
    if !is_valid_key(key) {
        return Err(ApiError::BadRequest(
            "API key cannot be empty or whitespace-only".to_string(),
        ));
    }

    state.api_keys.set_gemini_api_key(key).await?;
    tracing::info!("AI API key configured via settings endpoint");

    let synced_to_toml = match &state.settings.config_path {
        Some(path) => match sync_gemini_key_to_toml(key, path) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, "TOML sync failed (database write succeeded)");
                false
            }
        },
        None => false,
    };

    Ok(Json(SetApiKeyResponse {
        success: true,
        synced_to_toml,
        message: "AI API key saved; restart the service to use it".to_string(),
    }))
}

pub fn settings_routes() -> Router<AppState> {
    Router::new().route("/settings/gemini-api-key", post(set_gemini_api_key))
}
