//! Auth callback and session endpoints
//!
//! Browsers never send URL fragments to a server, so implicit-flow tokens
//! arrive through `POST /auth/callback` with the full URL captured by the UI
//! shell. Code-flow redirects can hit `GET /auth/callback` directly.
//! `POST /auth/sign-in` starts a code flow and returns the URL to open.

use axum::{
    extract::{State, Query},
    http::Uri,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::api::local_url;
use crate::error::{ApiError, ApiResult};
use crate::models::AuthState;
use crate::services::wait_until_resolved;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct CallbackRequest {
    pub url: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct StateQuery {
    /// Wait (bounded) for a loading state to resolve
    #[serde(default)]
    pub wait: bool,
}

const DEFAULT_PROVIDER: &str = "google";

#[derive(Debug, Default, Deserialize)]
pub struct SignInRequest {
    #[serde(default)]
    pub provider: Option<String>,
    /// Defaults to this service's own callback route
    #[serde(default)]
    pub redirect_to: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SignInResponse {
    pub url: String,
}

#[derive(Debug, Serialize)]
pub struct AuthStateResponse {
    #[serde(flatten)]
    pub state: AuthState,
}

/// GET /auth/callback?code=...
pub async fn callback_redirect(
    State(state): State<AppState>,
    uri: Uri,
) -> ApiResult<Json<AuthStateResponse>> {
    let url = local_url(&uri)?;
    let resolved = state.auth.handle_callback(&url).await?;
    Ok(Json(AuthStateResponse { state: resolved }))
}

/// POST /auth/callback
pub async fn callback_url(
    State(state): State<AppState>,
    Json(request): Json<CallbackRequest>,
) -> ApiResult<Json<AuthStateResponse>> {
    let url = Url::parse(&request.url)
        .map_err(|e| ApiError::BadRequest(format!("Invalid callback URL: {}", e)))?;
    let resolved = state.auth.handle_callback(&url).await?;
    Ok(Json(AuthStateResponse { state: resolved }))
}

/// GET /auth/state
pub async fn auth_state(
    State(state): State<AppState>,
    Query(query): Query<StateQuery>,
) -> Json<AuthStateResponse> {
    let current = if query.wait {
        let mut rx = state.auth.subscribe();
        wait_until_resolved(&mut rx, state.settings.auth_guard_timeout).await
    } else {
        state.auth.current()
    };
    Json(AuthStateResponse { state: current })
}

/// POST /auth/sign-in
pub async fn sign_in(
    State(state): State<AppState>,
    Json(request): Json<SignInRequest>,
) -> ApiResult<Json<SignInResponse>> {
    let provider = request.provider.as_deref().unwrap_or(DEFAULT_PROVIDER);
    let redirect_to = request.redirect_to.unwrap_or_else(|| {
        format!("http://localhost:{}/auth/callback", state.settings.listen_port)
    });
    let url = state.auth.begin_sign_in(provider, &redirect_to).await?;
    Ok(Json(SignInResponse { url }))
}

/// POST /auth/sign-out
pub async fn sign_out(State(state): State<AppState>) -> Json<AuthStateResponse> {
    let signed_out = state.auth.sign_out().await;
    state.workflow.reset().await;
    Json(AuthStateResponse { state: signed_out })
}

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/callback", get(callback_redirect).post(callback_url))
        .route("/auth/state", get(auth_state))
        .route("/auth/sign-in", post(sign_in))
        .route("/auth/sign-out", post(sign_out))
}
