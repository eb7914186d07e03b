//! HTTP API handlers for verdant-id

pub mod auth;
pub mod checkout;
pub mod collection;
pub mod health;
pub mod identify;
pub mod settings;
pub mod sse;

pub use auth::auth_routes;
pub use checkout::checkout_routes;
pub use collection::collection_routes;
pub use health::health_routes;
pub use identify::identify_routes;
pub use settings::settings_routes;
pub use sse::event_stream;

use axum::http::Uri;
use url::Url;

use crate::error::{ApiError, ApiResult};
use crate::models::AuthUser;
use crate::services::wait_until_resolved;
use crate::AppState;

/// Wait (bounded) for the auth state to resolve and require a signed-in user
pub(crate) async fn require_user(state: &AppState) -> ApiResult<AuthUser> {
    let mut rx = state.auth.subscribe();
    let resolved = wait_until_resolved(&mut rx, state.settings.auth_guard_timeout).await;
    resolved.user().cloned().ok_or(ApiError::Unauthenticated)
}

/// Absolute URL for a request URI received on the local listener
pub(crate) fn local_url(uri: &Uri) -> ApiResult<Url> {
    let path_and_query = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
    Url::parse(&format!("http://localhost{}", path_and_query))
        .map_err(|e| ApiError::BadRequest(format!("Invalid URL: {}", e)))
}
