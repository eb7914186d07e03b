//! HTTP error type
//!
//! Every failure leaves the service as `{"error": {"code", "message"}}`.
//! Codes for identification failures reuse the user-facing `ErrorKind`
//! names so the UI shell can branch on them.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::models::{DenyReason, ErrorKind};
use crate::services::{BackendError, WorkflowError};

#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Sign-in required (401)
    #[error("Sign-in required")]
    Unauthenticated,

    /// Free quota used up (402)
    #[error("Quota exhausted")]
    QuotaExhausted,

    /// Conflict (409), e.g. the attempt was superseded
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Upstream service failure (502)
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Common error: {0}")]
    Common(#[from] verdant_common::Error),
}

impl From<WorkflowError> for ApiError {
    fn from(err: WorkflowError) -> Self {
        match err {
            WorkflowError::Rejected(reason) => ApiError::BadRequest(reason.to_string()),
            WorkflowError::Denied(DenyReason::Unauthenticated) => ApiError::Unauthenticated,
            WorkflowError::Denied(DenyReason::QuotaExhausted) => ApiError::QuotaExhausted,
            WorkflowError::Superseded => ApiError::Conflict(WorkflowError::Superseded.to_string()),
            WorkflowError::InvalidState(transition) => ApiError::Conflict(transition.to_string()),
            WorkflowError::NoSuchCandidate(index) => {
                ApiError::BadRequest(format!("No candidate at index {}", index))
            }
            WorkflowError::Store(e) => ApiError::Common(e),
        }
    }
}

impl From<BackendError> for ApiError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Unauthorized => ApiError::Unauthenticated,
            BackendError::Auth(msg) => ApiError::BadRequest(msg),
            other => ApiError::Upstream(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::Unauthenticated => (
                StatusCode::UNAUTHORIZED,
                ErrorKind::Unauthenticated.as_str(),
                ErrorKind::Unauthenticated.user_message().to_string(),
            ),
            ApiError::QuotaExhausted => (
                StatusCode::PAYMENT_REQUIRED,
                ErrorKind::QuotaExhausted.as_str(),
                ErrorKind::QuotaExhausted.user_message().to_string(),
            ),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg),
            ApiError::Upstream(msg) => (StatusCode::BAD_GATEWAY, "UPSTREAM_ERROR", msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg),
            ApiError::Common(ref err) => {
                tracing::error!(error = %err, "Request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorKind::Unexpected.as_str(),
                    ErrorKind::Unexpected.user_message().to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
