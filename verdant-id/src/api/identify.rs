//! Identification endpoints
//!
//! Every endpoint returns the attempt snapshot. An attempt that ended in
//! `error` is still a 200: the snapshot carries the error kind and message.

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, State},
    http::{header, HeaderMap},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;

use crate::error::{ApiError, ApiResult};
use crate::models::AttemptSnapshot;
use crate::services::intake::MAX_IMAGE_BYTES;
use crate::AppState;

/// Oversized uploads up to this size still reach the intake validator
const IMAGE_BODY_LIMIT: usize = MAX_IMAGE_BYTES + 1024 * 1024;

#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    pub query: String,
}

#[derive(Debug, Deserialize)]
pub struct SelectRequest {
    pub index: usize,
}

/// POST /identify/image (raw body, `Content-Type` = image MIME)
pub async fn identify_image(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<AttemptSnapshot>> {
    let mime = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| ApiError::BadRequest("Missing Content-Type".to_string()))?
        .to_string();

    let snapshot = state.workflow.submit_image(body.to_vec(), &mime).await?;
    Ok(Json(snapshot))
}

/// POST /identify/search
pub async fn identify_search(
    State(state): State<AppState>,
    Json(request): Json<SearchRequest>,
) -> ApiResult<Json<AttemptSnapshot>> {
    let snapshot = state.workflow.submit_query(&request.query).await?;
    Ok(Json(snapshot))
}

/// POST /identify/select
pub async fn identify_select(
    State(state): State<AppState>,
    Json(request): Json<SelectRequest>,
) -> ApiResult<Json<AttemptSnapshot>> {
    let snapshot = state.workflow.select_candidate(request.index).await?;
    Ok(Json(snapshot))
}

/// POST /identify/reset
pub async fn identify_reset(State(state): State<AppState>) -> Json<AttemptSnapshot> {
    Json(state.workflow.reset().await)
}

/// GET /identify
pub async fn identify_status(State(state): State<AppState>) -> Json<AttemptSnapshot> {
    Json(state.workflow.snapshot().await)
}

pub fn identify_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/identify/image",
            post(identify_image).layer(DefaultBodyLimit::max(IMAGE_BODY_LIMIT)),
        )
        .route("/identify/search", post(identify_search))
        .route("/identify/select", post(identify_select))
        .route("/identify/reset", post(identify_reset))
        .route("/identify", get(identify_status))
}
