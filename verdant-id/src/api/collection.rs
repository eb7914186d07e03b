//! Plant collection and history endpoints

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::api::require_user;
use crate::error::{ApiError, ApiResult};
use crate::models::{HistoryEntry, PlantRecord};
use crate::AppState;

const DEFAULT_HISTORY_LIMIT: usize = 20;
const MAX_HISTORY_LIMIT: usize = 200;

/// POST /collection body; without a record the current result is saved
#[derive(Debug, Default, Deserialize)]
pub struct SaveRequest {
    #[serde(default)]
    pub record: Option<PlantRecord>,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default)]
    pub limit: Option<usize>,
}

/// GET /collection
pub async fn list_collection(State(state): State<AppState>) -> ApiResult<Json<Vec<PlantRecord>>> {
    let user = require_user(&state).await?;
    Ok(Json(state.collection.list(&user.id).await?))
}

/// POST /collection
pub async fn save_to_collection(
    State(state): State<AppState>,
    request: Option<Json<SaveRequest>>,
) -> ApiResult<(StatusCode, Json<PlantRecord>)> {
    let user = require_user(&state).await?;

    let record = match request.and_then(|Json(body)| body.record) {
        Some(record) => record,
        None => state
            .workflow
            .current_result()
            .await
            .ok_or_else(|| ApiError::Conflict("No identification result to save".to_string()))?,
    };

    let saved = state.collection.save(&user.id, &record).await?;
    tracing::info!(user_id = %user.id, id = ?saved.id, "Plant saved to collection");
    Ok((StatusCode::CREATED, Json(saved)))
}

/// GET /collection/{id}
pub async fn get_from_collection(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<PlantRecord>> {
    let user = require_user(&state).await?;
    state
        .collection
        .get(&user.id, id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Plant {}", id)))
}

/// DELETE /collection/{id}
pub async fn delete_from_collection(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    let user = require_user(&state).await?;
    if state.collection.delete(&user.id, id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("Plant {}", id)))
    }
}

/// GET /history?limit=N
pub async fn recent_history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Json<Vec<HistoryEntry>>> {
    let user = require_user(&state).await?;
    let limit = query
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .clamp(1, MAX_HISTORY_LIMIT);
    Ok(Json(state.history.recent(&user.id, limit).await?))
}

pub fn collection_routes() -> Router<AppState> {
    Router::new()
        .route("/collection", get(list_collection).post(save_to_collection))
        .route(
            "/collection/:id",
            get(get_from_collection).delete(delete_from_collection),
        )
        .route("/history", get(recent_history))
}
