use axum::Json;
use axum::extract::{Query, State};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::error::{ApiError, JsonBody};
use crate::files::DirEntry;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub(super) struct PathQuery {
    #[serde(default)]
    path: String,
}

#[derive(Debug, Deserialize)]
pub(super) struct SaveRequest {
    path: String,
    content: String,
}

pub(super) async fn list(
    State(state): State<AppState>,
    Query(query): Query<PathQuery>,
) -> Result<Json<Vec<DirEntry>>, ApiError> {
    Ok(Json(state.workspace.list(&query.path).await?))
}

pub(super) async fn read(
    State(state): State<AppState>,
    Query(query): Query<PathQuery>,
) -> Result<Json<Value>, ApiError> {
    let content = state.workspace.read(&query.path).await?;
    Ok(Json(json!({ "path": query.path, "content": content })))
}

pub(super) async fn write(
    State(state): State<AppState>,
    JsonBody(request): JsonBody<SaveRequest>,
) -> Result<Json<Value>, ApiError> {
    state.workspace.write(&request.path, &request.content).await?;
    Ok(Json(json!({ "saved": true })))
}
