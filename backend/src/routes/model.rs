use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use patchpilot_core::{ModelSelectionUpdate, ModelSettings};
use serde_json::Value;
use tracing::info;

use crate::state::AppState;

pub(super) async fn get_model(State(state): State<AppState>) -> Json<ModelSettings> {
    Json(state.backend().model_settings().await)
}

/// Accepts any body: malformed JSON or fields are ignored, never rejected.
pub(super) async fn update_model(State(state): State<AppState>, body: Bytes) -> Json<ModelSettings> {
    let value = serde_json::from_slice::<Value>(&body).unwrap_or(Value::Null);
    let update = ModelSelectionUpdate::from_json(&value);
    state.backend().update_model_selection(&update);
    let settings = state.backend().model_settings().await;
    info!(model = ?settings.model, effort = ?settings.effort, "model selection updated");
    Json(settings)
}
