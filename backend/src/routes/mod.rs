mod files;
mod model;
mod runs;

use axum::Router;
use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, response::IntoResponse};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Builds the `/api` router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/send", post(runs::send))
        .route("/api/stream/:id", get(runs::stream))
        .route("/api/cmd-log/:id", get(runs::cmd_log))
        .route("/api/last-diff/:id", get(runs::last_diff))
        .route("/api/apply/:id", post(runs::apply))
        .route("/api/model", get(model::get_model).post(model::update_model))
        .route("/api/files", get(files::list))
        .route("/api/file", get(files::read).put(files::write))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({ "ok": true, "backend": state.backend().kind() }))
}
