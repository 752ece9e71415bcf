use std::convert::Infallible;

use axum::Json;
use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::{Stream, StreamExt as _};
use patchpilot_core::{ChannelTransport, NormalizedEvent, RunId};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{info, warn};

use crate::apply::{ApplyError, apply_patch};
use crate::error::{ApiError, JsonBody};
use crate::state::AppState;

/// Events buffered between the session task and the response body.
const STREAM_BUFFER: usize = 64;

fn run_id(raw: &str) -> Result<RunId, ApiError> {
    raw.parse().map_err(|_| ApiError::run_not_found(raw))
}

#[derive(Debug, Deserialize)]
pub(super) struct SendRequest {
    #[serde(default)]
    text: String,
}

pub(super) async fn send(
    State(state): State<AppState>,
    JsonBody(request): JsonBody<SendRequest>,
) -> Result<Json<Value>, ApiError> {
    if request.text.trim().is_empty() {
        return Err(ApiError::BadRequest("text is required".into()));
    }
    let id = state.store.create(request.text);
    info!(run_id = %id, "run created");
    Ok(Json(json!({ "runId": id })))
}

fn frame(event: &NormalizedEvent) -> Option<Event> {
    match serde_json::to_string(event) {
        Ok(data) => Some(Event::default().data(data)),
        Err(e) => {
            warn!(error = %e, tag = event.tag(), "dropping unserializable event");
            None
        }
    }
}

/// Streams a run as `data: <json>` frames. The session runs in its own task;
/// dropping the response body closes the channel, which the controller
/// treats as a disconnect.
pub(super) async fn stream(
    State(state): State<AppState>,
    Path(raw): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let id = run_id(&raw)?;
    if !state.store.contains(&id) {
        return Err(ApiError::run_not_found(id));
    }

    let (mut transport, events) = ChannelTransport::new(STREAM_BUFFER);
    let controller = state.controller.clone();
    tokio::spawn(async move {
        if let Err(e) = controller.stream_run(id, &mut transport).await {
            warn!(run_id = %id, error = %e, "stream ended before it started");
        }
    });

    let frames = ReceiverStream::new(events)
        .filter_map(|event| async move { frame(&event).map(Ok::<_, Infallible>) });
    Ok(Sse::new(frames).keep_alive(KeepAlive::default()))
}

pub(super) async fn cmd_log(
    State(state): State<AppState>,
    Path(raw): Path<String>,
) -> Result<Json<Vec<String>>, ApiError> {
    let id = run_id(&raw)?;
    state
        .store
        .commands(&id)
        .map(Json)
        .ok_or_else(|| ApiError::run_not_found(id))
}

pub(super) async fn last_diff(
    State(state): State<AppState>,
    Path(raw): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let id = run_id(&raw)?;
    let diff = state
        .store
        .last_diff(&id)
        .ok_or_else(|| ApiError::run_not_found(id))?;
    Ok(Json(json!({ "diff": diff })))
}

pub(super) async fn apply(
    State(state): State<AppState>,
    Path(raw): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let id = run_id(&raw)?;
    let diff = state
        .store
        .last_diff(&id)
        .ok_or_else(|| ApiError::run_not_found(id))?
        .ok_or_else(|| ApiError::NotFound(format!("run {id} has no diff to apply")))?;
    match apply_patch(state.workspace.root(), &diff).await {
        Ok(()) => Ok(Json(json!({ "applied": true }))),
        Err(ApplyError::Rejected(stderr)) => Err(ApiError::Conflict(stderr)),
        Err(e) => Err(ApiError::Internal(e.to_string())),
    }
}
