use std::fmt::Display;

use eventsource_stream::Eventsource as _;
use futures::{Stream, StreamExt as _};
use tracing::{trace, warn};

use crate::errors::ProviderError;
use crate::model::BackendKind;

/// JSON payload of one event's data. `None` for keep-alives, `[DONE]` and
/// malformed payloads (the latter are logged and skipped).
fn event_json(backend: BackendKind, event: &str, data: &str) -> Option<serde_json::Value> {
    let data = data.trim();
    if data.is_empty() || data == "[DONE]" {
        trace!(%backend, event, "ignoring empty SSE event");
        return None;
    }
    match serde_json::from_str(data) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(%backend, event, error = %e, "skipping malformed SSE event");
            None
        }
    }
}

/// Decodes an SSE byte stream into the JSON payload of each event.
pub(crate) fn decode_json<S, B, E>(
    backend: BackendKind,
    bytes: S,
) -> impl Stream<Item = Result<serde_json::Value, ProviderError>> + Send + 'static
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Display + Send + 'static,
{
    bytes.eventsource().filter_map(move |item| async move {
        match item {
            Ok(event) => event_json(backend, &event.event, &event.data).map(Ok),
            Err(e) => Some(Err(ProviderError::transport(
                backend,
                format!("streaming read failed: {e}"),
            ))),
        }
    })
}

/// JSON events of a streaming HTTP response.
pub(crate) fn json_frames(
    backend: BackendKind,
    response: reqwest::Response,
) -> impl Stream<Item = Result<serde_json::Value, ProviderError>> + Send + 'static {
    decode_json(backend, response.bytes_stream())
}
