//! Provider integrations. Each vendor pairs a client (native event source)
//! with a translator into [`NormalizedEvent`]s.

pub mod claude;
pub mod codex;
pub(crate) mod models;
pub mod openai;
pub(crate) mod sse;

use std::collections::VecDeque;
use std::time::Duration;

use futures::StreamExt as _;
use futures::stream;
use tracing::debug;

use crate::backend::{AbortSignal, EventStream};
use crate::errors::{ConfigError, ProviderError};
use crate::event::NormalizedEvent;

/// Provider-specific state machine from native events to normalized ones.
pub trait Translator: Send + 'static {
    type Native: Send;

    /// Translates one native event. An `Err` is fatal to the run.
    fn translate(&mut self, native: Self::Native) -> Result<Vec<NormalizedEvent>, ProviderError>;

    /// Called once when the native sequence is exhausted.
    fn finish(&mut self) -> Result<Vec<NormalizedEvent>, ProviderError> {
        Ok(Vec::new())
    }
}

/// Pipes a native stream through `translator`, stopping early when the run
/// is released.
pub(crate) fn translated_stream<S, T>(native: S, translator: T, abort: AbortSignal) -> EventStream
where
    S: futures::Stream<Item = Result<T::Native, ProviderError>> + Send + Unpin + 'static,
    T: Translator,
{
    struct State<S, T> {
        native: S,
        translator: T,
        abort: AbortSignal,
        pending: VecDeque<NormalizedEvent>,
        finished: bool,
    }

    enum Next<N> {
        Released,
        Native(Option<Result<N, ProviderError>>),
    }

    let events = stream::try_unfold(
        State {
            native,
            translator,
            abort,
            pending: VecDeque::new(),
            finished: false,
        },
        |mut state| async move {
            loop {
                if let Some(event) = state.pending.pop_front() {
                    return Ok(Some((event, state)));
                }
                if state.finished {
                    return Ok(None);
                }
                let next = tokio::select! {
                    biased;
                    _ = state.abort.aborted() => Next::Released,
                    native = state.native.next() => Next::Native(native),
                };
                match next {
                    Next::Released => {
                        debug!("native stream released");
                        return Ok(None);
                    }
                    Next::Native(Some(Ok(native))) => {
                        let events = state.translator.translate(native)?;
                        state.pending.extend(events);
                    }
                    Next::Native(Some(Err(err))) => return Err(err),
                    Next::Native(None) => {
                        let events = state.translator.finish()?;
                        state.pending.extend(events);
                        state.finished = true;
                    }
                }
            }
        },
    );
    Box::pin(events)
}

pub(crate) fn http_client(timeout: Option<Duration>) -> Result<reqwest::Client, ConfigError> {
    let mut builder = reqwest::Client::builder().connect_timeout(Duration::from_secs(30));
    if let Some(timeout) = timeout {
        builder = builder.timeout(timeout);
    }
    builder
        .build()
        .map_err(|e| ConfigError::HttpClient(e.to_string()))
}

/// Reads a failed response body into a provider error.
pub(crate) async fn status_error(
    backend: crate::model::BackendKind,
    what: &str,
    response: reqwest::Response,
) -> ProviderError {
    let status = response.status();
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<unreadable body>".to_string());
    let detail = serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .map(|value| crate::translate::error_message(&value, &body))
        .unwrap_or(body);
    ProviderError::rejected(
        backend,
        format!("{what} failed with status {status}: {detail}"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::abort_pair;
    use crate::model::BackendKind;

    struct Echo {
        finished: bool,
    }

    impl Translator for Echo {
        type Native = String;

        fn translate(&mut self, native: String) -> Result<Vec<NormalizedEvent>, ProviderError> {
            if native == "fail" {
                return Err(ProviderError::rejected(BackendKind::Codex, "failed"));
            }
            Ok(vec![NormalizedEvent::message(native)])
        }

        fn finish(&mut self) -> Result<Vec<NormalizedEvent>, ProviderError> {
            self.finished = true;
            Ok(vec![NormalizedEvent::status("end")])
        }
    }

    #[tokio::test]
    async fn translates_in_order_and_flushes_finish() {
        let (_handle, signal) = abort_pair();
        let native = stream::iter(vec![Ok("a".to_string()), Ok("b".to_string())]);
        let events: Vec<_> = translated_stream(native, Echo { finished: false }, signal)
            .collect()
            .await;
        assert_eq!(
            events,
            vec![
                Ok(NormalizedEvent::message("a")),
                Ok(NormalizedEvent::message("b")),
                Ok(NormalizedEvent::status("end")),
            ]
        );
    }

    #[tokio::test]
    async fn translator_error_terminates_stream() {
        let (_handle, signal) = abort_pair();
        let native = stream::iter(vec![
            Ok("a".to_string()),
            Ok("fail".to_string()),
            Ok("never".to_string()),
        ]);
        let events: Vec<_> = translated_stream(native, Echo { finished: false }, signal)
            .collect()
            .await;
        assert_eq!(events.len(), 2);
        assert!(events[1].is_err());
    }

    #[tokio::test]
    async fn release_ends_a_pending_stream() {
        let (handle, signal) = abort_pair();
        let native = stream::iter(vec![Ok("a".to_string())]).chain(stream::pending());
        let mut events = translated_stream(native, Echo { finished: false }, signal);
        assert_eq!(
            events.next().await,
            Some(Ok(NormalizedEvent::message("a")))
        );
        handle.abort();
        assert_eq!(events.next().await, None);
    }
}
