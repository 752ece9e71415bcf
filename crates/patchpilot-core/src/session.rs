//! Streaming session controller: drives one backend run into a transport.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::backend::{Backend, RunStream};
use crate::event::NormalizedEvent;
use crate::run_store::{RunId, RunStore};

/// The peer went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("transport closed")]
pub struct TransportClosed;

/// Where normalized events are written (an SSE response in production).
#[async_trait::async_trait]
pub trait EventTransport: Send + Sync {
    async fn write(&mut self, event: &NormalizedEvent) -> Result<(), TransportClosed>;

    /// Resolves when the peer has disconnected.
    async fn closed(&self);

    /// Ends the transport. Called exactly once per session.
    fn close(&mut self);
}

/// Transport backed by a bounded channel; the receiver feeds the HTTP body.
pub struct ChannelTransport {
    tx: Option<mpsc::Sender<NormalizedEvent>>,
}

impl ChannelTransport {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<NormalizedEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx: Some(tx) }, rx)
    }
}

#[async_trait::async_trait]
impl EventTransport for ChannelTransport {
    async fn write(&mut self, event: &NormalizedEvent) -> Result<(), TransportClosed> {
        match &self.tx {
            Some(tx) => tx.send(event.clone()).await.map_err(|_| TransportClosed),
            None => Err(TransportClosed),
        }
    }

    async fn closed(&self) {
        if let Some(tx) = &self.tx {
            tx.closed().await;
        }
    }

    fn close(&mut self) {
        self.tx = None;
    }
}

/// How a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    /// Sequence exhausted; `done` was written.
    Completed,
    /// A terminal `error` was written with this message.
    Failed(String),
    /// The peer disconnected; nothing further was written.
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("run not found: {0}")]
    RunNotFound(RunId),
}

/// Drives backend runs for stream requests and records their side effects.
pub struct SessionController {
    store: Arc<RunStore>,
    backend: Arc<dyn Backend>,
}

enum Step {
    Disconnected,
    Next(Option<Result<NormalizedEvent, crate::errors::ProviderError>>),
}

impl SessionController {
    pub fn new(store: Arc<RunStore>, backend: Arc<dyn Backend>) -> Self {
        Self { store, backend }
    }

    pub fn store(&self) -> &Arc<RunStore> {
        &self.store
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    /// Streams run `run_id` into `transport` until the sequence ends, fails,
    /// or the peer disconnects. The transport is always closed on return.
    ///
    /// A missing run fails before anything is written.
    pub async fn stream_run<T: EventTransport>(
        &self,
        run_id: RunId,
        transport: &mut T,
    ) -> Result<SessionOutcome, SessionError> {
        let run = self
            .store
            .get(&run_id)
            .ok_or(SessionError::RunNotFound(run_id))?;
        self.store.clear(&run_id);
        info!(run_id = %run_id, backend = %self.backend.kind(), "run stream opened");

        let outcome = match self.backend.stream_run(&run.prompt).await {
            Ok(stream) => self.pump(run_id, stream, transport).await,
            Err(err) => {
                warn!(run_id = %run_id, error = %err, "backend refused to start run");
                SessionOutcome::Failed(err.to_string())
            }
        };

        match &outcome {
            SessionOutcome::Completed => {
                let _ = transport.write(&NormalizedEvent::Done).await;
                info!(run_id = %run_id, "run finished");
            }
            SessionOutcome::Failed(message) => {
                let _ = transport.write(&NormalizedEvent::error(message.clone())).await;
                info!(run_id = %run_id, error = %message, "run failed");
            }
            SessionOutcome::Cancelled => {
                info!(run_id = %run_id, "run cancelled by peer disconnect");
            }
        }
        transport.close();
        Ok(outcome)
    }

    async fn pump<T: EventTransport>(
        &self,
        run_id: RunId,
        mut stream: RunStream,
        transport: &mut T,
    ) -> SessionOutcome {
        let mut cancelled = false;
        let outcome = loop {
            let step = tokio::select! {
                biased;
                _ = transport.closed() => Step::Disconnected,
                next = stream.next_event() => Step::Next(next),
            };
            let event = match step {
                Step::Disconnected => {
                    cancelled = true;
                    break SessionOutcome::Cancelled;
                }
                Step::Next(None) => break SessionOutcome::Completed,
                Step::Next(Some(Err(err))) => {
                    break SessionOutcome::Failed(err.message().to_string());
                }
                Step::Next(Some(Ok(event))) => event,
            };
            match event {
                NormalizedEvent::Done => break SessionOutcome::Completed,
                NormalizedEvent::Error { message } => break SessionOutcome::Failed(message),
                event => {
                    self.record(run_id, &event);
                    if transport.write(&event).await.is_err() {
                        cancelled = true;
                        break SessionOutcome::Cancelled;
                    }
                }
            }
        };
        if cancelled {
            debug!(run_id = %run_id, "releasing backend stream");
            stream.release();
        }
        outcome
    }

    fn record(&self, run_id: RunId, event: &NormalizedEvent) {
        match event {
            NormalizedEvent::Diff { patch } => {
                self.store.set_diff(&run_id, patch.clone());
            }
            NormalizedEvent::ToolStart { tool } => {
                self.store.append_command(&run_id, tool.start_marker());
            }
            NormalizedEvent::ToolStdout { text } | NormalizedEvent::ToolStderr { text } => {
                self.store.append_command(&run_id, text.clone());
            }
            _ => {}
        }
    }
}
