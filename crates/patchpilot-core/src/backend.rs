//! The capability interface every provider adapter implements.

use std::pin::Pin;
use std::sync::Arc;

use futures::StreamExt as _;
use tokio::sync::watch;

use crate::config::CoreConfig;
use crate::errors::{BackendError, ConfigError, ProviderError};
use crate::event::NormalizedEvent;
use crate::model::{BackendKind, ModelSelectionUpdate, ModelSettings};
use crate::vendors::{claude::ClaudeBackend, codex::CodexBackend, openai::OpenAiBackend};

/// Normalized events produced by one run.
pub type EventStream =
    Pin<Box<dyn futures::Stream<Item = Result<NormalizedEvent, ProviderError>> + Send + 'static>>;

/// Handle used to tell a running sequence to wind down.
pub struct AbortHandle {
    tx: watch::Sender<bool>,
}

impl AbortHandle {
    /// Requests cancellation.
    ///
    /// Cancellation is cooperative: the backend stops reading from the
    /// provider and releases its child process or connection.
    pub fn abort(&self) {
        let _ = self.tx.send(true);
    }
}

/// Receiving side of an [`AbortHandle`], held by the backend.
#[derive(Clone)]
pub struct AbortSignal {
    rx: watch::Receiver<bool>,
}

impl AbortSignal {
    pub fn is_aborted(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once abort was requested or the handle was dropped.
    pub async fn aborted(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }
}

pub fn abort_pair() -> (AbortHandle, AbortSignal) {
    let (tx, rx) = watch::channel(false);
    (AbortHandle { tx }, AbortSignal { rx })
}

/// A started run: its event sequence plus the release hook.
pub struct RunStream {
    events: EventStream,
    abort: AbortHandle,
}

impl RunStream {
    pub fn new(events: EventStream, abort: AbortHandle) -> Self {
        Self { events, abort }
    }

    /// Wraps a stream that needs no cleanup beyond being dropped.
    pub fn from_events(events: EventStream) -> Self {
        let (abort, _) = abort_pair();
        Self { events, abort }
    }

    /// Waits for the next event. `None` once the sequence is exhausted.
    pub async fn next_event(&mut self) -> Option<Result<NormalizedEvent, ProviderError>> {
        self.events.next().await
    }

    /// Stops iterating: signals the backend to wind down, then drops the
    /// sequence. Consumes the stream, so it can only happen once.
    pub fn release(self) {
        self.abort.abort();
    }
}

/// One provider, bundled with its translator and model manager.
#[async_trait::async_trait]
pub trait Backend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Starts a run for `prompt`.
    ///
    /// Configuration problems (`ProviderUnavailable`, `MissingCredentials`)
    /// and connection failures are returned here, before any event.
    async fn stream_run(&self, prompt: &str) -> Result<RunStream, BackendError>;

    /// Current selection and catalog. Catalog failures degrade, never error.
    async fn model_settings(&self) -> ModelSettings;

    /// Applies a partial selection update. Malformed fields are ignored.
    fn update_model_selection(&self, update: &ModelSelectionUpdate);
}

/// Builds the backend named by `config.backend`. Called once at startup.
pub fn build_backend(config: &CoreConfig) -> Result<Arc<dyn Backend>, ConfigError> {
    let backend: Arc<dyn Backend> = match config.backend {
        BackendKind::Codex => Arc::new(CodexBackend::new(
            config.codex.clone(),
            config.run.clone(),
            config.catalog.clone(),
        )?),
        BackendKind::Claude => Arc::new(ClaudeBackend::new(
            config.claude.clone(),
            config.run.clone(),
            config.catalog.clone(),
        )?),
        BackendKind::OpenAi => Arc::new(OpenAiBackend::new(
            config.openai.clone(),
            config.run.clone(),
            config.catalog.clone(),
        )?),
    };
    tracing::info!(backend = %backend.kind(), workspace = %config.run.workspace.display(), "backend selected");
    Ok(backend)
}

/// Shared precondition of every backend: network access must be allowed.
pub(crate) fn ensure_network(kind: BackendKind, network_access: bool) -> Result<(), BackendError> {
    if network_access {
        Ok(())
    } else {
        Err(BackendError::ProviderUnavailable(format!(
            "{kind} needs network access, which is disabled (PATCHPILOT_NETWORK_ACCESS=false)"
        )))
    }
}
