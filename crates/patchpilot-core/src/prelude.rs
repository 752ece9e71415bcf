//! Common imports for embedding the core in a server.
pub use crate::{
    Backend, BackendError, BackendKind, ChannelTransport, CoreConfig, EventTransport, LogConfig,
    ModelSelectionUpdate, ModelSettings, NormalizedEvent, RunId, RunStore, SessionController,
    SessionOutcome, build_backend, init_observability,
};
