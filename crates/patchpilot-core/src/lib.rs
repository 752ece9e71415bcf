//! Provider-agnostic agent streaming core.
//!
//! A [`Backend`] turns a prompt into a sequence of [`NormalizedEvent`]s,
//! whichever vendor produces them. The [`SessionController`] drives one
//! backend run into an [`EventTransport`] and records the run's diff and
//! command transcript in the [`RunStore`].
//!
//! Vendor integrations live under `vendors::*`.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use patchpilot_core::prelude::*;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = CoreConfig::from_env()?;
//! let backend = build_backend(&config)?;
//! let store = Arc::new(RunStore::new());
//! let controller = SessionController::new(store.clone(), backend);
//!
//! let run_id = store.create("Add a README");
//! let (mut transport, mut events) = ChannelTransport::new(64);
//! tokio::spawn(async move { controller.stream_run(run_id, &mut transport).await });
//! while let Some(event) = events.recv().await {
//!     println!("{}", serde_json::to_string(&event)?);
//! }
//! # Ok(())
//! # }
//! ```

/// Backend contract, run streams and release handles.
pub mod backend;
/// Model selection and the cached model catalog.
pub mod catalog;
/// Environment-driven configuration.
pub mod config;
/// Public error types.
pub mod errors;
/// Normalized stream events.
pub mod event;
/// Backend kinds, reasoning efforts and model settings.
pub mod model;
/// Process-wide logging setup.
pub mod observability;
/// Common imports for typical usage.
pub mod prelude;
/// In-memory run table.
pub mod run_store;
/// Session controller and event transports.
pub mod session;
/// Helpers shared by the vendor translators.
pub mod translate;
/// Vendor-specific integrations.
pub mod vendors;

pub use backend::{AbortHandle, Backend, EventStream, RunStream, build_backend};
pub use catalog::{ModelCatalogSource, ModelManager};
pub use config::{CoreConfig, LocalDefaults, RunSettings};
pub use errors::{BackendError, ConfigError, ProviderError};
pub use event::{NormalizedEvent, ToolDescriptor};
pub use model::{BackendKind, ModelSelection, ModelSelectionUpdate, ModelSettings, ReasoningEffort};
pub use observability::{LogConfig, init_observability};
pub use run_store::{Run, RunId, RunStore};
pub use session::{ChannelTransport, EventTransport, SessionController, SessionOutcome};
