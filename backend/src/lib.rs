//! HTTP surface for patchpilot.
//!
//! Routes live under `/api`: run submission and streaming, model selection,
//! replay of a run's transcript and last diff, diff apply, and a workspace
//! file browser.

pub mod apply;
pub mod config;
pub mod error;
pub mod files;
mod routes;
pub mod state;

pub use error::ApiError;
pub use routes::build_router;
pub use state::AppState;
