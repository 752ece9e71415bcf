use anyhow::Context as _;
use patchpilot_backend::config::{self, ServerConfig};
use patchpilot_backend::files::Workspace;
use patchpilot_backend::{AppState, build_router};
use patchpilot_core::prelude::*;
use tracing::{Instrument as _, info, info_span};

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    config::init();
    init_observability(&LogConfig::from_env());

    let core = CoreConfig::from_env().context("invalid configuration")?;
    let server = ServerConfig::from_env();
    let backend = build_backend(&core).context("failed to build backend")?;
    let workspace = Workspace::open(&core.run.workspace)
        .await
        .with_context(|| format!("workspace {} is not accessible", core.run.workspace.display()))?;
    let span = info_span!(
        "patchpilot",
        backend = %core.backend,
        workspace = %workspace.root().display(),
    );
    info!(parent: &span, network_access = core.run.network_access, "starting patchpilot");

    let app = build_router(AppState::new(backend, workspace));
    let listener = tokio::net::TcpListener::bind(server.bind)
        .await
        .with_context(|| format!("failed to bind {}", server.bind))?;
    info!(parent: &span, addr = %server.bind, "listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .into_future()
        .instrument(span)
        .await
        .context("server error")?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}
