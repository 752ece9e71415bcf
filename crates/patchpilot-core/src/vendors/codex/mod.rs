//! Codex CLI backend: one `codex exec --json` child per run.

mod auth;
mod client;
mod translator;

use std::sync::Arc;

use tracing::info;

pub use auth::{CodexCredential, parse_auth_file};
pub use client::{CodexExec, CodexOutput};
pub use translator::CodexTranslator;

use crate::backend::{Backend, RunStream, abort_pair, ensure_network};
use crate::catalog::{ModelCatalogSource, ModelManager};
use crate::config::{CatalogConfig, CodexConfig, RunSettings};
use crate::errors::{BackendError, ConfigError, ProviderError};
use crate::model::{BackendKind, ModelSelectionUpdate, ModelSettings};
use crate::vendors::models::fetch_openai_models;
use crate::vendors::{http_client, translated_stream};

/// Catalog fetched with whatever credential the CLI itself would use.
struct CodexModelSource {
    client: reqwest::Client,
    config: CodexConfig,
}

#[async_trait::async_trait]
impl ModelCatalogSource for CodexModelSource {
    async fn fetch_models(&self) -> Result<Vec<String>, ProviderError> {
        let backend = BackendKind::Codex;
        let credential = auth::resolve(self.config.api_key.as_deref(), &self.config.home)
            .await
            .ok_or_else(|| ProviderError::rejected(backend, "no codex credentials"))?;
        fetch_openai_models(
            &self.client,
            backend,
            &self.config.openai_base_url,
            credential.bearer(),
        )
        .await
    }
}

pub struct CodexBackend {
    config: CodexConfig,
    run: RunSettings,
    models: ModelManager,
}

impl CodexBackend {
    pub fn new(
        config: CodexConfig,
        run: RunSettings,
        catalog: CatalogConfig,
    ) -> Result<Self, ConfigError> {
        let source = CodexModelSource {
            client: http_client(None)?,
            config: config.clone(),
        };
        Ok(Self::with_catalog_source(config, run, catalog, Arc::new(source)))
    }

    pub fn with_catalog_source(
        config: CodexConfig,
        run: RunSettings,
        catalog: CatalogConfig,
        source: Arc<dyn ModelCatalogSource>,
    ) -> Self {
        let models = ModelManager::new(BackendKind::Codex, &config.defaults, catalog, source);
        Self {
            config,
            run,
            models,
        }
    }

    fn exec(&self) -> CodexExec {
        let base_url = self.config.openai_base_url.trim_end_matches('/');
        CodexExec {
            bin: self.config.bin.clone(),
            home: self.config.home.clone(),
            workspace: self.run.workspace.clone(),
            model: self.models.effective_model(),
            effort: self.models.effective_effort(),
            network_access: self.run.network_access,
            openai_base_url: (base_url != crate::config::DEFAULT_OPENAI_BASE_URL)
                .then(|| format!("{base_url}/v1")),
        }
    }
}

#[async_trait::async_trait]
impl Backend for CodexBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Codex
    }

    async fn stream_run(&self, prompt: &str) -> Result<RunStream, BackendError> {
        ensure_network(BackendKind::Codex, self.run.network_access)?;
        let credential = auth::resolve(self.config.api_key.as_deref(), &self.config.home)
            .await
            .ok_or_else(|| {
                BackendError::MissingCredentials(format!(
                    "set CODEX_API_KEY or OPENAI_API_KEY, or sign in so that {} exists",
                    self.config.home.join("auth.json").display()
                ))
            })?;

        let exec = self.exec();
        info!(model = ?exec.model, effort = ?exec.effort, "starting codex run");
        let process = exec.spawn(prompt, &credential)?;
        let (abort, signal) = abort_pair();
        let events = translated_stream(
            Box::pin(process.into_stream()),
            CodexTranslator::new(),
            signal,
        );
        Ok(RunStream::new(events, abort))
    }

    async fn model_settings(&self) -> ModelSettings {
        self.models.settings().await
    }

    fn update_model_selection(&self, update: &ModelSelectionUpdate) {
        self.models.update_selection(update);
    }
}
