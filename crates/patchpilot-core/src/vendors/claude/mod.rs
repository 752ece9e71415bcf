//! Claude backend over the Anthropic Messages API.
//!
//! Shell commands and diff proposals are client-side tools: the backend runs
//! them itself and resubmits their results, so one run may span many
//! requests.

mod client;
mod machine;
mod tools;

use std::sync::Arc;

use tracing::info;

pub use client::{ClaudeClient, MessageSource, NativeStream, RequestTemplate};

use crate::backend::{Backend, RunStream, abort_pair, ensure_network};
use crate::catalog::{ModelCatalogSource, ModelManager};
use crate::config::{CatalogConfig, ClaudeConfig, DEFAULT_CLAUDE_MODEL, RunSettings};
use crate::errors::{BackendError, ConfigError};
use crate::model::{BackendKind, ModelSelectionUpdate, ModelSettings};
use crate::vendors::http_client;
use crate::vendors::models::{AnthropicAuth, AnthropicModelSource};

use machine::ClaudeRun;
use tools::CommandRunner;

pub struct ClaudeBackend {
    config: ClaudeConfig,
    run: RunSettings,
    models: ModelManager,
    /// `None` when no credential is configured.
    source: Option<Arc<dyn MessageSource>>,
}

impl ClaudeBackend {
    pub fn new(
        config: ClaudeConfig,
        run: RunSettings,
        catalog: CatalogConfig,
    ) -> Result<Self, ConfigError> {
        let http = http_client(None)?;
        let auth = AnthropicAuth::resolve(config.api_key.as_deref(), config.auth_token.as_deref());
        let source = auth.clone().map(|auth| {
            Arc::new(ClaudeClient::new(http.clone(), &config.base_url, auth)) as Arc<dyn MessageSource>
        });
        let catalog_source = AnthropicModelSource {
            client: http,
            base_url: config.base_url.clone(),
            auth,
        };
        let models = ModelManager::new(
            BackendKind::Claude,
            &config.defaults,
            catalog,
            Arc::new(catalog_source),
        );
        Ok(Self {
            config,
            run,
            models,
            source,
        })
    }

    pub fn with_sources(
        config: ClaudeConfig,
        run: RunSettings,
        catalog: CatalogConfig,
        messages: Arc<dyn MessageSource>,
        models: Arc<dyn ModelCatalogSource>,
    ) -> Self {
        let manager = ModelManager::new(BackendKind::Claude, &config.defaults, catalog, models);
        Self {
            config,
            run,
            models: manager,
            source: Some(messages),
        }
    }

    fn message_source(&self) -> Result<Arc<dyn MessageSource>, BackendError> {
        self.source.clone().ok_or_else(|| {
            BackendError::MissingCredentials(
                "set ANTHROPIC_API_KEY (or ANTHROPIC_AUTH_TOKEN) to use the claude backend".into(),
            )
        })
    }

    fn template(&self) -> RequestTemplate {
        RequestTemplate {
            model: self
                .models
                .effective_model()
                .unwrap_or_else(|| DEFAULT_CLAUDE_MODEL.to_string()),
            effort: self.models.effective_effort(),
        }
    }
}

#[async_trait::async_trait]
impl Backend for ClaudeBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Claude
    }

    async fn stream_run(&self, prompt: &str) -> Result<RunStream, BackendError> {
        ensure_network(BackendKind::Claude, self.run.network_access)?;
        let source = self.message_source()?;
        let template = self.template();
        info!(model = %template.model, effort = ?template.effort, "starting claude run");
        let runner = CommandRunner {
            workspace: self.run.workspace.clone(),
            timeout: self.run.command_timeout,
        };
        let run = ClaudeRun::start(source, runner, template, prompt, self.config.max_turns).await?;
        let (abort, signal) = abort_pair();
        Ok(RunStream::new(run.into_stream(signal), abort))
    }

    async fn model_settings(&self) -> ModelSettings {
        self.models.settings().await
    }

    fn update_model_selection(&self, update: &ModelSelectionUpdate) {
        self.models.update_selection(update);
    }
}
