//! OpenAI backend over the streaming Responses API.
//!
//! Runs are single requests: the hosted code interpreter executes server
//! side and `propose_diff` calls are reported, never answered.

mod client;
mod translator;

use std::sync::Arc;

use tracing::info;

pub use client::{OpenAiClient, ResponseSource, ResponseStream};
pub use translator::OpenAiTranslator;

use crate::backend::{Backend, RunStream, abort_pair, ensure_network};
use crate::catalog::{ModelCatalogSource, ModelManager};
use crate::config::{CatalogConfig, DEFAULT_OPENAI_MODEL, OpenAiConfig, RunSettings};
use crate::errors::{BackendError, ConfigError};
use crate::model::{BackendKind, ModelSelectionUpdate, ModelSettings};
use crate::vendors::models::OpenAiModelSource;
use crate::vendors::{http_client, translated_stream};

pub struct OpenAiBackend {
    run: RunSettings,
    models: ModelManager,
    /// `None` when `OPENAI_API_KEY` is unset.
    source: Option<Arc<dyn ResponseSource>>,
}

impl OpenAiBackend {
    pub fn new(
        config: OpenAiConfig,
        run: RunSettings,
        catalog: CatalogConfig,
    ) -> Result<Self, ConfigError> {
        let http = http_client(None)?;
        let source = config.api_key.clone().map(|key| {
            Arc::new(OpenAiClient::new(http.clone(), &config.base_url, key)) as Arc<dyn ResponseSource>
        });
        let catalog_source = OpenAiModelSource {
            client: http,
            base_url: config.base_url.clone(),
            api_key: config.api_key.clone(),
        };
        let models = ModelManager::new(
            BackendKind::OpenAi,
            &config.defaults,
            catalog,
            Arc::new(catalog_source),
        );
        Ok(Self {
            run,
            models,
            source,
        })
    }

    pub fn with_sources(
        config: OpenAiConfig,
        run: RunSettings,
        catalog: CatalogConfig,
        responses: Arc<dyn ResponseSource>,
        models: Arc<dyn ModelCatalogSource>,
    ) -> Self {
        let manager = ModelManager::new(BackendKind::OpenAi, &config.defaults, catalog, models);
        Self {
            run,
            models: manager,
            source: Some(responses),
        }
    }
}

#[async_trait::async_trait]
impl Backend for OpenAiBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::OpenAi
    }

    async fn stream_run(&self, prompt: &str) -> Result<RunStream, BackendError> {
        ensure_network(BackendKind::OpenAi, self.run.network_access)?;
        let source = self.source.clone().ok_or_else(|| {
            BackendError::MissingCredentials("set OPENAI_API_KEY to use the openai backend".into())
        })?;
        let model = self
            .models
            .effective_model()
            .unwrap_or_else(|| DEFAULT_OPENAI_MODEL.to_string());
        let effort = self.models.effective_effort();
        info!(%model, ?effort, "starting openai run");

        let body = client::build_request_body(&model, effort, prompt);
        let native = source.open(&body).await?;
        let (abort, signal) = abort_pair();
        Ok(RunStream::new(
            translated_stream(native, OpenAiTranslator::new(), signal),
            abort,
        ))
    }

    async fn model_settings(&self) -> ModelSettings {
        self.models.settings().await
    }

    fn update_model_selection(&self, update: &ModelSelectionUpdate) {
        self.models.update_selection(update);
    }
}
