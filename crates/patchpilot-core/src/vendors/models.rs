//! `GET /v1/models` catalog sources for the HTTP providers.

use serde::Deserialize;

use crate::catalog::ModelCatalogSource;
use crate::errors::ProviderError;
use crate::model::BackendKind;

use super::status_error;

pub(crate) const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Deserialize)]
struct ModelList {
    #[serde(default)]
    data: Vec<ModelEntry>,
}

#[derive(Deserialize)]
struct ModelEntry {
    id: String,
}

/// Families served by the OpenAI models endpoint that cannot drive a coding
/// session.
const NON_TEXT_MARKERS: &[&str] = &[
    "audio",
    "realtime",
    "transcribe",
    "tts",
    "image",
    "embedding",
    "moderation",
    "whisper",
    "dall-e",
    "search",
];

/// Keeps chat/reasoning models, drops audio, image, embedding and similar.
pub(crate) fn is_text_model(id: &str) -> bool {
    let id = id.to_ascii_lowercase();
    let family = id.starts_with("gpt-")
        || id.starts_with("o1")
        || id.starts_with("o3")
        || id.starts_with("o4")
        || id.starts_with("codex");
    family && !NON_TEXT_MARKERS.iter().any(|marker| id.contains(marker))
}

pub(crate) fn models_url(base_url: &str) -> String {
    format!("{}/v1/models", base_url.trim_end_matches('/'))
}

/// Fetches the OpenAI catalog with a bearer credential.
pub(crate) async fn fetch_openai_models(
    client: &reqwest::Client,
    backend: BackendKind,
    base_url: &str,
    bearer: &str,
) -> Result<Vec<String>, ProviderError> {
    let response = client
        .get(models_url(base_url))
        .bearer_auth(bearer)
        .send()
        .await
        .map_err(|e| ProviderError::transport(backend, format!("models request failed: {e}")))?;
    if !response.status().is_success() {
        return Err(status_error(backend, "models request", response).await);
    }
    let list: ModelList = response.json().await.map_err(|e| {
        ProviderError::protocol(backend, format!("invalid models response: {e}"))
    })?;
    Ok(list
        .data
        .into_iter()
        .map(|entry| entry.id)
        .filter(|id| is_text_model(id))
        .collect())
}

pub(crate) struct OpenAiModelSource {
    pub client: reqwest::Client,
    pub base_url: String,
    pub api_key: Option<String>,
}

#[async_trait::async_trait]
impl ModelCatalogSource for OpenAiModelSource {
    async fn fetch_models(&self) -> Result<Vec<String>, ProviderError> {
        let backend = BackendKind::OpenAi;
        let Some(key) = self.api_key.as_deref() else {
            return Err(ProviderError::rejected(backend, "OPENAI_API_KEY is not set"));
        };
        fetch_openai_models(&self.client, backend, &self.base_url, key).await
    }
}

/// Anthropic credential: an API key, or an OAuth token sent as bearer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum AnthropicAuth {
    ApiKey(String),
    Bearer(String),
}

impl AnthropicAuth {
    pub fn resolve(api_key: Option<&str>, auth_token: Option<&str>) -> Option<Self> {
        api_key
            .map(|key| Self::ApiKey(key.to_string()))
            .or_else(|| auth_token.map(|token| Self::Bearer(token.to_string())))
    }

    pub fn apply(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let request = request.header("anthropic-version", ANTHROPIC_VERSION);
        match self {
            Self::ApiKey(key) => request.header("x-api-key", key),
            Self::Bearer(token) => request.bearer_auth(token),
        }
    }
}

pub(crate) struct AnthropicModelSource {
    pub client: reqwest::Client,
    pub base_url: String,
    pub auth: Option<AnthropicAuth>,
}

#[async_trait::async_trait]
impl ModelCatalogSource for AnthropicModelSource {
    async fn fetch_models(&self) -> Result<Vec<String>, ProviderError> {
        let backend = BackendKind::Claude;
        let Some(auth) = &self.auth else {
            return Err(ProviderError::rejected(backend, "ANTHROPIC_API_KEY is not set"));
        };
        let response = auth
            .apply(self.client.get(models_url(&self.base_url)))
            .query(&[("limit", "100")])
            .send()
            .await
            .map_err(|e| {
                ProviderError::transport(backend, format!("models request failed: {e}"))
            })?;
        if !response.status().is_success() {
            return Err(status_error(backend, "models request", response).await);
        }
        let list: ModelList = response.json().await.map_err(|e| {
            ProviderError::protocol(backend, format!("invalid models response: {e}"))
        })?;
        Ok(list.data.into_iter().map(|entry| entry.id).collect())
    }
}
