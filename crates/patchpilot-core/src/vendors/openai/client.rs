use std::pin::Pin;

use serde_json::{Value, json};
use tracing::debug;

use crate::errors::ProviderError;
use crate::model::{BackendKind, ReasoningEffort};
use crate::vendors::{sse, status_error};

pub(crate) const BACKEND: BackendKind = BackendKind::OpenAi;
pub(crate) const PROPOSE_DIFF: &str = "propose_diff";

const INSTRUCTIONS: &str = "You are a coding agent. The user's repository is not mounted in your \
sandbox, so use the code interpreter only for scratch work. When you have a change ready, call \
propose_diff with a unified diff relative to the repository root, then summarize what it does.";

/// Native Responses API events of one request.
pub type ResponseStream =
    Pin<Box<dyn futures::Stream<Item = Result<Value, ProviderError>> + Send + 'static>>;

/// Opens one streaming Responses request.
#[async_trait::async_trait]
pub trait ResponseSource: Send + Sync {
    async fn open(&self, body: &Value) -> Result<ResponseStream, ProviderError>;
}

pub(crate) fn build_request_body(
    model: &str,
    effort: Option<ReasoningEffort>,
    prompt: &str,
) -> Value {
    let mut body = json!({
        "model": model,
        "input": [
            { "role": "system", "content": INSTRUCTIONS },
            { "role": "user", "content": prompt },
        ],
        "stream": true,
        "store": false,
        "tools": [
            { "type": "code_interpreter", "container": { "type": "auto" } },
            {
                "type": "function",
                "name": PROPOSE_DIFF,
                "description": "Propose a change as a unified diff (git apply format) relative to \
                    the repository root. The user reviews and applies it.",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "patch": { "type": "string", "description": "Unified diff with a/ and b/ prefixes." }
                    },
                    "required": ["patch"],
                    "additionalProperties": false
                },
                "strict": true
            }
        ],
    });
    if let Some(effort) = effort {
        body["reasoning"] = json!({ "effort": effort.as_str(), "summary": "auto" });
    }
    body
}

pub struct OpenAiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl OpenAiClient {
    pub(crate) fn new(http: reqwest::Client, base_url: &str, api_key: String) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }

    fn responses_url(&self) -> String {
        format!("{}/v1/responses", self.base_url)
    }
}

#[async_trait::async_trait]
impl ResponseSource for OpenAiClient {
    async fn open(&self, body: &Value) -> Result<ResponseStream, ProviderError> {
        debug!(model = %body["model"], "starting openai responses stream");
        let response = self
            .http
            .post(self.responses_url())
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                ProviderError::transport(BACKEND, format!("OpenAI request failed: {e}"))
            })?;
        if !response.status().is_success() {
            return Err(status_error(BACKEND, "OpenAI responses request", response).await);
        }
        Ok(Box::pin(sse::json_frames(BACKEND, response)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_body_declares_both_tools_and_never_stores() {
        let body = build_request_body("gpt-5", None, "fix it");
        assert_eq!(body["model"], "gpt-5");
        assert_eq!(body["stream"], true);
        assert_eq!(body["store"], false);
        assert_eq!(body["input"][1]["content"], "fix it");
        assert_eq!(body["tools"][0]["type"], "code_interpreter");
        assert_eq!(body["tools"][1]["name"], PROPOSE_DIFF);
        assert!(body.get("reasoning").is_none());
    }

    #[test]
    fn effort_requests_a_reasoning_summary() {
        let body = build_request_body("gpt-5", Some(ReasoningEffort::Low), "x");
        assert_eq!(body["reasoning"], json!({"effort": "low", "summary": "auto"}));
    }

    #[test]
    fn responses_url_trims_trailing_slash() {
        let client = OpenAiClient::new(reqwest::Client::new(), "http://localhost:9/", "k".into());
        assert_eq!(client.responses_url(), "http://localhost:9/v1/responses");
    }
}
