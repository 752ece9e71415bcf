use std::pin::Pin;

use serde_json::{Value, json};
use tracing::debug;

use crate::errors::ProviderError;
use crate::model::{BackendKind, ReasoningEffort};
use crate::vendors::models::AnthropicAuth;
use crate::vendors::{sse, status_error};

use super::tools::tool_definitions;

pub(crate) const BACKEND: BackendKind = BackendKind::Claude;

const SYSTEM_PROMPT: &str = "You are a coding agent working inside a local repository. \
Use run_command to inspect the code and run checks. Never edit files directly: when you have a \
change ready, call propose_diff with a unified diff relative to the repository root, then \
summarize what it does.";

/// Output tokens available beyond the thinking budget.
const RESPONSE_TOKENS: u32 = 8192;

/// Native Messages API events of one request.
pub type NativeStream =
    Pin<Box<dyn futures::Stream<Item = Result<Value, ProviderError>> + Send + 'static>>;

/// Opens one streaming Messages request. Each tool round trip is a new call.
#[async_trait::async_trait]
pub trait MessageSource: Send + Sync {
    async fn open(&self, body: &Value) -> Result<NativeStream, ProviderError>;
}

/// Per-run request settings, fixed when the run starts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestTemplate {
    pub model: String,
    pub effort: Option<ReasoningEffort>,
}

impl RequestTemplate {
    /// Extended-thinking budget for the selected effort.
    pub fn thinking_budget(&self) -> Option<u32> {
        match self.effort? {
            ReasoningEffort::Minimal => None,
            ReasoningEffort::Low => Some(2048),
            ReasoningEffort::Medium => Some(8192),
            ReasoningEffort::High => Some(16384),
        }
    }

    pub fn body(&self, messages: &[Value]) -> Value {
        let budget = self.thinking_budget();
        let mut body = json!({
            "model": self.model,
            "max_tokens": budget.unwrap_or(0) + RESPONSE_TOKENS,
            "stream": true,
            "system": SYSTEM_PROMPT,
            "tools": tool_definitions(),
            "messages": messages,
        });
        if let Some(budget) = budget {
            body["thinking"] = json!({ "type": "enabled", "budget_tokens": budget });
        }
        body
    }
}

pub struct ClaudeClient {
    http: reqwest::Client,
    base_url: String,
    auth: AnthropicAuth,
}

impl ClaudeClient {
    pub(crate) fn new(http: reqwest::Client, base_url: &str, auth: AnthropicAuth) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            auth,
        }
    }

    fn messages_url(&self) -> String {
        format!("{}/v1/messages", self.base_url)
    }
}

#[async_trait::async_trait]
impl MessageSource for ClaudeClient {
    async fn open(&self, body: &Value) -> Result<NativeStream, ProviderError> {
        debug!(model = %body["model"], messages = body["messages"].as_array().map_or(0, Vec::len), "opening claude messages stream");
        let response = self
            .auth
            .apply(self.http.post(self.messages_url()))
            .json(body)
            .send()
            .await
            .map_err(|e| {
                ProviderError::transport(BACKEND, format!("Claude request failed: {e}"))
            })?;
        if !response.status().is_success() {
            return Err(status_error(BACKEND, "Claude messages request", response).await);
        }
        Ok(Box::pin(sse::json_frames(BACKEND, response)))
    }
}
