use std::path::Path;

use serde::Deserialize;

/// Credential usable by the Codex CLI.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CodexCredential {
    /// API key from the environment or `auth.json`; forwarded to the child.
    ApiKey(String),
    /// ChatGPT sign-in token from `auth.json`; the CLI reads it itself.
    Token(String),
}

impl CodexCredential {
    pub fn bearer(&self) -> &str {
        match self {
            Self::ApiKey(key) | Self::Token(key) => key,
        }
    }
}

#[derive(Deserialize)]
struct AuthFile {
    #[serde(rename = "OPENAI_API_KEY", default)]
    openai_api_key: Option<String>,
    #[serde(default)]
    tokens: Option<AuthTokens>,
}

#[derive(Deserialize)]
struct AuthTokens {
    #[serde(default)]
    access_token: Option<String>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Parses the contents of `auth.json`. Malformed files yield nothing.
pub fn parse_auth_file(text: &str) -> Option<CodexCredential> {
    let file: AuthFile = match serde_json::from_str(text) {
        Ok(file) => file,
        Err(e) => {
            tracing::warn!(error = %e, "ignoring malformed codex auth file");
            return None;
        }
    };
    non_empty(file.openai_api_key)
        .map(CodexCredential::ApiKey)
        .or_else(|| {
            non_empty(file.tokens.and_then(|t| t.access_token)).map(CodexCredential::Token)
        })
}

/// Environment key first, then `<home>/auth.json`.
pub async fn resolve(api_key: Option<&str>, home: &Path) -> Option<CodexCredential> {
    if let Some(key) = non_empty(api_key.map(ToOwned::to_owned)) {
        return Some(CodexCredential::ApiKey(key));
    }
    let text = tokio::fs::read_to_string(home.join("auth.json")).await.ok()?;
    parse_auth_file(&text)
}
