use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;

/// The three concrete backends. Chosen once per process.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Codex,
    Claude,
    #[serde(rename = "openai")]
    OpenAi,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Codex => "codex",
            Self::Claude => "claude",
            Self::OpenAi => "openai",
        }
    }

    /// Effort values this backend accepts, in display order.
    pub fn effort_options(&self) -> &'static [ReasoningEffort] {
        match self {
            Self::Codex | Self::OpenAi => &[
                ReasoningEffort::Minimal,
                ReasoningEffort::Low,
                ReasoningEffort::Medium,
                ReasoningEffort::High,
            ],
            Self::Claude => &[
                ReasoningEffort::Low,
                ReasoningEffort::Medium,
                ReasoningEffort::High,
            ],
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "codex" => Ok(Self::Codex),
            "claude" | "anthropic" => Ok(Self::Claude),
            "openai" => Ok(Self::OpenAi),
            other => Err(ConfigError::UnknownBackend(other.to_string())),
        }
    }
}

/// Reasoning effort hint (when supported by the selected backend).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningEffort {
    /// Smallest reasoning budget.
    Minimal,
    /// Lower latency / cost-oriented reasoning.
    Low,
    /// Balanced reasoning.
    Medium,
    /// Higher effort reasoning.
    High,
}

impl ReasoningEffort {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Minimal => "minimal",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

impl fmt::Display for ReasoningEffort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReasoningEffort {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "minimal" => Ok(Self::Minimal),
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            _ => Err(()),
        }
    }
}

/// Locally held active selection. `None` means "use the provider default".
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ModelSelection {
    pub model: Option<String>,
    pub effort: Option<ReasoningEffort>,
}

/// Snapshot returned by `GET /api/model` and `Backend::model_settings`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelSettings {
    pub model: Option<String>,
    pub default_model: Option<String>,
    pub available_models: Vec<String>,
    pub effort: Option<ReasoningEffort>,
    pub default_effort: Option<ReasoningEffort>,
    pub effort_options: Vec<ReasoningEffort>,
}

/// One field of a partial selection update.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum FieldUpdate {
    /// Field absent or malformed: leave the current value alone.
    #[default]
    Keep,
    /// Explicit `null` or empty string: fall back to the provider default.
    Clear,
    /// Non-empty string, already trimmed.
    Set(String),
}

impl FieldUpdate {
    fn from_json(value: Option<&serde_json::Value>) -> Self {
        match value {
            None => Self::Keep,
            Some(serde_json::Value::Null) => Self::Clear,
            Some(serde_json::Value::String(s)) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    Self::Clear
                } else {
                    Self::Set(trimmed.to_string())
                }
            }
            Some(_) => Self::Keep,
        }
    }
}

/// Partial `{model?, effort?}` update. Unknown fields are ignored.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ModelSelectionUpdate {
    pub model: FieldUpdate,
    pub effort: FieldUpdate,
}

impl ModelSelectionUpdate {
    /// Interprets an arbitrary JSON body. Never fails: anything that is not an
    /// object, or any field of the wrong type, is treated as absent.
    pub fn from_json(value: &serde_json::Value) -> Self {
        Self {
            model: FieldUpdate::from_json(value.get("model")),
            effort: FieldUpdate::from_json(value.get("effort")),
        }
    }

    pub fn model(value: impl Into<String>) -> Self {
        Self::from_json(&serde_json::json!({ "model": value.into() }))
    }

    pub fn effort(value: impl Into<String>) -> Self {
        Self::from_json(&serde_json::json!({ "effort": value.into() }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_kind_parses_case_insensitively() {
        assert_eq!("Codex".parse::<BackendKind>(), Ok(BackendKind::Codex));
        assert_eq!(" openai ".parse::<BackendKind>(), Ok(BackendKind::OpenAi));
        assert_eq!("anthropic".parse::<BackendKind>(), Ok(BackendKind::Claude));
        assert!(matches!(
            "gemini".parse::<BackendKind>(),
            Err(ConfigError::UnknownBackend(name)) if name == "gemini"
        ));
    }

    #[test]
    fn selection_update_reads_null_empty_and_malformed_fields() {
        let update = ModelSelectionUpdate::from_json(&serde_json::json!({
            "model": null,
            "effort": 7,
            "other": "ignored"
        }));
        assert_eq!(update.model, FieldUpdate::Clear);
        assert_eq!(update.effort, FieldUpdate::Keep);

        let update = ModelSelectionUpdate::from_json(&serde_json::json!({"model": "  x  "}));
        assert_eq!(update.model, FieldUpdate::Set("x".into()));
        assert_eq!(update.effort, FieldUpdate::Keep);

        let update = ModelSelectionUpdate::from_json(&serde_json::json!("not an object"));
        assert_eq!(update, ModelSelectionUpdate::default());
    }

    #[test]
    fn settings_serialize_in_camel_case() {
        let settings = ModelSettings {
            model: None,
            default_model: Some("gpt-5".into()),
            available_models: vec!["gpt-5".into()],
            effort: Some(ReasoningEffort::High),
            default_effort: None,
            effort_options: BackendKind::Claude.effort_options().to_vec(),
        };
        let value = serde_json::to_value(&settings).expect("serialize");
        assert_eq!(value["defaultModel"], "gpt-5");
        assert_eq!(value["effort"], "high");
        assert_eq!(value["model"], serde_json::Value::Null);
        assert_eq!(value["effortOptions"], serde_json::json!(["low", "medium", "high"]));
    }
}
