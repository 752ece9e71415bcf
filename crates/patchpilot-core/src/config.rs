//! Process configuration, read once at startup from the environment.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::errors::ConfigError;
use crate::model::{BackendKind, ReasoningEffort};

pub(crate) fn parse_bool_env(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" | "enabled" => Some(true),
        "0" | "false" | "no" | "off" | "disabled" => Some(false),
        _ => None,
    }
}

/// Trimmed, non-empty value of `key`.
pub fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Parses `key`, logging and falling back to `default` on a bad value.
pub fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    match env_string(key) {
        Some(raw) => match raw.parse() {
            Ok(val) => val,
            Err(_) => {
                tracing::error!(key, value = %raw, "error parsing environment variable, using default");
                default
            }
        },
        None => default,
    }
}

pub fn env_bool(key: &str, default: bool) -> bool {
    match env_string(key) {
        Some(raw) => parse_bool_env(&raw).unwrap_or_else(|| {
            tracing::error!(key, value = %raw, "error parsing boolean environment variable, using default");
            default
        }),
        None => default,
    }
}

fn env_effort(key: &str) -> Option<ReasoningEffort> {
    let raw = env_string(key)?;
    match raw.parse() {
        Ok(effort) => Some(effort),
        Err(()) => {
            tracing::warn!(key, value = %raw, "ignoring unknown reasoning effort");
            None
        }
    }
}

fn env_list(key: &str) -> Option<Vec<String>> {
    env_string(key).map(|raw| {
        raw.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(ToOwned::to_owned)
            .collect()
    })
}

/// Catalog cache behavior shared by every backend.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CatalogConfig {
    pub ttl: Duration,
    pub fetch_timeout: Duration,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(300),
            fetch_timeout: Duration::from_millis(10_000),
        }
    }
}

/// Default model/effort and static catalog extras for one provider.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProviderDefaults {
    pub model: Option<String>,
    pub effort: Option<ReasoningEffort>,
    pub extra_models: Vec<String>,
}

impl ProviderDefaults {
    fn from_env(prefix: &str) -> Self {
        Self {
            model: env_string(&format!("{prefix}_MODEL")),
            effort: env_effort(&format!("{prefix}_EFFORT")),
            extra_models: env_list(&format!("{prefix}_EXTRA_MODELS")).unwrap_or_default(),
        }
    }
}

/// Settings every run needs regardless of provider.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunSettings {
    pub workspace: PathBuf,
    pub network_access: bool,
    pub command_timeout: Duration,
}

impl RunSettings {
    pub fn new(workspace: impl Into<PathBuf>) -> Self {
        Self {
            workspace: workspace.into(),
            network_access: true,
            command_timeout: Duration::from_secs(120),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CodexConfig {
    pub bin: String,
    pub home: PathBuf,
    pub api_key: Option<String>,
    pub openai_base_url: String,
    pub defaults: ProviderDefaults,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClaudeConfig {
    pub api_key: Option<String>,
    pub auth_token: Option<String>,
    pub base_url: String,
    pub max_turns: usize,
    pub defaults: ProviderDefaults,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OpenAiConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub defaults: ProviderDefaults,
}

pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com";
pub const DEFAULT_ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";
pub const DEFAULT_CLAUDE_MODEL: &str = "claude-sonnet-4-5";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-5";

/// Everything the core reads from the environment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CoreConfig {
    pub backend: BackendKind,
    pub run: RunSettings,
    pub catalog: CatalogConfig,
    pub codex: CodexConfig,
    pub claude: ClaudeConfig,
    pub openai: OpenAiConfig,
}

impl CoreConfig {
    /// Builds the configuration from environment variables.
    ///
    /// Only an unknown `PATCHPILOT_BACKEND` is fatal; every other bad value is
    /// logged and replaced by its default.
    pub fn from_env() -> Result<Self, ConfigError> {
        let backend = match env_string("PATCHPILOT_BACKEND") {
            Some(raw) => raw.parse()?,
            None => BackendKind::Codex,
        };
        let workspace = env_string("PATCHPILOT_WORKSPACE")
            .map(PathBuf::from)
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."));

        let run = RunSettings {
            workspace,
            network_access: env_bool("PATCHPILOT_NETWORK_ACCESS", true),
            command_timeout: Duration::from_secs(env_parse("PATCHPILOT_COMMAND_TIMEOUT_SECS", 120)),
        };
        let catalog = CatalogConfig {
            ttl: Duration::from_secs(env_parse("PATCHPILOT_MODEL_CACHE_TTL_SECS", 300)),
            fetch_timeout: Duration::from_millis(env_parse(
                "PATCHPILOT_MODEL_FETCH_TIMEOUT_MS",
                10_000,
            )),
        };

        let openai_api_key = env_string("OPENAI_API_KEY");
        let openai_base_url =
            env_string("OPENAI_BASE_URL").unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string());

        let codex_home = codex_home();
        let mut codex_defaults = ProviderDefaults::from_env("CODEX");
        let local = LocalDefaults::load(&codex_home.join("config.toml"));
        if codex_defaults.model.is_none() {
            codex_defaults.model = local.model;
        }
        if codex_defaults.effort.is_none() {
            codex_defaults.effort = local.effort;
        }
        if env_string("CODEX_EXTRA_MODELS").is_none() {
            codex_defaults.extra_models = vec!["gpt-5".into(), "gpt-5-codex".into()];
        }

        let codex = CodexConfig {
            bin: env_string("CODEX_BIN").unwrap_or_else(|| "codex".to_string()),
            home: codex_home,
            api_key: env_string("CODEX_API_KEY").or_else(|| openai_api_key.clone()),
            openai_base_url: openai_base_url.clone(),
            defaults: codex_defaults,
        };

        let mut claude_defaults = ProviderDefaults::from_env("CLAUDE");
        if claude_defaults.model.is_none() {
            claude_defaults.model = Some(DEFAULT_CLAUDE_MODEL.to_string());
        }
        let claude = ClaudeConfig {
            api_key: env_string("ANTHROPIC_API_KEY"),
            auth_token: env_string("ANTHROPIC_AUTH_TOKEN"),
            base_url: env_string("ANTHROPIC_BASE_URL")
                .unwrap_or_else(|| DEFAULT_ANTHROPIC_BASE_URL.to_string()),
            max_turns: env_parse("CLAUDE_MAX_TURNS", 24),
            defaults: claude_defaults,
        };

        let mut openai_defaults = ProviderDefaults::from_env("OPENAI");
        if openai_defaults.model.is_none() {
            openai_defaults.model = Some(DEFAULT_OPENAI_MODEL.to_string());
        }
        let openai = OpenAiConfig {
            api_key: openai_api_key,
            base_url: openai_base_url,
            defaults: openai_defaults,
        };

        Ok(Self {
            backend,
            run,
            catalog,
            codex,
            claude,
            openai,
        })
    }
}

/// `$CODEX_HOME`, else `~/.codex`.
pub fn codex_home() -> PathBuf {
    if let Some(home) = env_string("CODEX_HOME") {
        return PathBuf::from(home);
    }
    env_string("HOME")
        .or_else(|| env_string("USERPROFILE"))
        .map(|home| Path::new(&home).join(".codex"))
        .unwrap_or_else(|| PathBuf::from(".codex"))
}

/// Model defaults read from a local Codex `config.toml`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LocalDefaults {
    pub model: Option<String>,
    pub effort: Option<ReasoningEffort>,
}

impl LocalDefaults {
    /// Missing or unreadable files yield empty defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(text) => Self::parse(&text),
            Err(_) => Self::default(),
        }
    }

    pub fn parse(text: &str) -> Self {
        let table = match text.parse::<toml::Table>() {
            Ok(table) => table,
            Err(e) => {
                tracing::warn!(error = %e, "ignoring malformed local config");
                return Self::default();
            }
        };
        let model = table
            .get("model")
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(ToOwned::to_owned);
        let effort = table
            .get("model_reasoning_effort")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse().ok());
        Self { model, effort }
    }
}
