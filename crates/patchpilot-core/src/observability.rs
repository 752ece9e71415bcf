//! Process-wide `tracing` subscriber.

use std::path::{Path, PathBuf};

use once_cell::sync::OnceCell;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

use crate::config::{env_bool, env_string};

/// Filter used when neither `PATCHPILOT_LOG_LEVEL` nor `RUST_LOG` is usable.
/// Connection-level chatter from the HTTP stacks stays out of the default view.
const DEFAULT_FILTER: &str = "info,hyper=warn,hyper_util=warn,reqwest=warn";
const DEFAULT_LOG_FILE: &str = "patchpilot.logs.jsonl";

static INIT: OnceCell<()> = OnceCell::new();

/// Logging settings.
///
/// - `PATCHPILOT_OBSERVABILITY`: `false` disables logging entirely.
/// - `PATCHPILOT_LOG_LEVEL`: filter directives (`debug`, `patchpilot_core=trace`, ...),
///   taking precedence over `RUST_LOG`.
/// - `PATCHPILOT_JSON_LOG_PATH`: write JSONL to this file instead of compact stderr.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LogConfig {
    pub disabled: bool,
    pub filter: Option<String>,
    pub json_path: Option<PathBuf>,
}

impl LogConfig {
    pub fn from_env() -> Self {
        Self {
            disabled: !env_bool("PATCHPILOT_OBSERVABILITY", true),
            filter: env_string("PATCHPILOT_LOG_LEVEL"),
            json_path: env_string("PATCHPILOT_JSON_LOG_PATH").map(PathBuf::from),
        }
    }

    fn env_filter(&self) -> EnvFilter {
        self.filter
            .as_deref()
            .and_then(|directives| EnvFilter::try_new(directives).ok())
            .or_else(|| EnvFilter::try_from_default_env().ok())
            .unwrap_or_else(|| EnvFilter::new(DEFAULT_FILTER))
    }
}

/// Directory and file name for the JSONL appender.
fn log_file(path: &Path) -> (PathBuf, String) {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(DEFAULT_LOG_FILE)
        .to_string();
    (dir, name)
}

/// Installs the subscriber once per process. Later calls are no-ops.
pub fn init_observability(config: &LogConfig) {
    INIT.get_or_init(|| {
        if config.disabled {
            return;
        }
        let filter = config.env_filter();
        match &config.json_path {
            Some(path) => {
                let (dir, name) = log_file(path);
                if let Err(e) = std::fs::create_dir_all(&dir) {
                    eprintln!("cannot create log directory {}: {e}", dir.display());
                }
                let layer = tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_writer(tracing_appender::rolling::never(dir, name));
                let _ = tracing_subscriber::registry().with(filter).with(layer).try_init();
            }
            None => {
                let layer = tracing_subscriber::fmt::layer()
                    .compact()
                    .with_target(false)
                    .with_writer(std::io::stderr);
                let _ = tracing_subscriber::registry().with(filter).with(layer).try_init();
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_file_splits_directory_and_name() {
        assert_eq!(
            log_file(Path::new("logs/run.jsonl")),
            (PathBuf::from("logs"), "run.jsonl".to_string())
        );
        assert_eq!(
            log_file(Path::new("run.jsonl")),
            (PathBuf::from("."), "run.jsonl".to_string())
        );
        assert_eq!(log_file(Path::new("/")).1, DEFAULT_LOG_FILE);
    }

    #[test]
    fn explicit_filter_wins() {
        let config = LogConfig {
            filter: Some("patchpilot_core=trace".into()),
            ..LogConfig::default()
        };
        assert_eq!(config.env_filter().to_string(), "patchpilot_core=trace");
    }
}
