use crate::model::BackendKind;

/// A backend run failed after it was accepted: the vendor rejected it, the
/// connection or child process broke, or the native stream was malformed.
///
/// The [`message`](Self::message) is what the client sees in the terminal
/// `error` event, so it never repeats the backend name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    /// Non-success HTTP status, failed turn or vendor `error` event.
    #[error("{backend} rejected the run: {message}")]
    Rejected { backend: BackendKind, message: String },
    /// Network, child-process or pipe I/O failed.
    #[error("{backend} transport failed: {message}")]
    Transport { backend: BackendKind, message: String },
    /// A native event or response body did not have the expected shape.
    #[error("{backend} sent an invalid response: {message}")]
    Protocol { backend: BackendKind, message: String },
}

impl ProviderError {
    pub fn rejected(backend: BackendKind, message: impl Into<String>) -> Self {
        Self::Rejected {
            backend,
            message: message.into(),
        }
    }

    pub fn transport(backend: BackendKind, message: impl Into<String>) -> Self {
        Self::Transport {
            backend,
            message: message.into(),
        }
    }

    pub fn protocol(backend: BackendKind, message: impl Into<String>) -> Self {
        Self::Protocol {
            backend,
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Rejected { message, .. }
            | Self::Transport { message, .. }
            | Self::Protocol { message, .. } => message,
        }
    }
}

/// Failure returned by `Backend::stream_run`.
///
/// `ProviderUnavailable` and `MissingCredentials` are configuration errors and
/// are always raised before the first normalized event.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    /// Network access is disabled for this process.
    #[error("provider unavailable: {0}")]
    ProviderUnavailable(String),
    /// No usable key or token could be resolved.
    #[error("missing credentials: {0}")]
    MissingCredentials(String),
    /// The provider refused to open the stream.
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

impl BackendError {
    /// True for the configuration class of errors (raised before streaming).
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::ProviderUnavailable(_) | Self::MissingCredentials(_)
        )
    }
}

/// Startup configuration error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("unknown backend `{0}` (expected codex, claude or openai)")]
    UnknownBackend(String),
    #[error("invalid value for {key}: {message}")]
    Invalid { key: String, message: String },
    #[error("failed to build HTTP client: {0}")]
    HttpClient(String),
}
