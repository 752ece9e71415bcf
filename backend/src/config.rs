use std::net::SocketAddr;
use std::path::Path;

use patchpilot_core::config::env_string;

pub const DEFAULT_BIND: &str = "127.0.0.1:8787";

/// Loads `.env` from the crate directory, then from the working directory.
/// Variables already set in the process win.
pub fn init() {
    let _ = dotenvy::from_path(Path::new(
        format!("{}/.env", env!("CARGO_MANIFEST_DIR")).as_str(),
    ));
    dotenvy::dotenv().ok();
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerConfig {
    pub bind: SocketAddr,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self {
            bind: parse_bind(env_string("PATCHPILOT_BIND").as_deref()),
        }
    }
}

fn parse_bind(raw: Option<&str>) -> SocketAddr {
    let default = SocketAddr::from(([127, 0, 0, 1], 8787));
    match raw {
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::error!(value = %raw, "invalid PATCHPILOT_BIND, using {DEFAULT_BIND}");
            default
        }),
        None => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_falls_back_to_loopback() {
        assert_eq!(parse_bind(None).to_string(), DEFAULT_BIND);
        assert_eq!(parse_bind(Some("not an address")).to_string(), DEFAULT_BIND);
        assert_eq!(parse_bind(Some("0.0.0.0:9000")).port(), 9000);
    }
}
