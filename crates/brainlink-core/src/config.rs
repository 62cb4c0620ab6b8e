// ── Runtime session configuration ──
//
// Describes *where* the controller is and *who* logs in. Never touches
// disk; the CLI builds a `SessionConfig` from a profile and hands it in.

use std::time::Duration;

use brainlink_api::{ConnectionOptions, normalize_host};
use secrecy::SecretString;
use url::Url;

use crate::error::CoreError;

/// Everything the supervisor needs to keep one controller connected.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Bare `host[:port]` or a `ws://` / `wss://` URL.
    pub host: String,
    pub username: String,
    pub password: SecretString,
    /// Area assigned to every materialized entity.
    pub area: Option<String>,
    /// Bound on connect, handshake and login.
    pub timeout: Duration,
    /// Ask the controller to visit every screen after login.
    pub traverse_screens: bool,
}

impl SessionConfig {
    pub fn new(host: impl Into<String>, username: impl Into<String>, password: SecretString) -> Self {
        Self {
            host: host.into(),
            username: username.into(),
            password,
            area: None,
            timeout: Duration::from_secs(30),
            traverse_screens: true,
        }
    }

    /// WebSocket URL of the controller.
    pub fn ws_url(&self) -> Result<Url, CoreError> {
        normalize_host(&self.host).map_err(|e| CoreError::Config {
            message: format!("invalid host '{}': {e}", self.host),
        })
    }

    pub(crate) fn connection_options(&self) -> ConnectionOptions {
        ConnectionOptions {
            timeout: self.timeout,
            traverse_screens: self.traverse_screens,
            ..ConnectionOptions::default()
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn bare_host_becomes_ws_url() {
        let cfg = SessionConfig::new("10.0.0.5", "admin", SecretString::from("x".to_string()));
        assert_eq!(cfg.ws_url().unwrap().as_str(), "ws://10.0.0.5/");
    }

    #[test]
    fn bad_host_is_config_error() {
        let cfg = SessionConfig::new("ftp://brain", "admin", SecretString::from("x".to_string()));
        assert!(matches!(cfg.ws_url(), Err(CoreError::Config { .. })));
    }
}
