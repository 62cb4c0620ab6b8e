// ── Core error types ──
//
// User-facing errors from brainlink-core. Consumers never see raw frame
// decoding failures or socket errors; the `From<brainlink_api::Error>`
// impl folds them into the three session failure kinds.

use std::time::Duration;

use brainlink_api::Key;
use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Session errors ───────────────────────────────────────────────
    /// The controller could not be reached or the secure handshake failed.
    #[error("Cannot connect to controller: {reason}")]
    ConnectionFailed { reason: String },

    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    /// The login exchange broke in a way that is neither a refusal nor a
    /// network failure.
    #[error("Client error: {message}")]
    Client { message: String },

    #[error("Controller disconnected")]
    ControllerDisconnected,

    #[error("Timed out after {timeout:?} during {stage}")]
    Timeout { stage: &'static str, timeout: Duration },

    // ── Entity errors ────────────────────────────────────────────────
    #[error("Entity not found: {key}")]
    EntityNotFound { key: Key },

    #[error("Operation not supported: {operation} (requires {required})")]
    Unsupported { operation: String, required: String },

    #[error("Invalid option '{option}' for {key}")]
    InvalidOption { key: Key, option: String },

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },
}

impl CoreError {
    /// Exit-code style classification used by the CLI.
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::AuthenticationFailed { .. })
    }

    pub fn is_connection(&self) -> bool {
        matches!(
            self,
            Self::ConnectionFailed { .. } | Self::ControllerDisconnected | Self::Timeout { .. }
        )
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<brainlink_api::Error> for CoreError {
    fn from(err: brainlink_api::Error) -> Self {
        use brainlink_api::Error as Api;

        match err {
            Api::Timeout {
                stage,
                timeout,
            } => CoreError::Timeout {
                stage,
                timeout,
            },
            Api::ConnectionClosed => CoreError::ControllerDisconnected,
            Api::Communication(reason) => CoreError::ConnectionFailed { reason },
            Api::InvalidUrl(e) => CoreError::Config {
                message: format!("invalid controller URL: {e}"),
            },
            Api::Authentication { message } => CoreError::AuthenticationFailed { message },
            Api::Client(message) => CoreError::Client { message },
            Api::Deserialization { message, body } => CoreError::Client {
                message: format!("{message} (body: {body})"),
            },
            Api::NotConnected => CoreError::ControllerDisconnected,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_kinds_map_to_core_kinds() {
        let refused: CoreError = brainlink_api::Error::Communication("refused".into()).into();
        assert!(refused.is_connection());

        let rejected: CoreError = brainlink_api::Error::Authentication {
            message: "bad".into(),
        }
        .into();
        assert!(rejected.is_auth());

        let malformed: CoreError = brainlink_api::Error::Deserialization {
            message: "missing field `success`".into(),
            body: "{}".into(),
        }
        .into();
        assert!(matches!(malformed, CoreError::Client { .. }));
    }
}
