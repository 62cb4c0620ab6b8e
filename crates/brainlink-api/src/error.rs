use std::time::Duration;

use thiserror::Error;

/// Top-level error type for the `brainlink-api` crate.
///
/// Every failure falls into one of three [`ErrorKind`]s so callers that
/// test credentials can tell "unreachable" from "wrong password" from
/// "the controller said something we did not understand".
/// `brainlink-core` maps these into user-facing diagnostics.
#[derive(Debug, Error)]
pub enum Error {
    // ── Communication ───────────────────────────────────────────────
    /// Socket could not be opened, or the secure handshake failed.
    #[error("Communication error: {0}")]
    Communication(String),

    /// A handshake stage did not complete in time.
    #[error("Timed out after {timeout:?} during {stage}")]
    Timeout { stage: &'static str, timeout: Duration },

    /// The controller closed the connection (or the reader stopped).
    #[error("Connection closed")]
    ConnectionClosed,

    /// Host could not be turned into a WebSocket URL.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    // ── Authentication ──────────────────────────────────────────────
    /// The controller rejected the supplied credentials.
    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    // ── Client ──────────────────────────────────────────────────────
    /// Unexpected failure while driving the login sequence.
    #[error("Client error: {0}")]
    Client(String),

    /// A frame could not be decoded, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },

    /// Operation requires a stage of the session that has not run yet.
    #[error("Not connected")]
    NotConnected,
}

/// Coarse classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Communication,
    Authentication,
    Client,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Communication(_) | Self::Timeout { .. } | Self::ConnectionClosed | Self::InvalidUrl(_) => {
                ErrorKind::Communication
            }
            Self::Authentication { .. } => ErrorKind::Authentication,
            Self::Client(_) | Self::Deserialization { .. } | Self::NotConnected => ErrorKind::Client,
        }
    }

    /// Returns `true` if the controller explicitly refused the credentials.
    pub fn is_auth_rejected(&self) -> bool {
        matches!(self, Self::Authentication { .. })
    }

    /// Re-label any non-communication failure as a communication failure.
    ///
    /// Used by the connect and secure-handshake stages, where every failure
    /// means "could not establish a channel".
    pub(crate) fn into_communication(self) -> Self {
        match self.kind() {
            ErrorKind::Communication => self,
            _ => Self::Communication(self.to_string()),
        }
    }

    /// Re-label everything except a credential rejection as a client failure.
    pub(crate) fn into_client(self) -> Self {
        match self {
            Self::Authentication { .. } | Self::Client(_) => self,
            other => Self::Client(format!("authentication attempt failed unexpectedly: {other}")),
        }
    }
}
