//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` into user-facing errors with
//! actionable help text and a process exit code.

use std::time::Duration;

use miette::Diagnostic;
use thiserror::Error;

use brainlink_config::ConfigError;
use brainlink_core::CoreError;

pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const CONNECTION: i32 = 7;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────
    #[error("Could not connect to controller: {reason}")]
    #[diagnostic(
        code(brainlink::connection_failed),
        help(
            "Check that the controller is powered on and reachable.\n\
             Try: brainlink check --host <address>"
        )
    )]
    ConnectionFailed { reason: String },

    #[error("Timed out after {after:?} during {stage}")]
    #[diagnostic(
        code(brainlink::timeout),
        help("Increase the limit with --timeout or check the network path to the controller.")
    )]
    Timeout { stage: String, after: Duration },

    // ── Authentication ───────────────────────────────────────────────
    #[error("Authentication failed: {message}")]
    #[diagnostic(
        code(brainlink::auth_failed),
        help(
            "Verify the user name and password.\n\
             Run: brainlink config set-password"
        )
    )]
    AuthFailed { message: String },

    #[error("No credentials configured for profile '{profile}'")]
    #[diagnostic(
        code(brainlink::no_credentials),
        help(
            "Set username and password in the profile, run `brainlink config set-password`,\n\
             or pass --username and BRAINLINK_PASSWORD."
        )
    )]
    NoCredentials { profile: String },

    // ── Protocol ─────────────────────────────────────────────────────
    #[error("Controller replied unexpectedly: {message}")]
    #[diagnostic(code(brainlink::client))]
    Client { message: String },

    // ── Entities ─────────────────────────────────────────────────────
    #[error("Value {key} was not reported by the controller")]
    #[diagnostic(
        code(brainlink::not_found),
        help("Run: brainlink run  to list the values the controller reports")
    )]
    NotFound { key: String },

    #[error("{message}")]
    #[diagnostic(code(brainlink::rejected))]
    Rejected { message: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(brainlink::validation))]
    Validation { field: String, reason: String },

    #[error("Profile '{name}' not found in configuration")]
    #[diagnostic(
        code(brainlink::profile_not_found),
        help("Add a [profiles.{name}] table to the config file, or pass --host.")
    )]
    ProfileNotFound { name: String },

    #[error("Configuration file not found")]
    #[diagnostic(
        code(brainlink::no_config),
        help(
            "Create a profile in {path}\n\
             or pass the controller address with --host (BRAINLINK_HOST)."
        )
    )]
    NoConfig { path: String },

    #[error(transparent)]
    #[diagnostic(code(brainlink::config))]
    Config(ConfigError),

    // ── IO ───────────────────────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } | Self::Timeout { .. } => exit_code::CONNECTION,
            Self::AuthFailed { .. } | Self::NoCredentials { .. } => exit_code::AUTH,
            Self::Validation { .. }
            | Self::ProfileNotFound { .. }
            | Self::NoConfig { .. }
            | Self::Config(_) => exit_code::USAGE,
            _ => exit_code::GENERAL,
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::ConnectionFailed { reason } => CliError::ConnectionFailed { reason },
            CoreError::ControllerDisconnected => CliError::ConnectionFailed {
                reason: "the controller closed the session".into(),
            },
            CoreError::Timeout {
                stage,
                timeout,
            } => CliError::Timeout {
                stage: stage.into(),
                after: timeout,
            },
            CoreError::AuthenticationFailed { message } => CliError::AuthFailed { message },
            CoreError::Client { message } => CliError::Client { message },
            CoreError::EntityNotFound { key } => CliError::NotFound {
                key: key.to_string(),
            },
            err @ (CoreError::Unsupported { .. } | CoreError::InvalidOption { .. }) => {
                CliError::Rejected {
                    message: err.to_string(),
                }
            }
            CoreError::Config { message } => CliError::Validation {
                field: "config".into(),
                reason: message,
            },
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Validation { field, reason } => CliError::Validation { field, reason },
            ConfigError::UnknownProfile { profile } => CliError::ProfileNotFound { name: profile },
            ConfigError::NoCredentials { profile } => CliError::NoCredentials { profile },
            ConfigError::Io(e) => CliError::Io(e),
            other => CliError::Config(other),
        }
    }
}
