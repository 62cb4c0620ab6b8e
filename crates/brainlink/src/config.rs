//! Session config resolution for the CLI: profile from the config file,
//! then command-line and environment overrides on top.

use secrecy::SecretString;

use brainlink_config::{Config, ConfigError, Profile};
use brainlink_core::SessionConfig;

use crate::cli::GlobalOpts;
use crate::error::CliError;

pub use brainlink_config::{config_path, store_password};

/// Load the config file, falling back to defaults when it cannot be read.
pub fn load_config_or_default() -> Config {
    brainlink_config::load_config().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "ignoring unreadable config file");
        Config::default()
    })
}

/// Profile selected by `--profile`, the config's default, or `"default"`.
pub fn active_profile_name(global: &GlobalOpts, cfg: &Config) -> String {
    global
        .profile
        .clone()
        .or_else(|| cfg.default_profile.clone())
        .unwrap_or_else(|| "default".into())
}

/// Build the `SessionConfig` for a controller-bound command.
pub fn build_session_config(global: &GlobalOpts) -> Result<SessionConfig, CliError> {
    let cfg = load_config_or_default();
    let profile_name = active_profile_name(global, &cfg);

    let mut profile = match cfg.profiles.get(&profile_name) {
        Some(profile) => profile.clone(),
        // Without a profile the host has to come from flags / env.
        None if global.host.is_some() => Profile::default(),
        None if global.profile.is_some() => {
            return Err(ConfigError::UnknownProfile {
                profile: profile_name,
            }
            .into());
        }
        None => {
            return Err(CliError::NoConfig {
                path: config_path().display().to_string(),
            });
        }
    };

    if let Some(ref host) = global.host {
        profile.host.clone_from(host);
    }
    if let Some(ref username) = global.username {
        profile.username = Some(username.clone());
    }
    if global.area.is_some() {
        profile.area.clone_from(&global.area);
    }
    if global.timeout.is_some() {
        profile.timeout = global.timeout;
    }
    if let Some(ref password) = global.password {
        profile.password = Some(password.clone());
    }

    let mut session =
        brainlink_config::profile_to_session_config(&profile, &profile_name, &cfg.defaults)?;

    // An explicit password beats the keyring.
    if let Some(ref password) = global.password {
        session.password = SecretString::from(password.clone());
    }
    Ok(session)
}
