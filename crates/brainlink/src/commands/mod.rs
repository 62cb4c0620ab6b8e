//! Command dispatch: bridges CLI args to the supervisor and credential check.

pub mod check;
pub mod config_cmd;
pub mod run;
pub mod set;

use brainlink_core::SessionConfig;

use crate::cli::{Command, GlobalOpts};
use crate::error::CliError;

/// Dispatch a controller-bound command to its handler.
pub async fn dispatch(
    cmd: Command,
    session: SessionConfig,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    match cmd {
        Command::Run => run::handle(session, global).await,
        Command::Check => check::handle(&session).await,
        Command::Set(args) => set::handle(session, args, global).await,
        // Config is handled before a session config is built
        Command::Config(_) => Ok(()),
    }
}
