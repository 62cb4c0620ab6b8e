//! Clap derive structures for the `brainlink` CLI.

use clap::{Args, Parser, Subcommand, ValueEnum};

use brainlink_core::Key;

// ── Top-Level CLI ────────────────────────────────────────────────────

/// brainlink -- keep a brain heating controller connected
#[derive(Debug, Parser)]
#[command(
    name = "brainlink",
    version,
    about = "Watch and control a brain heating controller from the command line",
    long_about = "Connects to a brain heating controller over its WebSocket interface,\n\
        logs in, and mirrors every value it reports. The session is kept alive\n\
        with automatic reconnects until interrupted.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Controller profile to use
    #[arg(long, short = 'p', env = "BRAINLINK_PROFILE", global = true)]
    pub profile: Option<String>,

    /// Controller address: host[:port], ws://... or wss://... (overrides profile)
    #[arg(long, short = 'H', env = "BRAINLINK_HOST", global = true)]
    pub host: Option<String>,

    /// Login user name (overrides profile)
    #[arg(long, short = 'u', env = "BRAINLINK_USERNAME", global = true)]
    pub username: Option<String>,

    /// Login password
    #[arg(long, env = "BRAINLINK_PASSWORD", global = true, hide_env_values = true)]
    pub password: Option<String>,

    /// Area assigned to every entity (overrides profile)
    #[arg(long, short = 'a', global = true)]
    pub area: Option<String>,

    /// Seconds allowed for connect, handshake and login
    #[arg(long, env = "BRAINLINK_TIMEOUT", global = true)]
    pub timeout: Option<u64>,

    /// When to use color output
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorMode,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ColorMode {
    /// Auto-detect (color if stdout is a terminal)
    Auto,
    /// Always emit color codes
    Always,
    /// Never emit color codes
    Never,
}

// ── Commands ─────────────────────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Stay connected and print every entity change until interrupted
    Run,

    /// Log in once and report the controller's device id
    Check,

    /// Select an option on an editable choice value
    Set(SetArgs),

    /// Manage configuration profiles
    Config(ConfigArgs),
}

#[derive(Debug, Args)]
pub struct SetArgs {
    /// Value key as screen:value or screen:value:index (e.g. 20:4)
    pub key: Key,

    /// Option label to select, as shown by `run`
    pub option: String,

    /// Seconds to wait for the value to be reported
    #[arg(long, default_value = "30")]
    pub wait: u64,
}

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Print the resolved configuration (secrets masked)
    Show,

    /// Print the config file location
    Path,

    /// Store a profile's password in the system keyring
    SetPassword {
        /// Profile to store the password for
        #[arg(long)]
        profile: Option<String>,
    },
}
