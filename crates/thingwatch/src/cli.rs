//! Clap derive structures for the `thingwatch` CLI.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// thingwatch -- poll cloud-connected devices and stream their status
#[derive(Debug, Parser)]
#[command(
    name = "thingwatch",
    version,
    about = "Poll cloud-connected devices and stream normalized status",
    long_about = "Polls a configured set of devices on a cloud device platform,\n\
        normalizes their status, and prints gateway events as JSON lines.\n\n\
        Authorize once with `thingwatch setup`, then `thingwatch run`.",
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
    /// Path to config.toml (defaults to the platform config directory)
    #[arg(long, env = "THINGWATCH_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table
    #[default]
    Table,
    /// Pretty-printed JSON
    Json,
}

// ── Commands ─────────────────────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Poll devices and print gateway events as JSON lines
    Run(RunArgs),

    /// Exchange an authorization code for tokens and store them
    Setup(SetupArgs),

    /// Show the last cached device snapshot
    Status(StatusArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

impl Command {
    /// Profiles the command acts on. Empty means the default profile.
    pub fn selected_profiles(&self) -> Vec<String> {
        match self {
            Self::Run(args) => args.profiles.clone(),
            Self::Setup(SetupArgs { profile, .. }) | Self::Status(StatusArgs { profile, .. }) => {
                profile.iter().cloned().collect()
            }
            Self::Completions(_) => Vec::new(),
        }
    }
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Profile to run; repeat to run several side by side
    #[arg(long = "profile", short = 'p', env = "THINGWATCH_PROFILE", value_delimiter = ',')]
    pub profiles: Vec<String>,

    /// Run a single poll cycle and exit
    #[arg(long)]
    pub once: bool,
}

#[derive(Debug, Args)]
pub struct SetupArgs {
    /// Profile to authorize
    #[arg(long, short = 'p', env = "THINGWATCH_PROFILE")]
    pub profile: Option<String>,

    /// Authorization code returned to the redirect URI
    #[arg(long)]
    pub code: String,

    /// Redirect URI registered with the OAuth app (overrides the profile)
    #[arg(long)]
    pub redirect_uri: Option<String>,
}

#[derive(Debug, Args)]
pub struct StatusArgs {
    /// Profile whose cache to show
    #[arg(long, short = 'p', env = "THINGWATCH_PROFILE")]
    pub profile: Option<String>,

    /// Output format
    #[arg(long, short = 'o', default_value = "table")]
    pub output: OutputFormat,
}

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}
