mod cli;
mod commands;
mod config;
mod error;
mod output;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use thingwatch_config::{Config, ConfigError};

use crate::cli::{Cli, Command};
use crate::error::CliError;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Config is read before tracing so a profile's `debug` flag can raise the level.
    let loaded = config::load(&cli.global);
    let debug = loaded
        .as_ref()
        .is_ok_and(|cfg| cfg.debug_enabled(&cli.command.selected_profiles()));
    init_tracing(cli.global.verbose, debug);

    if let Err(err) = run(cli, loaded).await {
        let code = err.exit_code();
        eprintln!("{:?}", miette::Report::new(err));
        std::process::exit(code);
    }
}

fn init_tracing(verbosity: u8, debug: bool) {
    let filter = match verbosity {
        0 if debug => "debug",
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    // stdout carries event JSON; logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli, loaded: Result<Config, ConfigError>) -> Result<(), CliError> {
    match cli.command {
        Command::Completions(args) => {
            use clap::CommandFactory;
            use clap_complete::generate;

            let mut cmd = Cli::command();
            generate(args.shell, &mut cmd, "thingwatch", &mut std::io::stdout());
            Ok(())
        }

        Command::Run(args) => commands::run::handle(args, &loaded?, &cli.global).await,
        Command::Setup(args) => commands::setup::handle(args, &loaded?, &cli.global).await,
        Command::Status(args) => commands::status::handle(&args, &loaded?, &cli.global),
    }
}
