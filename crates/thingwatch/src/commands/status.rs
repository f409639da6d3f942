//! `thingwatch status`: print the cached snapshot.

use owo_colors::OwoColorize;

use thingwatch_config::Config;
use thingwatch_core::open_cache;
use thingwatch_core::session::sort_snapshots;

use crate::cli::{GlobalOpts, OutputFormat, StatusArgs};
use crate::config::session_config;
use crate::error::CliError;
use crate::output::{print_output, render_devices, render_json, should_color};

pub fn handle(args: &StatusArgs, cfg: &Config, global: &GlobalOpts) -> Result<(), CliError> {
    let (name, session) = session_config(cfg, args.profile.as_deref(), global)?;
    let cache = open_cache(&session).map_err(|e| CliError::from(e).for_profile(&name))?;

    let Some(mut snapshot) = cache.load() else {
        eprintln!("No cached data for profile '{name}'. Run `thingwatch run` first.");
        return Ok(());
    };

    sort_snapshots(session.sort, &mut snapshot.last_status);
    match args.output {
        OutputFormat::Json => print_output(&render_json(&snapshot)?),
        OutputFormat::Table => {
            let header = format!(
                "{name}: {} devices, cached {}",
                snapshot.last_status.len(),
                snapshot.timestamp.format("%Y-%m-%d %H:%M:%S UTC"),
            );
            if should_color() {
                print_output(&header.dimmed().to_string());
            } else {
                print_output(&header);
            }
            if snapshot.last_status.is_empty() {
                print_output("(no status recorded yet)");
            } else {
                print_output(&render_devices(&snapshot.last_status));
            }
        }
    }
    Ok(())
}
