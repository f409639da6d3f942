//! Glue between the CLI flags and `thingwatch-config`.

use std::path::PathBuf;

use thingwatch_config::{Config, ConfigError, load_config_from, profile_to_session_config};
use thingwatch_core::SessionConfig;

use crate::cli::GlobalOpts;
use crate::error::CliError;

pub fn config_path(global: &GlobalOpts) -> PathBuf {
    global
        .config
        .clone()
        .unwrap_or_else(thingwatch_config::config_path)
}

/// Load config.toml (or `--config`) merged with the environment.
///
/// A missing file yields the defaults with no profiles.
pub fn load(global: &GlobalOpts) -> Result<Config, ConfigError> {
    load_config_from(&config_path(global))
}

/// Resolve one profile into a session configuration.
pub fn session_config(
    cfg: &Config,
    name: Option<&str>,
    global: &GlobalOpts,
) -> Result<(String, SessionConfig), CliError> {
    let (name, profile) = cfg.profile(name).map_err(|e| match e {
        ConfigError::UnknownProfile { name } => CliError::ProfileNotFound {
            name,
            available: available_profiles(cfg),
            path: config_path(global).display().to_string(),
        },
        other => other.into(),
    })?;
    let session = profile_to_session_config(&cfg.defaults, profile, &name)?;
    Ok((name, session))
}

fn available_profiles(cfg: &Config) -> String {
    if cfg.profiles.is_empty() {
        "(none)".into()
    } else {
        cfg.profiles.keys().cloned().collect::<Vec<_>>().join(", ")
    }
}
