//! `thingwatch setup`: authorization-code exchange into the vault.

use owo_colors::OwoColorize;
use tracing::info;

use thingwatch_config::{Config, DEFAULT_REDIRECT_URI};
use thingwatch_core::{AuthConfig, TokenManager};

use crate::cli::{GlobalOpts, SetupArgs};
use crate::config::session_config;
use crate::error::CliError;
use crate::output::{print_output, should_color};

pub async fn handle(args: SetupArgs, cfg: &Config, global: &GlobalOpts) -> Result<(), CliError> {
    let (name, session) = session_config(cfg, args.profile.as_deref(), global)?;
    if session.test_mode {
        return Err(CliError::Validation {
            field: "test_mode".into(),
            reason: format!("profile '{name}' serves fixture data and needs no authorization"),
        });
    }
    if !matches!(session.auth, AuthConfig::OAuth { client: Some(_) }) {
        return Err(CliError::Validation {
            field: "client_id".into(),
            reason: format!(
                "profile '{name}' needs client_id and a client secret (client_secret, \
                 client_secret_env, or keyring entry '{name}/client-secret')"
            ),
        });
    }

    let redirect_uri = args
        .redirect_uri
        .or_else(|| cfg.profiles.get(&name).and_then(|p| p.redirect_uri.clone()))
        .unwrap_or_else(|| DEFAULT_REDIRECT_URI.into());

    info!(profile = %name, redirect_uri = %redirect_uri, "exchanging authorization code");
    let mut tokens = TokenManager::new(&session);
    tokens.exchange_code(&args.code, &redirect_uri).await?;

    let dir = session.data_dir.display().to_string();
    let msg = format!("Authorized profile '{name}'; credentials stored in {dir}");
    if should_color() {
        print_output(&format!("{} {msg}", "✓".green()));
    } else {
        print_output(&msg);
    }
    Ok(())
}
