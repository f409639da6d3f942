//! Configuration for thingwatch.
//!
//! TOML profiles merged with `THINGWATCH_` environment variables, secret
//! resolution (env + keyring + plaintext), and translation to
//! `thingwatch_core::SessionConfig`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Data, Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use thingwatch_core::config::{DEFAULT_API_URL, DEFAULT_POLL_INTERVAL, DEFAULT_TOKEN_URL};
use thingwatch_core::{
    AuthConfig, ConfiguredDevice, OAuthClientCredentials, SessionConfig, SortOrder,
    TemperatureUnit,
};

/// Keyring service all secrets are stored under.
pub const KEYRING_SERVICE: &str = "thingwatch";
pub const ENV_PREFIX: &str = "THINGWATCH_";
pub const DEFAULT_REDIRECT_URI: &str = "https://localhost/callback";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("profile '{name}' not found")]
    UnknownProfile { name: String },

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    pub default_profile: Option<String>,

    #[serde(default)]
    pub defaults: Defaults,

    #[serde(default)]
    pub profiles: BTreeMap<String, Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_profile: Some("default".into()),
            defaults: Defaults::default(),
            profiles: BTreeMap::new(),
        }
    }
}

impl Config {
    /// Look up a profile, falling back to `default_profile`.
    pub fn profile(&self, name: Option<&str>) -> Result<(String, &Profile), ConfigError> {
        let name = name
            .or(self.default_profile.as_deref())
            .unwrap_or("default");
        self.profiles
            .get(name)
            .map(|p| (name.to_owned(), p))
            .ok_or_else(|| ConfigError::UnknownProfile { name: name.into() })
    }

    /// Whether any of the named profiles (or the default one, when none
    /// are named) asks for debug logging. Unknown names use `defaults`.
    pub fn debug_enabled(&self, names: &[String]) -> bool {
        let profile_debug = |name: Option<&str>| {
            self.profile(name)
                .ok()
                .and_then(|(_, p)| p.debug)
                .unwrap_or(self.defaults.debug)
        };
        if names.is_empty() {
            profile_debug(None)
        } else {
            names.iter().any(|n| profile_debug(Some(n)))
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default)]
    pub temperature_unit: TemperatureUnit,

    #[serde(default)]
    pub sort: SortOrder,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default)]
    pub debug: bool,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            temperature_unit: TemperatureUnit::default(),
            sort: SortOrder::default(),
            timeout_secs: default_timeout_secs(),
            debug: false,
        }
    }
}

fn default_poll_interval_ms() -> u64 {
    u64::try_from(DEFAULT_POLL_INTERVAL.as_millis()).unwrap_or(60_000)
}
fn default_timeout_secs() -> u64 {
    15
}

/// One account / device set to poll.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Profile {
    /// Explicit devices. Takes precedence over `rooms`.
    #[serde(default)]
    pub devices: Vec<ConfiguredDevice>,

    /// Room names, matched exactly.
    #[serde(default)]
    pub rooms: Vec<String>,

    pub poll_interval_ms: Option<u64>,
    pub temperature_unit: Option<TemperatureUnit>,
    pub sort: Option<SortOrder>,
    pub debug: Option<bool>,

    #[serde(default)]
    pub test_mode: bool,

    /// OAuth client id. Enables OAuth mode.
    pub client_id: Option<String>,

    /// OAuth client secret (plaintext, prefer keyring or env var).
    pub client_secret: Option<String>,

    /// Environment variable holding the client secret.
    pub client_secret_env: Option<String>,

    /// Legacy static token (plaintext, prefer keyring or env var).
    pub token: Option<String>,

    /// Environment variable holding the static token.
    pub token_env: Option<String>,

    pub redirect_uri: Option<String>,
    pub api_url: Option<String>,
    /// OAuth token endpoint.
    pub auth_url: Option<String>,
    pub data_dir: Option<PathBuf>,
    pub timeout_secs: Option<u64>,
}

// ── Paths ───────────────────────────────────────────────────────────

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "thingwatch", "thingwatch")
}

fn home_fallback(parts: &[&str]) -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    for part in parts {
        p.push(part);
    }
    p
}

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    project_dirs().map_or_else(
        || home_fallback(&[".config", "thingwatch", "config.toml"]),
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

/// Default per-profile data directory (vault, cache).
pub fn default_data_dir(profile_name: &str) -> PathBuf {
    project_dirs().map_or_else(
        || home_fallback(&[".local", "share", "thingwatch", profile_name]),
        |dirs| dirs.data_dir().join(profile_name),
    )
}

// ── Loading ─────────────────────────────────────────────────────────

/// Figment merging defaults, a TOML source, and the environment.
///
/// Env keys nest with a double underscore, e.g.
/// `THINGWATCH_DEFAULTS__POLL_INTERVAL_MS=45000`.
fn figment_with(toml: Data<Toml>) -> Figment {
    Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(toml)
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
}

/// Load the full Config from file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    Ok(figment_with(Toml::file(path)).extract()?)
}

/// Parse config from a TOML string (still merged with the environment).
pub fn parse_config(toml: &str) -> Result<Config, ConfigError> {
    Ok(figment_with(Toml::string(toml)).extract()?)
}

// ── Secret resolution ───────────────────────────────────────────────

/// Resolve a secret: named env var, then keyring `<profile>/<kind>`,
/// then the plaintext config value.
pub fn resolve_secret(
    env_name: Option<&str>,
    profile_name: &str,
    kind: &str,
    plaintext: Option<&str>,
) -> Option<SecretString> {
    if let Some(val) = env_name.and_then(|name| std::env::var(name).ok()) {
        return Some(SecretString::from(val));
    }

    if let Ok(entry) = keyring::Entry::new(KEYRING_SERVICE, &format!("{profile_name}/{kind}")) {
        if let Ok(secret) = entry.get_password() {
            return Some(SecretString::from(secret));
        }
    }

    plaintext.map(|s| SecretString::from(s.to_owned()))
}

/// OAuth when a client id is configured, else a static token if one
/// resolves, else OAuth relying on what the vault holds.
pub fn resolve_auth(profile: &Profile, profile_name: &str) -> AuthConfig {
    if let Some(client_id) = profile.client_id.clone() {
        let secret = resolve_secret(
            profile.client_secret_env.as_deref(),
            profile_name,
            "client-secret",
            profile.client_secret.as_deref(),
        );
        return AuthConfig::OAuth {
            client: secret.map(|client_secret| OAuthClientCredentials {
                client_id,
                client_secret,
            }),
        };
    }

    if let Some(token) = resolve_secret(
        profile.token_env.as_deref(),
        profile_name,
        "token",
        profile.token.as_deref(),
    ) {
        return AuthConfig::StaticToken(token);
    }

    AuthConfig::OAuth { client: None }
}

// ── Translation ─────────────────────────────────────────────────────

fn validate_url(field: &str, value: &str) -> Result<(), ConfigError> {
    url::Url::parse(value)
        .map(|_| ())
        .map_err(|e| ConfigError::Validation {
            field: field.into(),
            reason: format!("'{value}': {e}"),
        })
}

/// Build a `SessionConfig` from a profile and the global defaults.
pub fn profile_to_session_config(
    defaults: &Defaults,
    profile: &Profile,
    profile_name: &str,
) -> Result<SessionConfig, ConfigError> {
    let data_dir = profile
        .data_dir
        .clone()
        .unwrap_or_else(|| default_data_dir(profile_name));
    let mut cfg = SessionConfig::new(resolve_auth(profile, profile_name), data_dir);

    cfg.devices.clone_from(&profile.devices);
    cfg.rooms.clone_from(&profile.rooms);
    cfg.poll_interval = Duration::from_millis(
        profile.poll_interval_ms.unwrap_or(defaults.poll_interval_ms),
    );
    cfg.temperature_unit = profile.temperature_unit.unwrap_or(defaults.temperature_unit);
    cfg.sort = profile.sort.unwrap_or(defaults.sort);
    cfg.debug = profile.debug.unwrap_or(defaults.debug);
    cfg.test_mode = profile.test_mode;
    cfg.timeout = Duration::from_secs(profile.timeout_secs.unwrap_or(defaults.timeout_secs));
    cfg.api_url = profile.api_url.clone().unwrap_or_else(|| DEFAULT_API_URL.into());
    cfg.token_url = profile.auth_url.clone().unwrap_or_else(|| DEFAULT_TOKEN_URL.into());

    validate_url("api_url", &cfg.api_url)?;
    validate_url("auth_url", &cfg.token_url)?;
    if cfg.devices.iter().any(|d| d.id.trim().is_empty()) {
        return Err(ConfigError::Validation {
            field: "devices".into(),
            reason: "device id must not be empty".into(),
        });
    }
    Ok(cfg)
}
