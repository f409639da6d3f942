// ── Runtime session configuration ──
//
// These types describe *what* a session polls and *how* it authenticates.
// They carry credential data and tuning, but never touch config files.
// The config crate (or a test) constructs a `SessionConfig` and hands it in.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Poll intervals below this are clamped up to protect the rate limit.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_secs(30);

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_API_URL: &str = "https://api.smartthings.com/v1";
pub const DEFAULT_TOKEN_URL: &str = "https://auth-global.api.smartthings.com/oauth/token";

/// OAuth application credentials.
#[derive(Debug, Clone)]
pub struct OAuthClientCredentials {
    pub client_id: String,
    pub client_secret: SecretString,
}

/// How to authenticate with the provider.
#[derive(Debug, Clone)]
pub enum AuthConfig {
    /// OAuth2 with refresh.
    ///
    /// `client` is required for the derived-key (legacy) vault and for the
    /// initial code exchange. With the current vault generation the client
    /// id/secret live inside the encrypted payload and may be omitted here.
    OAuth {
        client: Option<OAuthClientCredentials>,
    },
    /// Long-lived static token, no refresh capability.
    StaticToken(SecretString),
}

/// A device listed explicitly in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfiguredDevice {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub room: Option<String>,
}

/// Unit temperatures are reported in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
pub enum TemperatureUnit {
    #[serde(rename = "C", alias = "c", alias = "celsius")]
    #[strum(to_string = "C", serialize = "c", serialize = "celsius")]
    Celsius,
    #[default]
    #[serde(rename = "F", alias = "f", alias = "fahrenheit")]
    #[strum(to_string = "F", serialize = "f", serialize = "fahrenheit")]
    Fahrenheit,
}

/// Order of devices in published snapshots.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SortOrder {
    /// Keep resolution order (configured order for explicit devices).
    #[default]
    None,
    Name,
    /// Room, then name within the room.
    Room,
}

/// Configuration for a single polling session.
///
/// Built by the config crate or CLI, passed to `Session` -- core never reads
/// config files.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub auth: AuthConfig,
    /// Explicit devices. When non-empty, `rooms` is ignored entirely.
    pub devices: Vec<ConfiguredDevice>,
    /// Room names (exact, case-sensitive) to discover devices from.
    pub rooms: Vec<String>,
    /// Requested poll interval. See [`effective_poll_interval`](Self::effective_poll_interval).
    pub poll_interval: Duration,
    pub temperature_unit: TemperatureUnit,
    pub sort: SortOrder,
    pub debug: bool,
    /// Serve built-in fixture data instead of calling the provider.
    pub test_mode: bool,
    pub api_url: String,
    pub token_url: String,
    /// Directory holding the credential vault and cache files.
    pub data_dir: PathBuf,
    /// Per-request HTTP timeout.
    pub timeout: Duration,
}

impl SessionConfig {
    /// A config with defaults for everything but auth and the data directory.
    pub fn new(auth: AuthConfig, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            auth,
            devices: Vec::new(),
            rooms: Vec::new(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            temperature_unit: TemperatureUnit::default(),
            sort: SortOrder::default(),
            debug: false,
            test_mode: false,
            api_url: DEFAULT_API_URL.into(),
            token_url: DEFAULT_TOKEN_URL.into(),
            data_dir: data_dir.into(),
            timeout: thingwatch_api::transport::DEFAULT_TIMEOUT,
        }
    }

    /// Poll interval with the 30 s floor applied.
    pub fn effective_poll_interval(&self) -> Duration {
        self.poll_interval.max(MIN_POLL_INTERVAL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poll_interval_is_clamped_to_floor() {
        let mut cfg = SessionConfig::new(
            AuthConfig::StaticToken(SecretString::from("t".to_owned())),
            "/tmp/thingwatch",
        );
        cfg.poll_interval = Duration::from_secs(5);
        assert_eq!(cfg.effective_poll_interval(), MIN_POLL_INTERVAL);

        cfg.poll_interval = Duration::from_secs(120);
        assert_eq!(cfg.effective_poll_interval(), Duration::from_secs(120));
    }

    #[test]
    fn units_parse_from_config_spellings() {
        assert_eq!("C".parse::<TemperatureUnit>().ok(), Some(TemperatureUnit::Celsius));
        assert_eq!(
            "fahrenheit".parse::<TemperatureUnit>().ok(),
            Some(TemperatureUnit::Fahrenheit)
        );
        assert_eq!("room".parse::<SortOrder>().ok(), Some(SortOrder::Room));
    }
}
