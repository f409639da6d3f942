//! CLI error types with miette diagnostics and exit codes.

use miette::Diagnostic;
use thiserror::Error;

use thingwatch_config::ConfigError;
use thingwatch_core::CoreError;

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const NOT_FOUND: i32 = 4;
    pub const PERMISSION: i32 = 5;
    pub const CONNECTION: i32 = 7;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Credentials ──────────────────────────────────────────────────

    #[error("No stored credentials for profile '{profile}'")]
    #[diagnostic(
        code(thingwatch::no_credentials),
        help(
            "Authorize once with: thingwatch setup --profile {profile} --code <CODE>\n\
             Looked in: {location}"
        )
    )]
    NoCredentials { profile: String, location: String },

    #[error("Authentication failed: {message}")]
    #[diagnostic(
        code(thingwatch::auth_failed),
        help("Re-run `thingwatch setup` to obtain fresh tokens.")
    )]
    AuthFailed { message: String },

    #[error("Permission denied: {message}")]
    #[diagnostic(
        code(thingwatch::permission_denied),
        help("The OAuth app may be missing a required scope.")
    )]
    PermissionDenied { message: String },

    #[error("Credential vault error: {message}")]
    #[diagnostic(
        code(thingwatch::vault),
        help("Check permissions on the data directory, or remove it and run setup again.")
    )]
    Vault { message: String },

    // ── Provider ─────────────────────────────────────────────────────

    #[error("Network error: {message}")]
    #[diagnostic(code(thingwatch::network), help("Check connectivity to the provider API."))]
    Network { message: String },

    #[error("Rate limited by provider")]
    #[diagnostic(
        code(thingwatch::rate_limited),
        help("Increase poll_interval_ms or poll fewer devices.")
    )]
    RateLimited,

    #[error("Provider error: {message}")]
    #[diagnostic(code(thingwatch::api))]
    Api { message: String },

    #[error("Poll cycle failed for profile '{profile}': {message}")]
    #[diagnostic(code(thingwatch::cycle_failed))]
    CycleFailed { profile: String, message: String },

    // ── Configuration ────────────────────────────────────────────────

    #[error("Profile '{name}' not found in configuration")]
    #[diagnostic(
        code(thingwatch::profile_not_found),
        help(
            "Available profiles: {available}\n\
             Config file: {path}"
        )
    )]
    ProfileNotFound {
        name: String,
        available: String,
        path: String,
    },

    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(thingwatch::validation))]
    Validation { field: String, reason: String },

    #[error(transparent)]
    #[diagnostic(code(thingwatch::config))]
    Config(Box<ConfigError>),

    // ── IO / Serialization ───────────────────────────────────────────

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Failed to encode JSON: {0}")]
    #[diagnostic(code(thingwatch::json))]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    #[diagnostic(code(thingwatch::internal))]
    Internal(String),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::NoCredentials { .. } | Self::AuthFailed { .. } => exit_code::AUTH,
            Self::PermissionDenied { .. } | Self::Vault { .. } => exit_code::PERMISSION,
            Self::Network { .. } | Self::RateLimited | Self::Api { .. } => exit_code::CONNECTION,
            Self::ProfileNotFound { .. } => exit_code::NOT_FOUND,
            Self::Validation { .. } | Self::Config(_) => exit_code::USAGE,
            _ => exit_code::GENERAL,
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::NoCredentials { location } => CliError::NoCredentials {
                profile: "current".into(),
                location,
            },
            CoreError::AuthenticationFailed { message }
            | CoreError::TokenRefreshFailed { message, .. } => CliError::AuthFailed { message },
            CoreError::PermissionDenied { message } => CliError::PermissionDenied { message },
            CoreError::Vault { message } => CliError::Vault { message },
            CoreError::Network { message } => CliError::Network { message },
            CoreError::RateLimited { .. } => CliError::RateLimited,
            e @ (CoreError::ServerOutage { .. }
            | CoreError::Api { .. }
            | CoreError::Schema { .. }) => CliError::Api {
                message: e.to_string(),
            },
            CoreError::Config { message } => CliError::Validation {
                field: "config".into(),
                reason: message,
            },
            CoreError::Io(e) => CliError::Io(e),
            e @ (CoreError::Cancelled | CoreError::Internal(_)) => {
                CliError::Internal(e.to_string())
            }
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Validation { field, reason } => CliError::Validation { field, reason },
            other => CliError::Config(Box::new(other)),
        }
    }
}

impl CliError {
    /// Attach the profile name to errors that mention one.
    pub fn for_profile(self, name: &str) -> Self {
        match self {
            Self::NoCredentials { location, .. } => Self::NoCredentials {
                profile: name.to_owned(),
                location,
            },
            other => other,
        }
    }
}
