// ── Core error types ──
//
// User-facing errors from thingwatch-core. Consumers never see raw HTTP
// status codes directly; the `From<thingwatch_api::Error>` impl translates
// transport-layer errors into the taxonomy the health monitor understands.

use thiserror::Error;

use crate::health::AlertCategory;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Credentials ──────────────────────────────────────────────────
    #[error("No stored credentials in {location} -- run `thingwatch setup` to authorize")]
    NoCredentials { location: String },

    #[error("Credential vault error: {message}")]
    Vault { message: String },

    #[error("Token refresh failed: {message}")]
    TokenRefreshFailed { message: String, permanent: bool },

    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    #[error("Permission denied: {message}")]
    PermissionDenied { message: String },

    // ── Provider health ──────────────────────────────────────────────
    #[error("Rate limited by provider")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("Provider outage{}: {message}", .status.map(|s| format!(" (HTTP {s})")).unwrap_or_default())]
    ServerOutage { status: Option<u16>, message: String },

    #[error("Malformed payload: {message}")]
    Schema { message: String },

    #[error("Network error: {message}")]
    Network { message: String },

    #[error("API error{}: {message}", .status.map(|s| format!(" (HTTP {s})")).unwrap_or_default())]
    Api { message: String, status: Option<u16> },

    // ── Local ────────────────────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Session stopped")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// The alert category this error counts toward, if any.
    ///
    /// Local errors (IO, configuration, vault) are not provider health
    /// signals and return `None`.
    pub fn category(&self) -> Option<AlertCategory> {
        match self {
            Self::NoCredentials { .. } | Self::AuthenticationFailed { .. } => {
                Some(AlertCategory::Auth)
            }
            Self::TokenRefreshFailed { permanent, .. } => Some(if *permanent {
                AlertCategory::Auth
            } else {
                AlertCategory::Network
            }),
            Self::PermissionDenied { .. } => Some(AlertCategory::Scope),
            Self::RateLimited { .. } => Some(AlertCategory::RateLimit),
            Self::ServerOutage { .. } | Self::Api { .. } => Some(AlertCategory::Outage),
            Self::Schema { .. } => Some(AlertCategory::Schema),
            Self::Network { .. } => Some(AlertCategory::Network),
            Self::Vault { .. }
            | Self::Config { .. }
            | Self::Io(_)
            | Self::Cancelled
            | Self::Internal(_) => None,
        }
    }

    /// Returns `true` for failures that end a poll cycle outright instead
    /// of being absorbed per device.
    pub fn aborts_cycle(&self) -> bool {
        self.is_terminal() || matches!(self, Self::Cancelled)
    }

    /// Returns `true` for failures that require operator action.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::NoCredentials { .. }
                | Self::Vault { .. }
                | Self::TokenRefreshFailed {
                    permanent: true,
                    ..
                }
        )
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<thingwatch_api::Error> for CoreError {
    fn from(err: thingwatch_api::Error) -> Self {
        use thingwatch_api::Error as ApiError;

        let permanent = err.is_invalid_grant();
        match err {
            ApiError::Unauthorized { message } => CoreError::AuthenticationFailed { message },
            ApiError::Forbidden { message } => CoreError::PermissionDenied { message },
            e @ ApiError::OAuth { .. } => CoreError::TokenRefreshFailed {
                message: e.to_string(),
                permanent,
            },
            ApiError::RateLimited { retry_after_secs } => {
                CoreError::RateLimited { retry_after_secs }
            }
            ApiError::Server { status, message } => CoreError::ServerOutage {
                status: Some(status),
                message,
            },
            ApiError::Http { status, message } => CoreError::Api {
                message,
                status: Some(status),
            },
            ApiError::Transport(e) => CoreError::Network {
                message: e.to_string(),
            },
            ApiError::InvalidUrl(e) => CoreError::Config {
                message: format!("invalid URL: {e}"),
            },
            ApiError::ClientBuild(message) => CoreError::Config { message },
            ApiError::Deserialization { message, body: _ } => CoreError::ServerOutage {
                status: None,
                message: format!("unparseable response: {message}"),
            },
        }
    }
}
