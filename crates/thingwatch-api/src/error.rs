use thiserror::Error;

/// Top-level error type for the `thingwatch-api` crate.
///
/// Covers every failure mode of the two API surfaces (token endpoint and
/// REST reads). `thingwatch-core` maps these into alert categories.
#[derive(Debug, Error)]
pub enum Error {
    // ── Authentication ──────────────────────────────────────────────
    /// Bearer token rejected (HTTP 401).
    #[error("Unauthorized: {message}")]
    Unauthorized { message: String },

    /// Token is valid but lacks the scope for this resource (HTTP 403).
    #[error("Forbidden: {message}")]
    Forbidden { message: String },

    /// Structured error from the OAuth token endpoint.
    #[error("OAuth error (HTTP {status}): {error}{}", .description.as_deref().map(|d| format!(" -- {d}")).unwrap_or_default())]
    OAuth {
        error: String,
        description: Option<String>,
        status: u16,
    },

    // ── Throttling / server ─────────────────────────────────────────
    /// Provider signaled too many requests (HTTP 429).
    #[error("Rate limited{}", .retry_after_secs.map(|s| format!(" -- retry after {s}s")).unwrap_or_default())]
    RateLimited { retry_after_secs: Option<u64> },

    /// Server-side failure (HTTP 5xx).
    #[error("Server error (HTTP {status}): {message}")]
    Server { status: u16, message: String },

    /// Any other non-success status.
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, timeout, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// The HTTP client could not be constructed.
    #[error("Failed to build HTTP client: {0}")]
    ClientBuild(String),

    // ── Data ────────────────────────────────────────────────────────
    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },
}

impl Error {
    /// Returns `true` when the refresh token itself has been rejected
    /// and only a new authorization can recover.
    pub fn is_invalid_grant(&self) -> bool {
        match self {
            Self::OAuth { error, status, .. } => error == "invalid_grant" || *status == 401,
            Self::Unauthorized { .. } => true,
            _ => false,
        }
    }

    /// Returns `true` if this is a transient error worth retrying later.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Self::RateLimited { .. } | Self::Server { .. } => true,
            _ => false,
        }
    }

    /// HTTP status attached to this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Unauthorized { .. } => Some(401),
            Self::Forbidden { .. } => Some(403),
            Self::RateLimited { .. } => Some(429),
            Self::OAuth { status, .. } | Self::Server { status, .. } | Self::Http { status, .. } => {
                Some(*status)
            }
            Self::Transport(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}
