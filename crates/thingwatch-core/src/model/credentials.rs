// ── Credential domain types ──
//
// Secrets are held as `SecretString` in memory and only exposed when
// serialized into the vault's encrypted payload.

use chrono::{DateTime, TimeDelta, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use thingwatch_api::TokenResponse;

/// Access token lifetime assumed when the token endpoint omits `expires_in`.
pub const DEFAULT_TOKEN_LIFETIME_SECS: u64 = 86_400;

/// Full OAuth credential set (current vault generation payload).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialRecord {
    pub client_id: String,
    #[serde(with = "secret_string")]
    pub client_secret: SecretString,
    #[serde(with = "secret_string")]
    pub access_token: SecretString,
    #[serde(with = "secret_string")]
    pub refresh_token: SecretString,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    pub obtained_at: DateTime<Utc>,
}

fn default_token_type() -> String {
    "bearer".into()
}

impl CredentialRecord {
    /// Build a record from a fresh token endpoint response.
    pub fn from_token_response(
        client_id: impl Into<String>,
        client_secret: SecretString,
        tokens: TokenResponse,
        now: DateTime<Utc>,
    ) -> Self {
        let expires_at = expiry_from(tokens.expires_in, now);
        Self {
            client_id: client_id.into(),
            client_secret,
            access_token: SecretString::from(tokens.access_token),
            refresh_token: SecretString::from(tokens.refresh_token.unwrap_or_default()),
            token_type: tokens.token_type.unwrap_or_else(default_token_type),
            scope: tokens.scope,
            expires_at: Some(expires_at),
            obtained_at: now,
        }
    }

    /// Apply a refresh response in place. A missing refresh token keeps the old one.
    pub fn apply_refresh(&mut self, tokens: TokenResponse, now: DateTime<Utc>) {
        self.access_token = SecretString::from(tokens.access_token);
        if let Some(rt) = tokens.refresh_token.filter(|rt| !rt.is_empty()) {
            self.refresh_token = SecretString::from(rt);
        }
        if let Some(tt) = tokens.token_type {
            self.token_type = tt;
        }
        if tokens.scope.is_some() {
            self.scope = tokens.scope;
        }
        self.expires_at = Some(expiry_from(tokens.expires_in, now));
        self.obtained_at = now;
    }

    /// Promote a legacy token bundle using client credentials from config.
    pub fn from_bundle(
        client_id: impl Into<String>,
        client_secret: SecretString,
        bundle: TokenBundle,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret,
            access_token: bundle.access_token,
            refresh_token: bundle.refresh_token,
            token_type: bundle.token_type.unwrap_or_else(default_token_type),
            scope: bundle.scope,
            expires_at: bundle.expires_at,
            obtained_at: bundle.obtained_at.unwrap_or_else(Utc::now),
        }
    }
}

fn expiry_from(expires_in: Option<u64>, now: DateTime<Utc>) -> DateTime<Utc> {
    let secs = expires_in.unwrap_or(DEFAULT_TOKEN_LIFETIME_SECS);
    let secs = i64::try_from(secs).unwrap_or(i64::MAX);
    now.checked_add_signed(TimeDelta::try_seconds(secs).unwrap_or(TimeDelta::MAX))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Bare token bundle stored by the derived-key (legacy) vault generation.
/// Client credentials are not part of it; they come from configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenBundle {
    #[serde(with = "secret_string")]
    pub access_token: SecretString,
    #[serde(with = "secret_string")]
    pub refresh_token: SecretString,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub obtained_at: Option<DateTime<Utc>>,
}

/// Serde adapter exposing a `SecretString` only inside the encrypted payload.
mod secret_string {
    use secrecy::{ExposeSecret, SecretString};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(secret: &SecretString, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(secret.expose_secret())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<SecretString, D::Error> {
        String::deserialize(de).map(SecretString::from)
    }
}
