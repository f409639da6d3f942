// ── OAuth token lifecycle ──
//
// Owns the credential record and every transition of it. The session asks
// for the current access token before each request and calls `refresh()`
// on schedule, before a batch when the token is close to expiry, and once
// after a 401.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};
use strum::Display;
use tracing::{debug, error, info, warn};

use thingwatch_api::{OAuthClient, TransportConfig};

use crate::config::{AuthConfig, OAuthClientCredentials, SessionConfig};
use crate::error::CoreError;
use crate::model::CredentialRecord;
use crate::vault::{CredentialVault, StoredCredentials};

/// Buffer used by `needs_refresh` when the caller has no opinion.
pub const DEFAULT_REFRESH_BUFFER: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum TokenState {
    NoCredentials,
    /// Credentials loaded but the access token is not known to be usable.
    HasCredentials,
    Valid,
    RefreshPending,
    /// Latched after `invalid_grant`. Only a new `setup` clears it.
    PermanentlyFailed,
}

enum Mode {
    Static(SecretString),
    Fixture(SecretString),
    OAuth(Box<OAuthMode>),
}

struct OAuthMode {
    vault: CredentialVault,
    token_url: String,
    transport: TransportConfig,
    configured_client: Option<OAuthClientCredentials>,
    record: Option<CredentialRecord>,
    client: Option<OAuthClient>,
}

impl OAuthMode {
    fn build_client(&mut self) -> Result<&OAuthClient, CoreError> {
        if self.client.is_none() {
            let (id, secret) = match (&self.record, &self.configured_client) {
                (Some(r), _) => (r.client_id.clone(), r.client_secret.clone()),
                (None, Some(c)) => (c.client_id.clone(), c.client_secret.clone()),
                (None, None) => {
                    return Err(CoreError::Config {
                        message: "OAuth client id/secret not configured".into(),
                    });
                }
            };
            self.client = Some(OAuthClient::new(&self.token_url, id, secret, &self.transport)?);
        }
        self.client.as_ref().ok_or_else(|| CoreError::Internal("oauth client missing".into()))
    }
}

/// Token manager for one session.
pub struct TokenManager {
    mode: Mode,
    state: TokenState,
}

impl TokenManager {
    pub fn new(config: &SessionConfig) -> Self {
        let mode = if config.test_mode {
            Mode::Fixture(SecretString::from("fixture-token".to_owned()))
        } else {
            match &config.auth {
                AuthConfig::StaticToken(token) => Mode::Static(token.clone()),
                AuthConfig::OAuth { client } => Mode::OAuth(Box::new(OAuthMode {
                    vault: CredentialVault::new(&config.data_dir),
                    token_url: config.token_url.clone(),
                    transport: TransportConfig::with_timeout(config.timeout),
                    configured_client: client.clone(),
                    record: None,
                    client: None,
                })),
            }
        };
        Self {
            mode,
            state: TokenState::NoCredentials,
        }
    }

    pub fn state(&self) -> TokenState {
        self.state
    }

    pub fn is_permanently_failed(&self) -> bool {
        self.state == TokenState::PermanentlyFailed
    }

    /// `false` for static-token and fixture sessions.
    pub fn can_refresh(&self) -> bool {
        matches!(self.mode, Mode::OAuth(_))
    }

    /// Load credentials. An empty vault is `CoreError::NoCredentials`.
    pub fn initialize(&mut self) -> Result<(), CoreError> {
        let oauth = match &mut self.mode {
            Mode::Static(_) | Mode::Fixture(_) => {
                self.state = TokenState::Valid;
                return Ok(());
            }
            Mode::OAuth(oauth) => oauth,
        };

        match oauth.vault.load(oauth.configured_client.as_ref())? {
            None => {
                self.state = TokenState::NoCredentials;
                Err(CoreError::NoCredentials {
                    location: oauth.vault.dir().display().to_string(),
                })
            }
            Some(stored) => {
                if matches!(stored, StoredCredentials::Legacy(_)) {
                    info!("using legacy token bundle, will migrate on next save");
                }
                let record = stored.into_record();
                let expired = record.expires_at.is_none_or(|exp| exp <= Utc::now());
                oauth.record = Some(record);
                oauth.client = None;
                self.state = if expired {
                    TokenState::HasCredentials
                } else {
                    TokenState::Valid
                };
                debug!(state = %self.state, "credentials loaded");
                Ok(())
            }
        }
    }

    /// Bearer token for the next request, if any.
    pub fn access_token(&self) -> Option<&SecretString> {
        match &self.mode {
            Mode::Static(t) | Mode::Fixture(t) => Some(t),
            Mode::OAuth(oauth) => oauth.record.as_ref().map(|r| &r.access_token),
        }
    }

    pub fn needs_refresh(&self, buffer: Duration) -> bool {
        self.needs_refresh_at(Utc::now(), buffer)
    }

    /// `now >= expires_at - buffer`, or no known expiry.
    pub fn needs_refresh_at(&self, now: DateTime<Utc>, buffer: Duration) -> bool {
        let Mode::OAuth(oauth) = &self.mode else {
            return false;
        };
        if self.is_permanently_failed() {
            return false;
        }
        let Some(record) = &oauth.record else {
            return false;
        };
        let Some(expires_at) = record.expires_at else {
            return true;
        };
        let buffer = TimeDelta::from_std(buffer).unwrap_or(TimeDelta::MAX);
        expires_at
            .checked_sub_signed(buffer)
            .is_none_or(|threshold| now >= threshold)
    }

    /// Time left on the access token. `None` when the token never expires.
    pub fn remaining_lifetime_at(&self, now: DateTime<Utc>) -> Option<Duration> {
        let Mode::OAuth(oauth) = &self.mode else {
            return None;
        };
        let expires_at = oauth.record.as_ref().and_then(|r| r.expires_at);
        Some(
            expires_at
                .and_then(|exp| (exp - now).to_std().ok())
                .unwrap_or(Duration::ZERO),
        )
    }

    pub fn remaining_lifetime(&self) -> Option<Duration> {
        self.remaining_lifetime_at(Utc::now())
    }

    /// Run the refresh-token grant and persist the result.
    ///
    /// No-op outside OAuth mode. `invalid_grant` latches
    /// `PermanentlyFailed`; any other failure leaves the credentials in
    /// place for the next attempt.
    pub async fn refresh(&mut self) -> Result<(), CoreError> {
        let prior = self.state;
        let oauth = match &mut self.mode {
            Mode::Static(_) | Mode::Fixture(_) => return Ok(()),
            Mode::OAuth(oauth) => oauth,
        };
        if prior == TokenState::PermanentlyFailed {
            return Err(CoreError::TokenRefreshFailed {
                message: "refresh token was rejected; run setup again".into(),
                permanent: true,
            });
        }
        let Some(refresh_token) = oauth.record.as_ref().map(|r| r.refresh_token.clone()) else {
            return Err(CoreError::NoCredentials {
                location: oauth.vault.dir().display().to_string(),
            });
        };
        if refresh_token.expose_secret().is_empty() {
            self.state = TokenState::PermanentlyFailed;
            return Err(CoreError::TokenRefreshFailed {
                message: "no refresh token stored".into(),
                permanent: true,
            });
        }

        self.state = TokenState::RefreshPending;
        let result = match oauth.build_client() {
            Ok(client) => client.refresh(&refresh_token).await.map_err(CoreError::from),
            Err(e) => Err(e),
        };

        match result {
            Ok(tokens) => {
                let now = Utc::now();
                if let Some(record) = oauth.record.as_mut() {
                    record.apply_refresh(tokens, now);
                    if let Err(e) = oauth.vault.save(record) {
                        error!(error = %e, "refreshed token could not be persisted");
                    }
                    info!(expires_at = ?record.expires_at, "access token refreshed");
                }
                self.state = TokenState::Valid;
                Ok(())
            }
            Err(e) => {
                let permanent = matches!(e, CoreError::TokenRefreshFailed { permanent: true, .. });
                if permanent {
                    error!(error = %e, "refresh token rejected, authorization required");
                    self.state = TokenState::PermanentlyFailed;
                } else {
                    warn!(error = %e, "token refresh failed, will retry");
                    self.state = TokenState::HasCredentials;
                }
                Err(e)
            }
        }
    }

    /// Authorization-code grant. Replaces whatever the vault held.
    pub async fn exchange_code(&mut self, code: &str, redirect_uri: &str) -> Result<(), CoreError> {
        let Mode::OAuth(oauth) = &mut self.mode else {
            return Err(CoreError::Config {
                message: "authorization code exchange requires OAuth mode".into(),
            });
        };
        let Some(configured) = oauth.configured_client.clone() else {
            return Err(CoreError::Config {
                message: "client_id and client_secret are required for setup".into(),
            });
        };

        oauth.record = None;
        oauth.client = None;
        let tokens = oauth.build_client()?.exchange_code(code, redirect_uri).await?;
        let record = CredentialRecord::from_token_response(
            configured.client_id,
            configured.client_secret,
            tokens,
            Utc::now(),
        );
        oauth.vault.save(&record)?;
        info!(client_id = %record.client_id, "authorization code exchanged");
        oauth.record = Some(record);
        self.state = TokenState::Valid;
        Ok(())
    }

    /// Stable, non-secret identity of the credentials, for the cache hash.
    pub fn identity(&self) -> String {
        match &self.mode {
            Mode::Fixture(_) => "fixture".into(),
            Mode::Static(token) => {
                let digest = Sha256::digest(token.expose_secret().as_bytes());
                format!("static:{}", &hex::encode(digest)[..16])
            }
            Mode::OAuth(oauth) => {
                let id = oauth
                    .record
                    .as_ref()
                    .map(|r| r.client_id.as_str())
                    .or(oauth.configured_client.as_ref().map(|c| c.client_id.as_str()))
                    .unwrap_or_default();
                format!("oauth:{id}")
            }
        }
    }
}
