// OAuth2 token endpoint client
//
// Both grants (authorization code and refresh token) authenticate with
// HTTP Basic built from the client id/secret. The provider requires this
// even for `grant_type=refresh_token`.

use std::fmt;

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::error::Error;
use crate::transport::TransportConfig;

/// Error body returned by the token endpoint.
#[derive(Deserialize)]
struct OAuthErrorBody {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// Successful token endpoint response.
#[derive(Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    /// Some providers rotate the refresh token, some omit it on refresh.
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
    /// Lifetime in seconds. Absent on some responses.
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub scope: Option<String>,
}

impl fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenResponse")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .field("scope", &self.scope)
            .finish()
    }
}

/// Client for the provider's OAuth2 token endpoint.
pub struct OAuthClient {
    http: reqwest::Client,
    token_url: Url,
    client_id: String,
    client_secret: SecretString,
}

impl OAuthClient {
    pub fn new(
        token_url: &str,
        client_id: impl Into<String>,
        client_secret: SecretString,
        transport: &TransportConfig,
    ) -> Result<Self, Error> {
        Ok(Self {
            http: transport.build_client()?,
            token_url: Url::parse(token_url)?,
            client_id: client_id.into(),
            client_secret,
        })
    }

    /// Wrap an existing `reqwest::Client`.
    pub fn from_reqwest(
        token_url: &str,
        client_id: impl Into<String>,
        client_secret: SecretString,
        http: reqwest::Client,
    ) -> Result<Self, Error> {
        Ok(Self {
            http,
            token_url: Url::parse(token_url)?,
            client_id: client_id.into(),
            client_secret,
        })
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Exchange a refresh token for a new access/refresh token pair.
    pub async fn refresh(&self, refresh_token: &SecretString) -> Result<TokenResponse, Error> {
        debug!("POST {} (grant_type=refresh_token)", self.token_url);
        let form = [
            ("grant_type", "refresh_token"),
            ("client_id", self.client_id.as_str()),
            ("refresh_token", refresh_token.expose_secret()),
        ];
        self.post_form(&form).await
    }

    /// Exchange an authorization code for the initial token pair.
    pub async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
    ) -> Result<TokenResponse, Error> {
        debug!("POST {} (grant_type=authorization_code)", self.token_url);
        let form = [
            ("grant_type", "authorization_code"),
            ("client_id", self.client_id.as_str()),
            ("code", code),
            ("redirect_uri", redirect_uri),
        ];
        self.post_form(&form).await
    }

    async fn post_form(&self, form: &[(&str, &str)]) -> Result<TokenResponse, Error> {
        let resp = self
            .http
            .post(self.token_url.clone())
            .basic_auth(&self.client_id, Some(self.client_secret.expose_secret()))
            .form(form)
            .send()
            .await?;

        let status = resp.status();
        let body = resp.text().await?;

        // A 5xx is a provider outage even when it carries an OAuth error body.
        if status.is_server_error() {
            return Err(Error::Server {
                status: status.as_u16(),
                message: preview(&body),
            });
        }
        if !status.is_success() {
            return Err(match serde_json::from_str::<OAuthErrorBody>(&body) {
                Ok(err) => Error::OAuth {
                    error: err.error,
                    description: err.error_description,
                    status: status.as_u16(),
                },
                Err(_) if status == reqwest::StatusCode::UNAUTHORIZED => Error::OAuth {
                    error: "unauthorized".into(),
                    description: None,
                    status: 401,
                },
                Err(_) => Error::Http {
                    status: status.as_u16(),
                    message: preview(&body),
                },
            });
        }

        serde_json::from_str(&body).map_err(|e| Error::Deserialization {
            message: format!("token response: {e}"),
            body,
        })
    }
}

pub(crate) fn preview(body: &str) -> String {
    body.chars().take(200).collect()
}
