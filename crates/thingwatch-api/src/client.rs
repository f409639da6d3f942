// REST read client
//
// Wraps `reqwest::Client` with base-URL joining, bearer auth, and
// status-code classification. Every method takes the current access token
// because the token manager may rotate it between calls.

use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use tracing::{debug, trace};
use url::Url;

use crate::auth::preview;
use crate::error::Error;
use crate::models::{DeviceSummary, ListResponse, Location, Room};
use crate::transport::TransportConfig;

/// Async client for the provider's device read endpoints.
pub struct CloudClient {
    http: reqwest::Client,
    base_url: Url,
}

impl CloudClient {
    // ── Constructors ─────────────────────────────────────────────────

    /// Build from a base URL (e.g. `https://api.example.com/v1`) and transport config.
    pub fn new(base_url: &str, transport: &TransportConfig) -> Result<Self, Error> {
        let http = transport.build_client()?;
        Self::from_reqwest(base_url, http)
    }

    /// Wrap an existing `reqwest::Client`.
    pub fn from_reqwest(base_url: &str, http: reqwest::Client) -> Result<Self, Error> {
        let mut url = Url::parse(base_url)?;
        // Joining relative paths only works when the base ends with `/`.
        if !url.path().ends_with('/') {
            let path = format!("{}/", url.path());
            url.set_path(&path);
        }
        Ok(Self {
            http,
            base_url: url,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    // ── Endpoints ────────────────────────────────────────────────────

    /// `GET locations`
    pub async fn list_locations(&self, token: &SecretString) -> Result<Vec<Location>, Error> {
        let page: ListResponse<Location> = self.get("locations", token).await?;
        Ok(page.items)
    }

    /// `GET locations/{location_id}/rooms`
    pub async fn list_rooms(
        &self,
        token: &SecretString,
        location_id: &str,
    ) -> Result<Vec<Room>, Error> {
        let page: ListResponse<Room> = self
            .get(&format!("locations/{location_id}/rooms"), token)
            .await?;
        Ok(page.items)
    }

    /// `GET locations/{location_id}/rooms/{room_id}/devices`
    pub async fn list_room_devices(
        &self,
        token: &SecretString,
        location_id: &str,
        room_id: &str,
    ) -> Result<Vec<DeviceSummary>, Error> {
        let page: ListResponse<DeviceSummary> = self
            .get(
                &format!("locations/{location_id}/rooms/{room_id}/devices"),
                token,
            )
            .await?;
        Ok(page.items)
    }

    /// `GET devices/{device_id}/status` -- returned raw for the normalizer.
    pub async fn device_status(
        &self,
        token: &SecretString,
        device_id: &str,
    ) -> Result<serde_json::Value, Error> {
        self.get(&format!("devices/{device_id}/status"), token)
            .await
    }

    // ── Transport ────────────────────────────────────────────────────

    async fn get<T: DeserializeOwned>(&self, path: &str, token: &SecretString) -> Result<T, Error> {
        let url = self.base_url.join(path)?;
        debug!("GET {url}");

        let resp = self
            .http
            .get(url)
            .bearer_auth(token.expose_secret())
            .send()
            .await?;
        Self::handle_response(resp).await
    }

    async fn handle_response<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, Error> {
        let status = resp.status();

        if status.is_success() {
            let body = resp.text().await?;
            trace!(bytes = body.len(), "response body");
            return serde_json::from_str(&body).map_err(|e| Error::Deserialization {
                message: format!("{e} (body preview: {:?})", preview(&body)),
                body,
            });
        }

        let retry_after_secs = resp
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());
        let body = resp.text().await.unwrap_or_default();
        let message = preview(&body);

        Err(match status.as_u16() {
            401 => Error::Unauthorized { message },
            403 => Error::Forbidden { message },
            429 => Error::RateLimited { retry_after_secs },
            code @ 500..=599 => Error::Server {
                status: code,
                message,
            },
            code => Error::Http {
                status: code,
                message,
            },
        })
    }
}
