// thingwatch-api: Async Rust client for the cloud device API (OAuth2 + REST reads)

pub mod auth;
pub mod client;
pub mod error;
pub mod models;
pub mod transport;

pub use auth::{OAuthClient, TokenResponse};
pub use client::CloudClient;
pub use error::Error;
pub use transport::TransportConfig;
