//! Polling, token lifecycle, and health logic between `thingwatch-api` and
//! whatever displays the data.
//!
//! - **[`Session`]**: One per configured account. Owns the token manager,
//!   rate limiter, health monitor, resolved devices, and cache. [`Session::run`]
//!   multiplexes the poll timer and both refresh timers in a single task;
//!   [`SessionHandle::stop`] ends it.
//!
//! - **[`TokenManager`]**: OAuth2 access/refresh tokens persisted through the
//!   encrypted [`CredentialVault`], or a static token that never refreshes.
//!
//! - **[`Normalizer`]**: Vendor status payloads to [`DeviceSnapshot`] via
//!   ordered probe tables.
//!
//! - **[`HealthMonitor`]**: Debounced, prioritized alert state.
//!
//! - **[`NotificationGateway`]**: Output boundary. [`BroadcastGateway`] fans
//!   [`GatewayEvent`]s out over a tokio broadcast channel.

pub(crate) mod backend;
pub mod cache;
pub mod config;
pub mod error;
pub mod fixture;
pub mod gateway;
pub mod health;
pub mod model;
pub mod normalize;
pub mod rate_limit;
pub mod resolver;
pub mod schedule;
pub mod session;
pub mod token;
pub mod vault;

// ── Primary re-exports ──────────────────────────────────────────────
pub use cache::{CacheSnapshot, CacheStore};
pub use config::{
    AuthConfig, ConfiguredDevice, OAuthClientCredentials, SessionConfig, SortOrder,
    TemperatureUnit,
};
pub use error::CoreError;
pub use gateway::{BroadcastGateway, GatewayEvent, NotificationGateway};
pub use health::{Alert, AlertCategory, HealthMonitor};
pub use model::{CredentialRecord, DeviceSnapshot, ResolvedDevice};
pub use normalize::Normalizer;
pub use session::{CycleOutcome, Session, SessionHandle, open_cache};
pub use token::{TokenManager, TokenState};
pub use vault::CredentialVault;
