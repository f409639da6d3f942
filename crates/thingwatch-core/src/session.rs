// ── Polling session ──
//
// One `Session` owns every piece of mutable state for one configured
// account: tokens, rate window, health, resolved devices, cache. All of it
// is driven from a single task; the poll timer and both refresh timers are
// multiplexed in `run()`'s select loop, so nothing here is shared or locked.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use thingwatch_api::models::{DeviceSummary, Location, Room};
use thingwatch_api::{CloudClient, Error as ApiError, TransportConfig};

use crate::backend::{ApiRequest, ApiResponse, Backend};
use crate::cache::{CacheStore, config_hash};
use crate::config::{SessionConfig, SortOrder};
use crate::error::CoreError;
use crate::fixture::{FIXTURE_ROOMS, FixtureBackend};
use crate::gateway::{GatewayEvent, NotificationGateway};
use crate::health::{AlertCategory, AlertChange, HealthMonitor};
use crate::model::{DeviceSnapshot, ResolvedDevice};
use crate::normalize::Normalizer;
use crate::rate_limit::RateLimiter;
use crate::resolver::{self, DeviceDirectory};
use crate::schedule::{OneShot, Recurring};
use crate::token::{TokenManager, TokenState};

/// Period of the proactive token refresh.
pub const RECURRING_REFRESH: Duration = Duration::from_secs(20 * 60 * 60);
/// Tokens with less than this left at startup get a one-shot refresh.
pub const STARTUP_REFRESH_THRESHOLD: Duration = Duration::from_secs(60 * 60);
pub const STARTUP_REFRESH_DELAY: Duration = Duration::from_secs(30);
/// Tokens with less than this left are refreshed before a batch.
pub const PRE_BATCH_REFRESH_THRESHOLD: Duration = Duration::from_secs(10 * 60);

/// Result of one `run_cycle()`.
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// Nothing was attempted (stopped, or authorization permanently lost).
    Skipped,
    NoDevices,
    Published {
        devices: usize,
        failed: usize,
    },
    Failed {
        message: String,
        category: Option<AlertCategory>,
    },
}

/// Cloneable stop switch for a running session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    cancel: CancellationToken,
}

impl SessionHandle {
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Fill in the fixture rooms when a test-mode profile names nothing.
fn apply_fixture_defaults(config: &mut SessionConfig) {
    if config.test_mode && config.devices.is_empty() && config.rooms.is_empty() {
        config.rooms = FIXTURE_ROOMS.iter().map(|r| (*r).to_owned()).collect();
    }
}

/// Open the cache a session with this config would use.
///
/// Loads credentials to learn the account identity; a missing vault is an
/// error rather than a guess, since a wrong hash would delete the cache.
pub fn open_cache(config: &SessionConfig) -> Result<CacheStore, CoreError> {
    let mut config = config.clone();
    apply_fixture_defaults(&mut config);
    let mut tokens = TokenManager::new(&config);
    tokens.initialize()?;
    Ok(CacheStore::new(
        &config.data_dir,
        config_hash(&tokens.identity(), &config.devices, &config.rooms),
    ))
}

pub struct Session {
    config: SessionConfig,
    backend: Backend,
    tokens: TokenManager,
    limiter: RateLimiter,
    health: HealthMonitor,
    normalizer: Normalizer,
    /// Opened in `start()`, once the credential identity is known.
    cache: Option<CacheStore>,
    gateway: Arc<dyn NotificationGateway>,
    resolved: Option<Vec<ResolvedDevice>>,
    location_id: Option<String>,
    last_good: Option<(Vec<DeviceSnapshot>, DateTime<Utc>)>,
    cancel: CancellationToken,
}

impl Session {
    pub fn new(
        mut config: SessionConfig,
        gateway: Arc<dyn NotificationGateway>,
    ) -> Result<Self, CoreError> {
        apply_fixture_defaults(&mut config);
        let backend = if config.test_mode {
            info!("test mode: serving fixture data");
            Backend::Fixture(FixtureBackend::new())
        } else {
            let transport = TransportConfig::with_timeout(config.timeout);
            Backend::Cloud(CloudClient::new(&config.api_url, &transport)?)
        };
        Ok(Self {
            tokens: TokenManager::new(&config),
            normalizer: Normalizer::new(config.temperature_unit),
            backend,
            limiter: RateLimiter::new(),
            health: HealthMonitor::new(),
            cache: None,
            gateway,
            resolved: None,
            location_id: None,
            last_good: None,
            cancel: CancellationToken::new(),
            config,
        })
    }

    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            cancel: self.cancel.clone(),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn token_state(&self) -> TokenState {
        self.tokens.state()
    }

    pub fn resolved_devices(&self) -> Option<&[ResolvedDevice]> {
        self.resolved.as_deref()
    }

    fn stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Load credentials and cache, publishing cached data if any.
    ///
    /// Missing credentials publish an error plus an auth alert and return
    /// the error; the session cannot poll.
    pub fn start(&mut self) -> Result<(), CoreError> {
        self.publish(GatewayEvent::Loading {});

        if let Err(e) = self.tokens.initialize() {
            error!(error = %e, "cannot start session");
            self.observe_failure(&e);
            self.publish(GatewayEvent::Error {
                message: e.to_string(),
                cached: false,
                devices: None,
                timestamp: None,
            });
            return Err(e);
        }

        let cache = CacheStore::new(
            &self.config.data_dir,
            config_hash(&self.tokens.identity(), &self.config.devices, &self.config.rooms),
        );
        if let Some(snapshot) = cache.load() {
            if !snapshot.devices.is_empty() {
                debug!(devices = snapshot.devices.len(), "adopting cached device list");
                self.resolved = Some(snapshot.devices);
            }
            self.location_id = snapshot.location_id;
            if !snapshot.last_status.is_empty() {
                let mut devices = snapshot.last_status;
                sort_snapshots(self.config.sort, &mut devices);
                self.publish(GatewayEvent::DeviceData {
                    devices: devices.clone(),
                    timestamp: snapshot.timestamp,
                });
                self.last_good = Some((devices, snapshot.timestamp));
            }
        }
        self.cache = Some(cache);
        info!(state = %self.tokens.state(), "session started");
        Ok(())
    }

    /// Start, then poll and refresh on schedule until stopped.
    pub async fn run(mut self) -> Result<(), CoreError> {
        self.start()?;

        let mut poll = Recurring::immediate(self.config.effective_poll_interval());
        let mut refresh = Recurring::after(RECURRING_REFRESH);
        let mut startup_refresh = OneShot::idle();
        if self.wants_startup_refresh() {
            debug!("token expires within the hour, scheduling startup refresh");
            startup_refresh.arm(STARTUP_REFRESH_DELAY);
        }

        let cancel = self.cancel.clone();
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                () = poll.tick() => {
                    let outcome = self.run_cycle().await;
                    debug!(?outcome, "cycle finished");
                }
                () = refresh.tick() => self.scheduled_refresh().await,
                () = startup_refresh.fired() => self.scheduled_refresh().await,
            }
        }
        info!("session stopped");
        Ok(())
    }

    /// Whether `run` arms the one-shot refresh: a refreshable token with
    /// less than an hour left.
    pub fn wants_startup_refresh(&self) -> bool {
        self.tokens.can_refresh()
            && !self.tokens.is_permanently_failed()
            && self
                .tokens
                .remaining_lifetime()
                .is_some_and(|left| left < STARTUP_REFRESH_THRESHOLD)
    }

    /// Drop the resolved device list; the next cycle resolves again.
    pub fn invalidate_devices(&mut self) {
        self.resolved = None;
    }

    // ── Token refresh ────────────────────────────────────────────────

    pub async fn scheduled_refresh(&mut self) {
        if !self.tokens.can_refresh() || self.tokens.is_permanently_failed() {
            return;
        }
        if let Err(e) = self.refresh_tokens().await {
            warn!(error = %e, "scheduled token refresh failed");
        }
    }

    async fn refresh_tokens(&mut self) -> Result<(), CoreError> {
        let result = self.tokens.refresh().await;
        if let Err(e) = &result {
            if !self.stopped() {
                self.observe_failure(e);
            }
        }
        result
    }

    // ── Poll cycle ───────────────────────────────────────────────────

    pub async fn run_cycle(&mut self) -> CycleOutcome {
        if self.stopped() {
            return CycleOutcome::Skipped;
        }
        if matches!(
            self.tokens.state(),
            TokenState::PermanentlyFailed | TokenState::NoCredentials
        ) {
            debug!(state = %self.tokens.state(), "not polling");
            return CycleOutcome::Skipped;
        }

        if self
            .tokens
            .remaining_lifetime()
            .is_some_and(|left| left < PRE_BATCH_REFRESH_THRESHOLD)
        {
            debug!("token close to expiry, refreshing before batch");
            if let Err(e) = self.refresh_tokens().await {
                if e.aborts_cycle() {
                    return self.fail_cycle(&e);
                }
                warn!(error = %e, "pre-batch refresh failed, trying current token");
            }
            if self.stopped() {
                return CycleOutcome::Skipped;
            }
        }

        let devices = match self.resolved.clone() {
            Some(devices) => devices,
            None => match self.resolve().await {
                Ok(devices) => devices,
                Err(CoreError::Cancelled) => return CycleOutcome::Skipped,
                Err(e) => return self.fail_cycle(&e),
            },
        };

        if devices.is_empty() {
            self.publish(GatewayEvent::NoDevices {});
            return CycleOutcome::NoDevices;
        }

        let mut snapshots = Vec::with_capacity(devices.len());
        let mut last_error = None;
        for device in &devices {
            let request = ApiRequest::DeviceStatus {
                device_id: device.id.clone(),
            };
            let result = match self.request(&request).await {
                Ok(ApiResponse::Status(raw)) => {
                    if self.config.debug {
                        debug!(device = %device.id, payload = %raw, "raw status");
                    }
                    self.normalizer.normalize(device, &raw)
                }
                Ok(other) => Err(unexpected(&request, &other)),
                Err(e) => Err(e),
            };
            match result {
                Ok(snapshot) => {
                    self.observe_success();
                    snapshots.push(snapshot);
                }
                Err(CoreError::Cancelled) => return CycleOutcome::Skipped,
                Err(e) if e.aborts_cycle() => return self.fail_cycle(&e),
                Err(e) => {
                    if matches!(e, CoreError::Schema { .. }) {
                        self.observe_failure(&e);
                    }
                    warn!(device = %device.id, error = %e, "device skipped this cycle");
                    last_error = Some(e);
                }
            }
        }
        if self.stopped() {
            return CycleOutcome::Skipped;
        }

        let failed = devices.len() - snapshots.len();
        if snapshots.is_empty() {
            if let Some(e) = last_error {
                return self.fail_cycle(&e);
            }
        }

        self.observe_success();
        let timestamp = Utc::now();
        sort_snapshots(self.config.sort, &mut snapshots);
        if let Some(cache) = &self.cache {
            if let Err(e) =
                cache.record_cycle(&devices, &snapshots, self.location_id.as_deref(), timestamp)
            {
                warn!(error = %e, "failed to write cache");
            }
        }
        info!(devices = snapshots.len(), failed, "publishing device data");
        self.publish(GatewayEvent::DeviceData {
            devices: snapshots.clone(),
            timestamp,
        });
        let count = snapshots.len();
        self.last_good = Some((snapshots, timestamp));
        CycleOutcome::Published {
            devices: count,
            failed,
        }
    }

    async fn resolve(&mut self) -> Result<Vec<ResolvedDevice>, CoreError> {
        let devices = self.config.devices.clone();
        let rooms = self.config.rooms.clone();
        let cached_location = self.location_id.clone();
        let resolution =
            resolver::resolve(&devices, &rooms, cached_location.as_deref(), self).await?;
        if self.stopped() {
            return Err(CoreError::Cancelled);
        }

        if let Some(cache) = &self.cache {
            if let Err(e) =
                cache.record_resolution(&resolution.devices, resolution.location_id.as_deref())
            {
                warn!(error = %e, "failed to cache resolved devices");
            }
        }
        self.location_id = resolution.location_id;
        self.resolved = Some(resolution.devices.clone());
        Ok(resolution.devices)
    }

    /// Route a cycle-level failure: no publish of new data, the display
    /// keeps the last known-good set.
    fn fail_cycle(&mut self, e: &CoreError) -> CycleOutcome {
        error!(error = %e, "poll cycle failed");
        let (devices, timestamp) = match &self.last_good {
            Some((devices, ts)) => (Some(devices.clone()), Some(*ts)),
            None => (None, None),
        };
        self.publish(GatewayEvent::Error {
            message: e.to_string(),
            cached: devices.is_some(),
            devices,
            timestamp,
        });
        CycleOutcome::Failed {
            message: e.to_string(),
            category: e.category(),
        }
    }

    // ── Requests ─────────────────────────────────────────────────────

    /// Send one request through the rate limiter.
    ///
    /// A 401 in OAuth mode triggers exactly one refresh and one retry.
    /// Failures are reported to the health monitor here; a device status
    /// success is reported by the caller after normalization.
    async fn request(&mut self, request: &ApiRequest) -> Result<ApiResponse, CoreError> {
        let mut refreshed = false;
        loop {
            self.limiter.acquire().await;
            if self.stopped() {
                return Err(CoreError::Cancelled);
            }
            let Some(token) = self.tokens.access_token().cloned() else {
                return Err(CoreError::NoCredentials {
                    location: self.config.data_dir.display().to_string(),
                });
            };

            debug!(%request, "request");
            let result = self.backend.call(&token, request).await;
            if self.stopped() {
                return Err(CoreError::Cancelled);
            }

            match result {
                Ok(response) => {
                    self.limiter.record_success();
                    // A status payload only counts once it normalizes.
                    if !matches!(request, ApiRequest::DeviceStatus { .. }) {
                        self.observe_success();
                    }
                    return Ok(response);
                }
                Err(ApiError::Unauthorized { .. }) if self.tokens.can_refresh() && !refreshed => {
                    info!(%request, "access token rejected, refreshing once");
                    refreshed = true;
                    self.refresh_tokens().await?;
                    if self.stopped() {
                        return Err(CoreError::Cancelled);
                    }
                }
                Err(e) => {
                    if let ApiError::RateLimited { retry_after_secs } = &e {
                        debug!(?retry_after_secs, "provider sent 429");
                        self.limiter.record_throttled();
                    }
                    let e = CoreError::from(e);
                    self.observe_failure(&e);
                    return Err(e);
                }
            }
        }
    }

    // ── Health & publishing ──────────────────────────────────────────

    fn observe_success(&mut self) {
        if let Some(change) = self.health.record_success() {
            self.publish_alert(change);
        }
    }

    fn observe_failure(&mut self, e: &CoreError) {
        if let Some(category) = e.category() {
            if let Some(change) = self.health.record_failure(category) {
                self.publish_alert(change);
            }
        }
    }

    fn publish_alert(&self, change: AlertChange) {
        self.publish(match change {
            AlertChange::Raised(alert) => GatewayEvent::Alert(alert),
            AlertChange::Cleared => GatewayEvent::AlertClear {},
        });
    }

    fn publish(&self, event: GatewayEvent) {
        if self.stopped() {
            debug!(event = event.name(), "session stopped, dropping event");
            return;
        }
        self.gateway.publish(event);
    }
}

impl DeviceDirectory for Session {
    async fn locations(&mut self) -> Result<Vec<Location>, CoreError> {
        let request = ApiRequest::Locations;
        match self.request(&request).await? {
            ApiResponse::Locations(items) => Ok(items),
            other => Err(unexpected(&request, &other)),
        }
    }

    async fn rooms(&mut self, location_id: &str) -> Result<Vec<Room>, CoreError> {
        let request = ApiRequest::Rooms {
            location_id: location_id.to_owned(),
        };
        match self.request(&request).await? {
            ApiResponse::Rooms(items) => Ok(items),
            other => Err(unexpected(&request, &other)),
        }
    }

    async fn room_devices(
        &mut self,
        location_id: &str,
        room_id: &str,
    ) -> Result<Vec<DeviceSummary>, CoreError> {
        let request = ApiRequest::RoomDevices {
            location_id: location_id.to_owned(),
            room_id: room_id.to_owned(),
        };
        match self.request(&request).await? {
            ApiResponse::Devices(items) => Ok(items),
            other => Err(unexpected(&request, &other)),
        }
    }
}

fn unexpected(request: &ApiRequest, response: &ApiResponse) -> CoreError {
    CoreError::Internal(format!("unexpected response to {request}: {response:?}"))
}

pub fn sort_snapshots(order: SortOrder, devices: &mut [DeviceSnapshot]) {
    match order {
        SortOrder::None => {}
        SortOrder::Name => devices.sort_by_cached_key(|d| d.name.to_lowercase()),
        SortOrder::Room => {
            devices.sort_by_cached_key(|d| (d.room.to_lowercase(), d.name.to_lowercase()));
        }
    }
}
