// ── Request rate limiting ──
//
// Rolling 60 s window with a hard ceiling, plus a single exponential
// backoff delay driven by provider 429s. Uses tokio's clock so tests can
// run with a paused runtime.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

pub const WINDOW: Duration = Duration::from_secs(60);
pub const MAX_REQUESTS_PER_WINDOW: u32 = 250;
pub const WARN_THRESHOLD: u32 = 200;

pub const INITIAL_BACKOFF: Duration = Duration::from_millis(1000);
pub const MAX_BACKOFF: Duration = Duration::from_millis(30_000);

/// How long a caller without capacity waits before checking again.
pub const CAPACITY_PAUSE: Duration = Duration::from_secs(1);

#[derive(Debug)]
pub struct RateLimiter {
    request_count: u32,
    window_reset_at: Instant,
    backoff: Duration,
    warned: bool,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            request_count: 0,
            window_reset_at: Instant::now() + WINDOW,
            backoff: Duration::ZERO,
            warned: false,
        }
    }

    pub fn request_count(&self) -> u32 {
        self.request_count
    }

    /// Current backoff delay. Zero after any success.
    pub fn backoff(&self) -> Duration {
        self.backoff
    }

    fn roll_window(&mut self, now: Instant) {
        if now >= self.window_reset_at {
            if self.request_count > 0 {
                debug!(requests = self.request_count, "rate window reset");
            }
            self.request_count = 0;
            self.warned = false;
            self.window_reset_at = now + WINDOW;
        }
    }

    /// `true` when another request fits in the current window.
    pub fn check_capacity(&mut self) -> bool {
        self.roll_window(Instant::now());
        self.request_count < MAX_REQUESTS_PER_WINDOW
    }

    pub fn record_request(&mut self) {
        self.roll_window(Instant::now());
        self.request_count = self.request_count.saturating_add(1);
        if self.request_count >= WARN_THRESHOLD && !self.warned {
            self.warned = true;
            warn!(
                requests = self.request_count,
                limit = MAX_REQUESTS_PER_WINDOW,
                "approaching provider rate limit"
            );
        }
    }

    /// Provider answered 429: double the backoff, capped.
    pub fn record_throttled(&mut self) {
        self.backoff = if self.backoff.is_zero() {
            INITIAL_BACKOFF
        } else {
            (self.backoff * 2).min(MAX_BACKOFF)
        };
        warn!(backoff_ms = self.backoff.as_millis(), "throttled by provider");
    }

    pub fn record_success(&mut self) {
        self.backoff = Duration::ZERO;
    }

    /// Wait until the next request may go out, then count it.
    ///
    /// Backoff is applied first, then capacity is polled in
    /// `CAPACITY_PAUSE` steps. Never fails.
    pub async fn acquire(&mut self) {
        if !self.backoff.is_zero() {
            debug!(delay_ms = self.backoff.as_millis(), "applying backoff");
            tokio::time::sleep(self.backoff).await;
        }
        while !self.check_capacity() {
            let until_reset = self.window_reset_at.saturating_duration_since(Instant::now());
            debug!(wait_ms = until_reset.as_millis(), "rate window full, pausing");
            tokio::time::sleep(CAPACITY_PAUSE).await;
        }
        self.record_request();
    }
}
