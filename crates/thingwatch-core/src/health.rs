// ── Alert / health state machine ──
//
// Observes individual request outcomes and decides which single alert,
// if any, the display layer should show. `auth` and `scope` surface
// immediately; everything else needs a run of consecutive failures.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use tracing::{debug, info};

/// Consecutive failures required before a non-critical category alerts.
pub const DEBOUNCE_THRESHOLD: u32 = 10;

/// Failure category, declared in priority order (highest first).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum AlertCategory {
    Auth,
    Scope,
    Network,
    RateLimit,
    Outage,
    Schema,
}

impl AlertCategory {
    /// Position in the priority list. Lower ranks win.
    pub fn rank(self) -> u8 {
        match self {
            Self::Auth => 0,
            Self::Scope => 1,
            Self::Network => 2,
            Self::RateLimit => 3,
            Self::Outage => 4,
            Self::Schema => 5,
        }
    }

    /// Categories that bypass the debounce threshold.
    pub fn is_immediate(self) -> bool {
        matches!(self, Self::Auth | Self::Scope)
    }

    pub fn message_key(self) -> &'static str {
        match self {
            Self::Auth => "ALERT_AUTH",
            Self::Scope => "ALERT_SCOPE",
            Self::Network => "ALERT_NETWORK",
            Self::RateLimit => "ALERT_RATE_LIMIT",
            Self::Outage => "ALERT_OUTAGE",
            Self::Schema => "ALERT_SCHEMA",
        }
    }

    /// Strictly higher priority than `other`.
    pub fn outranks(self, other: Self) -> bool {
        self.rank() < other.rank()
    }
}

/// The active alert as seen by the display layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    #[serde(rename = "type")]
    pub category: AlertCategory,
    pub message_key: String,
}

impl From<AlertCategory> for Alert {
    fn from(category: AlertCategory) -> Self {
        Self {
            category,
            message_key: category.message_key().to_owned(),
        }
    }
}

/// A visible state transition the session must forward to the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlertChange {
    Raised(Alert),
    Cleared,
}

/// Debounced, prioritized alert state.
#[derive(Debug, Default)]
pub struct HealthMonitor {
    consecutive_failures: u32,
    active: Option<AlertCategory>,
}

impl HealthMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active(&self) -> Option<Alert> {
        self.active.map(Alert::from)
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Count a failure. Returns a change only when the visible alert changes.
    ///
    /// The counter is shared across categories: nine network failures and
    /// one outage make ten.
    pub fn record_failure(&mut self, category: AlertCategory) -> Option<AlertChange> {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);

        let eligible =
            category.is_immediate() || self.consecutive_failures >= DEBOUNCE_THRESHOLD;
        if !eligible {
            debug!(
                %category,
                failures = self.consecutive_failures,
                "failure below debounce threshold"
            );
            return None;
        }

        match self.active {
            Some(current) if !category.outranks(current) => {
                debug!(%category, active = %current, "alert suppressed by higher priority");
                None
            }
            _ => {
                info!(%category, "raising alert");
                self.active = Some(category);
                Some(AlertChange::Raised(Alert::from(category)))
            }
        }
    }

    /// Any success resets the counter and clears the alert.
    pub fn record_success(&mut self) -> Option<AlertChange> {
        self.consecutive_failures = 0;
        self.active.take().map(|category| {
            info!(%category, "alert cleared");
            AlertChange::Cleared
        })
    }
}
