// ── Device domain types ──

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::ConfiguredDevice;

/// A device confirmed in scope for polling, independent of its live status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedDevice {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room: Option<String>,
}

impl From<&ConfiguredDevice> for ResolvedDevice {
    fn from(d: &ConfiguredDevice) -> Self {
        Self {
            id: d.id.clone(),
            name: d.name.clone().unwrap_or_else(|| d.id.clone()),
            room: d.room.clone(),
        }
    }
}

/// One device's normalized status for a single poll cycle.
///
/// Rebuilt from the raw payload every cycle; never patched in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSnapshot {
    pub id: String,
    pub name: String,
    pub room: String,
    /// Headline capability, chosen by fixed priority. `None` when the device
    /// exposes none of the prioritized capabilities.
    pub primary_capability: Option<String>,
    pub primary_state: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub humidity: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub battery: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heating_setpoint: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cooling_setpoint: Option<f64>,
    /// Free-form extras (thermostat state, shade token, ...).
    #[serde(default)]
    pub capabilities: BTreeMap<String, Value>,
}
