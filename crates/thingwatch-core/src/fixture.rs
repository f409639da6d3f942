// ── Offline fixture backend ──
//
// Canned provider data for test mode: one location, two rooms, and a few
// devices covering the capability shapes the normalizer handles. Readings
// drift slightly on every status call so a display visibly updates.

use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::{Value, json};

use thingwatch_api::Error as ApiError;
use thingwatch_api::models::{DeviceSummary, Location, Room};

pub const FIXTURE_LOCATION: &str = "fixture-home";
pub const FIXTURE_ROOMS: &[&str] = &["Living Room", "Hallway"];

struct FixtureDevice {
    id: &'static str,
    label: &'static str,
    room_id: &'static str,
}

const DEVICES: &[FixtureDevice] = &[
    FixtureDevice { id: "fx-lamp", label: "Floor Lamp", room_id: "fx-living" },
    FixtureDevice { id: "fx-thermostat", label: "Thermostat", room_id: "fx-living" },
    FixtureDevice { id: "fx-shade", label: "Window Shade", room_id: "fx-living" },
    FixtureDevice { id: "fx-door", label: "Front Door", room_id: "fx-hall" },
    FixtureDevice { id: "fx-motion", label: "Hall Motion", room_id: "fx-hall" },
];

#[derive(Debug, Default)]
pub struct FixtureBackend {
    tick: AtomicU64,
}

impl FixtureBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn locations(&self) -> Vec<Location> {
        vec![Location {
            location_id: FIXTURE_LOCATION.into(),
            name: "Demo Home".into(),
        }]
    }

    pub fn rooms(&self, location_id: &str) -> Result<Vec<Room>, ApiError> {
        if location_id != FIXTURE_LOCATION {
            return Err(not_found(&format!("location {location_id}")));
        }
        Ok([("fx-living", FIXTURE_ROOMS[0]), ("fx-hall", FIXTURE_ROOMS[1])]
            .into_iter()
            .map(|(id, name)| Room {
                room_id: id.into(),
                location_id: Some(FIXTURE_LOCATION.into()),
                name: name.into(),
            })
            .collect())
    }

    pub fn room_devices(&self, room_id: &str) -> Vec<DeviceSummary> {
        DEVICES
            .iter()
            .filter(|d| d.room_id == room_id)
            .map(|d| DeviceSummary {
                device_id: d.id.into(),
                name: None,
                label: Some(d.label.into()),
                room_id: Some(d.room_id.into()),
            })
            .collect()
    }

    pub fn device_status(&self, device_id: &str) -> Result<Value, ApiError> {
        let tick = self.tick.fetch_add(1, Ordering::Relaxed);
        let drift = f64::from(u8::try_from(tick % 5).unwrap_or(0)) * 0.1;
        let status = match device_id {
            "fx-lamp" => json!({"components": {"main": {
                "switch": {"switch": {"value": if tick % 2 == 0 { "on" } else { "off" }}},
                "switchLevel": {"level": {"value": 75, "unit": "%"}},
            }}}),
            "fx-thermostat" => json!({"components": {"main": {
                "temperatureMeasurement": {"temperature": {"value": 21.0 + drift, "unit": "C"}},
                "relativeHumidityMeasurement": {"humidity": {"value": 44, "unit": "%"}},
                "thermostatOperatingState": {"thermostatOperatingState": {"value": "heating"}},
                "thermostatMode": {"thermostatMode": {"value": "heat"}},
                "thermostatHeatingSetpoint": {"heatingSetpoint": {"value": 21.5, "unit": "C"}},
            }}}),
            "fx-shade" => json!({"components": {"main": {
                "windowShade": {"windowShade": {"value": "partially open"}},
                "windowShadeLevel": {"shadeLevel": {"value": 40, "unit": "%"}},
                "battery": {"battery": {"value": 88, "unit": "%"}},
            }}}),
            "fx-door" => json!({"components": {"main": {
                "lock": {"lock": {"value": "locked"}},
                "contactSensor": {"contact": {"value": "closed"}},
                "battery": {"battery": {"value": 67, "unit": "%"}},
            }}}),
            "fx-motion" => json!({"components": {
                "main": {
                    "motionSensor": {"motion": {"value": if tick % 3 == 0 { "active" } else { "inactive" }}},
                    "battery": {"battery": {"value": 91, "unit": "%"}},
                },
                "sensor": {"temperatureMeasurement": {"temperature": {"value": 68.0 + drift, "unit": "F"}}},
            }}),
            other => return Err(not_found(&format!("device {other}"))),
        };
        Ok(status)
    }
}

fn not_found(what: &str) -> ApiError {
    ApiError::Http {
        status: 404,
        message: format!("{what} not found"),
    }
}
