// ── Capability normalization ──
//
// Vendor status payloads look like
//
//   { "components": { "main": { "<capability>": { "<attribute>": { "value": .., "unit": .. } } } } }
//
// but which capability/attribute carries a given reading varies by device
// family. Every logical value is read through an ordered probe table; the
// first probe that yields a value wins.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::config::TemperatureUnit;
use crate::error::CoreError;
use crate::model::{DeviceSnapshot, ResolvedDevice};

const MAIN: &str = "main";

/// `(capability, attribute)` read from one component.
type Probe = (&'static str, &'static str);

/// Headline capability order. First present on `main` wins.
const PRIMARY_PRIORITY: &[Probe] = &[
    ("switch", "switch"),
    ("contactSensor", "contact"),
    ("motionSensor", "motion"),
    ("lock", "lock"),
    ("presenceSensor", "presence"),
    ("windowShade", "windowShade"),
    ("temperatureMeasurement", "temperature"),
    ("battery", "battery"),
];

const TEMPERATURE_PROBES: &[Probe] = &[
    ("temperatureMeasurement", "temperature"),
    ("thermostat", "temperature"),
];

const HUMIDITY_PROBES: &[Probe] = &[
    ("relativeHumidityMeasurement", "humidity"),
    ("humidityMeasurement", "humidity"),
];

const SHADE_LEVEL_PROBES: &[Probe] = &[
    ("windowShadeLevel", "shadeLevel"),
    ("windowShade", "shadeLevel"),
    ("switchLevel", "level"),
];

const BATTERY_PROBES: &[Probe] = &[("battery", "battery")];

const LEVEL_PROBES: &[Probe] = &[("switchLevel", "level")];

const OPERATING_STATE_PROBES: &[Probe] = &[
    ("thermostatOperatingState", "thermostatOperatingState"),
    ("thermostat", "thermostatOperatingState"),
];

const MODE_PROBES: &[Probe] = &[
    ("thermostatMode", "thermostatMode"),
    ("thermostat", "thermostatMode"),
];

const HEATING_SETPOINT_PROBES: &[Probe] = &[
    ("thermostatHeatingSetpoint", "heatingSetpoint"),
    ("thermostat", "heatingSetpoint"),
];

const COOLING_SETPOINT_PROBES: &[Probe] = &[
    ("thermostatCoolingSetpoint", "coolingSetpoint"),
    ("thermostat", "coolingSetpoint"),
];

/// Stateless payload normalizer; the only input besides the payload is the
/// display temperature unit.
#[derive(Debug, Clone, Copy, Default)]
pub struct Normalizer {
    unit: TemperatureUnit,
}

impl Normalizer {
    pub fn new(unit: TemperatureUnit) -> Self {
        Self { unit }
    }

    /// Build a snapshot, or a schema error when the payload has no
    /// `components` object.
    pub fn normalize(
        &self,
        device: &ResolvedDevice,
        raw: &Value,
    ) -> Result<DeviceSnapshot, CoreError> {
        let components = raw
            .as_object()
            .and_then(|o| o.get("components"))
            .and_then(Value::as_object)
            .ok_or_else(|| CoreError::Schema {
                message: format!("device {}: status has no components object", device.id),
            })?;
        let main = components.get(MAIN).and_then(Value::as_object);

        let mut snapshot = DeviceSnapshot {
            id: device.id.clone(),
            name: device.name.clone(),
            room: device.room.clone().unwrap_or_default(),
            primary_capability: None,
            primary_state: None,
            temperature: self.temperature(components, TEMPERATURE_PROBES),
            humidity: probe_all(components, HUMIDITY_PROBES).and_then(|a| number(a.value)),
            battery: main.and_then(|m| probe(m, BATTERY_PROBES)).and_then(|a| number(a.value)),
            level: main.and_then(|m| probe(m, LEVEL_PROBES)).and_then(|a| number(a.value)),
            heating_setpoint: self.temperature(components, HEATING_SETPOINT_PROBES),
            cooling_setpoint: self.temperature(components, COOLING_SETPOINT_PROBES),
            capabilities: BTreeMap::new(),
        };

        if let Some(main) = main {
            let shade_level = probe(main, SHADE_LEVEL_PROBES).and_then(|a| number(a.value));
            if let Some((capability, state)) = self.primary(main) {
                snapshot.primary_capability = Some(capability.to_owned());
                // Shades report the percentage, not the open/closed token.
                snapshot.primary_state = match shade_level {
                    Some(level) if capability == "windowShade" => {
                        snapshot.level = Some(level);
                        Some(Value::from(level))
                    }
                    _ => Some(state),
                };
            }
            if let Some(shade) = probe(main, &[("windowShade", "windowShade")]) {
                snapshot.capabilities.insert("windowShade".into(), shade.value.clone());
            }
            if let Some(level) = shade_level {
                snapshot.capabilities.insert("shadeLevel".into(), Value::from(level));
            }
        }
        if let Some(state) = probe_all(components, OPERATING_STATE_PROBES) {
            snapshot
                .capabilities
                .insert("thermostatOperatingState".into(), state.value.clone());
        }
        if let Some(mode) = probe_all(components, MODE_PROBES) {
            snapshot.capabilities.insert("thermostatMode".into(), mode.value.clone());
        }
        if snapshot.temperature.is_some() {
            snapshot
                .capabilities
                .insert("temperatureUnit".into(), Value::from(self.unit.to_string()));
        }

        Ok(snapshot)
    }

    /// Primary capability and its state. Falls back to the first attribute
    /// with a value when the expected attribute is missing.
    fn primary(&self, main: &Map<String, Value>) -> Option<(&'static str, Value)> {
        PRIMARY_PRIORITY.iter().find_map(|&(capability, attribute)| {
            let cap = main.get(capability)?.as_object()?;
            let state = match cap.get(attribute).and_then(Attribute::parse) {
                Some(attr) if capability == "temperatureMeasurement" => self
                    .convert(&attr)
                    .map_or_else(|| attr.value.clone(), Value::from),
                Some(attr) => attr.value.clone(),
                None => generic_value(cap)?,
            };
            Some((capability, state))
        })
    }

    fn temperature(&self, components: &Map<String, Value>, probes: &[Probe]) -> Option<f64> {
        probe_all(components, probes).and_then(|a| self.convert(&a))
    }

    fn convert(&self, attr: &Attribute<'_>) -> Option<f64> {
        let reading = number(attr.value)?;
        let converted = match (attr.unit, self.unit) {
            (Some("C"), TemperatureUnit::Fahrenheit) => reading * 9.0 / 5.0 + 32.0,
            (Some("F"), TemperatureUnit::Celsius) => (reading - 32.0) * 5.0 / 9.0,
            _ => reading,
        };
        Some(round1(converted))
    }
}

// ── Probing ──────────────────────────────────────────────────────────

/// An attribute object with a defined `value`.
struct Attribute<'a> {
    value: &'a Value,
    unit: Option<&'a str>,
}

impl<'a> Attribute<'a> {
    fn parse(raw: &'a Value) -> Option<Self> {
        let obj = raw.as_object()?;
        let value = obj.get("value").filter(|v| !v.is_null())?;
        Some(Self {
            value,
            unit: obj.get("unit").and_then(Value::as_str),
        })
    }
}

fn probe<'a>(component: &'a Map<String, Value>, probes: &[Probe]) -> Option<Attribute<'a>> {
    probes.iter().find_map(|&(capability, attribute)| {
        component
            .get(capability)?
            .as_object()?
            .get(attribute)
            .and_then(Attribute::parse)
    })
}

/// Probe every component, `main` first, then the rest in key order.
fn probe_all<'a>(components: &'a Map<String, Value>, probes: &[Probe]) -> Option<Attribute<'a>> {
    let main = components.get(MAIN).into_iter();
    let others = components
        .iter()
        .filter(|(name, _)| name.as_str() != MAIN)
        .map(|(_, c)| c);
    main.chain(others)
        .filter_map(Value::as_object)
        .find_map(|c| probe(c, probes))
}

fn generic_value(capability: &Map<String, Value>) -> Option<Value> {
    capability
        .values()
        .find_map(Attribute::parse)
        .map(|a| a.value.clone())
}

fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
    .filter(|n: &f64| n.is_finite())
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
