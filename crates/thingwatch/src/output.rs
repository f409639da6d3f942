//! Output formatting: gateway event lines, snapshot tables, JSON.

use std::io::{self, IsTerminal, Write};

use serde::Serialize;
use serde_json::Value;
use tabled::{Table, Tabled, settings::Style};

use thingwatch_core::{DeviceSnapshot, GatewayEvent};

use crate::error::CliError;

/// Whether stdout should get ANSI colors.
pub fn should_color() -> bool {
    io::stdout().is_terminal() && std::env::var_os("NO_COLOR").is_none()
}

// ── Event lines ──────────────────────────────────────────────────────

#[derive(Serialize)]
struct EventLine<'a> {
    profile: &'a str,
    #[serde(flatten)]
    event: &'a GatewayEvent,
}

/// One gateway event as a compact JSON line, tagged with its profile.
pub fn event_line(profile: &str, event: &GatewayEvent) -> Result<String, CliError> {
    Ok(serde_json::to_string(&EventLine { profile, event })?)
}

// ── Snapshot table ───────────────────────────────────────────────────

#[derive(Tabled)]
struct DeviceRow {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Room")]
    room: String,
    #[tabled(rename = "Capability")]
    capability: String,
    #[tabled(rename = "State")]
    state: String,
    #[tabled(rename = "Temp")]
    temperature: String,
    #[tabled(rename = "Battery")]
    battery: String,
}

fn reading(value: Option<f64>, suffix: &str) -> String {
    value.map_or_else(|| "-".into(), |v| format!("{v}{suffix}"))
}

fn state_text(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => "-".into(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

impl From<&DeviceSnapshot> for DeviceRow {
    fn from(d: &DeviceSnapshot) -> Self {
        Self {
            name: d.name.clone(),
            room: if d.room.is_empty() { "-".into() } else { d.room.clone() },
            capability: d.primary_capability.clone().unwrap_or_else(|| "-".into()),
            state: state_text(d.primary_state.as_ref()),
            temperature: reading(d.temperature, "°"),
            battery: reading(d.battery, "%"),
        }
    }
}

pub fn render_devices(devices: &[DeviceSnapshot]) -> String {
    let rows: Vec<DeviceRow> = devices.iter().map(DeviceRow::from).collect();
    Table::new(rows).with(Style::rounded()).to_string()
}

/// Pretty-printed JSON.
pub fn render_json<T: Serialize + ?Sized>(data: &T) -> Result<String, CliError> {
    Ok(serde_json::to_string_pretty(data)?)
}

/// Write to stdout, ignoring a closed pipe.
pub fn print_output(output: &str) {
    if output.is_empty() {
        return;
    }
    let mut stdout = io::stdout().lock();
    let _ = writeln!(stdout, "{output}");
}
