// ── Device resolution ──
//
// Turns configuration into a concrete device list. Explicit devices win
// over rooms; rooms are matched by exact, case-sensitive name within the
// primary location.

use std::collections::HashSet;

use tracing::{debug, info, warn};

use thingwatch_api::models::{DeviceSummary, Location, Room};

use crate::config::ConfiguredDevice;
use crate::error::CoreError;
use crate::model::ResolvedDevice;

/// Directory lookups the resolver needs from the provider.
///
/// Implemented by the session so every lookup goes through the same token
/// and rate-limit path as status fetches.
pub(crate) trait DeviceDirectory {
    async fn locations(&mut self) -> Result<Vec<Location>, CoreError>;
    async fn rooms(&mut self, location_id: &str) -> Result<Vec<Room>, CoreError>;
    async fn room_devices(
        &mut self,
        location_id: &str,
        room_id: &str,
    ) -> Result<Vec<DeviceSummary>, CoreError>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    pub devices: Vec<ResolvedDevice>,
    /// Location the rooms were read from. Carried through from the cache
    /// when no lookup was needed.
    pub location_id: Option<String>,
}

pub(crate) async fn resolve<D: DeviceDirectory>(
    devices: &[ConfiguredDevice],
    rooms: &[String],
    cached_location: Option<&str>,
    directory: &mut D,
) -> Result<Resolution, CoreError> {
    if !devices.is_empty() {
        if !rooms.is_empty() {
            debug!("explicit devices configured, ignoring rooms");
        }
        return Ok(Resolution {
            devices: devices.iter().map(ResolvedDevice::from).collect(),
            location_id: cached_location.map(str::to_owned),
        });
    }

    if rooms.is_empty() {
        info!("no devices or rooms configured, nothing to poll");
        return Ok(Resolution::default());
    }

    let location_id = match cached_location {
        Some(id) => id.to_owned(),
        None => {
            let locations = directory.locations().await?;
            let Some(first) = locations.into_iter().next() else {
                warn!("account has no locations");
                return Ok(Resolution::default());
            };
            debug!(location = %first.location_id, name = %first.name, "using primary location");
            first.location_id
        }
    };

    let available = directory.rooms(&location_id).await?;
    let wanted: HashSet<&str> = rooms.iter().map(String::as_str).collect();
    for name in &wanted {
        if !available.iter().any(|r| r.name == *name) {
            warn!(room = %name, "configured room not found");
        }
    }

    let mut seen = HashSet::new();
    let mut resolved = Vec::new();
    for room in available.iter().filter(|r| wanted.contains(r.name.as_str())) {
        for device in directory.room_devices(&location_id, &room.room_id).await? {
            if seen.insert(device.device_id.clone()) {
                resolved.push(ResolvedDevice {
                    name: device.display_name().to_owned(),
                    id: device.device_id,
                    room: Some(room.name.clone()),
                });
            }
        }
    }

    info!(devices = resolved.len(), rooms = wanted.len(), "resolved devices from rooms");
    Ok(Resolution {
        devices: resolved,
        location_id: Some(location_id),
    })
}
