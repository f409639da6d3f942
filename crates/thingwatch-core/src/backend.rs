// ── Provider backend ──
//
// A session talks either to the real REST API or to the offline fixture.
// Requests are plain values so the session can replay one after a token
// refresh.

use secrecy::SecretString;
use serde_json::Value;

use thingwatch_api::models::{DeviceSummary, Location, Room};
use thingwatch_api::{CloudClient, Error as ApiError};

use crate::fixture::FixtureBackend;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ApiRequest {
    Locations,
    Rooms { location_id: String },
    RoomDevices { location_id: String, room_id: String },
    DeviceStatus { device_id: String },
}

#[derive(Debug)]
pub(crate) enum ApiResponse {
    Locations(Vec<Location>),
    Rooms(Vec<Room>),
    Devices(Vec<DeviceSummary>),
    Status(Value),
}

pub(crate) enum Backend {
    Cloud(CloudClient),
    Fixture(FixtureBackend),
}

impl Backend {
    pub(crate) async fn call(
        &self,
        token: &SecretString,
        request: &ApiRequest,
    ) -> Result<ApiResponse, ApiError> {
        match self {
            Self::Cloud(client) => match request {
                ApiRequest::Locations => client.list_locations(token).await.map(ApiResponse::Locations),
                ApiRequest::Rooms { location_id } => {
                    client.list_rooms(token, location_id).await.map(ApiResponse::Rooms)
                }
                ApiRequest::RoomDevices {
                    location_id,
                    room_id,
                } => client
                    .list_room_devices(token, location_id, room_id)
                    .await
                    .map(ApiResponse::Devices),
                ApiRequest::DeviceStatus { device_id } => {
                    client.device_status(token, device_id).await.map(ApiResponse::Status)
                }
            },
            Self::Fixture(fx) => match request {
                ApiRequest::Locations => Ok(ApiResponse::Locations(fx.locations())),
                ApiRequest::Rooms { location_id } => fx.rooms(location_id).map(ApiResponse::Rooms),
                ApiRequest::RoomDevices { room_id, .. } => {
                    Ok(ApiResponse::Devices(fx.room_devices(room_id)))
                }
                ApiRequest::DeviceStatus { device_id } => {
                    fx.device_status(device_id).map(ApiResponse::Status)
                }
            },
        }
    }
}

impl std::fmt::Display for ApiRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Locations => f.write_str("locations"),
            Self::Rooms { location_id } => write!(f, "locations/{location_id}/rooms"),
            Self::RoomDevices {
                location_id,
                room_id,
            } => write!(f, "locations/{location_id}/rooms/{room_id}/devices"),
            Self::DeviceStatus { device_id } => write!(f, "devices/{device_id}/status"),
        }
    }
}
