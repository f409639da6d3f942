// Wire types for the provider's REST read endpoints.
//
// Only the fields the poller consumes are modeled. Device status payloads
// stay as raw `serde_json::Value` -- their shape varies by device type and
// is handled defensively by the core normalizer.

use serde::{Deserialize, Serialize};

/// `{ "items": [...] }` wrapper used by every list endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct ListResponse<T> {
    #[serde(default = "Vec::new")]
    pub items: Vec<T>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    pub location_id: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    pub room_id: String,
    #[serde(default)]
    pub location_id: Option<String>,
    #[serde(default)]
    pub name: String,
}

/// Device summary as listed under a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSummary {
    pub device_id: String,
    #[serde(default)]
    pub name: Option<String>,
    /// User-assigned label; preferred over `name` for display.
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub room_id: Option<String>,
}

impl DeviceSummary {
    /// Best display name: label, then name, then the raw id.
    pub fn display_name(&self) -> &str {
        self.label
            .as_deref()
            .filter(|l| !l.is_empty())
            .or(self.name.as_deref())
            .unwrap_or(&self.device_id)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn list_response_tolerates_missing_items() {
        let parsed: ListResponse<Location> = serde_json::from_str("{}").unwrap();
        assert!(parsed.items.is_empty());
    }

    #[test]
    fn display_name_prefers_label() {
        let d = DeviceSummary {
            device_id: "d1".into(),
            name: Some("c2c-switch".into()),
            label: Some("Porch Light".into()),
            room_id: None,
        };
        assert_eq!(d.display_name(), "Porch Light");

        let d = DeviceSummary {
            label: Some(String::new()),
            ..d
        };
        assert_eq!(d.display_name(), "c2c-switch");
    }
}
