// ── Notification gateway ──
//
// Boundary between a session and whatever renders its output. Events are
// tagged `{ "event": "device-data", "payload": { .. } }` on the wire.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

use crate::health::Alert;
use crate::model::DeviceSnapshot;

const EVENT_CHANNEL_SIZE: usize = 256;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "kebab-case")]
pub enum GatewayEvent {
    DeviceData {
        devices: Vec<DeviceSnapshot>,
        timestamp: DateTime<Utc>,
    },
    Loading {},
    Error {
        message: String,
        /// `true` when `devices` holds stale data from the cache.
        cached: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        devices: Option<Vec<DeviceSnapshot>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<DateTime<Utc>>,
    },
    Alert(Alert),
    AlertClear {},
    NoDevices {},
}

impl GatewayEvent {
    /// Wire name of the event.
    pub fn name(&self) -> &'static str {
        match self {
            Self::DeviceData { .. } => "device-data",
            Self::Loading {} => "loading",
            Self::Error { .. } => "error",
            Self::Alert(_) => "alert",
            Self::AlertClear {} => "alert-clear",
            Self::NoDevices {} => "no-devices",
        }
    }
}

/// Sink for session output. Implementations must not block.
pub trait NotificationGateway: Send + Sync {
    fn publish(&self, event: GatewayEvent);
}

/// Fan-out gateway over a tokio broadcast channel.
#[derive(Debug, Clone)]
pub struct BroadcastGateway {
    tx: broadcast::Sender<Arc<GatewayEvent>>,
}

impl Default for BroadcastGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl BroadcastGateway {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<GatewayEvent>> {
        self.tx.subscribe()
    }
}

impl NotificationGateway for BroadcastGateway {
    fn publish(&self, event: GatewayEvent) {
        trace!(event = event.name(), "publish");
        // No subscribers is not an error
        let _ = self.tx.send(Arc::new(event));
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::health::AlertCategory;

    #[test]
    fn wire_format_is_tagged() {
        let ev = serde_json::to_value(GatewayEvent::Loading {}).unwrap();
        assert_eq!(ev, json!({"event": "loading", "payload": {}}));

        let ev = serde_json::to_value(GatewayEvent::Alert(Alert::from(AlertCategory::Auth))).unwrap();
        assert_eq!(
            ev,
            json!({"event": "alert", "payload": {"type": "auth", "messageKey": "ALERT_AUTH"}})
        );

        let ev = serde_json::to_value(GatewayEvent::Error {
            message: "boom".into(),
            cached: false,
            devices: None,
            timestamp: None,
        })
        .unwrap();
        assert_eq!(
            ev,
            json!({"event": "error", "payload": {"message": "boom", "cached": false}})
        );
    }

    #[test]
    fn names_match_wire_tags() {
        for ev in [
            GatewayEvent::Loading {},
            GatewayEvent::AlertClear {},
            GatewayEvent::NoDevices {},
        ] {
            let tag = serde_json::to_value(&ev).unwrap()["event"].clone();
            assert_eq!(tag, json!(ev.name()));
        }
    }

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let gw = BroadcastGateway::new();
        let mut rx = gw.subscribe();
        gw.publish(GatewayEvent::AlertClear {});
        assert_eq!(*rx.recv().await.unwrap(), GatewayEvent::AlertClear {});
    }
}
