// ── On-disk snapshot cache ──
//
// Holds the last good poll result and the resolved device list so a
// restart can show data immediately and skip resolution. The file is
// bound to a hash of the configuration that produced it.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::config::ConfiguredDevice;
use crate::error::CoreError;
use crate::model::{DeviceSnapshot, ResolvedDevice};

pub const CACHE_FILE: &str = "cache.json";
pub const CACHE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheSnapshot {
    pub timestamp: DateTime<Utc>,
    pub config_hash: String,
    pub devices: Vec<ResolvedDevice>,
    #[serde(default)]
    pub last_status: Vec<DeviceSnapshot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location_id: Option<String>,
}

/// Hash over credential identity, explicit device list, and room list.
pub fn config_hash(identity: &str, devices: &[ConfiguredDevice], rooms: &[String]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(identity.as_bytes());
    hasher.update([0]);
    for d in devices {
        hasher.update(d.id.as_bytes());
        hasher.update([0x1f]);
        hasher.update(d.name.as_deref().unwrap_or_default().as_bytes());
        hasher.update([0x1f]);
        hasher.update(d.room.as_deref().unwrap_or_default().as_bytes());
        hasher.update([0x1e]);
    }
    hasher.update([0]);
    for r in rooms {
        hasher.update(r.as_bytes());
        hasher.update([0x1e]);
    }
    hex::encode(hasher.finalize())
}

#[derive(Debug, Clone)]
pub struct CacheStore {
    path: PathBuf,
    config_hash: String,
}

impl CacheStore {
    pub fn new(dir: &Path, config_hash: String) -> Self {
        Self {
            path: dir.join(CACHE_FILE),
            config_hash,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Option<CacheSnapshot> {
        self.load_at(Utc::now())
    }

    /// Valid cache or `None`. Stale or foreign caches are deleted.
    pub fn load_at(&self, now: DateTime<Utc>) -> Option<CacheSnapshot> {
        let raw = std::fs::read(&self.path).ok()?;
        let snapshot: CacheSnapshot = match serde_json::from_slice(&raw) {
            Ok(s) => s,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "cache unreadable, ignoring");
                return None;
            }
        };

        if snapshot.config_hash != self.config_hash {
            info!("configuration changed, discarding cache");
            self.clear();
            return None;
        }
        let ttl = TimeDelta::from_std(CACHE_TTL).unwrap_or(TimeDelta::MAX);
        if now.signed_duration_since(snapshot.timestamp) > ttl {
            info!(cached_at = %snapshot.timestamp, "cache expired");
            self.clear();
            return None;
        }
        debug!(devices = snapshot.devices.len(), "cache loaded");
        Some(snapshot)
    }

    /// Atomically replace the cache file.
    pub fn save(&self, snapshot: &CacheSnapshot) -> Result<(), CoreError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_vec_pretty(snapshot)
            .map_err(|e| CoreError::Internal(format!("serialize cache: {e}")))?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// Persist a fresh resolution, keeping whatever status is still valid.
    ///
    /// Carried-over status keeps its original timestamp, so resolving
    /// again never extends its lifetime.
    pub fn record_resolution(
        &self,
        devices: &[ResolvedDevice],
        location_id: Option<&str>,
    ) -> Result<(), CoreError> {
        let (last_status, timestamp) = match self.load() {
            Some(prev) if !prev.last_status.is_empty() => (prev.last_status, prev.timestamp),
            _ => (Vec::new(), Utc::now()),
        };
        self.save(&CacheSnapshot {
            timestamp,
            config_hash: self.config_hash.clone(),
            devices: devices.to_vec(),
            last_status,
            location_id: location_id.map(str::to_owned),
        })
    }

    /// Persist a successful cycle.
    pub fn record_cycle(
        &self,
        devices: &[ResolvedDevice],
        status: &[DeviceSnapshot],
        location_id: Option<&str>,
        timestamp: DateTime<Utc>,
    ) -> Result<(), CoreError> {
        self.save(&CacheSnapshot {
            timestamp,
            config_hash: self.config_hash.clone(),
            devices: devices.to_vec(),
            last_status: status.to_vec(),
            location_id: location_id.map(str::to_owned),
        })
    }

    pub fn clear(&self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "failed to remove cache"),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn devices() -> Vec<ResolvedDevice> {
        vec![ResolvedDevice {
            id: "d1".into(),
            name: "Lamp".into(),
            room: None,
        }]
    }

    #[test]
    fn hash_changes_with_any_input() {
        let dev = vec![ConfiguredDevice {
            id: "d1".into(),
            name: None,
            room: None,
        }];
        let base = config_hash("oauth:a", &dev, &[]);
        assert_eq!(base, config_hash("oauth:a", &dev, &[]));
        assert_ne!(base, config_hash("oauth:b", &dev, &[]));
        assert_ne!(base, config_hash("oauth:a", &[], &[]));
        assert_ne!(base, config_hash("oauth:a", &dev, &["Hall".into()]));
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(dir.path(), "h".into());
        store
            .record_cycle(&devices(), &[], Some("loc"), Utc::now())
            .unwrap();
        let loaded = store.load().unwrap();
        assert_eq!(loaded.devices, devices());
        assert_eq!(loaded.location_id.as_deref(), Some("loc"));
    }

    #[test]
    fn hash_mismatch_discards_whole_file() {
        let dir = tempfile::tempdir().unwrap();
        CacheStore::new(dir.path(), "old".into())
            .record_cycle(&devices(), &[], Some("loc"), Utc::now())
            .unwrap();

        let store = CacheStore::new(dir.path(), "new".into());
        assert_eq!(store.load(), None);
        assert!(!store.path().exists());
    }

    #[test]
    fn expires_after_a_day() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(dir.path(), "h".into());
        let written = Utc::now();
        store.record_cycle(&devices(), &[], None, written).unwrap();

        assert!(store.load_at(written + TimeDelta::hours(23)).is_some());
        assert!(store.load_at(written + TimeDelta::hours(25)).is_none());
        assert!(!store.path().exists());
    }

    #[test]
    fn resolution_keeps_the_status_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(dir.path(), "h".into());
        let written = Utc::now() - TimeDelta::hours(20);
        let status = DeviceSnapshot {
            id: "d1".into(),
            name: "Lamp".into(),
            room: String::new(),
            primary_capability: Some("switch".into()),
            primary_state: Some(serde_json::json!("on")),
            temperature: None,
            humidity: None,
            battery: None,
            level: None,
            heating_setpoint: None,
            cooling_setpoint: None,
            capabilities: std::collections::BTreeMap::new(),
        };
        store.record_cycle(&devices(), &[status], None, written).unwrap();

        store.record_resolution(&devices(), Some("loc")).unwrap();
        let loaded = store.load().unwrap();
        assert_eq!(loaded.timestamp, written);
        assert_eq!(loaded.last_status.len(), 1);
        assert_eq!(loaded.location_id.as_deref(), Some("loc"));
        assert!(store.load_at(written + TimeDelta::hours(25)).is_none());
    }

    #[test]
    fn resolution_without_status_starts_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(dir.path(), "h".into());
        let before = Utc::now();
        store.record_resolution(&devices(), None).unwrap();
        let loaded = store.load().unwrap();
        assert!(loaded.timestamp >= before);
        assert!(loaded.last_status.is_empty());
    }

    #[test]
    fn corrupt_file_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CACHE_FILE), b"{not json").unwrap();
        assert_eq!(CacheStore::new(dir.path(), "h".into()).load(), None);
    }
}
