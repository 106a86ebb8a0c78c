//! Per-zone persistence.
//!
//! Zones are stored as self-describing snapshots keyed by zone name. The
//! default backend writes one JSON document per zone.

use super::apex::{ApexZone, ZoneKind, ZoneSettings, instant_to_utc, utc_to_instant};
use super::contents::ZoneContents;
use super::record::ZoneRecord;
use super::refresh::SyncState;
use super::types::{DnssecStatus, ZoneNotify, ZoneTransfer, ZoneType, ZoneUpdate};
use super::{Result, ZoneError};
use crate::client::NameServerAddress;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneSnapshot {
    pub name: String,
    pub zone_type: ZoneType,
    #[serde(default)]
    pub internal: bool,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub zone_transfer: ZoneTransfer,
    #[serde(default)]
    pub notify: ZoneNotify,
    #[serde(default)]
    pub update: ZoneUpdate,
    #[serde(default)]
    pub dnssec_status: DnssecStatus,
    #[serde(default)]
    pub primary_name_servers: Vec<NameServerAddress>,
    pub expiry: Option<DateTime<Utc>>,
    #[serde(default)]
    pub sync_failed: bool,
    pub records: Vec<ZoneRecord>,
}

impl ZoneSnapshot {
    pub fn capture(zone: &ApexZone) -> Self {
        let settings = zone.settings();
        let sync = zone.sync_state();

        Self {
            name: zone.name().to_string(),
            zone_type: zone.zone_type(),
            internal: zone.is_internal(),
            disabled: zone.is_disabled(),
            zone_transfer: settings.zone_transfer,
            notify: settings.notify,
            update: settings.update,
            dnssec_status: settings.dnssec_status,
            primary_name_servers: sync.map(SyncState::primary_name_servers).unwrap_or_default(),
            expiry: sync.and_then(SyncState::expiry).map(instant_to_utc),
            sync_failed: sync.is_some_and(SyncState::sync_failed),
            records: zone.contents().records().cloned().collect(),
        }
    }

    /// Rebuild the zone. Mirrored zones come back without a running
    /// refresh task; the caller starts one.
    pub fn into_zone(self) -> Result<ApexZone> {
        let contents = ZoneContents::from_records(&self.name, self.records)?;

        let kind = match self.zone_type {
            ZoneType::Primary => ZoneKind::Primary {
                internal: self.internal,
            },
            ZoneType::Forwarder => ZoneKind::Forwarder,
            ZoneType::Secondary | ZoneType::Stub => {
                if contents.soa().is_none() {
                    return Err(ZoneError::MissingSOA);
                }
                let sync = SyncState::new(self.primary_name_servers);
                sync.set_expiry(self.expiry.map(utc_to_instant));
                sync.set_sync_failed(self.sync_failed);
                if self.zone_type == ZoneType::Secondary {
                    ZoneKind::Secondary(sync)
                } else {
                    ZoneKind::Stub(sync)
                }
            }
        };
        if matches!(kind, ZoneKind::Primary { .. }) && contents.soa().is_none() {
            return Err(ZoneError::MissingSOA);
        }

        let settings = ZoneSettings {
            zone_transfer: self.zone_transfer,
            notify: self.notify,
            update: self.update,
            dnssec_status: self.dnssec_status,
        };
        let zone = ApexZone::new(&self.name, kind, contents, settings);
        zone.restore_disabled(self.disabled);
        Ok(zone)
    }
}

pub trait ZoneStorage: Send + Sync {
    fn save(&self, snapshot: &ZoneSnapshot) -> Result<()>;

    /// Remove the stored snapshot; a missing one is not an error
    fn delete(&self, name: &str) -> Result<()>;

    /// Every readable snapshot. Unreadable ones are logged and skipped.
    fn load_all(&self) -> Result<Vec<ZoneSnapshot>>;
}

/// One `<zone>.json` file per zone in a folder
#[derive(Debug, Clone)]
pub struct JsonZoneStorage {
    folder: PathBuf,
}

impl JsonZoneStorage {
    pub fn new(folder: impl Into<PathBuf>) -> Self {
        Self {
            folder: folder.into(),
        }
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    fn path_for(&self, name: &str) -> PathBuf {
        let file = if name.is_empty() {
            "_root.json".to_string()
        } else {
            format!("{}.json", name)
        };
        self.folder.join(file)
    }
}

impl ZoneStorage for JsonZoneStorage {
    fn save(&self, snapshot: &ZoneSnapshot) -> Result<()> {
        std::fs::create_dir_all(&self.folder)?;

        let path = self.path_for(&snapshot.name);
        let temp = path.with_extension("json.tmp");
        let data = serde_json::to_vec_pretty(snapshot).map_err(|e| ZoneError::Storage(e.to_string()))?;

        std::fs::write(&temp, data)?;
        std::fs::rename(&temp, &path)?;

        debug!("Saved zone file {}", path.display());
        Ok(())
    }

    fn delete(&self, name: &str) -> Result<()> {
        match std::fs::remove_file(self.path_for(name)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn load_all(&self) -> Result<Vec<ZoneSnapshot>> {
        let entries = match std::fs::read_dir(&self.folder) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut snapshots = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }

            let parsed = std::fs::read(&path)
                .map_err(ZoneError::from)
                .and_then(|data| {
                    serde_json::from_slice::<ZoneSnapshot>(&data).map_err(|e| ZoneError::Storage(e.to_string()))
                });
            match parsed {
                Ok(snapshot) => snapshots.push(snapshot),
                Err(e) => warn!("Skipping unreadable zone file {}: {}", path.display(), e),
            }
        }

        snapshots.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(snapshots)
    }
}
