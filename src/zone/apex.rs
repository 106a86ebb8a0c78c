//! A single zone: its name, variant, settings and current record snapshot.

use super::contents::ZoneContents;
use super::record::ZoneRecord;
use super::refresh::SyncState;
use super::types::{
    DnssecStatus, ZoneInfo, ZoneNotify, ZoneSigner, ZoneTransfer, ZoneType, ZoneUpdate,
    display_zone_name,
};
use super::{Result, ZoneError};
use crate::dns::enums::DNSResourceType;
use crate::dns::resource::{DNSResource, SoaData, normalize_name};
use arc_swap::ArcSwap;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::info;

/// Zone variant. Anything that differs by variant matches on this.
#[derive(Debug)]
pub enum ZoneKind {
    /// Authoritative source of truth. `internal` marks membership-only
    /// zones created by the list managers.
    Primary { internal: bool },
    Secondary(SyncState),
    Stub(SyncState),
    Forwarder,
}

impl ZoneKind {
    pub fn zone_type(&self) -> ZoneType {
        match self {
            ZoneKind::Primary { .. } => ZoneType::Primary,
            ZoneKind::Secondary(_) => ZoneType::Secondary,
            ZoneKind::Stub(_) => ZoneType::Stub,
            ZoneKind::Forwarder => ZoneType::Forwarder,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ZoneSettings {
    pub zone_transfer: ZoneTransfer,
    pub notify: ZoneNotify,
    pub update: ZoneUpdate,
    pub dnssec_status: DnssecStatus,
}

#[derive(Debug)]
pub struct ApexZone {
    name: String,
    kind: ZoneKind,
    contents: ArcSwap<ZoneContents>,
    /// Serializes writers; readers never take it
    write_lock: Mutex<()>,
    disabled: AtomicBool,
    settings: RwLock<ZoneSettings>,
}

impl ApexZone {
    pub fn new(name: &str, kind: ZoneKind, contents: ZoneContents, settings: ZoneSettings) -> Self {
        Self {
            name: normalize_name(name),
            kind,
            contents: ArcSwap::from_pointee(contents),
            write_lock: Mutex::new(()),
            disabled: AtomicBool::new(false),
            settings: RwLock::new(settings),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name for log lines, `<root>` for the root zone
    pub fn display_name(&self) -> &str {
        display_zone_name(&self.name)
    }

    pub fn kind(&self) -> &ZoneKind {
        &self.kind
    }

    pub fn zone_type(&self) -> ZoneType {
        self.kind.zone_type()
    }

    pub fn is_internal(&self) -> bool {
        matches!(self.kind, ZoneKind::Primary { internal: true })
    }

    pub fn sync_state(&self) -> Option<&SyncState> {
        match &self.kind {
            ZoneKind::Secondary(sync) | ZoneKind::Stub(sync) => Some(sync),
            _ => None,
        }
    }

    /// Current record snapshot; stays consistent while held
    pub fn contents(&self) -> Arc<ZoneContents> {
        self.contents.load_full()
    }

    pub fn soa(&self) -> Option<SoaData> {
        self.contents.load().soa().cloned()
    }

    pub fn settings(&self) -> ZoneSettings {
        self.settings.read().clone()
    }

    /// Set the flag alone, for zones rebuilt from storage before their timer runs
    pub(crate) fn restore_disabled(&self, disabled: bool) {
        self.disabled.store(disabled, Ordering::SeqCst);
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled.load(Ordering::SeqCst)
    }

    pub fn is_expired(&self) -> bool {
        self.sync_state().is_some_and(SyncState::is_expired)
    }

    pub fn is_active(&self) -> bool {
        !self.is_disabled() && !self.is_expired()
    }

    pub fn info(&self) -> ZoneInfo {
        let settings = self.settings();
        let sync = self.sync_state();

        ZoneInfo {
            name: self.name.clone(),
            zone_type: self.zone_type(),
            internal: self.is_internal(),
            disabled: self.is_disabled(),
            dnssec_status: settings.dnssec_status,
            zone_transfer: settings.zone_transfer,
            notify: settings.notify,
            update: settings.update,
            serial: self.soa().map(|soa| soa.serial.0),
            expiry: sync.and_then(SyncState::expiry).map(instant_to_utc),
            is_expired: self.is_expired(),
            sync_failed: sync.is_some_and(SyncState::sync_failed),
            notify_failed: sync.is_some_and(SyncState::notify_failed),
        }
    }

    /// Enable or disable the zone. Disabling a mirrored zone stops its timer
    /// under the timer lock; enabling schedules a refresh after `trigger_delay`.
    pub fn set_disabled(&self, disabled: bool, trigger_delay: Duration) {
        match self.sync_state() {
            Some(sync) if disabled => {
                sync.timer().commit(|state| {
                    self.disabled.store(true, Ordering::SeqCst);
                    state.disarm();
                    sync.timer().cancel_pending();
                });
            }
            Some(sync) => {
                self.disabled.store(false, Ordering::SeqCst);
                sync.trigger_refresh(trigger_delay);
            }
            None => self.disabled.store(disabled, Ordering::SeqCst),
        }

        info!(
            "{} zone {} {}",
            self.zone_type(),
            self.display_name(),
            if disabled { "disabled" } else { "enabled" }
        );
    }

    /// Clone the contents, let `f` modify the clone, publish it
    pub(crate) fn mutate<R>(&self, f: impl FnOnce(&mut ZoneContents) -> Result<R>) -> Result<R> {
        let _guard = self.write_lock.lock();
        let mut next = ZoneContents::clone(&self.contents.load());
        let result = f(&mut next)?;
        self.contents.store(Arc::new(next));
        Ok(result)
    }

    /// Replace the contents with a value built from the current snapshot
    pub(crate) fn swap_contents(&self, f: impl FnOnce(&ZoneContents) -> Result<ZoneContents>) -> Result<()> {
        let _guard = self.write_lock.lock();
        let next = f(&self.contents.load())?;
        self.contents.store(Arc::new(next));
        Ok(())
    }

    fn unsupported(&self, operation: &str) -> ZoneError {
        ZoneError::InvalidOperation(format!(
            "{} zone {} does not support {}",
            self.zone_type(),
            self.display_name(),
            operation
        ))
    }

    /// Primary edit: apply `f`, then bump the SOA serial when it reports a
    /// change to anything other than the SOA itself
    fn edit_primary(&self, rtype: DNSResourceType, f: impl FnOnce(&mut ZoneContents) -> Result<bool>) -> Result<bool> {
        self.mutate(|contents| {
            let changed = f(contents)?;
            if changed && rtype != DNSResourceType::SOA {
                contents.bump_serial()?;
            }
            Ok(changed)
        })
    }

    fn accepts_forwarder_edit(&self, rtype: DNSResourceType) -> bool {
        matches!(self.kind, ZoneKind::Forwarder) && rtype == DNSResourceType::FWD
    }

    pub fn add_record(&self, record: ZoneRecord) -> Result<bool> {
        let rtype = record.rtype();
        match &self.kind {
            ZoneKind::Primary { .. } => {
                if rtype == DNSResourceType::SOA {
                    return Err(ZoneError::InvalidRecord(
                        "use set_records to replace the SOA record".to_string(),
                    ));
                }
                self.edit_primary(rtype, |contents| contents.add(record))
            }
            _ if self.accepts_forwarder_edit(rtype) => self.mutate(|contents| contents.add(record)),
            _ => Err(self.unsupported("adding records")),
        }
    }

    /// Replace the RRset of `rtype` at `name`. On mirrored zones only the SOA
    /// may be set, and only its metadata is taken.
    pub fn set_records(&self, name: &str, rtype: DNSResourceType, records: Vec<ZoneRecord>) -> Result<()> {
        let name = normalize_name(name);
        match &self.kind {
            ZoneKind::Primary { .. } => {
                if rtype == DNSResourceType::SOA && records.is_empty() {
                    return Err(ZoneError::InvalidOperation(format!(
                        "cannot delete the SOA record of zone {}",
                        self.display_name()
                    )));
                }
                self.edit_primary(rtype, |contents| {
                    contents.set_rrset(&name, rtype, records)?;
                    Ok(true)
                })?;
                Ok(())
            }
            ZoneKind::Secondary(_) | ZoneKind::Stub(_) => {
                if rtype != DNSResourceType::SOA || name != self.name || records.len() != 1 {
                    return Err(self.unsupported("record changes other than SOA metadata"));
                }
                let info = records.into_iter().next().map(|record| record.info).unwrap_or_default();
                self.mutate(|contents| {
                    let mut soa = contents.soa_record().cloned().ok_or(ZoneError::MissingSOA)?;
                    soa.info = info;
                    contents.set_rrset(&name, DNSResourceType::SOA, vec![soa])
                })
            }
            _ if self.accepts_forwarder_edit(rtype) => {
                self.mutate(|contents| contents.set_rrset(&name, rtype, records))
            }
            _ => Err(self.unsupported("setting records")),
        }
    }

    pub fn update_record(&self, old: &DNSResource, new: DNSResource) -> Result<bool> {
        if (old.rtype == DNSResourceType::SOA) != (new.rtype == DNSResourceType::SOA) {
            return Err(ZoneError::InvalidRecord(
                "an SOA record can only be replaced by another SOA record".to_string(),
            ));
        }

        let rtype = new.rtype;
        match &self.kind {
            ZoneKind::Primary { .. } => self.edit_primary(rtype, |contents| contents.update(old, new)),
            _ if self.accepts_forwarder_edit(old.rtype) && self.accepts_forwarder_edit(rtype) => {
                self.mutate(|contents| contents.update(old, new))
            }
            _ => Err(self.unsupported("updating records")),
        }
    }

    pub fn delete_record(&self, record: &DNSResource) -> Result<bool> {
        match &self.kind {
            ZoneKind::Primary { .. } => {
                self.check_soa_delete(&record.name(), record.rtype)?;
                self.edit_primary(record.rtype, |contents| Ok(contents.remove(record)))
            }
            _ if self.accepts_forwarder_edit(record.rtype) => {
                self.mutate(|contents| Ok(contents.remove(record)))
            }
            _ => Err(self.unsupported("deleting records")),
        }
    }

    pub fn delete_records(&self, name: &str, rtype: DNSResourceType) -> Result<bool> {
        let name = normalize_name(name);
        match &self.kind {
            ZoneKind::Primary { .. } => {
                self.check_soa_delete(&name, rtype)?;
                self.edit_primary(rtype, |contents| Ok(contents.remove_rrset(&name, rtype)))
            }
            _ if self.accepts_forwarder_edit(rtype) => {
                self.mutate(|contents| Ok(contents.remove_rrset(&name, rtype)))
            }
            _ => Err(self.unsupported("deleting records")),
        }
    }

    fn check_soa_delete(&self, name: &str, rtype: DNSResourceType) -> Result<()> {
        if rtype == DNSResourceType::SOA && name == self.name {
            return Err(ZoneError::InvalidOperation(format!(
                "cannot delete the SOA record of zone {}",
                self.display_name()
            )));
        }
        Ok(())
    }

    pub fn set_zone_transfer(&self, policy: ZoneTransfer) -> Result<()> {
        match self.kind {
            ZoneKind::Primary { .. } | ZoneKind::Secondary(_) => {
                self.settings.write().zone_transfer = policy;
                Ok(())
            }
            _ => Err(self.unsupported("zone transfer settings")),
        }
    }

    pub fn set_notify(&self, policy: ZoneNotify) -> Result<()> {
        match self.kind {
            ZoneKind::Primary { .. } | ZoneKind::Secondary(_) => {
                self.settings.write().notify = policy;
                Ok(())
            }
            _ => Err(self.unsupported("notify settings")),
        }
    }

    pub fn set_update(&self, policy: ZoneUpdate) -> Result<()> {
        match self.kind {
            ZoneKind::Primary { .. } => {
                self.settings.write().update = policy;
                Ok(())
            }
            _ => Err(self.unsupported("dynamic update settings")),
        }
    }

    /// Ask for an immediate full transfer on the next refresh
    pub fn resync(&self) -> Result<bool> {
        match self.sync_state() {
            Some(sync) => Ok(sync.trigger_resync()),
            None => Err(self.unsupported("resync")),
        }
    }

    /// Schedule a refresh after `delay`; ignored while disabled
    pub fn trigger_refresh(&self, delay: Duration) -> Result<bool> {
        match self.sync_state() {
            Some(_) if self.is_disabled() => Ok(false),
            Some(sync) => Ok(sync.trigger_refresh(delay)),
            None => Err(self.unsupported("refresh")),
        }
    }

    pub fn sign(&self, signer: &dyn ZoneSigner) -> Result<DnssecStatus> {
        if !matches!(self.kind, ZoneKind::Primary { internal: false }) {
            return Err(self.unsupported("DNSSEC signing"));
        }
        if self.settings.read().dnssec_status != DnssecStatus::Unsigned {
            return Err(ZoneError::InvalidOperation(format!(
                "zone {} is already signed",
                self.display_name()
            )));
        }

        let records: Vec<ZoneRecord> = self.contents().records().cloned().collect();
        let signed = signer.sign(&self.name, &records)?;

        self.mutate(|contents| {
            for record in signed.records {
                contents.add(ZoneRecord::new(record))?;
            }
            contents.bump_serial()
        })?;
        self.settings.write().dnssec_status = signed.status;

        info!("Signed zone {} ({:?})", self.display_name(), signed.status);
        Ok(signed.status)
    }

    pub fn unsign(&self, signer: &dyn ZoneSigner) -> Result<()> {
        if !matches!(self.kind, ZoneKind::Primary { internal: false }) {
            return Err(self.unsupported("DNSSEC signing"));
        }
        if self.settings.read().dnssec_status == DnssecStatus::Unsigned {
            return Err(ZoneError::InvalidOperation(format!(
                "zone {} is not signed",
                self.display_name()
            )));
        }

        signer.unsign(&self.name)?;
        self.mutate(|contents| {
            contents.remove_types(|rtype| rtype.is_dnssec());
            contents.bump_serial()
        })?;
        self.settings.write().dnssec_status = DnssecStatus::Unsigned;

        info!("Unsigned zone {}", self.display_name());
        Ok(())
    }
}

/// Wall-clock rendering of a monotonic deadline
pub(crate) fn instant_to_utc(at: Instant) -> chrono::DateTime<Utc> {
    let now = Instant::now();
    let wall = Utc::now();
    if at >= now {
        wall + chrono::Duration::from_std(at - now).unwrap_or(chrono::Duration::zero())
    } else {
        wall - chrono::Duration::from_std(now - at).unwrap_or(chrono::Duration::zero())
    }
}

/// Monotonic deadline for a wall-clock time
pub(crate) fn utc_to_instant(at: chrono::DateTime<Utc>) -> Instant {
    let now = Instant::now();
    match (at - Utc::now()).to_std() {
        Ok(ahead) => now + ahead,
        Err(_) => {
            let behind = (Utc::now() - at).to_std().unwrap_or(Duration::ZERO);
            now.checked_sub(behind).unwrap_or(now)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::resource::DNSResourceData;
    use crate::dns::Serial;
    use std::net::Ipv4Addr;

    fn primary() -> ApexZone {
        let soa = DNSResource::new(
            "example.com",
            900,
            DNSResourceData::SOA(SoaData::new("ns1.example.com", "hostadmin@example.com", 1, 900, 300, 604800, 900)),
        );
        let ns = DNSResource::new("example.com", 3600, DNSResourceData::ns("ns1.example.com"));
        let contents =
            ZoneContents::from_records("example.com", vec![ZoneRecord::new(soa), ZoneRecord::new(ns)]).unwrap();
        ApexZone::new("example.com", ZoneKind::Primary { internal: false }, contents, ZoneSettings::default())
    }

    fn stub() -> ApexZone {
        let soa = DNSResource::new(
            "example.net",
            900,
            DNSResourceData::SOA(SoaData::new("ns1.example.net", "hostadmin@example.net", 0, 900, 300, 604800, 900)),
        );
        let contents = ZoneContents::from_records("example.net", vec![ZoneRecord::new(soa)]).unwrap();
        ApexZone::new("example.net", ZoneKind::Stub(SyncState::new(Vec::new())), contents, ZoneSettings::default())
    }

    fn a(name: &str) -> DNSResource {
        DNSResource::new(name, 300, DNSResourceData::A(Ipv4Addr::new(192, 0, 2, 1)))
    }

    #[test]
    fn test_primary_edit_bumps_serial() {
        let zone = primary();
        assert!(zone.add_record(ZoneRecord::new(a("www.example.com"))).unwrap());
        assert_eq!(zone.soa().unwrap().serial, Serial(2));

        assert!(!zone.add_record(ZoneRecord::new(a("www.example.com"))).unwrap());
        assert_eq!(zone.soa().unwrap().serial, Serial(2));

        assert!(zone.delete_record(&a("www.example.com")).unwrap());
        assert_eq!(zone.soa().unwrap().serial, Serial(3));
    }

    #[test]
    fn test_primary_soa_cannot_be_deleted() {
        let zone = primary();
        assert!(matches!(
            zone.delete_records("example.com", DNSResourceType::SOA),
            Err(ZoneError::InvalidOperation(_))
        ));
        assert!(matches!(
            zone.set_records("example.com", DNSResourceType::SOA, Vec::new()),
            Err(ZoneError::InvalidOperation(_))
        ));
    }

    #[test]
    fn test_reader_keeps_old_snapshot() {
        let zone = primary();
        let before = zone.contents();
        zone.add_record(ZoneRecord::new(a("www.example.com"))).unwrap();
        assert!(before.get("www.example.com", DNSResourceType::A).is_empty());
        assert_eq!(zone.contents().get("www.example.com", DNSResourceType::A).len(), 1);
    }

    #[test]
    fn test_stub_rejects_edits_but_takes_soa_metadata() {
        let zone = stub();
        assert!(matches!(
            zone.add_record(ZoneRecord::new(a("www.example.net"))),
            Err(ZoneError::InvalidOperation(_))
        ));
        assert!(zone.delete_records("example.net", DNSResourceType::NS).is_err());

        let mut replacement = zone.contents().soa_record().cloned().unwrap();
        replacement.info.comments = Some("mirrored".to_string());
        replacement.record.rdata =
            DNSResourceData::SOA(SoaData::new("evil.example", "x", 99, 1, 1, 1, 1));
        zone.set_records("example.net", DNSResourceType::SOA, vec![replacement]).unwrap();

        let stored = zone.contents().soa_record().cloned().unwrap();
        assert_eq!(stored.info.comments.as_deref(), Some("mirrored"));
        assert_eq!(stored.record.soa().unwrap().serial, Serial(0));
    }

    #[test]
    fn test_policy_setters_by_type() {
        let zone = primary();
        assert!(zone.set_update(ZoneUpdate::Allow).is_ok());
        assert!(zone.set_zone_transfer(ZoneTransfer::Allow).is_ok());

        let zone = stub();
        assert!(zone.set_zone_transfer(ZoneTransfer::Allow).is_err());
        assert!(zone.set_notify(ZoneNotify::ZoneNameServers).is_err());
        assert!(zone.set_update(ZoneUpdate::Allow).is_err());
    }

    #[test]
    fn test_new_stub_is_inactive_until_transfer() {
        let zone = stub();
        assert!(zone.is_expired());
        assert!(!zone.is_active());
        assert!(primary().is_active());
        assert!(primary().resync().is_err());
    }
}
