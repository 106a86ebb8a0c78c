//! Zone manager: owns every zone of one engine instance
//!
//! The same manager backs the server's authoritative zones and the
//! membership indexes of the allow/block list managers.

use super::answer::{authoritative_answer, forwarder_response, stub_referral};
use super::apex::{ApexZone, ZoneKind, ZoneSettings};
use super::contents::ZoneContents;
use super::record::{ZoneRecord, is_in_zone};
use super::refresh::{RefreshContext, SyncState, resolve_addresses, soa_from_response, spawn_refresh_task};
use super::storage::{ZoneSnapshot, ZoneStorage};
use super::tree::DomainTree;
use super::types::{
    DnssecStatus, ZoneInfo, ZoneNotify, ZoneSigner, ZoneTransfer, ZoneType, ZoneUpdate, ZonesPage,
    display_zone_name,
};
use super::{Result, ZoneError};
use crate::client::{DnsClient, NameServerAddress};
use crate::config::{ZoneConfig, is_valid_domain};
use crate::dns::enums::{DNSResourceType, TransportProtocol};
use crate::dns::question::DNSQuestion;
use crate::dns::resource::{DNSResource, DNSResourceData, ForwarderData, SoaData, normalize_name};
use crate::dns::{DNSPacket, Serial};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct ZoneManager {
    zones: RwLock<DomainTree<Arc<ApexZone>>>,
    config: ZoneConfig,
    server_domain: RwLock<String>,
    client: Option<Arc<dyn DnsClient>>,
    storage: Option<Arc<dyn ZoneStorage>>,
}

impl ZoneManager {
    pub fn new(config: ZoneConfig) -> Self {
        let server_domain = normalize_name(&config.server_domain);
        Self {
            zones: RwLock::new(DomainTree::new()),
            config,
            server_domain: RwLock::new(server_domain),
            client: None,
            storage: None,
        }
    }

    /// DNS client used to create and refresh Secondary/Stub zones
    pub fn with_client(mut self, client: Arc<dyn DnsClient>) -> Self {
        self.client = Some(client);
        self
    }

    pub fn with_storage(mut self, storage: Arc<dyn ZoneStorage>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn config(&self) -> &ZoneConfig {
        &self.config
    }

    pub fn server_domain(&self) -> String {
        self.server_domain.read().clone()
    }

    pub fn set_server_domain(&self, domain: &str) {
        *self.server_domain.write() = normalize_name(domain);
    }

    fn refresh_context(&self) -> Result<RefreshContext> {
        let client = self.client.clone().ok_or(ZoneError::NoDnsClient)?;
        Ok(RefreshContext {
            client,
            options: self.config.refresh_options(),
            storage: self.storage.clone(),
        })
    }

    fn zone_name(name: &str) -> Result<String> {
        let name = normalize_name(name);
        if name.contains('*') {
            return Err(ZoneError::InvalidDomainName(format!(
                "zone name cannot contain a wildcard: {}",
                name
            )));
        }
        if !name.is_empty() && !is_valid_domain(&name) {
            return Err(ZoneError::InvalidDomainName(name));
        }
        Ok(name)
    }

    /// Add a built zone unless the name is taken
    fn insert(&self, zone: ApexZone) -> Option<Arc<ApexZone>> {
        let zone = Arc::new(zone);
        let name = zone.name().to_string();
        match self.zones.write().try_insert(&name, zone.clone()) {
            Ok(()) => Some(zone),
            Err(_) => None,
        }
    }

    fn persist(&self, zone: &ApexZone) {
        if let Some(storage) = &self.storage {
            if let Err(e) = storage.save(&ZoneSnapshot::capture(zone)) {
                warn!("Failed to save zone file for {}: {}", zone.display_name(), e);
            }
        }
    }

    pub fn create_primary_zone(&self, name: &str, primary_name_server: &str) -> Result<Option<Arc<ApexZone>>> {
        let name = Self::zone_name(name)?;
        if self.zones.read().contains(&name) {
            return Ok(None);
        }

        let primary_name_server = match normalize_name(primary_name_server) {
            ns if ns.is_empty() => self.server_domain(),
            ns => ns,
        };
        let soa = SoaData::new(
            &primary_name_server,
            &format!("hostadmin@{}", primary_name_server),
            1,
            900,
            300,
            604800,
            900,
        );
        let contents = ZoneContents::from_records(
            &name,
            vec![
                ZoneRecord::new(DNSResource::new(&name, 900, DNSResourceData::SOA(soa))),
                ZoneRecord::new(DNSResource::new(
                    &name,
                    self.config.default_ttl,
                    DNSResourceData::ns(&primary_name_server),
                )),
            ],
        )?;

        let zone = ApexZone::new(&name, ZoneKind::Primary { internal: false }, contents, ZoneSettings::default());
        let Some(zone) = self.insert(zone) else {
            return Ok(None);
        };

        info!("Created primary zone {}", zone.display_name());
        self.persist(&zone);
        Ok(Some(zone))
    }

    /// Membership-only zone carrying just a copy of `soa` and an NS record
    /// for `ns`; not persisted and never refreshed
    pub fn create_special_primary_zone(&self, name: &str, soa: &SoaData, ns: &str) -> Result<Option<Arc<ApexZone>>> {
        let name = Self::zone_name(name)?;
        if self.zones.read().contains(&name) {
            return Ok(None);
        }

        let contents = ZoneContents::from_records(
            &name,
            vec![
                ZoneRecord::new(DNSResource::new(&name, soa.minimum, DNSResourceData::SOA(soa.clone()))),
                ZoneRecord::new(DNSResource::new(&name, soa.minimum, DNSResourceData::ns(ns))),
            ],
        )?;

        let zone = ApexZone::new(&name, ZoneKind::Primary { internal: true }, contents, ZoneSettings::default());
        Ok(self.insert(zone))
    }

    /// Bulk-create special primary zones from a single-pass name source.
    /// Invalid names are skipped. Returns how many zones were created.
    pub fn load_special_primary_zones<I>(&self, names: I, soa: &SoaData, ns: &str) -> usize
    where
        I: IntoIterator<Item = String>,
    {
        let mut loaded = 0;
        for name in names {
            match self.create_special_primary_zone(&name, soa, ns) {
                Ok(Some(_)) => loaded += 1,
                Ok(None) => {}
                Err(e) => debug!("Skipping {}: {}", name, e),
            }
        }
        loaded
    }

    pub async fn create_secondary_zone(
        &self,
        name: &str,
        primary_name_servers: &[NameServerAddress],
    ) -> Result<Option<Arc<ApexZone>>> {
        self.create_mirrored_zone(name, primary_name_servers, ZoneType::Secondary).await
    }

    pub async fn create_stub_zone(
        &self,
        name: &str,
        primary_name_servers: &[NameServerAddress],
    ) -> Result<Option<Arc<ApexZone>>> {
        self.create_mirrored_zone(name, primary_name_servers, ZoneType::Stub).await
    }

    async fn create_mirrored_zone(
        &self,
        name: &str,
        primary_name_servers: &[NameServerAddress],
        zone_type: ZoneType,
    ) -> Result<Option<Arc<ApexZone>>> {
        let name = Self::zone_name(name)?;
        if self.zones.read().contains(&name) {
            return Ok(None);
        }
        let ctx = self.refresh_context()?;

        let soa = self.fetch_initial_soa(&name, primary_name_servers, &ctx).await?;

        // Serial 0 plus a pending resync: the first refresh always transfers
        let mut soa_data = soa.soa().cloned().ok_or(ZoneError::MissingSOA)?;
        soa_data.serial = Serial(0);
        let mut soa_record = ZoneRecord::new(DNSResource::new(&name, soa.ttl, DNSResourceData::SOA(soa_data)));
        soa_record.info.primary_name_servers = primary_name_servers.to_vec();
        let contents = ZoneContents::from_records(&name, vec![soa_record])?;

        let sync = SyncState::new(primary_name_servers.to_vec());
        let kind = match zone_type {
            ZoneType::Secondary => ZoneKind::Secondary(sync),
            _ => ZoneKind::Stub(sync),
        };
        let Some(zone) = self.insert(ApexZone::new(&name, kind, contents, ZoneSettings::default())) else {
            return Ok(None);
        };

        if let Err(e) = spawn_refresh_task(&zone, ctx) {
            self.zones.write().remove(&name);
            return Err(e);
        }
        if let Some(sync) = zone.sync_state() {
            sync.trigger_resync();
        }

        info!("Created {} zone {}", zone_type, zone.display_name());
        self.persist(&zone);
        Ok(Some(zone))
    }

    /// SOA probe for a new mirrored zone: through the server's own
    /// resolution path when no primaries are given, otherwise against the
    /// primaries over UDP
    async fn fetch_initial_soa(
        &self,
        name: &str,
        primary_name_servers: &[NameServerAddress],
        ctx: &RefreshContext,
    ) -> Result<DNSResource> {
        let not_found = |reason: String| ZoneError::SoaNotFound {
            zone: display_zone_name(name).to_string(),
            reason,
        };

        let response = if primary_name_servers.is_empty() {
            ctx.client
                .direct_query(&DNSQuestion::new(name, DNSResourceType::SOA))
                .await
                .map_err(|e| not_found(e.to_string()))?
        } else {
            let udp: Vec<NameServerAddress> = primary_name_servers
                .iter()
                .map(|server| server.with_protocol(TransportProtocol::Udp))
                .collect();
            let servers = resolve_addresses(&udp, None, ctx.client.as_ref(), ctx.options.prefer_ipv6).await;
            if servers.is_empty() {
                return Err(not_found("no primary name server address could be resolved".to_string()));
            }

            let mut request = DNSPacket::query(name, DNSResourceType::SOA);
            request.udp_payload_size = Some(ctx.options.udp_payload_size);
            ctx.client
                .resolve(&request, &servers, &ctx.options)
                .await
                .map_err(|e| not_found(e.to_string()))?
                .response
        };

        soa_from_response(name, &response).map_err(not_found)
    }

    pub fn create_forwarder_zone(
        &self,
        name: &str,
        protocol: TransportProtocol,
        forwarder: &str,
        dnssec_validation: bool,
    ) -> Result<Option<Arc<ApexZone>>> {
        let name = Self::zone_name(name)?;
        let forwarder = forwarder.trim();
        if forwarder.is_empty() {
            return Err(ZoneError::InvalidRecord("forwarder address is required".to_string()));
        }
        if self.zones.read().contains(&name) {
            return Ok(None);
        }

        let record = DNSResource::new(
            &name,
            0,
            DNSResourceData::FWD(ForwarderData {
                protocol,
                forwarder: forwarder.to_string(),
                dnssec_validation,
            }),
        );
        let contents = ZoneContents::from_records(&name, vec![ZoneRecord::new(record)])?;

        let Some(zone) = self.insert(ApexZone::new(&name, ZoneKind::Forwarder, contents, ZoneSettings::default()))
        else {
            return Ok(None);
        };

        info!("Created forwarder zone {} -> {} ({})", zone.display_name(), forwarder, protocol);
        self.persist(&zone);
        Ok(Some(zone))
    }

    /// Remove a zone and close its refresh timer. No refresh is observed
    /// once this returns. The timer is closed outside the tree lock, since
    /// closing waits for any commit in progress.
    pub fn delete_zone(&self, name: &str) -> bool {
        let name = normalize_name(name);
        let Some(zone) = self.zones.write().remove(&name) else {
            return false;
        };
        if let Some(sync) = zone.sync_state() {
            sync.shutdown();
        }

        if zone.is_internal() {
            debug!("Deleted zone {}", zone.display_name());
        } else {
            info!("Deleted {} zone {}", zone.zone_type(), zone.display_name());
        }
        true
    }

    /// Drop every zone, closing all refresh timers
    pub fn flush(&self) {
        let zones = std::mem::replace(&mut *self.zones.write(), DomainTree::new());
        for zone in zones.values() {
            if let Some(sync) = zone.sync_state() {
                sync.shutdown();
            }
        }
        debug!("Flushed {} zones", zones.len());
    }

    pub fn total_zones(&self) -> usize {
        self.zones.read().len()
    }

    pub fn get_zone(&self, name: &str) -> Option<Arc<ApexZone>> {
        self.zones.read().get(&normalize_name(name)).cloned()
    }

    /// Closest enclosing zone of `domain`
    pub fn find_zone(&self, domain: &str) -> Option<Arc<ApexZone>> {
        self.zones
            .read()
            .find_closest(domain)
            .map(|(_, zone)| zone.clone())
    }

    pub fn get_zone_info(&self, name: &str) -> Option<ZoneInfo> {
        self.get_zone(name).map(|zone| zone.info())
    }

    pub fn find_zone_info(&self, domain: &str) -> Option<ZoneInfo> {
        self.find_zone(domain).map(|zone| zone.info())
    }

    fn require_zone(&self, name: &str) -> Result<Arc<ApexZone>> {
        self.get_zone(name)
            .ok_or_else(|| ZoneError::ZoneNotFound(display_zone_name(&normalize_name(name)).to_string()))
    }

    /// Answer from the closest enclosing zone. `None` when no zone encloses
    /// the question name or that zone is disabled or expired.
    pub fn query(&self, request: &DNSPacket, recursion_allowed: bool) -> Option<DNSPacket> {
        let question = request.question()?;
        let zone = self.find_zone(&question.name())?;
        if !zone.is_active() {
            return None;
        }

        let contents = zone.contents();
        let response = match zone.kind() {
            ZoneKind::Primary { .. } | ZoneKind::Secondary(_) => {
                authoritative_answer(&contents, request, recursion_allowed)
            }
            ZoneKind::Stub(_) => stub_referral(&contents, request, recursion_allowed),
            ZoneKind::Forwarder => forwarder_response(&contents, request, recursion_allowed),
        };
        Some(response)
    }

    /// Every zone in tree order
    pub fn get_all_zones(&self) -> Vec<ZoneInfo> {
        let zones: Vec<Arc<ApexZone>> = self.zones.read().values().cloned().collect();
        zones.iter().map(|zone| zone.info()).collect()
    }

    /// 1-indexed page of the zone listing; out-of-range pages clamp to the
    /// nearest valid page
    pub fn get_zones_page(&self, page_number: usize, page_size: usize) -> Result<ZonesPage> {
        if page_size == 0 {
            return Err(ZoneError::InvalidOperation("page size must be greater than 0".to_string()));
        }

        let zones = self.get_all_zones();
        let total_zones = zones.len();
        let total_pages = total_zones.div_ceil(page_size);
        let page_number = page_number.clamp(1, total_pages.max(1));

        let zones = zones
            .into_iter()
            .skip((page_number - 1) * page_size)
            .take(page_size)
            .collect();

        Ok(ZonesPage {
            page_number,
            total_pages,
            total_zones,
            zones,
        })
    }

    /// Records at `domain` and below, inside zone `zone_name`
    pub fn list_all_records(&self, zone_name: &str, domain: &str) -> Result<Vec<ZoneRecord>> {
        let zone = self.require_zone(zone_name)?;
        let domain = normalize_name(domain);
        if !is_in_zone(&domain, zone.name()) {
            return Err(ZoneError::InvalidDomainName(format!(
                "{} is outside zone {}",
                domain,
                zone.display_name()
            )));
        }
        Ok(zone.contents().records_below(&domain))
    }

    /// Child labels of `domain`, from both the zone tree and the records of
    /// the zone enclosing it
    pub fn list_sub_domains(&self, domain: &str) -> Vec<String> {
        let domain = normalize_name(domain);
        let mut labels = self.zones.read().child_labels(&domain);

        if let Some(zone) = self.find_zone(&domain) {
            labels.extend(zone.contents().sub_domains(&domain));
        }

        labels.sort();
        labels.dedup();
        labels
    }

    pub fn set_zone_disabled(&self, name: &str, disabled: bool) -> Result<()> {
        let zone = self.require_zone(name)?;
        zone.set_disabled(disabled, self.config.trigger_delay);
        self.persist(&zone);
        Ok(())
    }

    /// Force a full transfer of a Secondary or Stub zone
    pub fn resync_zone(&self, name: &str) -> Result<bool> {
        let zone = self.require_zone(name)?;
        let triggered = zone.resync()?;
        if triggered {
            info!("Resync requested for {} zone {}", zone.zone_type(), zone.display_name());
        }
        Ok(triggered)
    }

    /// Schedule an out-of-band refresh of a Secondary or Stub zone
    pub fn refresh_zone(&self, name: &str) -> Result<bool> {
        self.require_zone(name)?.trigger_refresh(self.config.trigger_delay)
    }

    pub fn set_zone_transfer(&self, name: &str, policy: ZoneTransfer) -> Result<()> {
        let zone = self.require_zone(name)?;
        zone.set_zone_transfer(policy)?;
        self.persist(&zone);
        Ok(())
    }

    pub fn set_notify(&self, name: &str, policy: ZoneNotify) -> Result<()> {
        let zone = self.require_zone(name)?;
        zone.set_notify(policy)?;
        self.persist(&zone);
        Ok(())
    }

    pub fn set_update(&self, name: &str, policy: ZoneUpdate) -> Result<()> {
        let zone = self.require_zone(name)?;
        zone.set_update(policy)?;
        self.persist(&zone);
        Ok(())
    }

    pub fn get_records(&self, zone_name: &str, name: &str, rtype: DNSResourceType) -> Result<Vec<ZoneRecord>> {
        let zone = self.require_zone(zone_name)?;
        Ok(zone.contents().get(&normalize_name(name), rtype).to_vec())
    }

    pub fn add_record(&self, zone_name: &str, record: DNSResource) -> Result<bool> {
        let zone = self.require_zone(zone_name)?;
        let added = zone.add_record(ZoneRecord::new(record))?;
        if added {
            self.persist(&zone);
        }
        Ok(added)
    }

    pub fn set_records(
        &self,
        zone_name: &str,
        name: &str,
        rtype: DNSResourceType,
        records: Vec<ZoneRecord>,
    ) -> Result<()> {
        let zone = self.require_zone(zone_name)?;
        zone.set_records(name, rtype, records)?;
        self.persist(&zone);
        Ok(())
    }

    pub fn update_record(&self, zone_name: &str, old: &DNSResource, new: DNSResource) -> Result<bool> {
        let zone = self.require_zone(zone_name)?;
        let updated = zone.update_record(old, new)?;
        if updated {
            self.persist(&zone);
        }
        Ok(updated)
    }

    pub fn delete_record(&self, zone_name: &str, record: &DNSResource) -> Result<bool> {
        let zone = self.require_zone(zone_name)?;
        let deleted = zone.delete_record(record)?;
        if deleted {
            self.persist(&zone);
        }
        Ok(deleted)
    }

    pub fn delete_records(&self, zone_name: &str, name: &str, rtype: DNSResourceType) -> Result<bool> {
        let zone = self.require_zone(zone_name)?;
        let deleted = zone.delete_records(name, rtype)?;
        if deleted {
            self.persist(&zone);
        }
        Ok(deleted)
    }

    pub fn sign_primary_zone(&self, name: &str, signer: &dyn ZoneSigner) -> Result<DnssecStatus> {
        let zone = self.require_zone(name)?;
        let status = zone.sign(signer)?;
        self.persist(&zone);
        Ok(status)
    }

    pub fn unsign_primary_zone(&self, name: &str, signer: &dyn ZoneSigner) -> Result<()> {
        let zone = self.require_zone(name)?;
        zone.unsign(signer)?;
        self.persist(&zone);
        Ok(())
    }

    fn require_storage(&self) -> Result<&Arc<dyn ZoneStorage>> {
        self.storage
            .as_ref()
            .ok_or_else(|| ZoneError::Storage("no zone storage configured".to_string()))
    }

    pub fn save_zone_file(&self, name: &str) -> Result<()> {
        let zone = self.require_zone(name)?;
        self.require_storage()?.save(&ZoneSnapshot::capture(&zone))
    }

    pub fn delete_zone_file(&self, name: &str) -> Result<()> {
        self.require_storage()?.delete(&normalize_name(name))
    }

    /// Replace the in-memory zones with everything in storage. Mirrored
    /// zones get a running refresh task and an immediate refresh; zones that
    /// cannot be restored are logged and skipped.
    pub fn load_all_zone_files(&self) -> Result<usize> {
        let snapshots = self.require_storage()?.load_all()?;
        self.flush();

        let mut loaded = 0;
        for snapshot in snapshots {
            let name = display_zone_name(&snapshot.name).to_string();
            match self.restore_zone(snapshot) {
                Ok(true) => loaded += 1,
                Ok(false) => warn!("Zone {} was restored twice; keeping the first copy", name),
                Err(e) => warn!("Failed to restore zone {}: {}", name, e),
            }
        }

        info!("Loaded {} zones from storage", loaded);
        Ok(loaded)
    }

    fn restore_zone(&self, snapshot: ZoneSnapshot) -> Result<bool> {
        let mirrored = matches!(snapshot.zone_type, ZoneType::Secondary | ZoneType::Stub);
        let ctx = match self.refresh_context() {
            Ok(ctx) if mirrored => Some(ctx),
            Err(_) if mirrored => {
                warn!(
                    "No DNS client; {} zone {} restored without refresh",
                    snapshot.zone_type,
                    display_zone_name(&snapshot.name)
                );
                None
            }
            _ => None,
        };

        let Some(zone) = self.insert(snapshot.into_zone()?) else {
            return Ok(false);
        };

        if let Some(ctx) = ctx {
            if let Err(e) = spawn_refresh_task(&zone, ctx) {
                self.zones.write().remove(zone.name());
                return Err(e);
            }
            zone.trigger_refresh(Duration::ZERO)?;
        }
        Ok(true)
    }
}

impl Drop for ZoneManager {
    fn drop(&mut self) {
        for zone in self.zones.get_mut().values() {
            if let Some(sync) = zone.sync_state() {
                sync.shutdown();
            }
        }
    }
}
