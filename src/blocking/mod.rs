//! Allow and block lists for Authzone
//!
//! Each list is a private [`ZoneManager`] filled with membership-only
//! zones. A name is on the list when a query for it lands in one of those
//! zones, so listing `example.com` also covers every name below it.

use crate::config::ZoneConfig;
use crate::dns::DNSPacket;
use crate::dns::enums::DNSResourceType;
use crate::dns::resource::{SoaData, normalize_name};
use crate::zone::{Result, ZoneError, ZoneInfo, ZoneManager, ZoneRecord};
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};

pub mod allowed;
pub mod blocked;
pub mod list_file;

pub use allowed::AllowedZoneManager;
pub use blocked::BlockedZoneManager;
pub use list_file::{ListFileReader, ListKind};

/// Synthetic SOA and NS target shared by every zone of one list
#[derive(Debug, Clone)]
struct ListRecords {
    soa: SoaData,
    ns: String,
}

impl ListRecords {
    fn for_server(server_domain: &str) -> Self {
        Self {
            soa: SoaData::new(
                server_domain,
                &format!("hostadmin@{}", server_domain),
                1,
                900,
                300,
                604800,
                60,
            ),
            ns: server_domain.to_string(),
        }
    }
}

pub struct DomainListManager {
    kind: ListKind,
    zones: ZoneManager,
    records: RwLock<ListRecords>,
    config_folder: PathBuf,
}

impl DomainListManager {
    pub fn new(kind: ListKind, config: &ZoneConfig) -> Self {
        let zones = ZoneManager::new(config.clone());
        let records = ListRecords::for_server(&zones.server_domain());
        Self {
            kind,
            zones,
            records: RwLock::new(records),
            config_folder: config.config_folder.clone(),
        }
    }

    pub fn kind(&self) -> ListKind {
        self.kind
    }

    pub fn list_file_path(&self) -> PathBuf {
        self.config_folder.join(self.kind.file_name())
    }

    pub fn server_domain(&self) -> String {
        self.records.read().ns.clone()
    }

    /// Rebuild the synthetic SOA/NS pair used for zones created from now on
    pub fn update_server_domain(&self, domain: &str) {
        let domain = normalize_name(domain);
        self.zones.set_server_domain(&domain);
        *self.records.write() = ListRecords::for_server(&domain);
        debug!("{} list server domain set to {}", self.kind.label(), domain);
    }

    /// Add `domain` to the list. Returns false when it is already listed.
    pub fn add_zone(&self, domain: &str) -> Result<bool> {
        let records = self.records.read().clone();
        Ok(self
            .zones
            .create_special_primary_zone(domain, &records.soa, &records.ns)?
            .is_some())
    }

    /// Bulk add; invalid names are skipped. Returns how many were added.
    pub fn import_zones<S: AsRef<str>>(&self, domains: &[S]) -> usize {
        let records = self.records.read().clone();
        let added = self.zones.load_special_primary_zones(
            domains.iter().map(|domain| domain.as_ref().to_string()),
            &records.soa,
            &records.ns,
        );
        info!("Imported {} of {} {} zones", added, domains.len(), self.kind.label());
        added
    }

    pub fn delete_zone(&self, domain: &str) -> bool {
        self.zones.delete_zone(domain)
    }

    pub fn flush(&self) {
        self.zones.flush();
    }

    pub fn total_zones(&self) -> usize {
        self.zones.total_zones()
    }

    pub fn get_all_zones(&self) -> Vec<ZoneInfo> {
        self.zones.get_all_zones()
    }

    pub fn list_all_records(&self, domain: &str) -> Result<Vec<ZoneRecord>> {
        self.zones.list_all_records(domain, domain)
    }

    pub fn list_sub_domains(&self, domain: &str) -> Vec<String> {
        self.zones.list_sub_domains(domain)
    }

    /// Membership query; `None` when nothing on the list covers the name
    pub fn query(&self, request: &DNSPacket) -> Option<DNSPacket> {
        if self.zones.total_zones() < 1 {
            return None;
        }
        self.zones.query(request, false)
    }

    /// Whether `domain` or one of its parents is listed
    pub fn contains(&self, domain: &str) -> bool {
        self.query(&DNSPacket::query(domain, DNSResourceType::A)).is_some()
    }

    pub fn save_zone_file(&self) -> Result<()> {
        let names: Vec<String> = self.zones.get_all_zones().into_iter().map(|zone| zone.name).collect();
        let path = self.list_file_path();
        list_file::save_list(&path, self.kind, &names)?;
        info!("Saved {} {} zones to {}", names.len(), self.kind.label(), path.display());
        Ok(())
    }

    /// Replace the list with the contents of its file. A missing file
    /// leaves the list empty without complaint. On a corrupt file whatever
    /// was read before the fault stays loaded.
    pub fn load_zone_file(&self) {
        self.zones.flush();

        let path = self.list_file_path();
        match self.load_from(&path) {
            Ok(loaded) => info!("Loaded {} {} zones from {}", loaded, self.kind.label(), path.display()),
            Err(ZoneError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No {} zone file at {}", self.kind.label(), path.display())
            }
            Err(e) => warn!(
                "Failed to load {} zone file {}: {}",
                self.kind.label(),
                path.display(),
                e
            ),
        }
    }

    fn load_from(&self, path: &Path) -> Result<usize> {
        let start = Instant::now();
        info!("Loading {} zone file {}", self.kind.label(), path.display());

        let mut reader = ListFileReader::open(path, self.kind)?;
        let expected = reader.remaining();
        let records = self.records.read().clone();

        let mut failure = None;
        let names = reader.by_ref().map_while(|entry| match entry {
            Ok(name) => Some(name),
            Err(e) => {
                failure = Some(e);
                None
            }
        });
        let loaded = self.zones.load_special_primary_zones(names, &records.soa, &records.ns);

        if let Some(e) = failure {
            return Err(e);
        }
        debug!(
            "Read {} {} entries ({} zones) in {:?}",
            expected,
            self.kind.label(),
            loaded,
            start.elapsed()
        );
        Ok(loaded)
    }
}
