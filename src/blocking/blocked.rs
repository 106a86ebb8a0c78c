use super::{DomainListManager, ListKind};
use crate::config::ZoneConfig;
use crate::dns::DNSPacket;
use crate::zone::Result;
use std::ops::Deref;
use std::path::PathBuf;
use tracing::{info, warn};

/// File name used for the block list before it moved to `blocked.config`
pub const LEGACY_BLOCKED_FILE: &str = "custom-blocked.config";

/// Domains answered as blocked
pub struct BlockedZoneManager {
    list: DomainListManager,
    config_folder: PathBuf,
}

impl BlockedZoneManager {
    pub fn new(config: &ZoneConfig) -> Self {
        Self {
            list: DomainListManager::new(ListKind::Blocked, config),
            config_folder: config.config_folder.clone(),
        }
    }

    /// Returns false when `domain` is already blocked
    pub fn block_zone(&self, domain: &str) -> Result<bool> {
        self.list.add_zone(domain)
    }

    pub fn is_blocked(&self, request: &DNSPacket) -> bool {
        self.list.query(request).is_some()
    }

    /// Load the block list, first moving a legacy list file into place
    pub fn load_zone_file(&self) {
        self.list.flush();
        self.migrate_legacy_file();
        self.list.load_zone_file();
    }

    fn migrate_legacy_file(&self) {
        let legacy = self.config_folder.join(LEGACY_BLOCKED_FILE);
        if !legacy.exists() {
            return;
        }

        let target = self.list.list_file_path();
        let moved = (|| -> std::io::Result<()> {
            if target.exists() {
                std::fs::remove_file(&target)?;
            }
            std::fs::rename(&legacy, &target)
        })();

        match moved {
            Ok(()) => info!("Migrated {} to {}", legacy.display(), target.display()),
            Err(e) => warn!("Failed to migrate {}: {}", legacy.display(), e),
        }
    }
}

impl Deref for BlockedZoneManager {
    type Target = DomainListManager;

    fn deref(&self) -> &Self::Target {
        &self.list
    }
}
