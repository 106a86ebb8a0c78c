use super::{DomainListManager, ListKind};
use crate::config::ZoneConfig;
use crate::dns::DNSPacket;
use crate::zone::Result;
use std::ops::Deref;

/// Domains exempt from blocking
pub struct AllowedZoneManager {
    list: DomainListManager,
}

impl AllowedZoneManager {
    pub fn new(config: &ZoneConfig) -> Self {
        Self {
            list: DomainListManager::new(ListKind::Allowed, config),
        }
    }

    /// Returns false when `domain` is already allowed
    pub fn allow_zone(&self, domain: &str) -> Result<bool> {
        self.list.add_zone(domain)
    }

    /// Whether the question name of `request` is covered by an allowed zone
    pub fn is_allowed(&self, request: &DNSPacket) -> bool {
        self.list.query(request).is_some()
    }
}

impl Deref for AllowedZoneManager {
    type Target = DomainListManager;

    fn deref(&self) -> &Self::Target {
        &self.list
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::enums::DNSResourceType;

    #[test]
    fn test_allow_covers_sub_domains() {
        let allowed = AllowedZoneManager::new(&ZoneConfig::default());
        assert!(!allowed.is_allowed(&DNSPacket::query("cdn.example.com", DNSResourceType::A)));

        assert!(allowed.allow_zone("example.com").unwrap());
        assert!(allowed.is_allowed(&DNSPacket::query("cdn.example.com", DNSResourceType::AAAA)));
        assert!(allowed.is_allowed(&DNSPacket::query("example.com", DNSResourceType::A)));
        assert!(!allowed.is_allowed(&DNSPacket::query("example.net", DNSResourceType::A)));

        assert!(allowed.delete_zone("example.com"));
        assert!(!allowed.is_allowed(&DNSPacket::query("cdn.example.com", DNSResourceType::A)));
    }
}
