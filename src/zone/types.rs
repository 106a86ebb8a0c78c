use super::Result;
use super::record::ZoneRecord;
use crate::dns::resource::DNSResource;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ZoneType {
    Primary,
    Secondary,
    Stub,
    Forwarder,
}

impl fmt::Display for ZoneType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            ZoneType::Primary => "Primary",
            ZoneType::Secondary => "Secondary",
            ZoneType::Stub => "Stub",
            ZoneType::Forwarder => "Forwarder",
        })
    }
}

/// Who may transfer the zone out via AXFR/IXFR
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ZoneTransfer {
    #[default]
    Deny,
    Allow,
    AllowOnlyZoneNameServers,
    AllowOnlySpecifiedNameServers,
}

/// Who is sent NOTIFY on change
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ZoneNotify {
    #[default]
    None,
    ZoneNameServers,
    SpecifiedNameServers,
}

/// Who may send dynamic updates
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ZoneUpdate {
    #[default]
    Deny,
    Allow,
    AllowOnlyZoneNameServers,
    AllowOnlySpecifiedIpAddresses,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DnssecStatus {
    #[default]
    Unsigned,
    SignedWithNsec,
    SignedWithNsec3,
}

/// Point-in-time status of one zone
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneInfo {
    pub name: String,
    pub zone_type: ZoneType,
    /// Membership-only zone created by a list manager
    pub internal: bool,
    pub disabled: bool,
    pub dnssec_status: DnssecStatus,
    pub zone_transfer: ZoneTransfer,
    pub notify: ZoneNotify,
    pub update: ZoneUpdate,
    pub serial: Option<u32>,
    pub expiry: Option<DateTime<Utc>>,
    pub is_expired: bool,
    pub sync_failed: bool,
    pub notify_failed: bool,
}

impl ZoneInfo {
    pub fn is_active(&self) -> bool {
        !self.disabled && !self.is_expired
    }

    /// Zone name for log lines, `<root>` for the root zone
    pub fn display_name(&self) -> &str {
        display_zone_name(&self.name)
    }
}

pub fn display_zone_name(name: &str) -> &str {
    if name.is_empty() { "<root>" } else { name }
}

/// One page of the zone listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZonesPage {
    pub page_number: usize,
    pub total_pages: usize,
    pub total_zones: usize,
    pub zones: Vec<ZoneInfo>,
}

/// Records produced by signing a zone
#[derive(Debug, Clone)]
pub struct SignedZone {
    pub status: DnssecStatus,
    /// DNSKEY/RRSIG/NSEC/NSEC3/NSEC3PARAM records to add to the zone
    pub records: Vec<DNSResource>,
}

/// DNSSEC signing backend; key handling and algorithms live behind it
pub trait ZoneSigner: Send + Sync {
    fn sign(&self, zone_name: &str, records: &[ZoneRecord]) -> Result<SignedZone>;

    /// Drop any key material held for `zone_name`
    fn unsign(&self, zone_name: &str) -> Result<()>;
}
