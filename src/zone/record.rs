use crate::client::NameServerAddress;
use crate::dns::enums::DNSResourceType;
use crate::dns::resource::{DNSResource, DNSResourceData};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Per-record metadata kept alongside authoritative data. Not part of the
/// record's identity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordInfo {
    /// Disabled records are stored but never served
    pub disabled: bool,
    pub comments: Option<String>,
    pub last_used: Option<DateTime<Utc>>,
    /// Address records for the target of an NS record
    pub glue: Vec<DNSResource>,
    /// Upstream primaries, kept on the SOA record of mirrored zones
    pub primary_name_servers: Vec<NameServerAddress>,
}

/// A resource record in a zone together with its metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneRecord {
    pub record: DNSResource,
    pub info: RecordInfo,
}

impl ZoneRecord {
    pub fn new(record: DNSResource) -> Self {
        Self {
            record,
            info: RecordInfo::default(),
        }
    }

    pub fn with_info(record: DNSResource, info: RecordInfo) -> Self {
        Self { record, info }
    }

    pub fn name(&self) -> String {
        self.record.name()
    }

    pub fn rtype(&self) -> DNSResourceType {
        self.record.rtype
    }

    pub fn rdata(&self) -> &DNSResourceData {
        &self.record.rdata
    }

    pub fn is_disabled(&self) -> bool {
        self.info.disabled
    }

    /// Identity for update/delete: owner, type and rdata. TTL and metadata
    /// do not count.
    pub fn same_identity(&self, other: &DNSResource) -> bool {
        self.record.rtype == other.rtype
            && self.record.rdata == other.rdata
            && self.record.name() == other.name()
    }

    /// Copy of the record data with the owner replaced, used for wildcard
    /// synthesis
    pub fn resource_as(&self, owner: &str) -> DNSResource {
        DNSResource::new(owner, self.record.ttl, self.record.rdata.clone())
    }
}

impl From<DNSResource> for ZoneRecord {
    fn from(record: DNSResource) -> Self {
        ZoneRecord::new(record)
    }
}

/// Resolve a possibly relative owner name against `origin`: `@` and the
/// empty string mean the origin, a trailing dot marks an absolute name,
/// anything else is relative.
pub fn resolve_owner(name: &str, origin: &str) -> String {
    let name = name.trim();

    if name == "@" || name.is_empty() {
        origin.to_string()
    } else if name.ends_with('.') {
        name.trim_end_matches('.').to_lowercase()
    } else if origin.is_empty() {
        name.to_lowercase()
    } else {
        format!("{}.{}", name.to_lowercase(), origin)
    }
}

/// Whether `name` is `zone` or lies below it
pub fn is_in_zone(name: &str, zone: &str) -> bool {
    zone.is_empty() || name == zone || name.ends_with(&format!(".{}", zone))
}
