use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, Ipv6Addr};

use super::enums::{DNSResourceClass, DNSResourceType, TransportProtocol};
use super::question::{join_labels, split_labels};
use super::serial::Serial;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DNSResource {
    pub labels: Vec<String>,
    pub rtype: DNSResourceType,
    pub rclass: DNSResourceClass,
    pub ttl: u32,
    pub rdata: DNSResourceData,
}

impl DNSResource {
    pub fn new(name: &str, ttl: u32, rdata: DNSResourceData) -> Self {
        Self {
            labels: split_labels(name),
            rtype: rdata.rtype(),
            rclass: DNSResourceClass::IN,
            ttl,
            rdata,
        }
    }

    /// Lower-case owner name without the trailing root label
    pub fn name(&self) -> String {
        join_labels(&self.labels)
    }

    pub fn soa(&self) -> Option<&SoaData> {
        match &self.rdata {
            DNSResourceData::SOA(soa) => Some(soa),
            _ => None,
        }
    }
}

/// Type-specific record data. Names are stored lower-case without the
/// trailing dot so rdata equality is case-insensitive for names.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DNSResourceData {
    #[default]
    Empty,
    A(Ipv4Addr),
    AAAA(Ipv6Addr),
    NS(String),
    CNAME(String),
    PTR(String),
    MX(u16, String),
    TXT(Vec<String>),
    SOA(SoaData),
    FWD(ForwarderData),
    /// Opaque rdata for types the engine does not interpret
    Raw(DNSResourceType, Vec<u8>),
}

impl DNSResourceData {
    pub fn rtype(&self) -> DNSResourceType {
        match self {
            DNSResourceData::Empty => DNSResourceType::Unknown(0),
            DNSResourceData::A(_) => DNSResourceType::A,
            DNSResourceData::AAAA(_) => DNSResourceType::AAAA,
            DNSResourceData::NS(_) => DNSResourceType::NS,
            DNSResourceData::CNAME(_) => DNSResourceType::CNAME,
            DNSResourceData::PTR(_) => DNSResourceType::PTR,
            DNSResourceData::MX(..) => DNSResourceType::MX,
            DNSResourceData::TXT(_) => DNSResourceType::TXT,
            DNSResourceData::SOA(_) => DNSResourceType::SOA,
            DNSResourceData::FWD(_) => DNSResourceType::FWD,
            DNSResourceData::Raw(rtype, _) => *rtype,
        }
    }

    pub fn ns(name: &str) -> Self {
        DNSResourceData::NS(normalize_name(name))
    }

    pub fn cname(name: &str) -> Self {
        DNSResourceData::CNAME(normalize_name(name))
    }

    /// Target name for NS/CNAME/PTR/MX data
    pub fn target_name(&self) -> Option<&str> {
        match self {
            DNSResourceData::NS(name)
            | DNSResourceData::CNAME(name)
            | DNSResourceData::PTR(name)
            | DNSResourceData::MX(_, name) => Some(name),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SoaData {
    pub primary_name_server: String,
    pub responsible_person: String,
    pub serial: Serial,
    pub refresh: u32,
    pub retry: u32,
    pub expire: u32,
    pub minimum: u32,
}

impl SoaData {
    pub fn new(
        primary_name_server: &str,
        responsible_person: &str,
        serial: u32,
        refresh: u32,
        retry: u32,
        expire: u32,
        minimum: u32,
    ) -> Self {
        Self {
            primary_name_server: normalize_name(primary_name_server),
            responsible_person: responsible_person.trim_end_matches('.').to_lowercase(),
            serial: Serial(serial),
            refresh,
            retry,
            expire,
            minimum,
        }
    }

    /// Whether `received` carries a newer serial, compared in sequence space
    pub fn is_zone_update_available(&self, received: &SoaData) -> bool {
        self.serial.is_older_than(received.serial)
    }

    /// Copy with the serial advanced by one in sequence space
    pub fn with_next_serial(&self) -> Self {
        Self {
            serial: self.serial.add(1),
            ..self.clone()
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ForwarderData {
    pub protocol: TransportProtocol,
    pub forwarder: String,
    pub dnssec_validation: bool,
}

/// Lower-case a presentation name and strip its trailing dot
pub fn normalize_name(name: &str) -> String {
    name.trim().trim_end_matches('.').to_lowercase()
}
