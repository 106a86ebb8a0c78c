use crate::error::DnsError;
use thiserror::Error;

/// Zone engine errors
#[derive(Error, Debug)]
pub enum ZoneError {
    #[error("Zone not found: {0}")]
    ZoneNotFound(String),

    #[error("Zone already exists: {0}")]
    ZoneAlreadyExists(String),

    #[error("Invalid domain name: {0}")]
    InvalidDomainName(String),

    /// Operation not allowed for the zone type or zone state
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    #[error("Zone missing required SOA record")]
    MissingSOA,

    /// No SOA answer could be obtained while creating a mirrored zone
    #[error("Failed to find SOA record for zone {zone}: {reason}")]
    SoaNotFound { zone: String, reason: String },

    #[error("No DNS client configured for zone refresh")]
    NoDnsClient,

    #[error("Zone storage error: {0}")]
    Storage(String),

    #[error("Invalid list file: {0}")]
    ListFile(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("DNS error: {0}")]
    Dns(#[from] DnsError),
}

pub type Result<T> = std::result::Result<T, ZoneError>;
