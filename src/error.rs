use std::sync::Arc;
use thiserror::Error;

/// Failures reported by the DNS client collaborator
#[derive(Error, Debug, Clone)]
pub enum DnsError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("IO error: {0}")]
    IoError(Arc<std::io::Error>),

    #[error("Operation timed out")]
    Timeout,

    #[error("No name servers to query")]
    NoServers,

    #[error("Invalid name server address: {0}")]
    InvalidAddress(String),

    #[error("Invalid DNS response: {0}")]
    InvalidResponse(String),

    #[error("Unsupported DNS feature: {0}")]
    Unsupported(String),
}

impl From<std::io::Error> for DnsError {
    fn from(err: std::io::Error) -> Self {
        DnsError::IoError(Arc::new(err))
    }
}

pub type Result<T> = std::result::Result<T, DnsError>;
