//! DNS client collaborator.
//!
//! The zone engine never touches sockets. Refresh, construction probes and
//! name-server address discovery go through [`DnsClient`], which the
//! embedding server implements on top of its transport layer.

use crate::dns::DNSPacket;
use crate::dns::enums::TransportProtocol;
use crate::dns::question::DNSQuestion;
use crate::error::{DnsError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

/// A name server to query: an address, a host name still to be resolved,
/// or both, plus the transport to use.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NameServerAddress {
    pub host: Option<String>,
    pub addr: Option<SocketAddr>,
    pub protocol: TransportProtocol,
}

impl NameServerAddress {
    pub fn from_addr(addr: SocketAddr, protocol: TransportProtocol) -> Self {
        Self {
            host: None,
            addr: Some(addr),
            protocol,
        }
    }

    pub fn from_ip(ip: IpAddr, protocol: TransportProtocol) -> Self {
        Self::from_addr(SocketAddr::new(ip, 53), protocol)
    }

    /// Parse `1.2.3.4`, `1.2.3.4:5353`, `[::1]:53`, or a host name
    /// (`ns1.example.com`, `ns1.example.com:5353`).
    pub fn parse(text: &str) -> Result<Self> {
        let text = text.trim();
        if text.is_empty() {
            return Err(DnsError::InvalidAddress("empty".to_string()));
        }

        if let Ok(addr) = text.parse::<SocketAddr>() {
            return Ok(Self::from_addr(addr, TransportProtocol::Udp));
        }
        if let Ok(ip) = text.parse::<IpAddr>() {
            return Ok(Self::from_ip(ip, TransportProtocol::Udp));
        }

        let (host, port) = match text.rsplit_once(':') {
            Some((host, port)) => {
                let port = port
                    .parse::<u16>()
                    .map_err(|_| DnsError::InvalidAddress(format!("invalid port in {}", text)))?;
                (host, Some(port))
            }
            None => (text, None),
        };

        let host = host.trim_end_matches('.').to_lowercase();
        if host.is_empty() || host.contains(char::is_whitespace) {
            return Err(DnsError::InvalidAddress(text.to_string()));
        }

        Ok(Self {
            host: Some(host),
            addr: port.map(|port| SocketAddr::new(IpAddr::from([0, 0, 0, 0]), port)),
            protocol: TransportProtocol::Udp,
        })
    }

    /// Parse a comma separated list of addresses
    pub fn parse_list(text: &str) -> Result<Vec<Self>> {
        text.split(',')
            .filter(|part| !part.trim().is_empty())
            .map(Self::parse)
            .collect()
    }

    pub fn with_protocol(&self, protocol: TransportProtocol) -> Self {
        Self {
            protocol,
            ..self.clone()
        }
    }

    /// Whether a host name is known but no usable address is attached yet
    pub fn is_unresolved(&self) -> bool {
        match self.addr {
            None => true,
            Some(addr) => addr.ip().is_unspecified() && self.host.is_some(),
        }
    }

    /// Attach a resolved IP, keeping an explicit port when one was given
    pub fn resolved(&self, ip: IpAddr) -> Self {
        let port = self.addr.map(|addr| addr.port()).unwrap_or(53);
        Self {
            host: self.host.clone(),
            addr: Some(SocketAddr::new(ip, port)),
            protocol: self.protocol,
        }
    }
}

impl fmt::Display for NameServerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.host, &self.addr) {
            (Some(host), Some(addr)) if !addr.ip().is_unspecified() => write!(f, "{} ({})", host, addr),
            (Some(host), _) => write!(f, "{}", host),
            (None, Some(addr)) => write!(f, "{}", addr),
            (None, None) => write!(f, "<unknown>"),
        }
    }
}

/// Knobs for a single resolution against a server list
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolveOptions {
    pub timeout: Duration,
    pub retries: u8,
    /// How many servers may be queried in parallel; 1 walks the list in order
    pub concurrency: usize,
    pub prefer_ipv6: bool,
    pub udp_payload_size: u16,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            retries: 5,
            concurrency: 1,
            prefer_ipv6: false,
            udp_payload_size: 1232,
        }
    }
}

/// A response together with the server that produced it
#[derive(Clone, Debug)]
pub struct Resolved {
    pub response: DNSPacket,
    pub server: NameServerAddress,
}

#[async_trait]
pub trait DnsClient: Send + Sync {
    /// Send `request` to `servers` with the given options; each server
    /// entry carries its own transport protocol.
    async fn resolve(
        &self,
        request: &DNSPacket,
        servers: &[NameServerAddress],
        options: &ResolveOptions,
    ) -> Result<Resolved>;

    /// Answer `question` through the server's own resolution path
    async fn direct_query(&self, question: &DNSQuestion) -> Result<DNSPacket>;

    /// Resolve a host name to its IP addresses
    async fn resolve_host(&self, host: &str, prefer_ipv6: bool) -> Result<Vec<IpAddr>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ip_forms() {
        let ns = NameServerAddress::parse("192.0.2.1").unwrap();
        assert_eq!(ns.addr, Some("192.0.2.1:53".parse().unwrap()));
        assert!(!ns.is_unresolved());

        let ns = NameServerAddress::parse("[2001:db8::1]:5353").unwrap();
        assert_eq!(ns.addr.unwrap().port(), 5353);
    }

    #[test]
    fn test_parse_host_forms() {
        let ns = NameServerAddress::parse("NS1.Example.com.").unwrap();
        assert_eq!(ns.host.as_deref(), Some("ns1.example.com"));
        assert!(ns.is_unresolved());

        let ns = NameServerAddress::parse("ns1.example.com:5353").unwrap();
        assert!(ns.is_unresolved());
        let resolved = ns.resolved("192.0.2.53".parse().unwrap());
        assert_eq!(resolved.addr, Some("192.0.2.53:5353".parse().unwrap()));
        assert!(!resolved.is_unresolved());
    }

    #[test]
    fn test_parse_list_and_protocol() {
        let list = NameServerAddress::parse_list("192.0.2.1, 192.0.2.2,").unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].protocol, TransportProtocol::Udp);
        assert_eq!(list[1].with_protocol(TransportProtocol::Tcp).protocol, TransportProtocol::Tcp);
        assert!(NameServerAddress::parse("bad host").is_err());
    }

    #[test]
    fn test_parse_rejects_bad_addresses() {
        for text in ["", "   ", "bad host", "ns1.example.com:99999", ":53"] {
            assert!(
                matches!(NameServerAddress::parse(text), Err(DnsError::InvalidAddress(_))),
                "{:?}",
                text
            );
        }
    }
}
