//! Common test utilities for Authzone integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use authzone::client::{DnsClient, NameServerAddress, ResolveOptions, Resolved};
use authzone::config::ZoneConfig;
use authzone::dns::enums::{DNSResourceType, ResponseCode, TransportProtocol};
use authzone::dns::question::DNSQuestion;
use authzone::dns::resource::{DNSResource, DNSResourceData, SoaData};
use authzone::dns::DNSPacket;
use authzone::error::{DnsError, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

pub const PRIMARY_IP: Ipv4Addr = Ipv4Addr::new(192, 0, 2, 1);

/// Config with a 5 second trigger delay and the given folder
pub fn test_config(folder: &Path) -> ZoneConfig {
    ZoneConfig {
        config_folder: folder.to_path_buf(),
        ..ZoneConfig::default()
    }
}

pub fn primary_address() -> NameServerAddress {
    NameServerAddress::from_ip(IpAddr::V4(PRIMARY_IP), TransportProtocol::Udp)
}

/// Zone served by the scripted primary
#[derive(Debug, Clone)]
pub struct PrimaryZone {
    pub name: String,
    pub serial: u32,
    pub refresh: u32,
    pub retry: u32,
    pub expire: u32,
    /// NS targets, each answered with one glue address
    pub name_servers: Vec<String>,
    /// Non-SOA records returned by a zone transfer
    pub records: Vec<DNSResource>,
    /// Skip the leading SOA in zone transfers
    pub broken_transfer: bool,
}

impl PrimaryZone {
    pub fn new(name: &str, serial: u32) -> Self {
        Self {
            name: name.to_string(),
            serial,
            refresh: 3600,
            retry: 300,
            expire: 604800,
            name_servers: vec![format!("ns1.{}", name)],
            records: Vec::new(),
            broken_transfer: false,
        }
    }

    pub fn soa(&self) -> DNSResource {
        let soa = SoaData::new(
            &format!("ns1.{}", self.name),
            &format!("hostmaster@{}", self.name),
            self.serial,
            self.refresh,
            self.retry,
            self.expire,
            300,
        );
        DNSResource::new(&self.name, 3600, DNSResourceData::SOA(soa))
    }

    fn ns_records(&self) -> Vec<DNSResource> {
        self.name_servers
            .iter()
            .map(|ns| DNSResource::new(&self.name, 3600, DNSResourceData::ns(ns)))
            .collect()
    }

    fn glue(&self) -> Vec<DNSResource> {
        self.name_servers
            .iter()
            .map(|ns| DNSResource::new(ns, 3600, DNSResourceData::A(PRIMARY_IP)))
            .collect()
    }
}

/// Scripted upstream primary. Counts every resolution per question type
/// and transport.
#[derive(Default)]
pub struct MockClient {
    zone: Mutex<Option<PrimaryZone>>,
    calls: Mutex<HashMap<(DNSResourceType, TransportProtocol), usize>>,
    fail: Mutex<bool>,
    delay: Mutex<Option<Duration>>,
}

impl MockClient {
    pub fn serving(zone: PrimaryZone) -> Arc<Self> {
        let client = Self::default();
        *client.zone.lock() = Some(zone);
        Arc::new(client)
    }

    /// Edit the served zone
    pub fn update(&self, f: impl FnOnce(&mut PrimaryZone)) {
        if let Some(zone) = self.zone.lock().as_mut() {
            f(zone);
        }
    }

    pub fn set_failing(&self, fail: bool) {
        *self.fail.lock() = fail;
    }

    /// Hold every resolution for `delay` before answering
    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock() = delay;
    }

    pub fn calls(&self, qtype: DNSResourceType) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|((t, _), _)| *t == qtype)
            .map(|(_, count)| count)
            .sum()
    }

    pub fn calls_over(&self, qtype: DNSResourceType, protocol: TransportProtocol) -> usize {
        self.calls.lock().get(&(qtype, protocol)).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().values().sum()
    }

    pub fn reset_calls(&self) {
        self.calls.lock().clear();
    }

    fn answer(&self, request: &DNSPacket) -> DNSPacket {
        let mut response = DNSPacket::response_to(request);
        let Some(question) = request.question() else {
            response.set_rcode(ResponseCode::FormatError);
            return response;
        };
        let Some(zone) = self.zone.lock().clone() else {
            response.set_rcode(ResponseCode::Refused);
            return response;
        };
        if question.name() != zone.name {
            response.set_rcode(ResponseCode::Refused);
            return response;
        }

        match question.qtype {
            DNSResourceType::SOA => response.answers.push(zone.soa()),
            DNSResourceType::NS => {
                response.answers = zone.ns_records();
                response.resources = zone.glue();
            }
            DNSResourceType::AXFR => {
                if !zone.broken_transfer {
                    response.answers.push(zone.soa());
                }
                response.answers.extend(zone.ns_records());
                response.answers.extend(zone.glue());
                response.answers.extend(zone.records.iter().cloned());
                response.answers.push(zone.soa());
            }
            _ => {}
        }
        response.header.aa = true;
        response.update_counts();
        response
    }
}

#[async_trait]
impl DnsClient for MockClient {
    async fn resolve(
        &self,
        request: &DNSPacket,
        servers: &[NameServerAddress],
        _options: &ResolveOptions,
    ) -> Result<Resolved> {
        let server = servers.first().cloned().ok_or(DnsError::NoServers)?;
        if let Some(question) = request.question() {
            *self.calls.lock().entry((question.qtype, server.protocol)).or_insert(0) += 1;
        }

        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if *self.fail.lock() {
            return Err(DnsError::Timeout);
        }

        Ok(Resolved {
            response: self.answer(request),
            server,
        })
    }

    async fn direct_query(&self, question: &DNSQuestion) -> Result<DNSPacket> {
        let mut request = DNSPacket::query(&question.name(), question.qtype);
        request.header.rd = true;
        self.resolve(&request, &[primary_address()], &ResolveOptions::default())
            .await
            .map(|resolved| resolved.response)
    }

    async fn resolve_host(&self, _host: &str, _prefer_ipv6: bool) -> Result<Vec<IpAddr>> {
        Ok(vec![IpAddr::V4(PRIMARY_IP)])
    }
}

/// Let the refresh tasks run for `duration` of (paused) time
pub async fn advance(duration: Duration) {
    tokio::time::sleep(duration).await;
}
