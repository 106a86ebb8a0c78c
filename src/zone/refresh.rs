//! SOA-driven refresh for Secondary and Stub zones.
//!
//! Each mirrored zone owns one [`RefreshTimer`] and one tokio task. The task
//! sleeps until the timer is due, runs a single refresh attempt and commits
//! its outcome (content swap, persistence, rearm) while holding the timer
//! lock. Deleting a zone closes the timer under that same lock, so once
//! `close` returns no commit can be observed.

use super::apex::{ApexZone, ZoneKind};
use super::contents::ZoneContents;
use super::record::ZoneRecord;
use super::storage::{ZoneSnapshot, ZoneStorage};
use super::{Result, ZoneError};
use crate::client::{DnsClient, NameServerAddress, ResolveOptions};
use crate::dns::DNSPacket;
use crate::dns::enums::{DNSResourceType, ResponseCode, TransportProtocol};
use crate::dns::resource::{DNSResource, DNSResourceData, SoaData};
use parking_lot::{Mutex, RwLock};
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Default)]
pub(crate) struct TimerState {
    due: Option<Instant>,
    closed: bool,
}

impl TimerState {
    pub(crate) fn arm_in(&mut self, delay: Duration) {
        if !self.closed {
            self.due = Some(Instant::now() + delay);
        }
    }

    pub(crate) fn disarm(&mut self) {
        self.due = None;
    }
}

/// Single-shot timer with a "trigger pending" guard
#[derive(Debug, Default)]
pub struct RefreshTimer {
    state: Mutex<TimerState>,
    wake: Notify,
    /// Set while a triggered refresh is pending or a refresh is running
    triggered: AtomicBool,
    /// Set from the moment the timer fires until the attempt has committed
    running: AtomicBool,
    /// Transfer on the next refresh regardless of the serial comparison
    resync: AtomicBool,
}

impl RefreshTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` under the timer lock unless the timer was closed
    pub(crate) fn commit<R>(&self, f: impl FnOnce(&mut TimerState) -> R) -> Option<R> {
        let result = {
            let mut state = self.state.lock();
            if state.closed {
                return None;
            }
            f(&mut state)
        };
        self.wake.notify_one();
        Some(result)
    }

    pub fn arm(&self, delay: Duration) {
        self.commit(|state| state.arm_in(delay));
    }

    /// Stop firing until armed again
    pub fn disarm(&self) {
        self.commit(TimerState::disarm);
    }

    /// Permanently stop the timer
    pub fn close(&self) {
        {
            let mut state = self.state.lock();
            state.closed = true;
            state.due = None;
        }
        self.wake.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn is_armed(&self) -> bool {
        self.state.lock().due.is_some()
    }

    pub fn resync_requested(&self) -> bool {
        self.resync.load(Ordering::SeqCst)
    }

    pub(crate) fn request_resync(&self) {
        self.resync.store(true, Ordering::SeqCst);
    }

    /// Claim the trigger guard; false when a refresh is already pending
    fn claim_trigger(&self) -> bool {
        !self.triggered.swap(true, Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Drop a pending trigger that has not fired. Call with the timer lock
    /// held, right after disarming. A running attempt keeps the guard until
    /// it finishes.
    pub(crate) fn cancel_pending(&self) {
        if !self.running.load(Ordering::SeqCst) {
            self.triggered.store(false, Ordering::SeqCst);
        }
    }

    fn finish_run(&self) {
        self.triggered.store(false, Ordering::SeqCst);
        self.running.store(false, Ordering::SeqCst);
    }

    /// Wait until due. Returns false once the timer is closed.
    async fn wait(&self) -> bool {
        loop {
            let notified = self.wake.notified();
            let due = {
                let mut state = self.state.lock();
                if state.closed {
                    return false;
                }
                match state.due {
                    Some(at) if at <= Instant::now() => {
                        state.due = None;
                        self.running.store(true, Ordering::SeqCst);
                        self.triggered.store(true, Ordering::SeqCst);
                        return true;
                    }
                    other => other,
                }
            };

            match due {
                Some(at) => {
                    tokio::select! {
                        _ = tokio::time::sleep_until(at) => {}
                        _ = notified => {}
                    }
                }
                None => notified.await,
            }
        }
    }
}

/// Refresh bookkeeping of a Secondary or Stub zone
#[derive(Debug)]
pub struct SyncState {
    timer: Arc<RefreshTimer>,
    primary_name_servers: RwLock<Vec<NameServerAddress>>,
    /// `None` until the first completed transfer
    expiry: Mutex<Option<Instant>>,
    sync_failed: AtomicBool,
    notify_failed: AtomicBool,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SyncState {
    pub fn new(primary_name_servers: Vec<NameServerAddress>) -> Self {
        Self {
            timer: Arc::new(RefreshTimer::new()),
            primary_name_servers: RwLock::new(primary_name_servers),
            expiry: Mutex::new(None),
            sync_failed: AtomicBool::new(false),
            notify_failed: AtomicBool::new(false),
            task: Mutex::new(None),
        }
    }

    pub fn timer(&self) -> &RefreshTimer {
        &self.timer
    }

    pub fn primary_name_servers(&self) -> Vec<NameServerAddress> {
        self.primary_name_servers.read().clone()
    }

    pub fn set_primary_name_servers(&self, servers: Vec<NameServerAddress>) {
        *self.primary_name_servers.write() = servers;
    }

    pub fn expiry(&self) -> Option<Instant> {
        *self.expiry.lock()
    }

    pub(crate) fn set_expiry(&self, expiry: Option<Instant>) {
        *self.expiry.lock() = expiry;
    }

    pub fn is_expired(&self) -> bool {
        match self.expiry() {
            Some(expiry) => Instant::now() > expiry,
            None => true,
        }
    }

    pub fn sync_failed(&self) -> bool {
        self.sync_failed.load(Ordering::SeqCst)
    }

    pub(crate) fn set_sync_failed(&self, failed: bool) {
        self.sync_failed.store(failed, Ordering::SeqCst);
    }

    pub fn notify_failed(&self) -> bool {
        self.notify_failed.load(Ordering::SeqCst)
    }

    pub(crate) fn set_notify_failed(&self, failed: bool) {
        self.notify_failed.store(failed, Ordering::SeqCst);
    }

    /// Schedule a refresh after `delay`; no-op when one is already pending
    pub fn trigger_refresh(&self, delay: Duration) -> bool {
        if !self.timer.claim_trigger() {
            return false;
        }
        self.timer.arm(delay);
        true
    }

    /// Schedule an immediate full transfer; no-op when a refresh is pending
    pub fn trigger_resync(&self) -> bool {
        if !self.timer.claim_trigger() {
            return false;
        }
        self.timer.request_resync();
        self.timer.arm(Duration::ZERO);
        true
    }

    /// Close the timer and stop the task. No commit happens after this returns.
    pub(crate) fn shutdown(&self) {
        self.timer.close();
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
    }
}

/// What the refresh task needs besides the zone itself
#[derive(Clone)]
pub(crate) struct RefreshContext {
    pub client: Arc<dyn DnsClient>,
    pub options: ResolveOptions,
    pub storage: Option<Arc<dyn ZoneStorage>>,
}

/// Start the refresh task of a mirrored zone. Requires a tokio runtime.
pub(crate) fn spawn_refresh_task(zone: &Arc<ApexZone>, ctx: RefreshContext) -> Result<()> {
    let sync = zone.sync_state().ok_or_else(|| {
        ZoneError::InvalidOperation(format!("{} zones are not refreshed", zone.zone_type()))
    })?;
    let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
        ZoneError::InvalidOperation("zone refresh requires a tokio runtime".to_string())
    })?;

    let timer = sync.timer.clone();
    let task = runtime.spawn(refresh_loop(Arc::downgrade(zone), timer, ctx));
    if let Some(previous) = sync.task.lock().replace(task) {
        previous.abort();
    }
    Ok(())
}

async fn refresh_loop(zone: Weak<ApexZone>, timer: Arc<RefreshTimer>, ctx: RefreshContext) {
    while timer.wait().await {
        let Some(zone) = zone.upgrade() else {
            break;
        };

        refresh_once(&zone, &timer, &ctx).await;
        timer.finish_run();
    }
}

enum Transfer {
    /// Stub: the apex SOA and NS set
    Referral { soa: DNSResource, ns: Vec<ZoneRecord> },
    /// Secondary: the whole zone, SOA first
    Full { records: Vec<DNSResource> },
}

enum RefreshOutcome {
    NoServers,
    Failed(String),
    UpToDate { server: NameServerAddress },
    Updated { transfer: Transfer, server: NameServerAddress },
}

async fn refresh_once(zone: &ApexZone, timer: &RefreshTimer, ctx: &RefreshContext) {
    if zone.is_disabled() && !timer.resync_requested() {
        return;
    }
    let Some(sync) = zone.sync_state() else {
        return;
    };

    debug!("Refreshing {} zone {}", zone.zone_type(), zone.display_name());

    let contents = zone.contents();
    let servers = primary_addresses(&contents, sync, ctx).await;
    let outcome = if servers.is_empty() {
        RefreshOutcome::NoServers
    } else {
        fetch_update(zone, &contents, &servers, timer.resync_requested(), ctx).await
    };

    commit_outcome(zone, sync, timer, outcome, ctx);
}

fn commit_outcome(
    zone: &ApexZone,
    sync: &SyncState,
    timer: &RefreshTimer,
    outcome: RefreshOutcome,
    ctx: &RefreshContext,
) {
    let name = zone.display_name();

    timer.commit(|state| {
        // Disabled while the attempt was in flight
        if zone.is_disabled() && !timer.resync_requested() {
            state.disarm();
            return;
        }

        let retry = zone.soa().map(|soa| soa.retry).unwrap_or(300);
        match outcome {
            RefreshOutcome::NoServers => {
                warn!("Could not find primary name server addresses for {} zone: {}", zone.zone_type(), name);
                sync.set_sync_failed(true);
                state.arm_in(Duration::from_secs(retry as u64));
            }
            RefreshOutcome::Failed(reason) => {
                warn!("Failed to refresh {} zone {}: {}", zone.zone_type(), name, reason);
                sync.set_sync_failed(true);
                state.arm_in(Duration::from_secs(retry as u64));
            }
            RefreshOutcome::UpToDate { server } => {
                let refresh = zone.soa().map(|soa| soa.refresh).unwrap_or(900);
                info!("{} zone {} is up to date with {}", zone.zone_type(), name, server);
                sync.set_sync_failed(false);
                state.arm_in(Duration::from_secs(refresh as u64));
            }
            RefreshOutcome::Updated { transfer, server } => match install_transfer(zone, transfer) {
                Ok(soa) => {
                    sync.set_expiry(Some(Instant::now() + Duration::from_secs(soa.expire as u64)));
                    sync.set_sync_failed(false);
                    timer.resync.store(false, Ordering::SeqCst);

                    if let Some(storage) = &ctx.storage {
                        if let Err(e) = storage.save(&ZoneSnapshot::capture(zone)) {
                            warn!("Failed to save zone file for {}: {}", name, e);
                        }
                    }

                    info!(
                        "{} zone {} refreshed from {} (serial {})",
                        zone.zone_type(),
                        name,
                        server,
                        soa.serial
                    );
                    state.arm_in(Duration::from_secs(soa.refresh as u64));
                }
                Err(e) => {
                    warn!("Failed to apply transfer for {} zone {}: {}", zone.zone_type(), name, e);
                    sync.set_sync_failed(true);
                    state.arm_in(Duration::from_secs(retry as u64));
                }
            },
        }
    });
}

/// Swap in the transferred records as one unit, carrying the metadata of
/// the previous SOA record over to the new one
fn install_transfer(zone: &ApexZone, transfer: Transfer) -> Result<SoaData> {
    let apex = zone.name().to_string();

    zone.swap_contents(|current| {
        let soa_info = current
            .soa_record()
            .map(|record| record.info.clone())
            .unwrap_or_default();

        match transfer {
            Transfer::Referral { soa, ns } => {
                let mut next = current.clone();
                next.set_rrset(&apex, DNSResourceType::NS, ns)?;
                next.set_rrset(&apex, DNSResourceType::SOA, vec![ZoneRecord::with_info(soa, soa_info)])?;
                Ok(next)
            }
            Transfer::Full { records } => {
                let mut records = records.into_iter();
                let soa = records.next().ok_or(ZoneError::MissingSOA)?;
                let mut next = ZoneContents::new(&apex);
                next.add(ZoneRecord::with_info(soa, soa_info))?;
                for record in records {
                    next.add(ZoneRecord::new(record))?;
                }
                Ok(next)
            }
        }
    })?;

    zone.soa().ok_or(ZoneError::MissingSOA)
}

/// Query the primaries for the zone SOA over UDP and, when it is newer or a
/// resync is pending, fetch the new data over TCP
async fn fetch_update(
    zone: &ApexZone,
    contents: &ZoneContents,
    servers: &[NameServerAddress],
    resync: bool,
    ctx: &RefreshContext,
) -> RefreshOutcome {
    let name = zone.name();

    let udp_servers: Vec<NameServerAddress> = servers
        .iter()
        .map(|server| server.with_protocol(TransportProtocol::Udp))
        .collect();
    let mut request = DNSPacket::query(name, DNSResourceType::SOA);
    request.udp_payload_size = Some(ctx.options.udp_payload_size);

    let resolved = match ctx.client.resolve(&request, &udp_servers, &ctx.options).await {
        Ok(resolved) => resolved,
        Err(e) => return RefreshOutcome::Failed(format!("SOA query failed: {}", e)),
    };
    let received = match soa_from_response(name, &resolved.response) {
        Ok(record) => record,
        Err(reason) => {
            return RefreshOutcome::Failed(format!("{} (server {})", reason, resolved.server));
        }
    };

    if !resync {
        if let (Some(current), Some(received_soa)) = (contents.soa(), received.soa()) {
            if !current.is_zone_update_available(received_soa) {
                return RefreshOutcome::UpToDate {
                    server: resolved.server,
                };
            }
        }
    }

    // Ask the server that answered first, then the rest, over TCP
    let mut tcp_servers = vec![resolved.server.with_protocol(TransportProtocol::Tcp)];
    tcp_servers.extend(
        servers
            .iter()
            .filter(|server| server.addr != resolved.server.addr)
            .map(|server| server.with_protocol(TransportProtocol::Tcp)),
    );

    match zone.kind() {
        ZoneKind::Stub(_) => fetch_ns(name, received, &tcp_servers, ctx).await,
        ZoneKind::Secondary(_) => fetch_axfr(name, &tcp_servers, ctx).await,
        _ => RefreshOutcome::Failed(format!("{} zones are not refreshed", zone.zone_type())),
    }
}

async fn fetch_ns(
    name: &str,
    soa: DNSResource,
    servers: &[NameServerAddress],
    ctx: &RefreshContext,
) -> RefreshOutcome {
    let request = DNSPacket::query(name, DNSResourceType::NS);
    let resolved = match ctx.client.resolve(&request, servers, &ctx.options).await {
        Ok(resolved) => resolved,
        Err(e) => return RefreshOutcome::Failed(format!("NS query failed: {}", e)),
    };

    let response = &resolved.response;
    if response.rcode() != ResponseCode::NoError {
        return RefreshOutcome::Failed(format!(
            "NS query answered {:?} by {}",
            response.rcode(),
            resolved.server
        ));
    }

    let ns: Vec<ZoneRecord> = response
        .answers
        .iter()
        .filter(|record| record.rtype == DNSResourceType::NS && record.name() == name)
        .map(|record| {
            let mut zone_record = ZoneRecord::new(record.clone());
            if let Some(target) = record.rdata.target_name() {
                zone_record.info.glue = response
                    .resources
                    .iter()
                    .filter(|glue| {
                        matches!(glue.rtype, DNSResourceType::A | DNSResourceType::AAAA)
                            && glue.name() == target
                    })
                    .cloned()
                    .collect();
            }
            zone_record
        })
        .collect();

    if ns.is_empty() {
        return RefreshOutcome::Failed(format!("no NS records in answer from {}", resolved.server));
    }

    RefreshOutcome::Updated {
        transfer: Transfer::Referral { soa, ns },
        server: resolved.server,
    }
}

async fn fetch_axfr(name: &str, servers: &[NameServerAddress], ctx: &RefreshContext) -> RefreshOutcome {
    let request = DNSPacket::query(name, DNSResourceType::AXFR);
    let resolved = match ctx.client.resolve(&request, servers, &ctx.options).await {
        Ok(resolved) => resolved,
        Err(e) => return RefreshOutcome::Failed(format!("zone transfer failed: {}", e)),
    };

    let response = resolved.response;
    if response.rcode() != ResponseCode::NoError {
        return RefreshOutcome::Failed(format!(
            "zone transfer answered {:?} by {}",
            response.rcode(),
            resolved.server
        ));
    }

    let mut records = response.answers;
    match records.first() {
        Some(first) if first.rtype == DNSResourceType::SOA && first.name() == name => {}
        _ => {
            return RefreshOutcome::Failed(format!(
                "zone transfer from {} does not start with the zone SOA",
                resolved.server
            ));
        }
    }
    // AXFR closes with a second copy of the SOA
    if records.len() > 1 && records.last().map(|r| r.rtype) == Some(DNSResourceType::SOA) {
        records.pop();
    }

    RefreshOutcome::Updated {
        transfer: Transfer::Full { records },
        server: resolved.server,
    }
}

/// Extract the zone SOA from a response, or say why it is unusable
pub(crate) fn soa_from_response(name: &str, response: &DNSPacket) -> std::result::Result<DNSResource, String> {
    if response.rcode() != ResponseCode::NoError {
        return Err(format!("SOA query answered {:?}", response.rcode()));
    }

    let Some(answer) = response.answers.first() else {
        return Err("empty answer to SOA query".to_string());
    };
    if answer.rtype != DNSResourceType::SOA || answer.soa().is_none() {
        return Err(format!("answer is {:?}, not SOA", answer.rtype));
    }
    if answer.name() != name {
        return Err(format!("SOA owner {} does not match zone", answer.name()));
    }

    Ok(answer.clone())
}

/// Addresses to poll: the configured primaries, or else the SOA primary
/// name server and the apex NS targets. Host names are resolved on every
/// attempt, preferring glue held in the zone.
async fn primary_addresses(
    contents: &ZoneContents,
    sync: &SyncState,
    ctx: &RefreshContext,
) -> Vec<NameServerAddress> {
    let configured = sync.primary_name_servers();
    let candidates = if configured.is_empty() {
        let mut hosts: Vec<String> = Vec::new();
        if let Some(soa) = contents.soa() {
            hosts.push(soa.primary_name_server.clone());
        }
        for ns in contents.get_enabled(contents.apex(), DNSResourceType::NS) {
            if let Some(target) = ns.rdata().target_name() {
                if !hosts.iter().any(|host| host == target) {
                    hosts.push(target.to_string());
                }
            }
        }
        hosts
            .into_iter()
            .filter(|host| !host.is_empty())
            .map(|host| NameServerAddress {
                host: Some(host),
                addr: None,
                protocol: TransportProtocol::Udp,
            })
            .collect()
    } else {
        configured
    };

    resolve_addresses(&candidates, Some(contents), ctx.client.as_ref(), ctx.options.prefer_ipv6).await
}

/// Turn host-name entries into concrete addresses. Entries that fail to
/// resolve are dropped.
pub(crate) async fn resolve_addresses(
    candidates: &[NameServerAddress],
    contents: Option<&ZoneContents>,
    client: &dyn DnsClient,
    prefer_ipv6: bool,
) -> Vec<NameServerAddress> {
    let mut resolved = Vec::new();

    for candidate in candidates {
        if !candidate.is_unresolved() {
            resolved.push(candidate.clone());
            continue;
        }
        let Some(host) = candidate.host.as_deref() else {
            continue;
        };

        let glue = contents.map(|contents| glue_addresses(contents, host)).unwrap_or_default();
        if !glue.is_empty() {
            resolved.extend(glue.into_iter().map(|ip| candidate.resolved(ip)));
            continue;
        }

        match client.resolve_host(host, prefer_ipv6).await {
            Ok(ips) => resolved.extend(ips.into_iter().map(|ip| candidate.resolved(ip))),
            Err(e) => debug!("Failed to resolve name server {}: {}", host, e),
        }
    }

    resolved
}

/// Glue held in the zone for `host`: in-zone address records and the glue
/// attached to NS records
fn glue_addresses(contents: &ZoneContents, host: &str) -> Vec<IpAddr> {
    let mut addresses = Vec::new();

    for rtype in [DNSResourceType::A, DNSResourceType::AAAA] {
        for record in contents.get_enabled(host, rtype) {
            push_address(&mut addresses, &record.record.rdata);
        }
    }

    for ns in contents.get_enabled(contents.apex(), DNSResourceType::NS) {
        if ns.rdata().target_name() == Some(host) {
            for glue in &ns.info.glue {
                push_address(&mut addresses, &glue.rdata);
            }
        }
    }

    addresses
}

fn push_address(addresses: &mut Vec<IpAddr>, rdata: &DNSResourceData) {
    let ip = match rdata {
        DNSResourceData::A(ip) => IpAddr::V4(*ip),
        DNSResourceData::AAAA(ip) => IpAddr::V6(*ip),
        _ => return,
    };
    if !addresses.contains(&ip) {
        addresses.push(ip);
    }
}
