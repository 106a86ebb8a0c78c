mod common;

use authzone::dns::DNSPacket;
use authzone::dns::enums::{DNSResourceType, TransportProtocol};
use authzone::dns::resource::{DNSResource, DNSResourceData};
use authzone::zone::{
    JsonZoneStorage, Result as ZoneResult, ZoneContents, ZoneManager, ZoneSnapshot, ZoneStorage, ZoneType,
};
use common::{MockClient, PrimaryZone, advance, primary_address, test_config};
use parking_lot::Mutex;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, mpsc};
use std::time::Duration;
use tempfile::tempdir;

fn manager(client: &Arc<MockClient>, folder: &std::path::Path) -> ZoneManager {
    ZoneManager::new(test_config(folder)).with_client(client.clone())
}

fn serial_of(zm: &ZoneManager, zone: &str) -> Option<u32> {
    zm.get_zone_info(zone).and_then(|info| info.serial)
}

#[tokio::test(start_paused = true)]
async fn test_stub_first_refresh_transfers() {
    let dir = tempdir().unwrap();
    let client = MockClient::serving(PrimaryZone::new("example.com", 42));
    let zm = manager(&client, dir.path());

    let zone = zm
        .create_stub_zone("example.com", &[primary_address()])
        .await
        .unwrap()
        .unwrap();
    assert_eq!(zone.zone_type(), ZoneType::Stub);
    assert_eq!(serial_of(&zm, "example.com"), Some(0));
    assert!(zone.is_expired());
    assert!(zm.query(&DNSPacket::query("www.example.com", DNSResourceType::A), false).is_none());

    advance(Duration::from_secs(1)).await;

    assert_eq!(serial_of(&zm, "example.com"), Some(42));
    assert!(!zone.is_expired());
    assert_eq!(client.calls_over(DNSResourceType::SOA, TransportProtocol::Udp), 2);
    assert_eq!(client.calls_over(DNSResourceType::NS, TransportProtocol::Tcp), 1);

    let info = zm.get_zone_info("example.com").unwrap();
    assert!(!info.sync_failed);
    assert!(info.expiry.is_some());

    let referral = zm
        .query(&DNSPacket::query("www.example.com", DNSResourceType::A), true)
        .unwrap();
    assert!(!referral.header.aa);
    assert!(referral.answers.is_empty());
    assert_eq!(referral.authorities.len(), 1);
    assert_eq!(referral.authorities[0].rtype, DNSResourceType::NS);
    assert_eq!(referral.resources.len(), 1);
    assert_eq!(referral.resources[0].name(), "ns1.example.com");
}

#[tokio::test(start_paused = true)]
async fn test_unchanged_serial_skips_transfer() {
    let dir = tempdir().unwrap();
    let client = MockClient::serving(PrimaryZone::new("example.com", 10));
    let zm = manager(&client, dir.path());
    zm.create_stub_zone("example.com", &[primary_address()]).await.unwrap();
    advance(Duration::from_secs(1)).await;
    client.reset_calls();

    // Next scheduled refresh after SOA refresh (3600s)
    advance(Duration::from_secs(3600)).await;
    assert_eq!(client.calls(DNSResourceType::SOA), 1);
    assert_eq!(client.calls(DNSResourceType::NS), 0);

    // An older serial is not an update either
    client.update(|zone| zone.serial = 9);
    advance(Duration::from_secs(3600)).await;
    assert_eq!(client.calls(DNSResourceType::NS), 0);
    assert_eq!(serial_of(&zm, "example.com"), Some(10));
}

#[tokio::test(start_paused = true)]
async fn test_serial_wraparound_is_an_update() {
    let dir = tempdir().unwrap();
    let client = MockClient::serving(PrimaryZone::new("example.com", u32::MAX));
    let zm = manager(&client, dir.path());
    zm.create_stub_zone("example.com", &[primary_address()]).await.unwrap();
    advance(Duration::from_secs(1)).await;
    assert_eq!(serial_of(&zm, "example.com"), Some(u32::MAX));

    client.update(|zone| {
        zone.serial = 5;
        zone.name_servers = vec!["ns2.example.com".to_string()];
    });
    client.reset_calls();
    assert!(zm.refresh_zone("example.com").unwrap());
    advance(Duration::from_secs(6)).await;

    assert_eq!(client.calls(DNSResourceType::NS), 1);
    assert_eq!(serial_of(&zm, "example.com"), Some(5));
    let ns = zm.get_records("example.com", "example.com", DNSResourceType::NS).unwrap();
    assert_eq!(ns.len(), 1);
    assert_eq!(ns[0].rdata().target_name(), Some("ns2.example.com"));
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_triggers_run_one_refresh() {
    let dir = tempdir().unwrap();
    let client = MockClient::serving(PrimaryZone::new("example.com", 1));
    let zm = Arc::new(manager(&client, dir.path()));
    zm.create_stub_zone("example.com", &[primary_address()]).await.unwrap();
    advance(Duration::from_secs(1)).await;
    client.reset_calls();

    let handles: Vec<_> = (0..10)
        .map(|_| {
            let zm = zm.clone();
            tokio::spawn(async move { zm.refresh_zone("example.com").unwrap() })
        })
        .collect();
    let accepted = futures::future::join_all(handles)
        .await
        .into_iter()
        .filter(|result| *result.as_ref().unwrap())
        .count();
    assert_eq!(accepted, 1);

    advance(Duration::from_secs(6)).await;
    assert_eq!(client.calls(DNSResourceType::SOA), 1);

    // The guard is released once the refresh finished
    assert!(zm.refresh_zone("example.com").unwrap());
}

#[tokio::test(start_paused = true)]
async fn test_failure_sets_flag_and_retries() {
    let dir = tempdir().unwrap();
    let client = MockClient::serving(PrimaryZone::new("example.com", 1));
    let zm = manager(&client, dir.path());
    zm.create_stub_zone("example.com", &[primary_address()]).await.unwrap();
    advance(Duration::from_secs(1)).await;

    client.set_failing(true);
    client.reset_calls();
    zm.refresh_zone("example.com").unwrap();
    advance(Duration::from_secs(6)).await;

    assert!(zm.get_zone_info("example.com").unwrap().sync_failed);
    assert_eq!(client.calls(DNSResourceType::SOA), 1);

    // Retry interval is the SOA retry (300s)
    advance(Duration::from_secs(300)).await;
    assert_eq!(client.calls(DNSResourceType::SOA), 2);

    client.set_failing(false);
    advance(Duration::from_secs(300)).await;
    let info = zm.get_zone_info("example.com").unwrap();
    assert!(!info.sync_failed);
    assert!(info.is_active());
}

#[tokio::test(start_paused = true)]
async fn test_disabled_zone_stops_refreshing() {
    let dir = tempdir().unwrap();
    let client = MockClient::serving(PrimaryZone::new("example.com", 1));
    let zm = manager(&client, dir.path());
    zm.create_stub_zone("example.com", &[primary_address()]).await.unwrap();
    advance(Duration::from_secs(1)).await;
    client.reset_calls();

    zm.set_zone_disabled("example.com", true).unwrap();
    assert!(!zm.refresh_zone("example.com").unwrap());
    advance(Duration::from_secs(4 * 3600)).await;
    assert_eq!(client.total_calls(), 0);
    assert!(zm.query(&DNSPacket::query("example.com", DNSResourceType::SOA), false).is_none());

    zm.set_zone_disabled("example.com", false).unwrap();
    advance(Duration::from_secs(6)).await;
    assert_eq!(client.calls(DNSResourceType::SOA), 1);
}

#[tokio::test(start_paused = true)]
async fn test_disable_during_refresh_discards_result() {
    let dir = tempdir().unwrap();
    let client = MockClient::serving(PrimaryZone::new("example.com", 1));
    let zm = manager(&client, dir.path());
    zm.create_stub_zone("example.com", &[primary_address()]).await.unwrap();
    advance(Duration::from_secs(1)).await;

    client.update(|zone| zone.serial = 2);
    client.set_delay(Some(Duration::from_secs(10)));
    zm.refresh_zone("example.com").unwrap();
    advance(Duration::from_secs(7)).await;

    zm.set_zone_disabled("example.com", true).unwrap();
    advance(Duration::from_secs(60)).await;
    assert_eq!(serial_of(&zm, "example.com"), Some(1));

    client.reset_calls();
    advance(Duration::from_secs(4 * 3600)).await;
    assert_eq!(client.total_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_deleted_zone_never_refreshes_again() {
    let dir = tempdir().unwrap();
    let client = MockClient::serving(PrimaryZone::new("example.com", 1));
    let storage = Arc::new(JsonZoneStorage::new(dir.path().join("zones")));
    let zm = manager(&client, dir.path()).with_storage(storage.clone());
    zm.create_stub_zone("example.com", &[primary_address()]).await.unwrap();
    advance(Duration::from_secs(1)).await;

    // Refresh in flight while the zone is deleted
    client.update(|zone| zone.serial = 2);
    client.set_delay(Some(Duration::from_secs(10)));
    zm.refresh_zone("example.com").unwrap();
    advance(Duration::from_secs(7)).await;

    assert!(zm.delete_zone("example.com"));
    zm.delete_zone_file("example.com").unwrap();
    client.set_delay(None);
    client.reset_calls();

    advance(Duration::from_secs(4 * 3600)).await;
    assert_eq!(client.total_calls(), 0);
    assert!(zm.get_zone("example.com").is_none());
    assert!(storage.load_all().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_resync_forces_transfer() {
    let dir = tempdir().unwrap();
    let client = MockClient::serving(PrimaryZone::new("example.com", 7));
    let zm = manager(&client, dir.path());
    zm.create_stub_zone("example.com", &[primary_address()]).await.unwrap();
    advance(Duration::from_secs(1)).await;
    client.reset_calls();

    assert!(zm.resync_zone("example.com").unwrap());
    advance(Duration::from_secs(1)).await;
    assert_eq!(client.calls(DNSResourceType::NS), 1);
    assert_eq!(serial_of(&zm, "example.com"), Some(7));
}

#[tokio::test(start_paused = true)]
async fn test_secondary_transfers_whole_zone() {
    let dir = tempdir().unwrap();
    let mut primary = PrimaryZone::new("example.com", 100);
    primary.records.push(DNSResource::new(
        "www.example.com",
        300,
        DNSResourceData::A(Ipv4Addr::new(192, 0, 2, 80)),
    ));
    let client = MockClient::serving(primary);
    let zm = manager(&client, dir.path());

    zm.create_secondary_zone("example.com", &[primary_address()])
        .await
        .unwrap()
        .unwrap();
    advance(Duration::from_secs(1)).await;
    assert_eq!(client.calls_over(DNSResourceType::AXFR, TransportProtocol::Tcp), 1);

    let response = zm
        .query(&DNSPacket::query("www.example.com", DNSResourceType::A), false)
        .unwrap();
    assert!(response.header.aa);
    assert_eq!(response.answers.len(), 1);

    client.update(|zone| {
        zone.serial = 101;
        zone.records.push(DNSResource::new(
            "mail.example.com",
            300,
            DNSResourceData::A(Ipv4Addr::new(192, 0, 2, 25)),
        ));
    });
    zm.refresh_zone("example.com").unwrap();
    advance(Duration::from_secs(6)).await;

    assert_eq!(serial_of(&zm, "example.com"), Some(101));
    let response = zm
        .query(&DNSPacket::query("mail.example.com", DNSResourceType::A), false)
        .unwrap();
    assert_eq!(response.answers.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_secondary_rejects_transfer_without_soa() {
    let dir = tempdir().unwrap();
    let mut primary = PrimaryZone::new("example.com", 3);
    primary.broken_transfer = true;
    let client = MockClient::serving(primary);
    let zm = manager(&client, dir.path());

    zm.create_secondary_zone("example.com", &[primary_address()]).await.unwrap();
    advance(Duration::from_secs(1)).await;

    let info = zm.get_zone_info("example.com").unwrap();
    assert!(info.sync_failed);
    assert!(info.is_expired);
    assert_eq!(info.serial, Some(0));
}

#[tokio::test(start_paused = true)]
async fn test_create_fails_without_soa() {
    let dir = tempdir().unwrap();
    let client = MockClient::serving(PrimaryZone::new("example.com", 1));
    let zm = manager(&client, dir.path());

    assert!(zm.create_stub_zone("example.org", &[primary_address()]).await.is_err());
    assert!(zm.get_zone("example.org").is_none());

    // No primaries: the SOA comes through the server's own resolver
    assert!(zm.create_stub_zone("example.com", &[]).await.unwrap().is_some());
}

#[tokio::test(start_paused = true)]
async fn test_reenable_rearms_pending_refresh() {
    let dir = tempdir().unwrap();
    let client = MockClient::serving(PrimaryZone::new("example.com", 1));
    let zm = manager(&client, dir.path());
    let zone = zm
        .create_stub_zone("example.com", &[primary_address()])
        .await
        .unwrap()
        .unwrap();
    advance(Duration::from_secs(1)).await;
    client.update(|zone| zone.serial = 2);
    client.reset_calls();

    // Pending trigger from refresh_zone, then a pending one from re-enabling
    assert!(zm.refresh_zone("example.com").unwrap());
    zm.set_zone_disabled("example.com", true).unwrap();
    zm.set_zone_disabled("example.com", false).unwrap();
    zm.set_zone_disabled("example.com", true).unwrap();
    zm.set_zone_disabled("example.com", false).unwrap();
    assert!(zone.sync_state().unwrap().timer().is_armed());

    advance(Duration::from_secs(6)).await;
    assert_eq!(client.calls(DNSResourceType::SOA), 1);
    assert_eq!(serial_of(&zm, "example.com"), Some(2));
    assert!(zm.refresh_zone("example.com").unwrap());
}

fn serial_and_ns(contents: &ZoneContents) -> (u32, Vec<String>) {
    let serial = contents.soa().map(|soa| soa.serial.0).unwrap_or(0);
    let mut ns: Vec<String> = contents
        .get_enabled(contents.apex(), DNSResourceType::NS)
        .iter()
        .filter_map(|record| record.rdata().target_name().map(str::to_string))
        .collect();
    ns.sort();
    (serial, ns)
}

#[tokio::test(start_paused = true)]
async fn test_stub_refresh_swaps_soa_and_ns_together() {
    let dir = tempdir().unwrap();
    let client = MockClient::serving(PrimaryZone::new("example.com", 1));
    let zm = manager(&client, dir.path());
    let zone = zm
        .create_stub_zone("example.com", &[primary_address()])
        .await
        .unwrap()
        .unwrap();
    advance(Duration::from_secs(1)).await;

    let old = (1, vec!["ns1.example.com".to_string()]);
    let new = (2, vec!["ns2.example.com".to_string(), "ns3.example.com".to_string()]);
    let held = zone.contents();
    assert_eq!(serial_and_ns(&held), old);

    client.update(|zone| {
        zone.serial = 2;
        zone.name_servers = vec!["ns2.example.com".to_string(), "ns3.example.com".to_string()];
    });
    client.set_delay(Some(Duration::from_secs(10)));

    let sampler = {
        let zone = zone.clone();
        tokio::spawn(async move {
            let mut seen = Vec::new();
            for _ in 0..60 {
                seen.push(serial_and_ns(&zone.contents()));
                tokio::time::sleep(Duration::from_millis(500)).await;
            }
            seen
        })
    };
    assert!(zm.refresh_zone("example.com").unwrap());
    advance(Duration::from_secs(31)).await;

    let seen = sampler.await.unwrap();
    assert!(seen.iter().all(|state| *state == old || *state == new), "{:?}", seen);
    assert_eq!(seen.first(), Some(&old));
    assert_eq!(seen.last(), Some(&new));

    // A snapshot taken before the refresh is unaffected by it
    assert_eq!(serial_and_ns(&held), old);
    assert_eq!(serial_and_ns(&zone.contents()), new);
}

/// Storage whose next save blocks until released, once armed
struct GatedStorage {
    inner: JsonZoneStorage,
    armed: AtomicBool,
    entered: Mutex<Option<mpsc::Sender<()>>>,
    release: Mutex<mpsc::Receiver<()>>,
}

impl ZoneStorage for GatedStorage {
    fn save(&self, snapshot: &ZoneSnapshot) -> ZoneResult<()> {
        if self.armed.swap(false, Ordering::SeqCst) {
            if let Some(entered) = self.entered.lock().take() {
                let _ = entered.send(());
            }
            let _ = self.release.lock().recv();
        }
        self.inner.save(snapshot)
    }

    fn delete(&self, name: &str) -> ZoneResult<()> {
        self.inner.delete(name)
    }

    fn load_all(&self) -> ZoneResult<Vec<ZoneSnapshot>> {
        self.inner.load_all()
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_delete_during_commit_leaves_reads_free() {
    let dir = tempdir().unwrap();
    let client = MockClient::serving(PrimaryZone::new("example.com", 1));
    let (entered_tx, entered_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel();
    let storage = Arc::new(GatedStorage {
        inner: JsonZoneStorage::new(dir.path().join("zones")),
        armed: AtomicBool::new(false),
        entered: Mutex::new(Some(entered_tx)),
        release: Mutex::new(release_rx),
    });
    let zm = Arc::new(manager(&client, dir.path()).with_storage(storage.clone()));

    client.set_delay(Some(Duration::from_millis(100)));
    zm.create_stub_zone("example.com", &[primary_address()]).await.unwrap();
    storage.armed.store(true, Ordering::SeqCst);

    // The first refresh commits and stalls in save
    tokio::task::spawn_blocking(move || entered_rx.recv_timeout(Duration::from_secs(10)))
        .await
        .unwrap()
        .unwrap();

    let deleter = {
        let zm = zm.clone();
        std::thread::spawn(move || zm.delete_zone("example.com"))
    };

    let reader = {
        let zm = zm.clone();
        tokio::task::spawn_blocking(move || {
            while zm.total_zones() != 0 {
                std::thread::sleep(Duration::from_millis(10));
            }
            zm.query(&DNSPacket::query("example.com", DNSResourceType::SOA), false)
        })
    };
    let answer = tokio::time::timeout(Duration::from_secs(10), reader)
        .await
        .expect("reads blocked behind a zone delete")
        .unwrap();
    assert!(answer.is_none());

    release_tx.send(()).unwrap();
    assert!(deleter.join().unwrap());
}
