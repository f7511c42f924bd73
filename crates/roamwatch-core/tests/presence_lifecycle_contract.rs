//! Architectural Contract Test: Presence Lifecycle
//!
//! This test walks one device through connect, roam, disconnect and
//! reconnect and checks the registry, the history ledger and the emitted
//! events after each cycle.
//!
//! Constraints verified:
//! - MACs are normalized at registration
//! - First connection reports an unknown offline duration
//! - A roam closes the open entry and opens a new one at the same instant
//! - Offline duration is measured from the prior entry's disconnection
//! - A→B→A roaming produces contiguous, non-overlapping entries
//! - AP names fall back to the raw MAC when resolution fails
//!
//! If this test fails, someone has changed:
//! - The transition rules of the reconciliation engine
//! - The history ledger's open/close bookkeeping
//! - The offline duration calculation

mod common;

use chrono::Duration;
use common::*;
use roamwatch_core::{ClientObservation, DomainEvent, EventKind, OfflineDuration, WIRED_UPLINK_NAME};

const DEVICE: &str = "aa:bb:cc:dd:ee:ff";
const AP_A: &str = "11:22:33:44:55:66";
const AP_B: &str = "77:88:99:aa:bb:cc";

fn on_ap(ap: &str, signal: i32) -> ClientObservation {
    ClientObservation::wireless(mac(DEVICE), mac(ap), Some(signal))
}

#[tokio::test]
async fn connect_roam_disconnect_scenario() {
    let h = Harness::new(vec![]);
    h.gateway.name_ap(AP_B, "Office");

    let device = h
        .service
        .add_tracked_device("AA-BB-CC-DD-EE-FF", "Phone")
        .await
        .expect("registration succeeds");
    assert_eq!(device.mac.as_str(), DEVICE, "MAC should be normalized");
    assert!(!device.is_connected, "new devices start disconnected");

    // Cycle 1: first sighting on an AP with no resolvable name
    h.gateway.set_clients(vec![on_ap(AP_A, -52)]);
    let report = h.service.trigger_cycle().await.expect("cycle 1 succeeds");

    assert_eq!(report.events.len(), 1, "exactly one event on first sighting");
    match &report.events[0] {
        DomainEvent::Connected { ap_name, offline, signal, .. } => {
            assert_eq!(ap_name, AP_A, "unresolvable AP falls back to its MAC");
            assert_eq!(*offline, OfflineDuration::Unknown);
            assert_eq!(offline.formatted(), "n/a");
            assert_eq!(*signal, Some(-52));
        }
        other => panic!("expected Connected, got {:?}", other),
    }

    let devices = h.service.list_tracked_devices().await.unwrap();
    assert!(devices[0].is_connected);
    assert_eq!(devices[0].current_ap_mac().map(|m| m.as_str()), Some(AP_A));

    let history = h.service.get_device_history(device.id, None).await.unwrap();
    assert_eq!(history.len(), 1, "one history entry after first sighting");
    assert!(history[0].is_open(), "the entry should be open");

    // Cycle 2: roam to a named AP ten minutes later
    h.clock.advance(Duration::minutes(10));
    h.gateway.set_clients(vec![on_ap(AP_B, -61)]);
    let report = h.service.trigger_cycle().await.expect("cycle 2 succeeds");

    assert_eq!(report.events.len(), 1, "exactly one event on roam");
    match &report.events[0] {
        DomainEvent::Roamed { from_ap_name, ap_name, signal, .. } => {
            assert_eq!(from_ap_name.as_deref(), Some(AP_A));
            assert_eq!(ap_name, "Office");
            assert_eq!(*signal, Some(-61));
        }
        other => panic!("expected Roamed, got {:?}", other),
    }

    let history = h.service.get_device_history(device.id, None).await.unwrap();
    assert_eq!(history.len(), 2);
    assert!(history[0].is_open(), "newest entry is the open one");
    assert_eq!(history[0].ap_name, "Office");
    assert_eq!(history[1].duration_seconds, Some(600), "first entry lasted 10 minutes");
    assert_eq!(history[1].disconnected_at, Some(history[0].connected_at));

    // Cycle 3: gone
    h.clock.advance(Duration::minutes(10));
    h.gateway.set_clients(vec![]);
    let report = h.service.trigger_cycle().await.expect("cycle 3 succeeds");

    assert_eq!(report.events.len(), 1, "exactly one event on disconnect");
    assert_eq!(report.events[0].kind(), EventKind::Disconnected);
    assert_eq!(report.events[0].ap_name(), Some("Office"));

    let devices = h.service.list_tracked_devices().await.unwrap();
    assert!(!devices[0].is_connected);
    assert!(devices[0].current_ap_mac().is_none(), "AP cleared on disconnect");
    assert!(devices[0].last_seen_at.is_some(), "last sighting is kept");
    assert!(devices.iter().all(|d| d.connection_invariant_holds()));

    let history = h.service.get_device_history(device.id, None).await.unwrap();
    assert!(history.iter().all(|e| !e.is_open()), "no open entries while offline");
    assert_eq!(history[0].duration_seconds, Some(600));
}

#[tokio::test]
async fn reconnect_reports_time_since_last_disconnection() {
    let h = Harness::new(vec![]);
    h.gateway.name_ap(AP_A, "Living Room");
    let device = h.service.add_tracked_device(DEVICE, "Phone").await.unwrap();

    h.gateway.set_clients(vec![on_ap(AP_A, -50)]);
    h.service.trigger_cycle().await.unwrap();

    h.clock.advance(Duration::minutes(5));
    h.gateway.set_clients(vec![]);
    h.service.trigger_cycle().await.unwrap();

    h.clock.advance(Duration::seconds(4860));
    h.gateway.set_clients(vec![on_ap(AP_A, -48)]);
    let report = h.service.trigger_cycle().await.unwrap();

    let offline = report.events[0]
        .offline_duration()
        .expect("connected events carry an offline duration");
    assert_eq!(offline.seconds(), Some(4860));
    assert_eq!(offline.formatted(), "1h 21m");

    let history = h.service.get_device_history(device.id, None).await.unwrap();
    assert_eq!(history.len(), 2, "exactly one new entry per reconnection");
    let gap = history[0].connected_at - history[1].disconnected_at.unwrap();
    assert_eq!(gap.num_seconds(), offline.seconds().unwrap());
}

#[tokio::test]
async fn roam_round_trip_produces_contiguous_entries() {
    let h = Harness::new(vec![]);
    h.gateway.name_ap(AP_A, "Hall");
    h.gateway.name_ap(AP_B, "Office");
    let device = h.service.add_tracked_device(DEVICE, "Laptop").await.unwrap();

    for (ap, minutes) in [(Some(AP_A), 0), (Some(AP_B), 3), (Some(AP_A), 7), (None, 12)] {
        h.clock.advance(Duration::minutes(minutes));
        h.gateway.set_clients(ap.map(|ap| vec![on_ap(ap, -55)]).unwrap_or_default());
        h.service.trigger_cycle().await.unwrap();
    }

    let mut history = h.service.get_device_history(device.id, None).await.unwrap();
    history.reverse();

    let aps: Vec<&str> = history.iter().map(|e| e.ap_name.as_str()).collect();
    assert_eq!(aps, ["Hall", "Office", "Hall"]);
    assert!(history.iter().all(|e| !e.is_open()), "all three entries closed");

    for pair in history.windows(2) {
        assert_eq!(
            pair[0].disconnected_at,
            Some(pair[1].connected_at),
            "entries must be contiguous"
        );
    }

    let durations: Vec<Option<i64>> = history.iter().map(|e| e.duration_seconds).collect();
    assert_eq!(durations, [Some(180), Some(420), Some(720)]);
}

#[tokio::test]
async fn wired_port_change_counts_as_roam() {
    let h = Harness::new(vec![]);
    h.gateway.name_ap("00:11:22:33:44:01", "Core Switch");
    let device = h.service.add_tracked_device(DEVICE, "NAS").await.unwrap();

    let switch = mac("00:11:22:33:44:01");
    h.gateway
        .set_clients(vec![ClientObservation::wired(mac(DEVICE), Some(switch.clone()), Some(3))]);
    h.service.trigger_cycle().await.unwrap();

    h.clock.advance(Duration::minutes(1));
    h.gateway
        .set_clients(vec![ClientObservation::wired(mac(DEVICE), Some(switch), Some(7))]);
    let report = h.service.trigger_cycle().await.unwrap();

    assert_eq!(report.events.len(), 1);
    assert_eq!(report.events[0].kind(), EventKind::Roamed);
    assert_eq!(report.events[0].signal(), None, "wired clients have no signal");

    let history = h.service.get_device_history(device.id, None).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].uplink.port(), Some(7));
}

#[tokio::test]
async fn wired_client_on_the_gateway_stays_online() {
    let h = Harness::new(vec![]);
    let device = h.service.add_tracked_device(DEVICE, "Desktop").await.unwrap();

    let plugged_in = || vec![ClientObservation::wired(mac(DEVICE), None, None)];
    h.gateway.set_clients(plugged_in());
    let report = h.service.trigger_cycle().await.unwrap();
    assert_eq!(report.events.len(), 1);
    assert_eq!(report.events[0].kind(), EventKind::Connected);
    assert_eq!(report.events[0].ap_name(), Some(WIRED_UPLINK_NAME));

    h.clock.advance(Duration::minutes(1));
    h.gateway.set_clients(plugged_in());
    let report = h.service.trigger_cycle().await.unwrap();
    assert!(report.events.is_empty(), "no false disconnect for a switchless client");

    let devices = h.service.list_tracked_devices().await.unwrap();
    assert!(devices[0].is_connected);
    assert!(devices[0].is_wired());
    assert_eq!(devices[0].current_ap_name.as_deref(), Some(WIRED_UPLINK_NAME));
    assert!(devices.iter().all(|d| d.connection_invariant_holds()));

    let history = h.service.get_device_history(device.id, None).await.unwrap();
    assert_eq!(history.len(), 1);
    assert!(history[0].is_open());
}

#[tokio::test]
async fn events_follow_device_processing_order() {
    let h = Harness::new(vec![]);
    let first = h.service.add_tracked_device("02:00:00:00:00:01", "First").await.unwrap();
    let second = h.service.add_tracked_device("02:00:00:00:00:02", "Second").await.unwrap();

    h.gateway.set_clients(vec![
        ClientObservation::wireless(mac("02:00:00:00:00:02"), mac(AP_A), Some(-40)),
        ClientObservation::wireless(mac("02:00:00:00:00:01"), mac(AP_A), Some(-40)),
    ]);
    let report = h.service.trigger_cycle().await.unwrap();

    let ids: Vec<u64> = report.events.iter().map(|e| e.device().id).collect();
    assert_eq!(ids, [first.id, second.id], "events are ordered by device, not by observation");
}
