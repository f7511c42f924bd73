// # Cycle Planning
//
// The pure part of a reconciliation cycle: given the registry snapshot,
// the controller's observations and resolved AP names, decide every
// device transition and the events they produce. No I/O happens here,
// so the whole state machine is unit-testable.
//
// ## Per-device transitions
//
// | before       | observed                  | effect                               | event        |
// |--------------|---------------------------|--------------------------------------|--------------|
// | disconnected | yes                       | open entry                           | Connected    |
// | connected    | yes, same attachment      | refresh lastSeenAt/signal/ip         | -            |
// | connected    | yes, different attachment | close + open entry at the same time  | Roamed       |
// | connected    | no                        | close entry, clear uplink            | Disconnected |
// | disconnected | no                        | -                                    | -            |

use chrono::{DateTime, Utc};
use std::collections::HashMap;

use crate::ledger::NewHistoryEntry;
use crate::mac::MacAddress;
use crate::model::{
    ClientObservation, DomainEvent, OfflineDuration, TrackedDevice, Uplink, WIRED_UPLINK_NAME,
};
use crate::traits::device_store::{ConnectionFields, CycleBatch, DeviceTransition, RegistrySnapshot};

/// Planned outcome of one cycle, before commit
#[derive(Debug, Clone, Default)]
pub struct CyclePlan {
    pub batch: CycleBatch,
    /// In device-processing order
    pub events: Vec<DomainEvent>,
}

/// Index observations by client MAC. The first record for a MAC wins.
pub fn index_observations(
    observations: Vec<ClientObservation>,
) -> HashMap<MacAddress, ClientObservation> {
    let mut by_mac = HashMap::with_capacity(observations.len());
    for obs in observations {
        if by_mac.contains_key(&obs.mac) {
            tracing::debug!("Duplicate observation for {}, keeping the first", obs.mac);
            continue;
        }
        by_mac.insert(obs.mac.clone(), obs);
    }
    by_mac
}

/// True if applying `obs` to `device` opens a history entry, which needs
/// a resolved AP name.
pub fn opens_entry(device: &TrackedDevice, obs: &ClientObservation) -> bool {
    match (&device.current_uplink, device.is_connected) {
        (Some(current), true) => !current.same_attachment(&obs.uplink),
        _ => true,
    }
}

/// Uplink MACs whose names this cycle needs
pub fn uplinks_to_resolve(
    snapshot: &RegistrySnapshot,
    observed: &HashMap<MacAddress, ClientObservation>,
) -> Vec<MacAddress> {
    let mut macs: Vec<MacAddress> = snapshot
        .devices
        .iter()
        .filter_map(|d| observed.get(&d.mac).filter(|obs| opens_entry(d, obs)))
        .filter_map(|obs| obs.uplink.mac().cloned())
        .collect();
    macs.sort();
    macs.dedup();
    macs
}

/// Decide every transition of one cycle
///
/// `ap_names` should cover [`uplinks_to_resolve`]; a missing name falls
/// back to the raw MAC.
pub fn plan_cycle(
    snapshot: &RegistrySnapshot,
    observed: &HashMap<MacAddress, ClientObservation>,
    ap_names: &HashMap<MacAddress, String>,
    now: DateTime<Utc>,
) -> CyclePlan {
    let mut plan = CyclePlan {
        batch: CycleBatch {
            cycle_at: Some(now),
            transitions: Vec::with_capacity(snapshot.devices.len()),
        },
        events: Vec::new(),
    };

    for device in &snapshot.devices {
        let (transition, event) = match observed.get(&device.mac) {
            Some(obs) => plan_online(device, obs, snapshot, ap_names, now),
            None => plan_offline(device, now),
        };

        if let Some(transition) = transition {
            plan.batch.transitions.push(transition);
        }
        if let Some(event) = event {
            plan.events.push(event);
        }
    }

    plan
}

fn name_for(ap_names: &HashMap<MacAddress, String>, uplink: &Uplink) -> String {
    match uplink.mac() {
        Some(mac) => ap_names.get(mac).cloned().unwrap_or_else(|| mac.to_string()),
        None => WIRED_UPLINK_NAME.to_string(),
    }
}

fn plan_online(
    device: &TrackedDevice,
    obs: &ClientObservation,
    snapshot: &RegistrySnapshot,
    ap_names: &HashMap<MacAddress, String>,
    now: DateTime<Utc>,
) -> (Option<DeviceTransition>, Option<DomainEvent>) {
    let was_connected = device.is_connected && device.current_uplink.is_some();

    if was_connected && !opens_entry(device, obs) {
        // Same attachment: refresh only
        let connection = ConnectionFields {
            is_connected: true,
            current_uplink: Some(obs.uplink.clone()),
            current_ap_name: device.current_ap_name.clone(),
            current_ip: obs.ip.clone().or_else(|| device.current_ip.clone()),
            current_signal: obs.signal,
            last_seen_at: Some(now),
        };
        let transition = DeviceTransition {
            device_id: device.id,
            connection,
            close_open_at: None,
            open: None,
        };
        return (Some(transition), None);
    }

    let ap_name = name_for(ap_names, &obs.uplink);
    let connection = ConnectionFields {
        is_connected: true,
        current_uplink: Some(obs.uplink.clone()),
        current_ap_name: Some(ap_name.clone()),
        current_ip: obs.ip.clone().or_else(|| device.current_ip.clone()),
        current_signal: obs.signal,
        last_seen_at: Some(now),
    };
    let transition = DeviceTransition {
        device_id: device.id,
        connection,
        close_open_at: None,
        // Opening closes the previous entry at `now`, keeping roams contiguous
        open: Some(NewHistoryEntry {
            uplink: obs.uplink.clone(),
            ap_name: ap_name.clone(),
            connected_at: now,
            signal_strength: obs.signal,
        }),
    };

    let event = if was_connected {
        DomainEvent::Roamed {
            device: device.to_ref(),
            from_ap_name: device.current_ap_name.clone(),
            uplink: obs.uplink.clone(),
            ap_name,
            signal: obs.signal,
            at: now,
        }
    } else {
        let offline = snapshot
            .last_disconnected
            .get(&device.id)
            .map_or(OfflineDuration::Unknown, |prior| {
                OfflineDuration::Known(now.signed_duration_since(*prior))
            });
        DomainEvent::Connected {
            device: device.to_ref(),
            uplink: obs.uplink.clone(),
            ap_name,
            signal: obs.signal,
            offline,
            at: now,
        }
    };

    (Some(transition), Some(event))
}

fn plan_offline(
    device: &TrackedDevice,
    now: DateTime<Utc>,
) -> (Option<DeviceTransition>, Option<DomainEvent>) {
    if !device.is_connected {
        return (None, None);
    }

    let connection = ConnectionFields {
        is_connected: false,
        current_uplink: None,
        current_ap_name: None,
        current_ip: device.current_ip.clone(),
        current_signal: None,
        last_seen_at: device.last_seen_at,
    };
    let transition = DeviceTransition {
        device_id: device.id,
        connection,
        close_open_at: Some(now),
        open: None,
    };
    let event = DomainEvent::Disconnected {
        device: device.to_ref(),
        last_ap_name: device.current_ap_name.clone(),
        at: now,
    };

    (Some(transition), Some(event))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::EventKind;
    use chrono::TimeZone;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn mac(s: &str) -> MacAddress {
        MacAddress::parse(s).unwrap()
    }

    fn device(id: u64, m: &str) -> TrackedDevice {
        TrackedDevice::new(id, mac(m), format!("dev{}", id), ts(0))
    }

    fn connected_to(mut d: TrackedDevice, ap: &str) -> TrackedDevice {
        d.is_connected = true;
        d.current_uplink = Some(Uplink::Wireless { ap_mac: mac(ap), ssid: None, band: None });
        d.current_ap_name = Some("Old AP".into());
        d.last_seen_at = Some(ts(0));
        d
    }

    fn snapshot(devices: Vec<TrackedDevice>) -> RegistrySnapshot {
        RegistrySnapshot { devices, last_disconnected: HashMap::new() }
    }

    #[test]
    fn first_sighting_connects_with_unknown_offline() {
        let snap = snapshot(vec![device(1, "aa:bb:cc:dd:ee:ff")]);
        let observed = index_observations(vec![ClientObservation::wireless(
            mac("aa:bb:cc:dd:ee:ff"),
            mac("11:22:33:44:55:66"),
            Some(-60),
        )]);
        let names = HashMap::from([(mac("11:22:33:44:55:66"), "Hall".to_string())]);

        let plan = plan_cycle(&snap, &observed, &names, ts(60));
        assert_eq!(plan.events.len(), 1);
        match &plan.events[0] {
            DomainEvent::Connected { ap_name, offline, .. } => {
                assert_eq!(ap_name, "Hall");
                assert_eq!(*offline, OfflineDuration::Unknown);
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert!(plan.batch.transitions[0].open.is_some());
    }

    #[test]
    fn offline_duration_measured_from_prior_disconnect() {
        let mut snap = snapshot(vec![device(1, "aa:bb:cc:dd:ee:ff")]);
        snap.last_disconnected.insert(1, ts(100));
        let observed = index_observations(vec![ClientObservation::wireless(
            mac("aa:bb:cc:dd:ee:ff"),
            mac("11:22:33:44:55:66"),
            None,
        )]);

        let plan = plan_cycle(&snap, &observed, &HashMap::new(), ts(100 + 4860));
        assert_eq!(plan.events[0].offline_duration().and_then(|o| o.seconds()), Some(4860));
        // Unresolved name falls back to the MAC
        assert_eq!(plan.events[0].ap_name(), Some("11:22:33:44:55:66"));
    }

    #[test]
    fn same_ap_refreshes_without_event() {
        let d = connected_to(device(1, "aa:bb:cc:dd:ee:ff"), "11:22:33:44:55:66");
        let snap = snapshot(vec![d]);
        let observed = index_observations(vec![ClientObservation::wireless(
            mac("aa:bb:cc:dd:ee:ff"),
            mac("11:22:33:44:55:66"),
            Some(-40),
        )
        .with_ssid(Some("home".into()), Some("na".into()))]);

        assert!(uplinks_to_resolve(&snap, &observed).is_empty());
        let plan = plan_cycle(&snap, &observed, &HashMap::new(), ts(60));
        assert!(plan.events.is_empty());
        let t = &plan.batch.transitions[0];
        assert!(t.open.is_none() && t.close_open_at.is_none());
        assert_eq!(t.connection.last_seen_at, Some(ts(60)));
        assert_eq!(t.connection.current_signal, Some(-40));
        assert_eq!(t.connection.current_ap_name.as_deref(), Some("Old AP"));
    }

    #[test]
    fn ap_change_is_a_roam() {
        let d = connected_to(device(1, "aa:bb:cc:dd:ee:ff"), "11:22:33:44:55:66");
        let snap = snapshot(vec![d]);
        let observed = index_observations(vec![ClientObservation::wireless(
            mac("aa:bb:cc:dd:ee:ff"),
            mac("77:88:99:aa:bb:cc"),
            Some(-70),
        )]);
        assert_eq!(uplinks_to_resolve(&snap, &observed), vec![mac("77:88:99:aa:bb:cc")]);

        let plan = plan_cycle(&snap, &observed, &HashMap::new(), ts(60));
        assert_eq!(plan.events[0].kind(), EventKind::Roamed);
        if let DomainEvent::Roamed { from_ap_name, .. } = &plan.events[0] {
            assert_eq!(from_ap_name.as_deref(), Some("Old AP"));
        }
    }

    #[test]
    fn wired_port_change_is_a_roam() {
        let mut d = device(1, "aa:bb:cc:dd:ee:ff");
        d.is_connected = true;
        d.current_uplink = Some(Uplink::Wired { switch_mac: Some(mac("00:11:22:33:44:55")), port: Some(3) });
        let snap = snapshot(vec![d]);
        let observed = index_observations(vec![ClientObservation::wired(
            mac("aa:bb:cc:dd:ee:ff"),
            Some(mac("00:11:22:33:44:55")),
            Some(7),
        )]);

        let plan = plan_cycle(&snap, &observed, &HashMap::new(), ts(60));
        assert_eq!(plan.events[0].kind(), EventKind::Roamed);
        assert_eq!(plan.events[0].signal(), None);
    }

    #[test]
    fn wired_client_without_switch_stays_connected() {
        let d = device(1, "aa:bb:cc:dd:ee:ff");
        let snap = snapshot(vec![d]);
        let observed =
            index_observations(vec![ClientObservation::wired(mac("aa:bb:cc:dd:ee:ff"), None, None)]);

        assert!(uplinks_to_resolve(&snap, &observed).is_empty());
        let plan = plan_cycle(&snap, &observed, &HashMap::new(), ts(0));
        assert_eq!(plan.events.len(), 1);
        assert_eq!(plan.events[0].kind(), EventKind::Connected);
        assert_eq!(plan.events[0].ap_name(), Some(WIRED_UPLINK_NAME));

        let mut connected = snap.devices[0].clone();
        connected.is_connected = true;
        connected.current_uplink = Some(Uplink::Wired { switch_mac: None, port: None });
        connected.current_ap_name = Some(WIRED_UPLINK_NAME.to_string());
        let plan = plan_cycle(&snapshot(vec![connected]), &observed, &HashMap::new(), ts(60));
        assert!(plan.events.is_empty(), "still plugged in, nothing to report");
        assert!(plan.batch.transitions[0].connection.is_connected);
    }

    #[test]
    fn missing_connected_device_disconnects_once() {
        let d = connected_to(device(1, "aa:bb:cc:dd:ee:ff"), "11:22:33:44:55:66");
        let idle = device(2, "aa:bb:cc:dd:ee:01");
        let snap = snapshot(vec![d, idle]);

        let plan = plan_cycle(&snap, &HashMap::new(), &HashMap::new(), ts(60));
        assert_eq!(plan.events.len(), 1);
        assert_eq!(plan.events[0].kind(), EventKind::Disconnected);
        assert_eq!(plan.batch.transitions.len(), 1);
        let t = &plan.batch.transitions[0];
        assert_eq!(t.close_open_at, Some(ts(60)));
        assert!(!t.connection.is_connected);
        assert!(t.connection.current_uplink.is_none());
    }

    #[test]
    fn events_follow_device_order() {
        let snap = snapshot(vec![
            device(1, "aa:bb:cc:dd:ee:01"),
            connected_to(device(2, "aa:bb:cc:dd:ee:02"), "11:22:33:44:55:66"),
            device(3, "aa:bb:cc:dd:ee:03"),
        ]);
        let observed = index_observations(vec![
            ClientObservation::wireless(mac("aa:bb:cc:dd:ee:03"), mac("11:22:33:44:55:66"), None),
            ClientObservation::wireless(mac("aa:bb:cc:dd:ee:01"), mac("11:22:33:44:55:66"), None),
        ]);

        let plan = plan_cycle(&snap, &observed, &HashMap::new(), ts(60));
        let ids: Vec<_> = plan.events.iter().map(|e| e.device().id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }
}
