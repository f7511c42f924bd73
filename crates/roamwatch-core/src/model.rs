//! Domain model for the tracker
//!
//! - [`TrackedDevice`]: a user-registered device and its last-known connection
//! - [`ConnectionHistoryEntry`]: one continuous association with one uplink
//! - [`ClientObservation`]: a transient, already-validated controller record
//! - [`DomainEvent`]: a state transition produced by a reconciliation cycle

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::mac::MacAddress;

/// Registry-assigned device identifier
pub type DeviceId = u64;

/// Ledger-assigned history entry identifier
pub type EntryId = u64;

/// Display name for a wired uplink with no known switch
pub const WIRED_UPLINK_NAME: &str = "Wired";

/// Where a client is attached to the network
///
/// For wired clients the "access point" is the upstream switch; a change of
/// switch or switch port counts as a roam. A client plugged straight into
/// the gateway has no switch and is reported under [`WIRED_UPLINK_NAME`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Uplink {
    Wireless {
        ap_mac: MacAddress,
        #[serde(default)]
        ssid: Option<String>,
        #[serde(default)]
        band: Option<String>,
    },
    Wired {
        #[serde(default)]
        switch_mac: Option<MacAddress>,
        #[serde(default)]
        port: Option<u32>,
    },
}

impl Uplink {
    /// MAC of the AP (wireless) or switch (wired), if the controller named one
    pub fn mac(&self) -> Option<&MacAddress> {
        match self {
            Uplink::Wireless { ap_mac, .. } => Some(ap_mac),
            Uplink::Wired { switch_mac, .. } => switch_mac.as_ref(),
        }
    }

    pub fn is_wired(&self) -> bool {
        matches!(self, Uplink::Wired { .. })
    }

    pub fn port(&self) -> Option<u32> {
        match self {
            Uplink::Wired { port, .. } => *port,
            Uplink::Wireless { .. } => None,
        }
    }

    pub fn ssid(&self) -> Option<&str> {
        match self {
            Uplink::Wireless { ssid, .. } => ssid.as_deref(),
            Uplink::Wired { .. } => None,
        }
    }

    /// Same physical attachment point.
    ///
    /// SSID and band are not part of the identity: a client moving between
    /// bands of one AP has not roamed.
    pub fn same_attachment(&self, other: &Uplink) -> bool {
        self.is_wired() == other.is_wired()
            && self.mac() == other.mac()
            && self.port() == other.port()
    }
}

/// A device the user asked to track
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedDevice {
    pub id: DeviceId,
    pub mac: MacAddress,
    pub name: String,
    pub added_at: DateTime<Utc>,
    pub is_connected: bool,
    /// Set whenever `is_connected` is true
    #[serde(default)]
    pub current_uplink: Option<Uplink>,
    #[serde(default)]
    pub current_ap_name: Option<String>,
    #[serde(default)]
    pub current_ip: Option<String>,
    #[serde(default)]
    pub current_signal: Option<i32>,
    #[serde(default)]
    pub last_seen_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_blocked: bool,
}

impl TrackedDevice {
    pub(crate) fn new(id: DeviceId, mac: MacAddress, name: String, added_at: DateTime<Utc>) -> Self {
        Self {
            id,
            mac,
            name,
            added_at,
            is_connected: false,
            current_uplink: None,
            current_ap_name: None,
            current_ip: None,
            current_signal: None,
            last_seen_at: None,
            is_blocked: false,
        }
    }

    pub fn current_ap_mac(&self) -> Option<&MacAddress> {
        self.current_uplink.as_ref().and_then(Uplink::mac)
    }

    pub fn is_wired(&self) -> bool {
        self.current_uplink.as_ref().is_some_and(Uplink::is_wired)
    }

    /// Reference used in events and notifications
    pub fn to_ref(&self) -> DeviceRef {
        DeviceRef {
            id: self.id,
            name: self.name.clone(),
            mac: self.mac.clone(),
        }
    }

    /// `is_connected` implies a known uplink
    pub fn connection_invariant_holds(&self) -> bool {
        !self.is_connected || self.current_uplink.is_some()
    }
}

/// One continuous association between a device and one uplink
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionHistoryEntry {
    pub id: EntryId,
    pub device_id: DeviceId,
    pub uplink: Uplink,
    pub ap_name: String,
    pub connected_at: DateTime<Utc>,
    #[serde(default)]
    pub disconnected_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub duration_seconds: Option<i64>,
    #[serde(default)]
    pub signal_strength: Option<i32>,
}

impl ConnectionHistoryEntry {
    pub fn is_open(&self) -> bool {
        self.disconnected_at.is_none()
    }

    pub fn ap_mac(&self) -> Option<&MacAddress> {
        self.uplink.mac()
    }
}

/// A validated client record from the controller, consumed within one cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientObservation {
    pub mac: MacAddress,
    pub uplink: Uplink,
    /// dBm, wireless only
    pub signal: Option<i32>,
    pub ip: Option<String>,
    pub hostname: Option<String>,
}

impl ClientObservation {
    pub fn wireless(mac: MacAddress, ap_mac: MacAddress, signal: Option<i32>) -> Self {
        Self {
            mac,
            uplink: Uplink::Wireless {
                ap_mac,
                ssid: None,
                band: None,
            },
            signal,
            ip: None,
            hostname: None,
        }
    }

    pub fn wired(mac: MacAddress, switch_mac: Option<MacAddress>, port: Option<u32>) -> Self {
        Self {
            mac,
            uplink: Uplink::Wired { switch_mac, port },
            signal: None,
            ip: None,
            hostname: None,
        }
    }

    pub fn with_ssid(mut self, ssid: Option<String>, band: Option<String>) -> Self {
        if let Uplink::Wireless {
            ssid: s, band: b, ..
        } = &mut self.uplink
        {
            *s = ssid;
            *b = band;
        }
        self
    }

    pub fn with_ip(mut self, ip: Option<String>) -> Self {
        self.ip = ip;
        self
    }

    pub fn with_hostname(mut self, hostname: Option<String>) -> Self {
        self.hostname = hostname;
        self
    }
}

/// Descriptor returned by AP/switch name resolution
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApDescriptor {
    pub name: Option<String>,
    pub model: Option<String>,
}

impl ApDescriptor {
    /// Human-facing label: name, then model, then the raw MAC. Never blank.
    pub fn display_name(&self, mac: &MacAddress) -> String {
        non_blank(self.name.as_deref())
            .or_else(|| non_blank(self.model.as_deref()))
            .map(str::to_string)
            .unwrap_or_else(|| mac.to_string())
    }
}

fn non_blank(s: Option<&str>) -> Option<&str> {
    s.map(str::trim).filter(|s| !s.is_empty())
}

/// Elapsed time between a device's last disconnection and its reconnection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfflineDuration {
    /// No prior closed history entry exists
    Unknown,
    Known(chrono::Duration),
}

impl OfflineDuration {
    pub fn seconds(&self) -> Option<i64> {
        match self {
            OfflineDuration::Unknown => None,
            OfflineDuration::Known(d) => Some(d.num_seconds().max(0)),
        }
    }

    /// "1h 21m", "3d 4h", "12m", "40s", or "n/a" when unknown
    pub fn formatted(&self) -> String {
        match self.seconds() {
            None => "n/a".to_string(),
            Some(secs) => format_duration_secs(secs),
        }
    }
}

/// Compact human duration with the two most significant units
pub fn format_duration_secs(secs: i64) -> String {
    let secs = secs.max(0);
    let days = secs / 86_400;
    let hours = (secs % 86_400) / 3_600;
    let minutes = (secs % 3_600) / 60;

    if days > 0 {
        format!("{}d {}h", days, hours)
    } else if hours > 0 {
        format!("{}h {}m", hours, minutes)
    } else if minutes > 0 {
        format!("{}m", minutes)
    } else {
        format!("{}s", secs)
    }
}

/// Identity of a device as carried in events
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceRef {
    pub id: DeviceId,
    pub name: String,
    pub mac: MacAddress,
}

/// Discriminant of a [`DomainEvent`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Connected,
    Disconnected,
    Roamed,
    Blocked,
    Unblocked,
}

impl EventKind {
    /// Wire name used in webhook payloads
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Connected => "connected",
            EventKind::Disconnected => "disconnected",
            EventKind::Roamed => "roamed",
            EventKind::Blocked => "blocked",
            EventKind::Unblocked => "unblocked",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A state transition, in device-processing order within one cycle
#[derive(Debug, Clone, PartialEq)]
pub enum DomainEvent {
    Connected {
        device: DeviceRef,
        uplink: Uplink,
        ap_name: String,
        signal: Option<i32>,
        offline: OfflineDuration,
        at: DateTime<Utc>,
    },
    Disconnected {
        device: DeviceRef,
        last_ap_name: Option<String>,
        at: DateTime<Utc>,
    },
    Roamed {
        device: DeviceRef,
        from_ap_name: Option<String>,
        uplink: Uplink,
        ap_name: String,
        signal: Option<i32>,
        at: DateTime<Utc>,
    },
    Blocked {
        device: DeviceRef,
        at: DateTime<Utc>,
    },
    Unblocked {
        device: DeviceRef,
        at: DateTime<Utc>,
    },
}

impl DomainEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            DomainEvent::Connected { .. } => EventKind::Connected,
            DomainEvent::Disconnected { .. } => EventKind::Disconnected,
            DomainEvent::Roamed { .. } => EventKind::Roamed,
            DomainEvent::Blocked { .. } => EventKind::Blocked,
            DomainEvent::Unblocked { .. } => EventKind::Unblocked,
        }
    }

    pub fn device(&self) -> &DeviceRef {
        match self {
            DomainEvent::Connected { device, .. }
            | DomainEvent::Disconnected { device, .. }
            | DomainEvent::Roamed { device, .. }
            | DomainEvent::Blocked { device, .. }
            | DomainEvent::Unblocked { device, .. } => device,
        }
    }

    pub fn at(&self) -> DateTime<Utc> {
        match self {
            DomainEvent::Connected { at, .. }
            | DomainEvent::Disconnected { at, .. }
            | DomainEvent::Roamed { at, .. }
            | DomainEvent::Blocked { at, .. }
            | DomainEvent::Unblocked { at, .. } => *at,
        }
    }

    /// AP (or switch) name relevant to the event, if any
    pub fn ap_name(&self) -> Option<&str> {
        match self {
            DomainEvent::Connected { ap_name, .. } | DomainEvent::Roamed { ap_name, .. } => {
                Some(ap_name)
            }
            DomainEvent::Disconnected { last_ap_name, .. } => last_ap_name.as_deref(),
            DomainEvent::Blocked { .. } | DomainEvent::Unblocked { .. } => None,
        }
    }

    /// Signal strength in dBm, for wireless connect/roam only
    pub fn signal(&self) -> Option<i32> {
        match self {
            DomainEvent::Connected { signal, .. } | DomainEvent::Roamed { signal, .. } => *signal,
            _ => None,
        }
    }

    pub fn offline_duration(&self) -> Option<OfflineDuration> {
        match self {
            DomainEvent::Connected { offline, .. } => Some(*offline),
            _ => None,
        }
    }
}

/// Device list pushed to live observers after each cycle
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LiveSnapshot {
    pub taken_at: DateTime<Utc>,
    pub devices: Vec<TrackedDevice>,
}
