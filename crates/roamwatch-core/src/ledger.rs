// # History Ledger
//
// Append-only per-device record of uplink associations.
//
// ## Lifecycle
//
// - An entry is opened when a device is first seen connected, or when it
//   roams (the previous open entry is closed at the same instant).
// - An entry is closed when the device roams away or goes offline;
//   `duration_seconds` is computed once, at close time.
// - Closed entries are never mutated again.
//
// ## Invariant
//
// Each device has at most one open entry, and if it has one it is the
// last entry in that device's chronological list. `open()` closes any
// existing open entry before appending, so callers cannot break this.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

use crate::model::{ConnectionHistoryEntry, DeviceId, EntryId, Uplink};

/// Data needed to open a new history entry
#[derive(Debug, Clone, PartialEq)]
pub struct NewHistoryEntry {
    pub uplink: Uplink,
    pub ap_name: String,
    pub connected_at: DateTime<Utc>,
    pub signal_strength: Option<i32>,
}

/// Per-device connection history
#[derive(Debug, Clone, Default)]
pub struct HistoryLedger {
    by_device: BTreeMap<DeviceId, Vec<ConnectionHistoryEntry>>,
    next_id: EntryId,
}

impl HistoryLedger {
    pub fn new() -> Self {
        Self {
            by_device: BTreeMap::new(),
            next_id: 1,
        }
    }

    /// Rebuild a ledger from persisted entries.
    ///
    /// Entries are re-sorted per device. If persisted data holds more than
    /// one open entry for a device, all but the newest are closed at the
    /// start of their successor, restoring the invariant.
    pub fn from_entries(entries: Vec<ConnectionHistoryEntry>) -> Self {
        let mut ledger = Self::new();
        for entry in entries {
            ledger.next_id = ledger.next_id.max(entry.id + 1);
            ledger.by_device.entry(entry.device_id).or_default().push(entry);
        }

        for (device_id, list) in ledger.by_device.iter_mut() {
            list.sort_by(|a, b| a.connected_at.cmp(&b.connected_at).then(a.id.cmp(&b.id)));
            let len = list.len();
            for i in 0..len.saturating_sub(1) {
                if list[i].is_open() {
                    let successor_start = list[i + 1].connected_at;
                    tracing::warn!(
                        "Repairing stray open history entry {} for device {}",
                        list[i].id,
                        device_id
                    );
                    close_entry(&mut list[i], successor_start);
                }
            }
        }

        ledger
    }

    /// Open a new entry, closing the device's current open entry first.
    pub fn open(&mut self, device_id: DeviceId, new: NewHistoryEntry) -> EntryId {
        self.close_open(device_id, new.connected_at);

        let id = self.next_id;
        self.next_id += 1;

        self.by_device
            .entry(device_id)
            .or_default()
            .push(ConnectionHistoryEntry {
                id,
                device_id,
                uplink: new.uplink,
                ap_name: new.ap_name,
                connected_at: new.connected_at,
                disconnected_at: None,
                duration_seconds: None,
                signal_strength: new.signal_strength,
            });

        id
    }

    /// Close the device's open entry, if any. Returns the closed entry's id.
    pub fn close_open(&mut self, device_id: DeviceId, at: DateTime<Utc>) -> Option<EntryId> {
        let entry = self
            .by_device
            .get_mut(&device_id)?
            .last_mut()
            .filter(|e| e.is_open())?;
        close_entry(entry, at);
        Some(entry.id)
    }

    /// The device's currently-open entry
    pub fn open_entry(&self, device_id: DeviceId) -> Option<&ConnectionHistoryEntry> {
        self.by_device
            .get(&device_id)
            .and_then(|list| list.last())
            .filter(|e| e.is_open())
    }

    /// Number of open entries for a device (0 or 1 when the invariant holds)
    pub fn open_count(&self, device_id: DeviceId) -> usize {
        self.by_device
            .get(&device_id)
            .map_or(0, |list| list.iter().filter(|e| e.is_open()).count())
    }

    /// When the device's most recent closed entry ended
    pub fn last_disconnected_at(&self, device_id: DeviceId) -> Option<DateTime<Utc>> {
        self.by_device
            .get(&device_id)?
            .iter()
            .filter_map(|e| e.disconnected_at)
            .max()
    }

    /// Newest-first history for a device, at most `limit` entries
    pub fn history(&self, device_id: DeviceId, limit: usize) -> Vec<ConnectionHistoryEntry> {
        self.by_device
            .get(&device_id)
            .map(|list| list.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default()
    }

    /// Drop all of a device's entries. Returns how many were removed.
    pub fn remove_device(&mut self, device_id: DeviceId) -> usize {
        self.by_device.remove(&device_id).map_or(0, |list| list.len())
    }

    /// All entries, grouped by device in chronological order
    pub fn entries(&self) -> impl Iterator<Item = &ConnectionHistoryEntry> {
        self.by_device.values().flatten()
    }

    pub fn len(&self) -> usize {
        self.by_device.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn close_entry(entry: &mut ConnectionHistoryEntry, at: DateTime<Utc>) {
    // A clock step backwards must not produce an entry that ends before it starts.
    let at = at.max(entry.connected_at);
    entry.disconnected_at = Some(at);
    entry.duration_seconds = Some(at.signed_duration_since(entry.connected_at).num_seconds());
}
