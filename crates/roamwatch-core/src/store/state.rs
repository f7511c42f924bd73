// # Registry State
//
// The in-memory representation shared by every `DeviceStore`
// implementation: tracked devices keyed by id plus the history ledger.
// Stores wrap it in a lock and decide how (and whether) to persist it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::Error;
use crate::ledger::HistoryLedger;
use crate::mac::MacAddress;
use crate::model::{ConnectionHistoryEntry, DeviceId, TrackedDevice};
use crate::traits::device_store::{CommitReport, CycleBatch, RegistrySnapshot};

/// Devices and their history
#[derive(Debug, Clone)]
pub struct RegistryState {
    devices: BTreeMap<DeviceId, TrackedDevice>,
    ledger: HistoryLedger,
    next_device_id: DeviceId,
}

/// Serializable form of [`RegistryState`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryDocument {
    pub version: String,
    #[serde(default)]
    pub devices: Vec<TrackedDevice>,
    #[serde(default)]
    pub history: Vec<ConnectionHistoryEntry>,
    /// Id counter, so ids of removed devices are never handed out again
    #[serde(default)]
    pub next_device_id: Option<DeviceId>,
}

pub(crate) const DOCUMENT_VERSION: &str = "1.0";

impl Default for RegistryState {
    fn default() -> Self {
        Self::new()
    }
}

impl RegistryState {
    pub fn new() -> Self {
        Self {
            devices: BTreeMap::new(),
            ledger: HistoryLedger::new(),
            next_device_id: 1,
        }
    }

    /// Rebuild from a persisted document.
    ///
    /// History rows for devices that no longer exist are dropped.
    pub fn from_document(doc: RegistryDocument) -> Self {
        let devices: BTreeMap<_, _> = doc.devices.into_iter().map(|d| (d.id, d)).collect();
        let next_device_id = devices
            .keys()
            .next_back()
            .map_or(1, |id| id + 1)
            .max(doc.next_device_id.unwrap_or(1));

        let (history, orphans): (Vec<_>, Vec<_>) = doc
            .history
            .into_iter()
            .partition(|e| devices.contains_key(&e.device_id));
        if !orphans.is_empty() {
            tracing::warn!("Dropping {} orphaned history entries", orphans.len());
        }

        Self {
            devices,
            ledger: HistoryLedger::from_entries(history),
            next_device_id,
        }
    }

    pub fn to_document(&self) -> RegistryDocument {
        RegistryDocument {
            version: DOCUMENT_VERSION.to_string(),
            devices: self.devices.values().cloned().collect(),
            history: self.ledger.entries().cloned().collect(),
            next_device_id: Some(self.next_device_id),
        }
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        RegistrySnapshot {
            devices: self.list(),
            last_disconnected: self
                .devices
                .keys()
                .filter_map(|id| self.ledger.last_disconnected_at(*id).map(|at| (*id, at)))
                .collect(),
        }
    }

    pub fn list(&self) -> Vec<TrackedDevice> {
        self.devices.values().cloned().collect()
    }

    pub fn get(&self, id: DeviceId) -> Option<&TrackedDevice> {
        self.devices.get(&id)
    }

    pub fn ledger(&self) -> &HistoryLedger {
        &self.ledger
    }

    /// Apply a cycle's connection updates and history changes.
    ///
    /// Only connection fields are written, so a concurrent rename or block
    /// is preserved. Transitions for devices deleted since the cycle's
    /// snapshot are skipped.
    pub fn apply_cycle(&mut self, batch: CycleBatch) -> CommitReport {
        let mut report = CommitReport::default();

        for transition in batch.transitions {
            let Some(device) = self.devices.get_mut(&transition.device_id) else {
                tracing::debug!(
                    "Device {} removed during cycle, skipping its update",
                    transition.device_id
                );
                report.skipped.push(transition.device_id);
                continue;
            };

            transition.connection.apply_to(device);

            if let Some(at) = transition.close_open_at {
                self.ledger.close_open(transition.device_id, at);
            }
            if let Some(new) = transition.open {
                self.ledger.open(transition.device_id, new);
            }

            report.applied += 1;
        }

        report.devices = self.list();
        report
    }

    pub fn add_device(
        &mut self,
        mac: MacAddress,
        name: String,
        added_at: DateTime<Utc>,
    ) -> Result<TrackedDevice, Error> {
        if self.devices.values().any(|d| d.mac == mac) {
            return Err(Error::duplicate(mac.to_string()));
        }

        let id = self.next_device_id;
        self.next_device_id += 1;

        let device = TrackedDevice::new(id, mac, name, added_at);
        self.devices.insert(id, device.clone());
        Ok(device)
    }

    /// Delete a device and its history
    pub fn remove_device(&mut self, id: DeviceId) -> Result<TrackedDevice, Error> {
        let device = self
            .devices
            .remove(&id)
            .ok_or_else(|| Error::not_found(format!("device {}", id)))?;
        let removed = self.ledger.remove_device(id);
        tracing::debug!("Removed device {} and {} history entries", id, removed);
        Ok(device)
    }

    pub fn rename(&mut self, id: DeviceId, name: String) -> Result<TrackedDevice, Error> {
        let device = self.device_mut(id)?;
        device.name = name;
        Ok(device.clone())
    }

    pub fn set_blocked(&mut self, id: DeviceId, blocked: bool) -> Result<TrackedDevice, Error> {
        let device = self.device_mut(id)?;
        device.is_blocked = blocked;
        Ok(device.clone())
    }

    pub fn history(&self, id: DeviceId, limit: usize) -> Result<Vec<ConnectionHistoryEntry>, Error> {
        if !self.devices.contains_key(&id) {
            return Err(Error::not_found(format!("device {}", id)));
        }
        Ok(self.ledger.history(id, limit))
    }

    fn device_mut(&mut self, id: DeviceId) -> Result<&mut TrackedDevice, Error> {
        self.devices
            .get_mut(&id)
            .ok_or_else(|| Error::not_found(format!("device {}", id)))
    }
}
