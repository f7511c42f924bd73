// # Device Store Trait
//
// Defines the interface for the durable Device Registry and History Ledger.
//
// ## Purpose
//
// The store owns tracked devices and their connection history. It offers
// two write paths:
//
// - The reconciliation engine commits one `CycleBatch` per cycle. The batch
//   touches only connection fields and history, and is applied atomically:
//   readers see either none or all of it.
// - User actions (register, rename, block, delete) go through dedicated
//   methods. They serialize with cycle commits on the store's lock, and a
//   cycle commit silently skips devices deleted while the cycle ran.
//
// ## Implementations
//
// - In-memory: `MemoryDeviceStore`
// - JSON file with crash recovery: `FileDeviceStore`

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

use crate::ledger::NewHistoryEntry;
use crate::mac::MacAddress;
use crate::model::{ConnectionHistoryEntry, DeviceId, TrackedDevice, Uplink};

/// A consistent view of the registry at the start of a cycle
#[derive(Debug, Clone, Default)]
pub struct RegistrySnapshot {
    /// Devices in processing order (ascending id)
    pub devices: Vec<TrackedDevice>,
    /// End of each device's most recent closed history entry
    pub last_disconnected: HashMap<DeviceId, DateTime<Utc>>,
}

/// Connection fields written by a cycle
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionFields {
    pub is_connected: bool,
    pub current_uplink: Option<Uplink>,
    pub current_ap_name: Option<String>,
    pub current_ip: Option<String>,
    pub current_signal: Option<i32>,
    pub last_seen_at: Option<DateTime<Utc>>,
}

impl ConnectionFields {
    /// Current field values of a device
    pub fn of(device: &TrackedDevice) -> Self {
        Self {
            is_connected: device.is_connected,
            current_uplink: device.current_uplink.clone(),
            current_ap_name: device.current_ap_name.clone(),
            current_ip: device.current_ip.clone(),
            current_signal: device.current_signal,
            last_seen_at: device.last_seen_at,
        }
    }

    pub(crate) fn apply_to(self, device: &mut TrackedDevice) {
        device.is_connected = self.is_connected;
        device.current_uplink = self.current_uplink;
        device.current_ap_name = self.current_ap_name;
        device.current_ip = self.current_ip;
        device.current_signal = self.current_signal;
        device.last_seen_at = self.last_seen_at;
    }
}

/// All mutations a cycle makes to one device
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceTransition {
    pub device_id: DeviceId,
    pub connection: ConnectionFields,
    /// Close the device's open history entry at this instant
    pub close_open_at: Option<DateTime<Utc>>,
    /// Open a new history entry (closing any open one first)
    pub open: Option<NewHistoryEntry>,
}

/// Everything one cycle writes, committed as a unit
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleBatch {
    pub cycle_at: Option<DateTime<Utc>>,
    pub transitions: Vec<DeviceTransition>,
}

impl CycleBatch {
    pub fn is_empty(&self) -> bool {
        self.transitions.is_empty()
    }
}

/// Outcome of a successful cycle commit
#[derive(Debug, Clone, Default)]
pub struct CommitReport {
    /// Transitions applied
    pub applied: usize,
    /// Devices removed by a user while the cycle ran
    pub skipped: Vec<DeviceId>,
    /// Registry contents after the commit
    pub devices: Vec<TrackedDevice>,
}

/// Trait for device store implementations
///
/// # Thread Safety
///
/// All methods must be safe to call concurrently from multiple tasks.
#[async_trait]
pub trait DeviceStore: Send + Sync {
    /// Consistent snapshot of all devices plus offline bookkeeping
    async fn snapshot(&self) -> Result<RegistrySnapshot, crate::Error>;

    /// Apply one cycle's batch atomically
    ///
    /// # Returns
    ///
    /// - `Ok(CommitReport)`: all transitions for still-registered devices applied
    /// - `Err(Error::Persistence)`: nothing applied; state is as of the last commit
    async fn commit_cycle(&self, batch: CycleBatch) -> Result<CommitReport, crate::Error>;

    /// All tracked devices, ascending id
    async fn list_devices(&self) -> Result<Vec<TrackedDevice>, crate::Error>;

    /// One device by id
    async fn get_device(&self, id: DeviceId) -> Result<Option<TrackedDevice>, crate::Error>;

    /// Register a device
    ///
    /// - `Err(Error::DuplicateDevice)`: the MAC is already tracked
    async fn add_device(
        &self,
        mac: MacAddress,
        name: String,
        added_at: DateTime<Utc>,
    ) -> Result<TrackedDevice, crate::Error>;

    /// Delete a device and, by cascade, its history
    ///
    /// - `Err(Error::NotFound)`: no such device
    async fn remove_device(&self, id: DeviceId) -> Result<(), crate::Error>;

    /// Change a device's display name
    async fn rename_device(&self, id: DeviceId, name: String)
    -> Result<TrackedDevice, crate::Error>;

    /// Record the block flag after the controller accepted the command
    async fn set_blocked(&self, id: DeviceId, blocked: bool)
    -> Result<TrackedDevice, crate::Error>;

    /// Newest-first history for one device
    ///
    /// - `Err(Error::NotFound)`: no such device
    async fn history(
        &self,
        id: DeviceId,
        limit: usize,
    ) -> Result<Vec<ConnectionHistoryEntry>, crate::Error>;

    /// Persist any pending changes
    async fn flush(&self) -> Result<(), crate::Error>;
}

/// Helper trait for constructing device stores from configuration
#[async_trait]
pub trait DeviceStoreFactory: Send + Sync {
    async fn create(
        &self,
        config: &crate::config::StoreConfig,
    ) -> Result<Box<dyn DeviceStore>, crate::Error>;
}
