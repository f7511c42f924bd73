// # Memory Device Store
//
// In-memory implementation of DeviceStore.
//
// ## Purpose
//
// Provides a fast store that doesn't persist across restarts. Useful for
// tests and for deployments that re-seed tracked devices at startup.
//
// ## Crash Behavior
//
// - All devices and history are lost on restart
// - The first cycle after a restart reports every online device as
//   `Connected` with an unknown offline duration

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::RwLock;

use super::state::RegistryState;
use crate::Error;
use crate::mac::MacAddress;
use crate::model::{ConnectionHistoryEntry, DeviceId, TrackedDevice};
use crate::traits::device_store::{CommitReport, CycleBatch, DeviceStore, RegistrySnapshot};

/// In-memory device store
///
/// All state sits in one [`RegistryState`] behind a `RwLock`; a cycle
/// commit takes the write lock once, so readers never observe half a cycle.
#[derive(Debug, Clone, Default)]
pub struct MemoryDeviceStore {
    inner: Arc<RwLock<RegistryState>>,
}

impl MemoryDeviceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tracked devices
    pub async fn len(&self) -> usize {
        self.inner.read().await.list().len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Open history entries for a device (0 or 1)
    pub async fn open_entry_count(&self, id: DeviceId) -> usize {
        self.inner.read().await.ledger().open_count(id)
    }
}

#[async_trait]
impl DeviceStore for MemoryDeviceStore {
    async fn snapshot(&self) -> Result<RegistrySnapshot, Error> {
        Ok(self.inner.read().await.snapshot())
    }

    async fn commit_cycle(&self, batch: CycleBatch) -> Result<CommitReport, Error> {
        Ok(self.inner.write().await.apply_cycle(batch))
    }

    async fn list_devices(&self) -> Result<Vec<TrackedDevice>, Error> {
        Ok(self.inner.read().await.list())
    }

    async fn get_device(&self, id: DeviceId) -> Result<Option<TrackedDevice>, Error> {
        Ok(self.inner.read().await.get(id).cloned())
    }

    async fn add_device(
        &self,
        mac: MacAddress,
        name: String,
        added_at: DateTime<Utc>,
    ) -> Result<TrackedDevice, Error> {
        self.inner.write().await.add_device(mac, name, added_at)
    }

    async fn remove_device(&self, id: DeviceId) -> Result<(), Error> {
        self.inner.write().await.remove_device(id).map(|_| ())
    }

    async fn rename_device(&self, id: DeviceId, name: String) -> Result<TrackedDevice, Error> {
        self.inner.write().await.rename(id, name)
    }

    async fn set_blocked(&self, id: DeviceId, blocked: bool) -> Result<TrackedDevice, Error> {
        self.inner.write().await.set_blocked(id, blocked)
    }

    async fn history(&self, id: DeviceId, limit: usize) -> Result<Vec<ConnectionHistoryEntry>, Error> {
        self.inner.read().await.history(id, limit)
    }

    async fn flush(&self) -> Result<(), Error> {
        // No-op for memory store
        Ok(())
    }
}
