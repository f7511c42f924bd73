// # Tracker Service
//
// The operations the core exposes to its callers (API layer, daemon,
// tests). User-initiated writes go straight to the store, which
// serializes them with cycle commits; the cycle only ever writes
// connection fields, so a rename or block is never overwritten.

use std::sync::Arc;
use tracing::info;

use crate::broadcast::SnapshotStream;
use crate::engine::{CycleReport, EngineStatus, ReconciliationEngine};
use crate::error::{Error, Result};
use crate::mac::MacAddress;
use crate::model::{ConnectionHistoryEntry, DeviceId, DomainEvent, TrackedDevice};

/// Facade over the engine and its collaborators
#[derive(Debug, Clone)]
pub struct TrackerService {
    engine: Arc<ReconciliationEngine>,
}

impl TrackerService {
    pub fn new(engine: Arc<ReconciliationEngine>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &Arc<ReconciliationEngine> {
        &self.engine
    }

    /// All tracked devices with their last-known connection state
    pub async fn list_tracked_devices(&self) -> Result<Vec<TrackedDevice>> {
        self.engine.store().list_devices().await
    }

    /// Start tracking a device
    ///
    /// - `Err(Error::InvalidMac)`: `mac` cannot be normalized
    /// - `Err(Error::DuplicateDevice)`: already tracked
    /// - `Err(Error::InvalidInput)`: blank name
    pub async fn add_tracked_device(&self, mac: &str, name: &str) -> Result<TrackedDevice> {
        let mac = MacAddress::parse(mac)?;
        let name = non_blank_name(name)?;

        let device = self
            .engine
            .store()
            .add_device(mac, name, self.engine.clock().now())
            .await?;
        info!("Tracking {} ({})", device.name, device.mac);
        Ok(device)
    }

    /// Stop tracking a device and delete its history
    pub async fn remove_tracked_device(&self, id: DeviceId) -> Result<()> {
        self.engine.store().remove_device(id).await?;
        info!("Stopped tracking device {}", id);
        Ok(())
    }

    /// Newest-first history; `limit` defaults to the configured page size
    pub async fn get_device_history(
        &self,
        id: DeviceId,
        limit: Option<usize>,
    ) -> Result<Vec<ConnectionHistoryEntry>> {
        let limit = limit.unwrap_or(self.engine.config().history_limit);
        if limit == 0 {
            return Err(Error::invalid_input("history limit must be > 0"));
        }
        self.engine.store().history(id, limit).await
    }

    /// Manual refresh
    pub async fn trigger_cycle(&self) -> Result<CycleReport> {
        self.engine.trigger_cycle().await
    }

    pub async fn rename_device(&self, id: DeviceId, name: &str) -> Result<TrackedDevice> {
        let name = non_blank_name(name)?;
        self.engine.store().rename_device(id, name).await
    }

    /// Block a device at the controller
    pub async fn block_device(&self, id: DeviceId) -> Result<TrackedDevice> {
        self.set_blocked(id, true).await
    }

    /// Unblock a device at the controller
    pub async fn unblock_device(&self, id: DeviceId) -> Result<TrackedDevice> {
        self.set_blocked(id, false).await
    }

    async fn set_blocked(&self, id: DeviceId, blocked: bool) -> Result<TrackedDevice> {
        let store = self.engine.store();
        let device = store
            .get_device(id)
            .await?
            .ok_or_else(|| Error::not_found(format!("device {}", id)))?;

        self.engine
            .gateway()
            .set_client_blocked(&device.mac, blocked)
            .await
            .map_err(|e| match e {
                Error::UpstreamUnavailable(_) => e,
                other => Error::upstream(other.to_string()),
            })?;

        let updated = store.set_blocked(id, blocked).await?;

        if device.is_blocked != blocked {
            let at = self.engine.clock().now();
            let event = if blocked {
                DomainEvent::Blocked { device: updated.to_ref(), at }
            } else {
                DomainEvent::Unblocked { device: updated.to_ref(), at }
            };
            info!("{} {} ({})", updated.name, event.kind(), updated.mac);
            if let Some(notifier) = self.engine.notifier() {
                notifier.notify(event);
            }
        }

        Ok(updated)
    }

    /// Engine health
    pub fn status(&self) -> EngineStatus {
        self.engine.status()
    }

    /// Send a test notification to one configured endpoint
    pub async fn test_endpoint(&self, name: &str) -> Result<u16> {
        match self.engine.notifier() {
            Some(notifier) => notifier.test_endpoint(name).await,
            None => Err(Error::not_found(format!("webhook endpoint '{}'", name))),
        }
    }

    /// Receive the device list after every cycle
    pub fn subscribe_live(&self) -> SnapshotStream {
        self.engine.broadcaster().subscribe()
    }
}

fn non_blank_name(name: &str) -> Result<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(Error::invalid_input("device name cannot be empty"));
    }
    Ok(name.to_string())
}
