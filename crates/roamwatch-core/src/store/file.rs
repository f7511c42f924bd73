// # File Device Store
//
// File-based implementation of DeviceStore with crash recovery.
//
// ## Purpose
//
// Keeps tracked devices and their connection history across daemon
// restarts, so offline durations and history survive.
//
// ## Crash Recovery
//
// - Atomic writes: each mutation writes a temp file, then renames it over
//   the store file
// - Automatic backup: the previous good file is kept as `.backup`
// - Recovery: a store file that fails to parse is replaced from the backup
//
// ## Commit Semantics
//
// Every mutation is applied to a copy of the state, written to disk, and
// only then swapped in. A failed write leaves both the file and the
// in-memory state as of the last successful commit. One cycle commit is
// one file write.
//
// The write and the swap run in their own task holding the write lock, so
// a caller that stops waiting cannot leave the file ahead of memory.
//
// ## File Format
//
// ```json
// {
//   "version": "1.0",
//   "devices": [ { "id": 1, "mac": "aa:bb:cc:dd:ee:ff", "name": "Phone", ... } ],
//   "history": [ { "id": 1, "device_id": 1, "connected_at": "...", ... } ]
// }
// ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;

use super::state::{DOCUMENT_VERSION, RegistryDocument, RegistryState};
use crate::Error;
use crate::mac::MacAddress;
use crate::model::{ConnectionHistoryEntry, DeviceId, TrackedDevice};
use crate::traits::device_store::{CommitReport, CycleBatch, DeviceStore, RegistrySnapshot};

/// File-based device store with crash recovery
///
/// # Example
///
/// ```rust,no_run
/// use roamwatch_core::store::FileDeviceStore;
/// use roamwatch_core::{DeviceStore, MacAddress};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = FileDeviceStore::new("/var/lib/roamwatch/devices.json").await?;
///
///     let mac = MacAddress::parse("AA-BB-CC-DD-EE-FF")?;
///     store.add_device(mac, "Phone".into(), chrono::Utc::now()).await?;
///
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct FileDeviceStore {
    path: PathBuf,
    state: Arc<RwLock<RegistryState>>,
}

impl FileDeviceStore {
    /// Create or load a file device store
    ///
    /// This will:
    /// 1. Create parent directories if needed
    /// 2. Load the existing store file
    /// 3. If it is corrupted, load and restore the backup
    /// 4. If both fail, start empty
    pub async fn new<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).await.map_err(|e| {
                    Error::config(format!(
                        "Failed to create store directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let doc = Self::load_with_recovery(&path).await?;
        let state = doc.map(RegistryState::from_document).unwrap_or_default();
        tracing::debug!(
            "Loaded device store {}: {} devices, {} history entries",
            path.display(),
            state.list().len(),
            state.ledger().len()
        );

        Ok(Self {
            path,
            state: Arc::new(RwLock::new(state)),
        })
    }

    /// Load the store file, falling back to the backup on corruption
    async fn load_with_recovery(path: &Path) -> Result<Option<RegistryDocument>, Error> {
        match Self::load(path).await {
            Ok(doc) => Ok(doc),
            Err(Error::Json(e)) => {
                tracing::warn!(
                    "Device store appears corrupted: {}. Attempting recovery from backup.",
                    e
                );

                let backup_path = Self::backup_path(path);
                if !backup_path.exists() {
                    tracing::warn!("No backup file found. Starting with empty store.");
                    return Ok(None);
                }

                match Self::load(&backup_path).await {
                    Ok(doc) => {
                        tracing::info!("Recovered device store from backup");
                        if let Err(restore_err) = fs::copy(&backup_path, path).await {
                            tracing::error!(
                                "Failed to restore store file from backup: {}",
                                restore_err
                            );
                        }
                        Ok(doc)
                    }
                    Err(backup_err) => {
                        tracing::error!(
                            "Backup also unreadable: {}. Starting with empty store.",
                            backup_err
                        );
                        Ok(None)
                    }
                }
            }
            Err(e) => Err(e),
        }
    }

    async fn load(path: &Path) -> Result<Option<RegistryDocument>, Error> {
        if !path.exists() {
            tracing::debug!("Device store file does not exist: {}", path.display());
            return Ok(None);
        }

        let content = fs::read_to_string(path).await.map_err(|e| {
            Error::persistence(format!("Failed to read {}: {}", path.display(), e))
        })?;

        let doc: RegistryDocument = serde_json::from_str(&content)?;
        if doc.version != DOCUMENT_VERSION {
            tracing::warn!(
                "Device store version mismatch: expected {}, got {}. Attempting to load anyway.",
                DOCUMENT_VERSION,
                doc.version
            );
        }

        Ok(Some(doc))
    }

    /// Write `state` to disk atomically
    async fn write(path: &Path, state: &RegistryState) -> Result<(), Error> {
        let json = serde_json::to_string_pretty(&state.to_document())
            .map_err(|e| Error::persistence(format!("Failed to serialize store: {}", e)))?;

        let temp_path = Self::temp_path(path);
        {
            let mut file = fs::File::create(&temp_path).await.map_err(|e| {
                Error::persistence(format!(
                    "Failed to create temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;
            file.write_all(json.as_bytes()).await.map_err(|e| {
                Error::persistence(format!(
                    "Failed to write temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;
            file.sync_all().await.map_err(|e| {
                Error::persistence(format!(
                    "Failed to sync temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;
        }

        if path.exists() {
            if let Err(e) = fs::copy(path, Self::backup_path(path)).await {
                tracing::warn!("Failed to create backup: {}", e);
            }
        }

        fs::rename(&temp_path, path).await.map_err(|e| {
            Error::persistence(format!(
                "Failed to rename {} to {}: {}",
                temp_path.display(),
                path.display(),
                e
            ))
        })?;

        tracing::trace!("Device store written: {}", path.display());
        Ok(())
    }

    /// Apply `f` to a copy of the state, persist it, then publish it
    async fn mutate<T: Send + 'static>(
        &self,
        f: impl FnOnce(&mut RegistryState) -> Result<T, Error>,
    ) -> Result<T, Error> {
        let mut guard = Arc::clone(&self.state).write_owned().await;
        let mut next = guard.clone();
        let out = f(&mut next)?;

        let path = self.path.clone();
        tokio::spawn(async move {
            Self::write(&path, &next).await?;
            *guard = next;
            Ok::<T, Error>(out)
        })
        .await
        .map_err(|e| Error::persistence(format!("Store write task failed: {}", e)))?
    }

    fn temp_path(path: &Path) -> PathBuf {
        let mut temp = path.to_path_buf();
        temp.set_extension("tmp");
        temp
    }

    fn backup_path(path: &Path) -> PathBuf {
        let mut backup = path.to_path_buf();
        backup.set_extension("backup");
        backup
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl DeviceStore for FileDeviceStore {
    async fn snapshot(&self) -> Result<RegistrySnapshot, Error> {
        Ok(self.state.read().await.snapshot())
    }

    async fn commit_cycle(&self, batch: CycleBatch) -> Result<CommitReport, Error> {
        if batch.is_empty() {
            return Ok(CommitReport {
                devices: self.state.read().await.list(),
                ..Default::default()
            });
        }
        self.mutate(|state| Ok(state.apply_cycle(batch))).await
    }

    async fn list_devices(&self) -> Result<Vec<TrackedDevice>, Error> {
        Ok(self.state.read().await.list())
    }

    async fn get_device(&self, id: DeviceId) -> Result<Option<TrackedDevice>, Error> {
        Ok(self.state.read().await.get(id).cloned())
    }

    async fn add_device(
        &self,
        mac: MacAddress,
        name: String,
        added_at: DateTime<Utc>,
    ) -> Result<TrackedDevice, Error> {
        self.mutate(|state| state.add_device(mac, name, added_at)).await
    }

    async fn remove_device(&self, id: DeviceId) -> Result<(), Error> {
        self.mutate(|state| state.remove_device(id).map(|_| ())).await
    }

    async fn rename_device(&self, id: DeviceId, name: String) -> Result<TrackedDevice, Error> {
        self.mutate(|state| state.rename(id, name)).await
    }

    async fn set_blocked(&self, id: DeviceId, blocked: bool) -> Result<TrackedDevice, Error> {
        self.mutate(|state| state.set_blocked(id, blocked)).await
    }

    async fn history(&self, id: DeviceId, limit: usize) -> Result<Vec<ConnectionHistoryEntry>, Error> {
        self.state.read().await.history(id, limit)
    }

    async fn flush(&self) -> Result<(), Error> {
        let guard = self.state.read().await;
        Self::write(&self.path, &guard).await
    }
}
