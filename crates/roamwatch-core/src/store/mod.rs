//! Device store implementations
//!
//! This module provides implementations of the DeviceStore trait.

mod file;
mod memory;
mod state;

pub use file::FileDeviceStore;
pub use memory::MemoryDeviceStore;
pub use state::{RegistryDocument, RegistryState};

use async_trait::async_trait;

use crate::config::StoreConfig;
use crate::traits::{DeviceStore, DeviceStoreFactory};

/// Factory for [`MemoryDeviceStore`]
#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryStoreFactory;

#[async_trait]
impl DeviceStoreFactory for MemoryStoreFactory {
    async fn create(&self, _config: &StoreConfig) -> crate::Result<Box<dyn DeviceStore>> {
        Ok(Box::new(MemoryDeviceStore::new()))
    }
}

/// Factory for [`FileDeviceStore`]
#[derive(Debug, Clone, Copy, Default)]
pub struct FileStoreFactory;

#[async_trait]
impl DeviceStoreFactory for FileStoreFactory {
    async fn create(&self, config: &StoreConfig) -> crate::Result<Box<dyn DeviceStore>> {
        match config {
            StoreConfig::File { path } => Ok(Box::new(FileDeviceStore::new(path).await?)),
            other => Err(crate::Error::config(format!(
                "File store factory cannot build a '{}' store",
                other.type_name()
            ))),
        }
    }
}
