//! Plugin-based component registry
//!
//! The registry lets gateways, device stores and webhook transports be
//! registered at runtime and built from configuration by type name,
//! avoiding hardcoded if-else chains.
//!
//! ## Registration
//!
//! Integration crates register themselves during initialization:
//!
//! ```rust,ignore
//! // In roamwatch-gateway-unifi
//! pub fn register(registry: &ComponentRegistry) {
//!     registry.register_gateway("unifi", Box::new(UnifiGatewayFactory));
//! }
//! ```
//!
//! The built-in `memory` and `file` stores are available from
//! [`ComponentRegistry::with_builtin_stores`].

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::cache::ResultCache;
use crate::config::{GatewayConfig, NotifierConfig, StoreConfig};
use crate::error::{Error, Result};
use crate::store::{FileStoreFactory, MemoryStoreFactory};
use crate::traits::{ControllerGateway, DeviceStore, WebhookTransport};
use crate::traits::{ControllerGatewayFactory, DeviceStoreFactory, WebhookTransportFactory};

/// Registry of component factories
///
/// ## Thread Safety
///
/// Uses interior mutability with RwLock, allowing concurrent reads and
/// exclusive writes.
#[derive(Default)]
pub struct ComponentRegistry {
    gateways: RwLock<HashMap<String, Box<dyn ControllerGatewayFactory>>>,
    stores: RwLock<HashMap<String, Arc<dyn DeviceStoreFactory>>>,
    transports: RwLock<HashMap<String, Box<dyn WebhookTransportFactory>>>,
}

// Registration never leaves a map half-written, so a poisoned lock still
// guards a consistent map.
fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|p| p.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|p| p.into_inner())
}

impl ComponentRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with the `memory` and `file` stores registered
    pub fn with_builtin_stores() -> Self {
        let registry = Self::new();
        registry.register_store("memory", Box::new(MemoryStoreFactory));
        registry.register_store("file", Box::new(FileStoreFactory));
        registry
    }

    /// Register a controller gateway factory
    pub fn register_gateway(
        &self,
        name: impl Into<String>,
        factory: Box<dyn ControllerGatewayFactory>,
    ) {
        write(&self.gateways).insert(name.into(), factory);
    }

    /// Register a device store factory
    pub fn register_store(&self, name: impl Into<String>, factory: Box<dyn DeviceStoreFactory>) {
        write(&self.stores).insert(name.into(), Arc::from(factory));
    }

    /// Register a webhook transport factory
    pub fn register_transport(
        &self,
        name: impl Into<String>,
        factory: Box<dyn WebhookTransportFactory>,
    ) {
        write(&self.transports).insert(name.into(), factory);
    }

    /// Create a controller gateway from configuration
    ///
    /// # Returns
    ///
    /// - `Ok(Box<dyn ControllerGateway>)`: Created gateway
    /// - `Err(Error::Config)`: If the gateway type is not registered or creation fails
    pub fn create_gateway(
        &self,
        config: &GatewayConfig,
        cache: Arc<ResultCache>,
    ) -> Result<Box<dyn ControllerGateway>> {
        let gateway_type = config.type_name();
        let gateways = read(&self.gateways);
        let factory = gateways
            .get(gateway_type)
            .ok_or_else(|| Error::config(format!("Unknown gateway type: {}", gateway_type)))?;

        factory.create(config, cache)
    }

    /// Create a device store from configuration
    pub async fn create_store(&self, config: &StoreConfig) -> Result<Box<dyn DeviceStore>> {
        let store_type = config.type_name();

        // Release the lock before calling async create
        let factory = read(&self.stores)
            .get(store_type)
            .cloned()
            .ok_or_else(|| Error::config(format!("Unknown store type: {}", store_type)))?;

        factory.create(config).await
    }

    /// Create a webhook transport from configuration
    pub fn create_transport(&self, config: &NotifierConfig) -> Result<Box<dyn WebhookTransport>> {
        let transports = read(&self.transports);
        let factory = transports.get(&config.transport).ok_or_else(|| {
            Error::config(format!("Unknown webhook transport: {}", config.transport))
        })?;

        factory.create(config)
    }

    pub fn list_gateways(&self) -> Vec<String> {
        read(&self.gateways).keys().cloned().collect()
    }

    pub fn list_stores(&self) -> Vec<String> {
        read(&self.stores).keys().cloned().collect()
    }

    pub fn list_transports(&self) -> Vec<String> {
        read(&self.transports).keys().cloned().collect()
    }

    pub fn has_gateway(&self, name: &str) -> bool {
        read(&self.gateways).contains_key(name)
    }

    pub fn has_store(&self, name: &str) -> bool {
        read(&self.stores).contains_key(name)
    }

    pub fn has_transport(&self, name: &str) -> bool {
        read(&self.transports).contains_key(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct MockGatewayFactory;

    impl ControllerGatewayFactory for MockGatewayFactory {
        fn create(
            &self,
            _config: &GatewayConfig,
            _cache: Arc<ResultCache>,
        ) -> Result<Box<dyn ControllerGateway>> {
            Err(Error::not_found("Mock gateway not implemented"))
        }
    }

    #[test]
    fn test_registry_registration() {
        let registry = ComponentRegistry::new();
        assert!(!registry.has_gateway("mock"));

        registry.register_gateway("mock", Box::new(MockGatewayFactory));

        assert!(registry.has_gateway("mock"));
        assert!(registry.list_gateways().contains(&"mock".to_string()));
    }

    #[test]
    fn unknown_gateway_is_config_error() {
        let registry = ComponentRegistry::new();
        let cache = Arc::new(ResultCache::new(std::time::Duration::from_secs(30)));
        let err = registry
            .create_gateway(&GatewayConfig::default(), cache)
            .err()
            .map(|e| e.to_string());
        assert_eq!(err.as_deref(), Some("Configuration error: Unknown gateway type: unifi"));
    }

    #[tokio::test]
    async fn builtin_stores_are_registered() {
        let registry = ComponentRegistry::with_builtin_stores();
        assert!(registry.has_store("memory"));
        assert!(registry.has_store("file"));

        let store = registry.create_store(&StoreConfig::Memory).await.unwrap();
        assert!(store.list_devices().await.unwrap().is_empty());
    }
}
