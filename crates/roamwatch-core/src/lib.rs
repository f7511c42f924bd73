// # roamwatch-core
//
// Core library for the device presence and roaming tracker.
//
// ## Architecture Overview
//
// - **ControllerGateway**: Trait for fetching the controller's active clients
// - **DeviceStore**: Trait for the durable device registry and history ledger
// - **WebhookTransport**: Trait for delivering notification payloads
// - **ReconciliationEngine**: Polls, diffs, commits and emits events
// - **ResultCache**: Short-TTL shared cache for controller-derived facts
// - **Notifier** / **LiveBroadcaster**: Deliver committed events and snapshots
// - **TrackerService**: The operations exposed to callers
// - **ComponentRegistry**: Plugin-based registry of component factories
//
// ## Design Principles
//
// 1. **Commit first, deliver after**: notification failures can never unwind state
// 2. **One commit per cycle**: readers never see half a cycle
// 3. **Single flight**: cycles never overlap; concurrent triggers share a result
// 4. **Injected components**: no ambient globals; everything is swappable in tests

pub mod broadcast;
pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod mac;
pub mod model;
pub mod notifier;
pub mod registry;
pub mod service;
pub mod store;
pub mod traits;
pub mod url_guard;

// Re-export core types for convenience
pub use broadcast::{LiveBroadcaster, SnapshotStream};
pub use cache::ResultCache;
pub use config::{
    CacheConfig, EngineConfig, EventFilter, GatewayConfig, NotifierConfig, StoreConfig,
    TrackerConfig, WebhookEndpoint, WebhookKind,
};
pub use engine::{CycleReport, EngineStatus, ReconciliationEngine};
pub use error::{Error, Result};
pub use mac::MacAddress;
pub use model::{
    ApDescriptor, ClientObservation, ConnectionHistoryEntry, DeviceId, DomainEvent, EventKind,
    LiveSnapshot, OfflineDuration, TrackedDevice, Uplink, WIRED_UPLINK_NAME,
};
pub use notifier::Notifier;
pub use registry::ComponentRegistry;
pub use service::TrackerService;
pub use store::{FileDeviceStore, MemoryDeviceStore};
pub use traits::{Clock, ControllerGateway, DeviceStore, SystemClock, WebhookTransport};
