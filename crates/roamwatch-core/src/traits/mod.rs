//! Core traits for the tracker
//!
//! This module defines the abstract interfaces that all implementations must follow.
//!
//! - [`ControllerGateway`]: Fetch the controller's active client list
//! - [`DeviceStore`]: Durable device registry and history ledger
//! - [`WebhookTransport`]: Deliver notification payloads
//! - [`Clock`]: Wall-clock source

pub mod clock;
pub mod controller_gateway;
pub mod device_store;
pub mod webhook_transport;

pub use clock::{Clock, SystemClock};
pub use controller_gateway::{ControllerGateway, ControllerGatewayFactory};
pub use device_store::{
    CommitReport, ConnectionFields, CycleBatch, DeviceStore, DeviceStoreFactory,
    DeviceTransition, RegistrySnapshot,
};
pub use webhook_transport::{WebhookTransport, WebhookTransportFactory};
