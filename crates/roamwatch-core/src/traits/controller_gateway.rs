// # Controller Gateway Trait
//
// Defines the interface to the network controller that reports which
// clients are currently associated, and where.
//
// ## Implementations
//
// - UniFi Network controller: `roamwatch-gateway-unifi` crate
//
// ## Usage
//
// ```rust,ignore
// use roamwatch_core::ControllerGateway;
//
// #[tokio::main]
// async fn main() -> anyhow::Result<()> {
//     let gateway = /* ControllerGateway implementation */;
//
//     gateway.connect().await?;
//     for client in gateway.list_active_clients().await? {
//         println!("{} on {}", client.mac, client.uplink.mac());
//     }
//
//     Ok(())
// }
// ```

use async_trait::async_trait;

use crate::mac::MacAddress;
use crate::model::{ApDescriptor, ClientObservation};

/// Trait for controller gateway implementations
///
/// # Parsing Boundary
///
/// Implementations own the translation from the controller's loosely-typed
/// responses into [`ClientObservation`]. Malformed records are logged and
/// skipped there; the engine only ever sees validated, normalized values.
///
/// # Failure Semantics
///
/// - Network failures, timeouts and unexpected payloads map to
///   `Error::UpstreamUnavailable`
/// - Rejected credentials map to `Error::Authentication`
/// - Unknown AP/switch MACs in [`resolve_ap`](Self::resolve_ap) map to
///   `Error::NotFound`
///
/// Implementations must not retry internally; the engine retries by
/// waiting for its next tick.
#[async_trait]
pub trait ControllerGateway: Send + Sync {
    /// Establish (or re-establish) a controller session
    async fn connect(&self) -> Result<(), crate::Error>;

    /// Clients currently associated with the controller.
    ///
    /// Connects on demand if no session is established.
    async fn list_active_clients(&self) -> Result<Vec<ClientObservation>, crate::Error>;

    /// Describe an access point or switch by MAC
    async fn resolve_ap(&self, mac: &MacAddress) -> Result<ApDescriptor, crate::Error>;

    /// Block or unblock a client at the controller
    async fn set_client_blocked(&self, mac: &MacAddress, blocked: bool)
    -> Result<(), crate::Error>;

    /// Gateway name (for logging/debugging)
    fn gateway_name(&self) -> &'static str;
}

/// Helper trait for constructing gateways from configuration
pub trait ControllerGatewayFactory: Send + Sync {
    /// Create a ControllerGateway instance from configuration
    ///
    /// The shared result cache is injected so gateway-derived facts are
    /// fetched once per TTL across all readers.
    fn create(
        &self,
        config: &crate::config::GatewayConfig,
        cache: std::sync::Arc<crate::cache::ResultCache>,
    ) -> Result<Box<dyn ControllerGateway>, crate::Error>;
}
