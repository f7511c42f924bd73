// # Webhook Transport Trait
//
// Defines the interface for POSTing a JSON payload to a webhook URL.
//
// ## Implementations
//
// - reqwest-based: `roamwatch-notify-webhook` crate

use async_trait::async_trait;

/// Trait for webhook transport implementations
///
/// A transport performs exactly one POST per call. Formatting, endpoint
/// selection and failure logging belong to the `Notifier`; the transport
/// only reports what happened on the wire.
#[async_trait]
pub trait WebhookTransport: Send + Sync {
    /// POST `payload` to `url`.
    ///
    /// # Returns
    ///
    /// - `Ok(status)`: the endpoint accepted the payload (2xx)
    /// - `Err(Error::Delivery)`: network failure or non-success status
    async fn post(&self, url: &str, payload: &serde_json::Value) -> Result<u16, crate::Error>;

    /// Transport name (for logging/debugging)
    fn transport_name(&self) -> &'static str;
}

/// Helper trait for constructing transports from configuration
pub trait WebhookTransportFactory: Send + Sync {
    fn create(
        &self,
        config: &crate::config::NotifierConfig,
    ) -> Result<Box<dyn WebhookTransport>, crate::Error>;
}
