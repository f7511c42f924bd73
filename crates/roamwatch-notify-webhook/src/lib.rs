// # HTTP Webhook Transport
//
// WebhookTransport implementation over reqwest. One POST per call, JSON
// body, bounded by the configured timeout.
//
// ## Destination checks
//
// Endpoint URLs are checked statically when configuration is validated.
// Before each POST this transport also resolves the host and refuses
// private, loopback and link-local addresses, so a DNS record that
// changes after startup cannot point notifications at the local network.
//
// ## Failure semantics
//
// Network errors, timeouts and non-2xx statuses all map to
// `Error::Delivery`. Nothing is retried here; the Notifier logs the
// failure and moves on.

use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

use roamwatch_core::config::NotifierConfig;
use roamwatch_core::traits::WebhookTransportFactory;
use roamwatch_core::url_guard;
use roamwatch_core::{ComponentRegistry, Error, Result, WebhookTransport};

/// reqwest-backed webhook transport
pub struct ReqwestTransport {
    client: reqwest::Client,
    timeout: Duration,
    check_destinations: bool,
}

impl ReqwestTransport {
    /// Create a transport whose requests time out after `timeout`
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("roamwatch/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            timeout,
            check_destinations: true,
        })
    }

    /// Skip the per-request address check (local testing only)
    pub fn allow_private_destinations(mut self) -> Self {
        self.check_destinations = false;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl std::fmt::Debug for ReqwestTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReqwestTransport")
            .field("timeout", &self.timeout)
            .field("check_destinations", &self.check_destinations)
            .finish()
    }
}

#[async_trait]
impl WebhookTransport for ReqwestTransport {
    async fn post(&self, url: &str, payload: &serde_json::Value) -> Result<u16> {
        if self.check_destinations {
            url_guard::validate_resolved(url)
                .await
                .map_err(|e| Error::delivery(format!("Refusing to deliver: {}", e)))?;
        }

        let response = self
            .client
            .post(url)
            .json(payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::delivery(format!("Timed out after {:?}", self.timeout))
                } else {
                    Error::delivery(format!("HTTP request failed: {}", e))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error response".to_string());
            let body: String = body.chars().take(200).collect();
            return Err(Error::delivery(format!("HTTP {}: {}", status, body)));
        }

        debug!("Webhook accepted with {}", status);
        Ok(status.as_u16())
    }

    fn transport_name(&self) -> &'static str {
        "http"
    }
}

/// Factory for creating HTTP transports
pub struct ReqwestTransportFactory;

impl WebhookTransportFactory for ReqwestTransportFactory {
    fn create(&self, config: &NotifierConfig) -> Result<Box<dyn WebhookTransport>> {
        Ok(Box::new(ReqwestTransport::new(config.timeout())?))
    }
}

/// Register the HTTP transport with a registry
pub fn register(registry: &ComponentRegistry) {
    registry.register_transport("http", Box::new(ReqwestTransportFactory));
}
