//! Configuration types for the tracker
//!
//! This module defines all configuration structures used throughout the crate.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::time::Duration;

use crate::model::EventKind;

/// Main tracker configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// Controller gateway configuration
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Device store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Optional engine settings
    #[serde(default)]
    pub engine: EngineConfig,

    /// Result cache settings
    #[serde(default)]
    pub cache: CacheConfig,

    /// Webhook delivery settings
    #[serde(default)]
    pub notifier: NotifierConfig,

    /// Webhook endpoints to notify
    #[serde(default)]
    pub webhooks: Vec<WebhookEndpoint>,
}

impl TrackerConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        self.gateway.validate()?;
        self.store.validate()?;
        self.engine.validate()?;
        self.cache.validate()?;
        self.notifier.validate()?;

        let mut names = HashSet::new();
        for endpoint in &self.webhooks {
            endpoint.validate()?;
            if !names.insert(endpoint.name.as_str()) {
                return Err(crate::Error::config(format!(
                    "Duplicate webhook endpoint name: {}",
                    endpoint.name
                )));
            }
        }

        Ok(())
    }
}

/// Controller gateway configuration
#[derive(Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GatewayConfig {
    /// UniFi Network controller
    Unifi {
        /// Controller base URL (e.g., "https://192.168.1.1")
        url: String,
        username: String,
        password: String,
        /// Site name
        #[serde(default = "default_site")]
        site: String,
        /// UniFi OS console (UDM/UCG) rather than a standalone controller.
        /// `None` probes on first connect.
        #[serde(default)]
        unifi_os: Option<bool>,
        /// Verify the controller's TLS certificate
        #[serde(default)]
        verify_tls: bool,
    },

    /// Custom gateway
    Custom {
        /// Factory name to use
        factory: String,
        /// Custom configuration data
        config: serde_json::Value,
    },
}

impl GatewayConfig {
    /// Validate the gateway configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        match self {
            GatewayConfig::Unifi {
                url,
                username,
                password,
                site,
                ..
            } => {
                if url.is_empty() {
                    return Err(crate::Error::config("Controller URL cannot be empty"));
                }
                if !(url.starts_with("http://") || url.starts_with("https://")) {
                    return Err(crate::Error::config(
                        "Controller URL must start with http:// or https://",
                    ));
                }
                if username.is_empty() || password.is_empty() {
                    return Err(crate::Error::config(
                        "Controller username and password are required",
                    ));
                }
                if site.is_empty() {
                    return Err(crate::Error::config("Controller site cannot be empty"));
                }
                Ok(())
            }
            GatewayConfig::Custom { factory, config } => {
                if factory.is_empty() {
                    return Err(crate::Error::config("Custom gateway factory cannot be empty"));
                }
                if config.is_null() {
                    return Err(crate::Error::config("Custom gateway config cannot be null"));
                }
                Ok(())
            }
        }
    }

    /// Get the gateway type name
    pub fn type_name(&self) -> &str {
        match self {
            GatewayConfig::Unifi { .. } => "unifi",
            GatewayConfig::Custom { factory, .. } => factory,
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        GatewayConfig::Unifi {
            url: String::new(),
            username: String::new(),
            password: String::new(),
            site: default_site(),
            unifi_os: None,
            verify_tls: false,
        }
    }
}

// Hand-written so the password never reaches logs
impl fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GatewayConfig::Unifi {
                url,
                username,
                site,
                unifi_os,
                verify_tls,
                ..
            } => f
                .debug_struct("Unifi")
                .field("url", url)
                .field("username", username)
                .field("password", &"<REDACTED>")
                .field("site", site)
                .field("unifi_os", unifi_os)
                .field("verify_tls", verify_tls)
                .finish(),
            GatewayConfig::Custom { factory, .. } => f
                .debug_struct("Custom")
                .field("factory", factory)
                .field("config", &"<REDACTED>")
                .finish(),
        }
    }
}

fn default_site() -> String {
    "default".to_string()
}

/// Device store configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StoreConfig {
    /// JSON file store
    File {
        /// Path to the store file
        path: String,
    },

    /// In-memory store (not persistent)
    #[default]
    Memory,

    /// Custom store
    Custom {
        /// Factory name to use
        factory: String,
        /// Custom configuration data
        config: serde_json::Value,
    },
}

impl StoreConfig {
    pub fn validate(&self) -> Result<(), crate::Error> {
        match self {
            StoreConfig::File { path } if path.is_empty() => {
                Err(crate::Error::config("File store path cannot be empty"))
            }
            StoreConfig::Custom { factory, .. } if factory.is_empty() => {
                Err(crate::Error::config("Custom store factory cannot be empty"))
            }
            _ => Ok(()),
        }
    }

    /// Get the store type name
    pub fn type_name(&self) -> &str {
        match self {
            StoreConfig::File { .. } => "file",
            StoreConfig::Memory => "memory",
            StoreConfig::Custom { factory, .. } => factory,
        }
    }
}

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Interval between scheduled cycles (in seconds)
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Upper bound on the controller fetch (in seconds)
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,

    /// Upper bound on the store commit (in seconds)
    #[serde(default = "default_commit_timeout_secs")]
    pub commit_timeout_secs: u64,

    /// A manual trigger arriving within this window after a completed cycle
    /// receives that cycle's result instead of running a new one.
    ///
    /// Set to 0 to coalesce only with a cycle that was already in flight.
    #[serde(default = "default_coalesce_window_ms")]
    pub coalesce_window_ms: u64,

    /// Capacity of the notification queue
    ///
    /// When full, new events are dropped (with a warning log).
    /// This prevents unbounded memory growth when endpoints are slow.
    ///
    /// Default: 1000 events
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,

    /// Default page size for history queries
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.poll_interval_secs == 0 {
            return Err(crate::Error::config("Poll interval must be > 0"));
        }
        if self.fetch_timeout_secs == 0 || self.commit_timeout_secs == 0 {
            return Err(crate::Error::config("Fetch and commit timeouts must be > 0"));
        }
        if self.event_channel_capacity == 0 {
            return Err(crate::Error::config("Event channel capacity must be > 0"));
        }
        if self.history_limit == 0 {
            return Err(crate::Error::config("History limit must be > 0"));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn commit_timeout(&self) -> Duration {
        Duration::from_secs(self.commit_timeout_secs)
    }

    pub fn coalesce_window(&self) -> Duration {
        Duration::from_millis(self.coalesce_window_ms)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            commit_timeout_secs: default_commit_timeout_secs(),
            coalesce_window_ms: default_coalesce_window_ms(),
            event_channel_capacity: default_event_channel_capacity(),
            history_limit: default_history_limit(),
        }
    }
}

fn default_poll_interval_secs() -> u64 {
    60
}

fn default_fetch_timeout_secs() -> u64 {
    30
}

fn default_commit_timeout_secs() -> u64 {
    10
}

fn default_coalesce_window_ms() -> u64 {
    2000
}

fn default_event_channel_capacity() -> usize {
    1000
}

fn default_history_limit() -> usize {
    100
}

/// Result cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// TTL applied when a caller does not pass one (in seconds)
    #[serde(default = "default_ttl_secs")]
    pub default_ttl_secs: u64,
}

impl CacheConfig {
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.default_ttl_secs == 0 {
            return Err(crate::Error::config("Cache TTL must be > 0"));
        }
        Ok(())
    }

    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: default_ttl_secs(),
        }
    }
}

fn default_ttl_secs() -> u64 {
    30
}

/// Webhook transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifierConfig {
    /// Transport factory name
    #[serde(default = "default_transport")]
    pub transport: String,

    /// Per-request timeout (in seconds)
    #[serde(default = "default_webhook_timeout_secs")]
    pub timeout_secs: u64,
}

impl NotifierConfig {
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.transport.is_empty() {
            return Err(crate::Error::config("Webhook transport cannot be empty"));
        }
        if self.timeout_secs == 0 {
            return Err(crate::Error::config("Webhook timeout must be > 0"));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            transport: default_transport(),
            timeout_secs: default_webhook_timeout_secs(),
        }
    }
}

fn default_transport() -> String {
    "http".to_string()
}

fn default_webhook_timeout_secs() -> u64 {
    10
}

/// Payload flavour of a webhook endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WebhookKind {
    /// Slack incoming webhook (attachments)
    Slack,
    /// Discord webhook (embeds)
    Discord,
    /// Plain JSON payload (n8n, Home Assistant, custom receivers)
    #[serde(alias = "n8n")]
    Generic,
}

impl WebhookKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookKind::Slack => "slack",
            WebhookKind::Discord => "discord",
            WebhookKind::Generic => "generic",
        }
    }
}

/// Which event kinds an endpoint receives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventFilter {
    #[serde(default = "default_enabled")]
    pub connected: bool,
    #[serde(default = "default_enabled")]
    pub disconnected: bool,
    #[serde(default = "default_enabled")]
    pub roamed: bool,
    #[serde(default)]
    pub blocked: bool,
    #[serde(default)]
    pub unblocked: bool,
}

impl EventFilter {
    /// Subscribe to every event kind
    pub fn all() -> Self {
        Self {
            connected: true,
            disconnected: true,
            roamed: true,
            blocked: true,
            unblocked: true,
        }
    }

    pub fn accepts(&self, kind: EventKind) -> bool {
        match kind {
            EventKind::Connected => self.connected,
            EventKind::Disconnected => self.disconnected,
            EventKind::Roamed => self.roamed,
            EventKind::Blocked => self.blocked,
            EventKind::Unblocked => self.unblocked,
        }
    }
}

impl Default for EventFilter {
    fn default() -> Self {
        Self {
            connected: true,
            disconnected: true,
            roamed: true,
            blocked: false,
            unblocked: false,
        }
    }
}

fn default_enabled() -> bool {
    true
}

/// One configured webhook destination
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEndpoint {
    /// Unique endpoint name
    pub name: String,

    /// Payload format
    #[serde(default = "default_kind")]
    pub kind: WebhookKind,

    /// Destination URL
    pub url: String,

    /// Event subscriptions
    #[serde(default)]
    pub events: EventFilter,

    /// Whether this endpoint is enabled
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl WebhookEndpoint {
    /// Create a new endpoint with default subscriptions
    pub fn new(name: impl Into<String>, kind: WebhookKind, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            url: url.into(),
            events: EventFilter::default(),
            enabled: true,
        }
    }

    /// Set the event subscriptions
    pub fn with_events(mut self, events: EventFilter) -> Self {
        self.events = events;
        self
    }

    /// Enable or disable the endpoint
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// True if this endpoint should receive `kind`
    pub fn wants(&self, kind: EventKind) -> bool {
        self.enabled && self.events.accepts(kind)
    }

    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.name.trim().is_empty() {
            return Err(crate::Error::config("Webhook endpoint name cannot be empty"));
        }
        crate::url_guard::validate_webhook_url(&self.url)
            .map(|_| ())
            .map_err(|e| {
                crate::Error::config(format!("Webhook endpoint '{}': {}", self.name, e))
            })
    }
}

fn default_kind() -> WebhookKind {
    WebhookKind::Generic
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_defaults() {
        let engine = EngineConfig::default();
        assert_eq!(engine.poll_interval_secs, 60);
        assert_eq!(engine.fetch_timeout_secs, 30);
        assert_eq!(engine.coalesce_window(), Duration::from_millis(2000));
        assert_eq!(CacheConfig::default().default_ttl_secs, 30);
        assert_eq!(NotifierConfig::default().timeout(), Duration::from_secs(10));
    }

    #[test]
    fn webhook_endpoint_deserializes_with_defaults() {
        let endpoint: WebhookEndpoint = serde_json::from_value(serde_json::json!({
            "name": "automation",
            "kind": "n8n",
            "url": "https://hooks.example.com/roam"
        }))
        .unwrap();

        assert_eq!(endpoint.kind, WebhookKind::Generic);
        assert!(endpoint.enabled);
        assert!(endpoint.wants(EventKind::Roamed));
        assert!(!endpoint.wants(EventKind::Blocked));
        assert!(endpoint.validate().is_ok());
    }

    #[test]
    fn disabled_endpoint_wants_nothing() {
        let endpoint = WebhookEndpoint::new("s", WebhookKind::Slack, "https://hooks.slack.com/x")
            .with_events(EventFilter::all())
            .with_enabled(false);
        assert!(!endpoint.wants(EventKind::Connected));
    }

    #[test]
    fn rejects_private_webhook_target() {
        let endpoint = WebhookEndpoint::new("lan", WebhookKind::Generic, "http://192.168.1.10/hook");
        assert!(matches!(endpoint.validate(), Err(crate::Error::Config(_))));
    }

    #[test]
    fn rejects_duplicate_endpoint_names() {
        let mut config = TrackerConfig {
            gateway: GatewayConfig::Unifi {
                url: "https://192.168.1.1".into(),
                username: "admin".into(),
                password: "secret".into(),
                site: "default".into(),
                unifi_os: None,
                verify_tls: false,
            },
            ..Default::default()
        };
        assert!(config.validate().is_ok());

        let hook = WebhookEndpoint::new("dup", WebhookKind::Discord, "https://discord.com/api/webhooks/1");
        config.webhooks = vec![hook.clone(), hook];
        assert!(config.validate().is_err());
    }

    #[test]
    fn gateway_debug_redacts_password() {
        let gateway = GatewayConfig::Unifi {
            url: "https://192.168.1.1".into(),
            username: "admin".into(),
            password: "hunter2".into(),
            site: "default".into(),
            unifi_os: Some(true),
            verify_tls: false,
        };
        let debug = format!("{:?}", gateway);
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("<REDACTED>"));
    }

    #[test]
    fn store_config_tagged() {
        let store: StoreConfig =
            serde_json::from_value(serde_json::json!({"type": "file", "path": "/var/lib/rw.json"}))
                .unwrap();
        assert_eq!(store.type_name(), "file");
        assert!(StoreConfig::File { path: String::new() }.validate().is_err());
    }
}
