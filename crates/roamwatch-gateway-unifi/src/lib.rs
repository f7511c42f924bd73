// # UniFi Controller Gateway
//
// ControllerGateway implementation for the UniFi Network application,
// using its legacy (cookie session) API.
//
// ## Platforms
//
// - UniFi OS consoles (UDM, UCG, Cloud Key Gen2+): login at
//   `/api/auth/login`, Network API behind `/proxy/network`, and a CSRF
//   token on every write
// - Standalone controllers: login at `/api/login`, no prefix
//
// The platform can be configured or probed on first connect.
//
// ## Endpoints
//
// - Active clients: GET `/api/s/{site}/stat/sta`
// - AP/switch directory: GET `/api/s/{site}/stat/device`
// - Controller info: GET `/api/s/{site}/stat/sysinfo`
// - Block/unblock: POST `/api/s/{site}/cmd/stamgr`
//
// ## Caching
//
// The device directory and controller info change rarely and are read by
// several callers; both go through the shared ResultCache. Client lists
// are never cached.
//
// ## Security
//
// - The password never appears in logs or Debug output
// - TLS verification is off unless `verify_tls` is set, since most
//   consoles ship a self-signed certificate

mod models;

pub use models::ControllerInfo;

use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{debug, info, warn};

use roamwatch_core::config::GatewayConfig;
use roamwatch_core::traits::ControllerGatewayFactory;
use roamwatch_core::{
    ApDescriptor, ClientObservation, ComponentRegistry, ControllerGateway, Error, MacAddress,
    ResultCache, Result,
};

use models::{DirectoryEntry, Envelope, RawDevice};

/// Default HTTP timeout for controller requests (30 seconds)
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Controller flavour, which decides login path and URL prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    UnifiOs,
    Standalone,
}

impl Platform {
    fn login_path(&self) -> &'static str {
        match self {
            Platform::UnifiOs => "/api/auth/login",
            Platform::Standalone => "/api/login",
        }
    }

    fn api_prefix(&self) -> &'static str {
        match self {
            Platform::UnifiOs => "/proxy/network",
            Platform::Standalone => "",
        }
    }
}

/// Connection settings for [`UnifiGateway`]
#[derive(Clone)]
pub struct UnifiSettings {
    pub url: String,
    pub username: String,
    /// ⚠️ NEVER log this value
    pub password: String,
    pub site: String,
    /// `None` probes on first connect
    pub platform: Option<Platform>,
    pub verify_tls: bool,
    pub timeout: Duration,
}

impl UnifiSettings {
    /// Extract settings from a `GatewayConfig::Unifi`
    pub fn from_config(config: &GatewayConfig) -> Result<Self> {
        match config {
            GatewayConfig::Unifi {
                url,
                username,
                password,
                site,
                unifi_os,
                verify_tls,
            } => Ok(Self {
                url: url.trim_end_matches('/').to_string(),
                username: username.clone(),
                password: password.clone(),
                site: site.clone(),
                platform: unifi_os.map(|os| if os { Platform::UnifiOs } else { Platform::Standalone }),
                verify_tls: *verify_tls,
                timeout: DEFAULT_HTTP_TIMEOUT,
            }),
            other => Err(Error::config(format!(
                "UniFi gateway cannot be built from a '{}' config",
                other.type_name()
            ))),
        }
    }
}

impl std::fmt::Debug for UnifiSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnifiSettings")
            .field("url", &self.url)
            .field("username", &self.username)
            .field("password", &"<REDACTED>")
            .field("site", &self.site)
            .field("platform", &self.platform)
            .field("verify_tls", &self.verify_tls)
            .finish()
    }
}

/// UniFi Network controller gateway
///
/// Holds one cookie session. A rejected session is dropped and the next
/// call logs in again; nothing is retried within a call.
pub struct UnifiGateway {
    settings: UnifiSettings,
    client: reqwest::Client,
    cache: Arc<ResultCache>,
    platform: RwLock<Option<Platform>>,
    csrf_token: RwLock<Option<String>>,
    logged_in: AtomicBool,
}

impl std::fmt::Debug for UnifiGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnifiGateway")
            .field("settings", &self.settings)
            .field("logged_in", &self.logged_in.load(Ordering::Relaxed))
            .finish()
    }
}

// Lock contents are plain values, so a poisoned lock is still usable.
fn read<T: Clone>(lock: &RwLock<T>) -> T {
    lock.read().unwrap_or_else(|p| p.into_inner()).clone()
}

fn write<T>(lock: &RwLock<T>, value: T) {
    *lock.write().unwrap_or_else(|p| p.into_inner()) = value;
}

impl UnifiGateway {
    /// Create a new gateway
    ///
    /// No request is made until the first call.
    pub fn new(settings: UnifiSettings, cache: Arc<ResultCache>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(settings.timeout)
            .cookie_store(true)
            .danger_accept_invalid_certs(!settings.verify_tls)
            .build()
            .map_err(|e| Error::config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            platform: RwLock::new(settings.platform),
            settings,
            client,
            cache,
            csrf_token: RwLock::new(None),
            logged_in: AtomicBool::new(false),
        })
    }

    /// Detected or configured platform, if known yet
    pub fn platform(&self) -> Option<Platform> {
        read(&self.platform)
    }

    /// Controller version and name, cached for the default TTL
    pub async fn controller_info(&self) -> Result<ControllerInfo> {
        let key = format!("unifi:{}:sysinfo", self.settings.site);
        self.cache
            .get_or_fetch(&key, self.cache.default_ttl(), || async {
                let records = self.get_data("stat/sysinfo").await?;
                let info = records
                    .into_iter()
                    .next()
                    .map(serde_json::from_value::<ControllerInfo>)
                    .transpose()
                    .map_err(|e| Error::upstream(format!("Unexpected sysinfo payload: {}", e)))?;
                Ok::<_, Error>(info.unwrap_or_default())
            })
            .await
    }

    /// Probe `/api/auth/login`: anything but 404 means UniFi OS
    async fn detect_platform(&self) -> Result<Platform> {
        let url = format!("{}/api/auth/login", self.settings.url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::upstream(format!("Controller unreachable: {}", e)))?;

        let platform = if response.status() == reqwest::StatusCode::NOT_FOUND {
            Platform::Standalone
        } else {
            Platform::UnifiOs
        };
        debug!("Detected controller platform: {:?}", platform);
        Ok(platform)
    }

    async fn ensure_session(&self) -> Result<Platform> {
        match self.platform() {
            Some(platform) if self.logged_in.load(Ordering::Acquire) => Ok(platform),
            _ => self.login().await,
        }
    }

    async fn login(&self) -> Result<Platform> {
        let platform = match self.platform() {
            Some(platform) => platform,
            None => {
                let detected = self.detect_platform().await?;
                write(&self.platform, Some(detected));
                detected
            }
        };

        let url = format!("{}{}", self.settings.url, platform.login_path());
        debug!("Logging in to controller at {}", url);

        let body = json!({
            "username": self.settings.username,
            "password": self.settings.password,
            "remember": true,
        });
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::upstream(format!("Login request failed: {}", e)))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(Error::auth(format!("Controller rejected credentials ({})", status)));
        }
        if !status.is_success() {
            return Err(Error::upstream(format!("Login failed: HTTP {}", status)));
        }

        if let Some(token) = csrf_from(response.headers()) {
            write(&self.csrf_token, Some(token));
        }
        self.logged_in.store(true, Ordering::Release);
        info!("Logged in to UniFi controller ({:?})", platform);

        Ok(platform)
    }

    fn site_url(&self, platform: Platform, path: &str) -> String {
        format!(
            "{}{}/api/s/{}/{}",
            self.settings.url,
            platform.api_prefix(),
            self.settings.site,
            path
        )
    }

    async fn get_data(&self, path: &str) -> Result<Vec<serde_json::Value>> {
        let platform = self.ensure_session().await?;
        let url = self.site_url(platform, path);
        debug!("GET {}", url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::upstream(format!("GET {} failed: {}", path, e)))?;
        self.unwrap_envelope(path, response).await
    }

    async fn post_data(&self, path: &str, body: &serde_json::Value) -> Result<Vec<serde_json::Value>> {
        let platform = self.ensure_session().await?;
        let url = self.site_url(platform, path);
        debug!("POST {}", url);

        let mut request = self.client.post(&url).json(body);
        if let Some(token) = read(&self.csrf_token) {
            request = request.header("X-CSRF-Token", token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::upstream(format!("POST {} failed: {}", path, e)))?;
        self.unwrap_envelope(path, response).await
    }

    /// Check status and `meta.rc`, returning `data`
    async fn unwrap_envelope(
        &self,
        path: &str,
        response: reqwest::Response,
    ) -> Result<Vec<serde_json::Value>> {
        if let Some(token) = response
            .headers()
            .get("X-Updated-CSRF-Token")
            .and_then(|v| v.to_str().ok())
        {
            write(&self.csrf_token, Some(token.to_string()));
        }

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            // Session expired; the next call logs in again
            self.logged_in.store(false, Ordering::Release);
            return Err(Error::auth(format!("Session rejected for {}", path)));
        }
        if !status.is_success() {
            let text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error response".to_string());
            return Err(Error::upstream(format!("{} returned {}: {}", path, status, text)));
        }

        let envelope: Envelope = response
            .json()
            .await
            .map_err(|e| Error::upstream(format!("Unexpected {} payload: {}", path, e)))?;

        if envelope.meta.rc != "ok" {
            let msg = envelope.meta.msg.unwrap_or_else(|| format!("rc={}", envelope.meta.rc));
            if msg.contains("LoginRequired") {
                self.logged_in.store(false, Ordering::Release);
                return Err(Error::auth(format!("{}: {}", path, msg)));
            }
            return Err(Error::upstream(format!("{}: {}", path, msg)));
        }

        Ok(envelope.data)
    }

    /// AP/switch names by MAC, cached for the default TTL
    async fn directory(&self) -> Result<HashMap<MacAddress, DirectoryEntry>> {
        let key = format!("unifi:{}:devices", self.settings.site);
        let by_mac: HashMap<String, DirectoryEntry> = self
            .cache
            .get_or_fetch(&key, self.cache.default_ttl(), || async {
                let records = self.get_data("stat/device").await?;
                let mut by_mac = HashMap::with_capacity(records.len());
                for record in records {
                    match serde_json::from_value::<RawDevice>(record) {
                        Ok(device) => match MacAddress::parse(&device.mac) {
                            Ok(mac) => {
                                by_mac.insert(
                                    mac.to_string(),
                                    DirectoryEntry {
                                        name: device.name,
                                        model: device.model,
                                    },
                                );
                            }
                            Err(e) => warn!("Skipping device with bad MAC: {}", e),
                        },
                        Err(e) => warn!("Skipping unreadable device record: {}", e),
                    }
                }
                Ok::<_, Error>(by_mac)
            })
            .await?;

        Ok(by_mac
            .into_iter()
            .filter_map(|(mac, entry)| MacAddress::parse(&mac).ok().map(|mac| (mac, entry)))
            .collect())
    }
}

fn csrf_from(headers: &reqwest::header::HeaderMap) -> Option<String> {
    headers
        .get("X-CSRF-Token")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

#[async_trait]
impl ControllerGateway for UnifiGateway {
    async fn connect(&self) -> Result<()> {
        self.logged_in.store(false, Ordering::Release);
        self.login().await.map(|_| ())
    }

    async fn list_active_clients(&self) -> Result<Vec<ClientObservation>> {
        let records = self.get_data("stat/sta").await?;
        Ok(models::parse_clients(records))
    }

    async fn resolve_ap(&self, mac: &MacAddress) -> Result<ApDescriptor> {
        let directory = self.directory().await?;
        directory
            .get(mac)
            .map(|entry| ApDescriptor {
                name: entry.name.clone(),
                model: entry.model.clone(),
            })
            .ok_or_else(|| Error::not_found(format!("No adopted device with MAC {}", mac)))
    }

    async fn set_client_blocked(&self, mac: &MacAddress, blocked: bool) -> Result<()> {
        let cmd = if blocked { "block-sta" } else { "unblock-sta" };
        self.post_data("cmd/stamgr", &json!({ "cmd": cmd, "mac": mac.as_str() }))
            .await?;
        info!("Controller accepted {} for {}", cmd, mac);
        Ok(())
    }

    fn gateway_name(&self) -> &'static str {
        "unifi"
    }
}

/// Factory for creating UniFi gateways
pub struct UnifiGatewayFactory;

impl ControllerGatewayFactory for UnifiGatewayFactory {
    fn create(
        &self,
        config: &GatewayConfig,
        cache: Arc<ResultCache>,
    ) -> Result<Box<dyn ControllerGateway>> {
        let settings = UnifiSettings::from_config(config)?;
        Ok(Box::new(UnifiGateway::new(settings, cache)?))
    }
}

/// Register the UniFi gateway with a registry
pub fn register(registry: &ComponentRegistry) {
    registry.register_gateway("unifi", Box::new(UnifiGatewayFactory));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> GatewayConfig {
        GatewayConfig::Unifi {
            url: "https://192.168.1.1/".into(),
            username: "admin".into(),
            password: "hunter2".into(),
            site: "default".into(),
            unifi_os: Some(true),
            verify_tls: false,
        }
    }

    #[test]
    fn settings_from_config() {
        let settings = UnifiSettings::from_config(&config()).unwrap();
        assert_eq!(settings.url, "https://192.168.1.1");
        assert_eq!(settings.platform, Some(Platform::UnifiOs));
        assert_eq!(settings.timeout, DEFAULT_HTTP_TIMEOUT);
    }

    #[test]
    fn custom_config_is_rejected() {
        let custom = GatewayConfig::Custom {
            factory: "other".into(),
            config: serde_json::json!({}),
        };
        assert!(UnifiSettings::from_config(&custom).is_err());
    }

    #[test]
    fn password_not_exposed_in_debug() {
        let cache = Arc::new(ResultCache::new(Duration::from_secs(30)));
        let gateway = UnifiGateway::new(UnifiSettings::from_config(&config()).unwrap(), cache).unwrap();
        let debug = format!("{:?}", gateway);
        assert!(!debug.contains("hunter2"), "password leaked: {}", debug);
        assert!(debug.contains("<REDACTED>"));
    }

    #[test]
    fn site_urls_follow_platform() {
        let cache = Arc::new(ResultCache::new(Duration::from_secs(30)));
        let gateway = UnifiGateway::new(UnifiSettings::from_config(&config()).unwrap(), cache).unwrap();
        assert_eq!(
            gateway.site_url(Platform::UnifiOs, "stat/sta"),
            "https://192.168.1.1/proxy/network/api/s/default/stat/sta"
        );
        assert_eq!(
            gateway.site_url(Platform::Standalone, "stat/sta"),
            "https://192.168.1.1/api/s/default/stat/sta"
        );
    }

    #[test]
    fn factory_registration() {
        let registry = ComponentRegistry::new();
        register(&registry);
        assert!(registry.has_gateway("unifi"));

        let cache = Arc::new(ResultCache::new(Duration::from_secs(30)));
        let gateway = registry.create_gateway(&config(), cache).unwrap();
        assert_eq!(gateway.gateway_name(), "unifi");
    }
}
