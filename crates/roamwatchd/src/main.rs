// # roamwatchd - Device Presence Daemon
//
// Thin integration layer: all tracking logic lives in roamwatch-core.
//
// The daemon is responsible for:
// 1. Reading configuration from environment variables
// 2. Initializing logging and the runtime
// 3. Registering the gateway, store and transport factories
// 4. Seeding the registry and starting the reconciliation engine
// 5. Flushing and draining on SIGTERM/SIGINT
//
// ## Configuration
//
// All configuration is done via environment variables:
//
// ### Controller
// - `ROAMWATCH_GATEWAY_URL`: Controller base URL (https://192.168.1.1)
// - `ROAMWATCH_GATEWAY_USERNAME`: Local controller account
// - `ROAMWATCH_GATEWAY_PASSWORD`: Password for that account
// - `ROAMWATCH_GATEWAY_SITE`: Site name (default: default)
// - `ROAMWATCH_GATEWAY_UNIFI_OS`: true for UDM/UCG consoles, false for a
//   standalone controller, unset to probe
// - `ROAMWATCH_GATEWAY_VERIFY_TLS`: Verify the controller certificate (default: false)
//
// ### Device Store
// - `ROAMWATCH_STORE_TYPE`: Type of store (file, memory)
// - `ROAMWATCH_STORE_PATH`: Path to the registry file (for file store)
//
// ### Engine
// - `ROAMWATCH_POLL_INTERVAL_SECS`: Seconds between scheduled cycles (default: 60)
// - `ROAMWATCH_FETCH_TIMEOUT_SECS`: Controller fetch deadline (default: 30)
// - `ROAMWATCH_CACHE_TTL_SECS`: Result cache TTL (default: 30)
//
// ### Notifications
// - `ROAMWATCH_WEBHOOKS`: JSON array of webhook endpoints
// - `ROAMWATCH_WEBHOOK_TIMEOUT_SECS`: Per-POST timeout (default: 10)
//
// ### Tracking
// - `ROAMWATCH_TRACK`: Comma-separated `mac=Name` pairs registered at startup
//
// ## Example
//
// ```bash
// export ROAMWATCH_GATEWAY_URL=https://192.168.1.1
// export ROAMWATCH_GATEWAY_USERNAME=roamwatch
// export ROAMWATCH_GATEWAY_PASSWORD=...
// export ROAMWATCH_STORE_TYPE=file
// export ROAMWATCH_STORE_PATH=/var/lib/roamwatch/devices.json
// export ROAMWATCH_TRACK="aa:bb:cc:dd:ee:ff=Alice's phone"
// export ROAMWATCH_WEBHOOKS='[{"name":"home","kind":"generic","url":"https://hooks.example.net/roam"}]'
//
// roamwatchd
// ```

use anyhow::Result;
use std::env;
use std::process::ExitCode;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio_stream::StreamExt;
use tracing::{Level, debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

use roamwatch_core::{
    CacheConfig, ComponentRegistry, ControllerGateway, DeviceStore, EngineConfig, Error,
    GatewayConfig, Notifier, NotifierConfig, ReconciliationEngine, ResultCache, StoreConfig,
    TrackerConfig, TrackerService, WebhookEndpoint, WebhookTransport, url_guard,
};

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

/// Exit codes for different termination scenarios
///
/// These codes follow systemd conventions:
/// - 0: Clean shutdown
/// - 1: Configuration or startup error
/// - 2: Runtime error (unexpected)
#[derive(Debug, Clone, Copy)]
enum RoamwatchExitCode {
    /// Clean shutdown (normal exit)
    CleanShutdown = 0,
    /// Configuration error or startup failure
    ConfigError = 1,
    /// Runtime error (unexpected failure)
    RuntimeError = 2,
}

impl From<RoamwatchExitCode> for ExitCode {
    fn from(code: RoamwatchExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

/// Application configuration
struct Config {
    gateway_url: String,
    gateway_username: String,
    gateway_password: String,
    gateway_site: String,
    gateway_unifi_os: Option<bool>,
    gateway_verify_tls: bool,
    store_type: String,
    store_path: Option<String>,
    poll_interval_secs: u64,
    fetch_timeout_secs: u64,
    cache_ttl_secs: u64,
    webhook_timeout_secs: u64,
    webhooks: Vec<WebhookEndpoint>,
    track: Vec<(String, String)>,
    log_level: String,
}

impl Config {
    /// Load configuration from environment variables
    fn from_env() -> Result<Self> {
        let webhooks = match env::var("ROAMWATCH_WEBHOOKS") {
            Ok(raw) if !raw.trim().is_empty() => serde_json::from_str(&raw)
                .map_err(|e| anyhow::anyhow!("ROAMWATCH_WEBHOOKS is not a valid JSON array: {}", e))?,
            _ => Vec::new(),
        };

        Ok(Self {
            gateway_url: env::var("ROAMWATCH_GATEWAY_URL").unwrap_or_default(),
            gateway_username: env::var("ROAMWATCH_GATEWAY_USERNAME").unwrap_or_default(),
            gateway_password: env::var("ROAMWATCH_GATEWAY_PASSWORD").unwrap_or_default(),
            gateway_site: env::var("ROAMWATCH_GATEWAY_SITE")
                .unwrap_or_else(|_| "default".to_string()),
            gateway_unifi_os: env_parse::<bool>("ROAMWATCH_GATEWAY_UNIFI_OS")?,
            gateway_verify_tls: env_parse::<bool>("ROAMWATCH_GATEWAY_VERIFY_TLS")?
                .unwrap_or(false),
            store_type: env::var("ROAMWATCH_STORE_TYPE").unwrap_or_else(|_| "file".to_string()),
            store_path: env::var("ROAMWATCH_STORE_PATH").ok(),
            poll_interval_secs: env_parse("ROAMWATCH_POLL_INTERVAL_SECS")?.unwrap_or(60),
            fetch_timeout_secs: env_parse("ROAMWATCH_FETCH_TIMEOUT_SECS")?.unwrap_or(30),
            cache_ttl_secs: env_parse("ROAMWATCH_CACHE_TTL_SECS")?.unwrap_or(30),
            webhook_timeout_secs: env_parse("ROAMWATCH_WEBHOOK_TIMEOUT_SECS")?.unwrap_or(10),
            webhooks,
            track: parse_track_list(&env::var("ROAMWATCH_TRACK").unwrap_or_default())?,
            log_level: env::var("ROAMWATCH_LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }

    /// Validate the configuration
    ///
    /// Checks what the core config cannot know about: variable presence,
    /// numeric ranges, the store path on disk, and the log level.
    fn validate(&self) -> Result<()> {
        if self.gateway_url.is_empty() {
            anyhow::bail!(
                "ROAMWATCH_GATEWAY_URL is required. \
                Set it via: export ROAMWATCH_GATEWAY_URL=https://192.168.1.1"
            );
        }

        if self.gateway_username.is_empty() || self.gateway_password.is_empty() {
            anyhow::bail!(
                "ROAMWATCH_GATEWAY_USERNAME and ROAMWATCH_GATEWAY_PASSWORD are required. \
                Use a local controller account, not a cloud SSO login."
            );
        }

        if self.gateway_url.starts_with("http://") {
            eprintln!(
                "WARNING: ROAMWATCH_GATEWAY_URL uses HTTP (not HTTPS). \
                      Controller credentials will be sent in clear text."
            );
        }

        match self.store_type.as_str() {
            "file" | "memory" => {}
            _ => anyhow::bail!(
                "ROAMWATCH_STORE_TYPE '{}' is not supported. \
                Supported types: file, memory",
                self.store_type
            ),
        }

        if self.store_type == "file" {
            let Some(ref path) = self.store_path else {
                anyhow::bail!(
                    "ROAMWATCH_STORE_PATH is required when ROAMWATCH_STORE_TYPE=file. \
                    Set it via: export ROAMWATCH_STORE_PATH=/var/lib/roamwatch/devices.json"
                );
            };

            if path.is_empty() {
                anyhow::bail!("ROAMWATCH_STORE_PATH cannot be empty when ROAMWATCH_STORE_TYPE=file");
            }

            if let Some(parent) = std::path::Path::new(path).parent()
                && !parent.as_os_str().is_empty()
                && !parent.exists()
            {
                anyhow::bail!(
                    "ROAMWATCH_STORE_PATH parent directory does not exist: {}. \
                        Create it first: sudo mkdir -p {}",
                    parent.display(),
                    parent.display()
                );
            }
        }

        if !(5..=3600).contains(&self.poll_interval_secs) {
            anyhow::bail!(
                "ROAMWATCH_POLL_INTERVAL_SECS must be between 5 and 3600 seconds. Got: {}",
                self.poll_interval_secs
            );
        }

        if !(1..=300).contains(&self.fetch_timeout_secs) {
            anyhow::bail!(
                "ROAMWATCH_FETCH_TIMEOUT_SECS must be between 1 and 300 seconds. Got: {}",
                self.fetch_timeout_secs
            );
        }

        if !(1..=120).contains(&self.webhook_timeout_secs) {
            anyhow::bail!(
                "ROAMWATCH_WEBHOOK_TIMEOUT_SECS must be between 1 and 120 seconds. Got: {}",
                self.webhook_timeout_secs
            );
        }

        match self.log_level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!(
                "ROAMWATCH_LOG_LEVEL '{}' is not valid. \
                Valid levels: trace, debug, info, warn, error",
                self.log_level
            ),
        }

        // Everything else is checked by the core's own validation
        self.tracker_config().validate()?;

        Ok(())
    }

    /// Build the core configuration
    fn tracker_config(&self) -> TrackerConfig {
        let store = match self.store_type.as_str() {
            "file" => StoreConfig::File {
                path: self.store_path.clone().unwrap_or_default(),
            },
            _ => StoreConfig::Memory,
        };

        TrackerConfig {
            gateway: GatewayConfig::Unifi {
                url: self.gateway_url.clone(),
                username: self.gateway_username.clone(),
                password: self.gateway_password.clone(),
                site: self.gateway_site.clone(),
                unifi_os: self.gateway_unifi_os,
                verify_tls: self.gateway_verify_tls,
            },
            store,
            engine: EngineConfig {
                poll_interval_secs: self.poll_interval_secs,
                fetch_timeout_secs: self.fetch_timeout_secs,
                ..EngineConfig::default()
            },
            cache: CacheConfig {
                default_ttl_secs: self.cache_ttl_secs,
            },
            notifier: NotifierConfig {
                timeout_secs: self.webhook_timeout_secs,
                ..NotifierConfig::default()
            },
            webhooks: self.webhooks.clone(),
        }
    }
}

/// Read and parse an optional environment variable
fn env_parse<T: FromStr>(name: &str) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("{} has an invalid value '{}': {}", name, raw, e)),
        _ => Ok(None),
    }
}

/// Parse `mac=Name,mac=Name`. MACs are validated later by the registry.
fn parse_track_list(raw: &str) -> Result<Vec<(String, String)>> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| match entry.split_once('=') {
            Some((mac, name)) if !mac.trim().is_empty() && !name.trim().is_empty() => {
                Ok((mac.trim().to_string(), name.trim().to_string()))
            }
            _ => anyhow::bail!(
                "ROAMWATCH_TRACK entry '{}' must look like aa:bb:cc:dd:ee:ff=Name",
                entry
            ),
        })
        .collect()
}

fn main() -> ExitCode {
    // Load configuration from environment
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return RoamwatchExitCode::ConfigError.into();
        }
    };

    // Validate configuration
    if let Err(e) = config.validate() {
        eprintln!("Configuration validation error: {}", e);
        return RoamwatchExitCode::ConfigError.into();
    }

    // Initialize tracing
    let log_level = match config.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder().with_max_level(log_level).finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return RoamwatchExitCode::ConfigError.into();
    }

    info!("Starting roamwatchd daemon");
    info!(
        "Configuration loaded: {} webhook(s), {} device(s) to seed",
        config.webhooks.len(),
        config.track.len()
    );

    // Enter tokio runtime
    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return RoamwatchExitCode::RuntimeError.into();
        }
    };

    let result = rt.block_on(async {
        match run_daemon(config).await {
            Ok(()) => RoamwatchExitCode::CleanShutdown,
            Err(e) if is_startup_error(&e) => {
                error!("Startup error: {}", e);
                RoamwatchExitCode::ConfigError
            }
            Err(e) => {
                error!("Daemon error: {}", e);
                RoamwatchExitCode::RuntimeError
            }
        }
    });

    result.into()
}

fn is_startup_error(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<Error>(),
        Some(Error::Config(_) | Error::InvalidMac(_) | Error::InvalidInput(_))
    )
}

/// Run the daemon
async fn run_daemon(config: Config) -> Result<()> {
    let tracker = config.tracker_config();

    // Re-check webhook hosts now that DNS is available
    for endpoint in tracker.webhooks.iter().filter(|e| e.enabled) {
        url_guard::validate_resolved(&endpoint.url).await?;
        info!("Webhook '{}' ({})", endpoint.name, endpoint.kind.as_str());
    }

    let registry = ComponentRegistry::with_builtin_stores();

    #[cfg(feature = "unifi")]
    {
        info!("Registering UniFi gateway");
        roamwatch_gateway_unifi::register(&registry);
    }

    #[cfg(feature = "webhook")]
    {
        info!("Registering HTTP webhook transport");
        roamwatch_notify_webhook::register(&registry);
    }

    let cache = Arc::new(ResultCache::from_config(&tracker.cache));

    let gateway: Arc<dyn ControllerGateway> =
        Arc::from(registry.create_gateway(&tracker.gateway, Arc::clone(&cache))?);
    let store: Arc<dyn DeviceStore> = Arc::from(registry.create_store(&tracker.store).await?);
    let transport: Arc<dyn WebhookTransport> =
        Arc::from(registry.create_transport(&tracker.notifier)?);

    info!("Gateway type: {}", tracker.gateway.type_name());
    info!("Store type: {}", tracker.store.type_name());

    // A controller that is down at boot is not fatal; every cycle reconnects on demand
    match gateway.connect().await {
        Ok(()) => info!("Connected to controller"),
        Err(Error::Authentication(msg)) => {
            return Err(Error::config(format!("Controller rejected the credentials: {}", msg)).into());
        }
        Err(e) => warn!("Controller not reachable yet: {}", e),
    }

    let notifier = Notifier::spawn(
        tracker.webhooks.clone(),
        transport,
        tracker.engine.event_channel_capacity,
    );

    let engine = Arc::new(
        ReconciliationEngine::new(gateway, store, tracker.engine.clone())?
            .with_notifier(notifier.clone()),
    );
    let service = TrackerService::new(Arc::clone(&engine));

    for (mac, name) in &config.track {
        match service.add_tracked_device(mac, name).await {
            Ok(device) => info!("Tracking {} as '{}' (id {})", device.mac, device.name, device.id),
            Err(Error::DuplicateDevice(_)) => debug!("{} already tracked", mac),
            Err(e) => return Err(e.into()),
        }
    }

    let mut live = service.subscribe_live();
    tokio::spawn(async move {
        while let Some(snapshot) = live.next().await {
            let online = snapshot.devices.iter().filter(|d| d.is_connected).count();
            debug!(
                "Live snapshot at {}: {}/{} tracked devices online",
                snapshot.taken_at,
                online,
                snapshot.devices.len()
            );
        }
    });

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    tokio::spawn(async move {
        match wait_for_shutdown().await {
            Ok(signal) => info!("Received shutdown signal: {}", signal),
            Err(e) => error!("Signal handling failed, shutting down: {}", e),
        }
        let _ = shutdown_tx.send(());
    });

    info!("Daemon initialized successfully");
    let run_result = engine.run_with_shutdown(Some(shutdown_rx)).await;

    // Deliver what was already committed before going away
    notifier.close().await;
    let stats = notifier.stats();
    info!(
        "Notifier drained: {} delivered, {} failed, {} dropped",
        stats.delivered, stats.failed, stats.dropped
    );

    cache.close();
    info!("Shutting down daemon");

    run_result.map_err(Into::into)
}

/// Wait for SIGTERM or SIGINT
#[cfg(unix)]
async fn wait_for_shutdown() -> Result<&'static str> {
    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGINT handler: {}", e))?;

    let name = tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    };
    Ok(name)
}

/// Wait for CTRL-C
///
/// Fallback implementation for non-Unix platforms.
#[cfg(not(unix))]
async fn wait_for_shutdown() -> Result<&'static str> {
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to wait for CTRL-C: {}", e))?;
    Ok("SIGINT")
}
