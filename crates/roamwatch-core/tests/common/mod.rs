//! Test doubles and common utilities for contract tests
//!
//! These doubles script the controller, record webhook deliveries and pin
//! the wall clock so cycle outcomes are deterministic.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use roamwatch_core::error::Result;
use roamwatch_core::traits::device_store::{CommitReport, CycleBatch, RegistrySnapshot};
use roamwatch_core::{
    ApDescriptor, Clock, ClientObservation, ConnectionHistoryEntry, ControllerGateway, DeviceId,
    DeviceStore, EngineConfig, Error, MacAddress, MemoryDeviceStore, Notifier,
    ReconciliationEngine, TrackedDevice, TrackerService, WebhookEndpoint, WebhookKind,
    WebhookTransport,
};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub fn mac(s: &str) -> MacAddress {
    MacAddress::parse(s).expect("valid test MAC")
}

/// A controller whose client list is set by the test
#[derive(Default)]
pub struct ScriptedGateway {
    clients: Mutex<Vec<ClientObservation>>,
    failures: Mutex<VecDeque<Error>>,
    ap_names: Mutex<HashMap<MacAddress, String>>,
    fetch_delay: Mutex<Duration>,
    fetch_count: AtomicUsize,
    resolve_count: AtomicUsize,
    block_calls: Mutex<Vec<(MacAddress, bool)>>,
    reject_blocks: Mutex<bool>,
    directory_down: Mutex<bool>,
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the set of active clients returned by every later fetch
    pub fn set_clients(&self, clients: Vec<ClientObservation>) {
        *self.clients.lock().unwrap() = clients;
    }

    /// Make the next fetch fail with `error`
    pub fn fail_next(&self, error: Error) {
        self.failures.lock().unwrap().push_back(error);
    }

    pub fn name_ap(&self, ap: &str, name: &str) {
        self.ap_names.lock().unwrap().insert(mac(ap), name.to_string());
    }

    /// Hold every fetch for `delay` before answering
    pub fn set_fetch_delay(&self, delay: Duration) {
        *self.fetch_delay.lock().unwrap() = delay;
    }

    /// Make every AP name lookup fail as if `stat/device` were unreachable
    pub fn set_directory_down(&self) {
        *self.directory_down.lock().unwrap() = true;
    }

    pub fn reject_blocks(&self) {
        *self.reject_blocks.lock().unwrap() = true;
    }

    pub fn fetch_count(&self) -> usize {
        self.fetch_count.load(Ordering::SeqCst)
    }

    pub fn resolve_count(&self) -> usize {
        self.resolve_count.load(Ordering::SeqCst)
    }

    pub fn block_calls(&self) -> Vec<(MacAddress, bool)> {
        self.block_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ControllerGateway for ScriptedGateway {
    async fn connect(&self) -> Result<()> {
        Ok(())
    }

    async fn list_active_clients(&self) -> Result<Vec<ClientObservation>> {
        self.fetch_count.fetch_add(1, Ordering::SeqCst);

        let delay = *self.fetch_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if let Some(error) = self.failures.lock().unwrap().pop_front() {
            return Err(error);
        }
        Ok(self.clients.lock().unwrap().clone())
    }

    async fn resolve_ap(&self, ap: &MacAddress) -> Result<ApDescriptor> {
        self.resolve_count.fetch_add(1, Ordering::SeqCst);
        if *self.directory_down.lock().unwrap() {
            return Err(Error::upstream("device directory unreachable"));
        }
        match self.ap_names.lock().unwrap().get(ap) {
            Some(name) => Ok(ApDescriptor {
                name: Some(name.clone()),
                model: None,
            }),
            None => Err(Error::not_found(format!("AP {}", ap))),
        }
    }

    async fn set_client_blocked(&self, client: &MacAddress, blocked: bool) -> Result<()> {
        if *self.reject_blocks.lock().unwrap() {
            return Err(Error::upstream("controller rejected the command"));
        }
        self.block_calls.lock().unwrap().push((client.clone(), blocked));
        Ok(())
    }

    fn gateway_name(&self) -> &'static str {
        "scripted"
    }
}

/// A memory store whose cycle commits can be made to fail or stall
#[derive(Default)]
pub struct FaultyStore {
    inner: MemoryDeviceStore,
    commit_failures: Mutex<VecDeque<Error>>,
    commit_delay: Mutex<Duration>,
    commits: AtomicUsize,
}

impl FaultyStore {
    pub fn wrap(inner: MemoryDeviceStore) -> Self {
        Self {
            inner,
            ..Self::default()
        }
    }

    /// Make the next cycle commit fail with `error`, applying nothing
    pub fn fail_next_commit(&self, error: Error) {
        self.commit_failures.lock().unwrap().push_back(error);
    }

    /// Hold every cycle commit for `delay` before applying it
    pub fn set_commit_delay(&self, delay: Duration) {
        *self.commit_delay.lock().unwrap() = delay;
    }

    /// Cycle commits that were applied
    pub fn commits(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DeviceStore for FaultyStore {
    async fn snapshot(&self) -> Result<RegistrySnapshot> {
        self.inner.snapshot().await
    }

    async fn commit_cycle(&self, batch: CycleBatch) -> Result<CommitReport> {
        let delay = *self.commit_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if let Some(error) = self.commit_failures.lock().unwrap().pop_front() {
            return Err(error);
        }
        let report = self.inner.commit_cycle(batch).await?;
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(report)
    }

    async fn list_devices(&self) -> Result<Vec<TrackedDevice>> {
        self.inner.list_devices().await
    }

    async fn get_device(&self, id: DeviceId) -> Result<Option<TrackedDevice>> {
        self.inner.get_device(id).await
    }

    async fn add_device(
        &self,
        mac: MacAddress,
        name: String,
        added_at: DateTime<Utc>,
    ) -> Result<TrackedDevice> {
        self.inner.add_device(mac, name, added_at).await
    }

    async fn remove_device(&self, id: DeviceId) -> Result<()> {
        self.inner.remove_device(id).await
    }

    async fn rename_device(&self, id: DeviceId, name: String) -> Result<TrackedDevice> {
        self.inner.rename_device(id, name).await
    }

    async fn set_blocked(&self, id: DeviceId, blocked: bool) -> Result<TrackedDevice> {
        self.inner.set_blocked(id, blocked).await
    }

    async fn history(&self, id: DeviceId, limit: usize) -> Result<Vec<ConnectionHistoryEntry>> {
        self.inner.history(id, limit).await
    }

    async fn flush(&self) -> Result<()> {
        self.inner.flush().await
    }
}

/// A transport that records every POST; URLs containing "fail" return an error
#[derive(Default)]
pub struct RecordingTransport {
    posts: Mutex<Vec<(String, serde_json::Value)>>,
    post_delay: Mutex<Duration>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_post_delay(&self, delay: Duration) {
        *self.post_delay.lock().unwrap() = delay;
    }

    pub fn posts(&self) -> Vec<(String, serde_json::Value)> {
        self.posts.lock().unwrap().clone()
    }

    /// Payloads delivered to `url`, in arrival order
    pub fn posts_to(&self, url: &str) -> Vec<serde_json::Value> {
        self.posts()
            .into_iter()
            .filter(|(u, _)| u == url)
            .map(|(_, p)| p)
            .collect()
    }
}

#[async_trait]
impl WebhookTransport for RecordingTransport {
    async fn post(&self, url: &str, payload: &serde_json::Value) -> Result<u16> {
        let delay = *self.post_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        self.posts
            .lock()
            .unwrap()
            .push((url.to_string(), payload.clone()));

        if url.contains("fail") {
            return Err(Error::delivery("HTTP 500"));
        }
        Ok(200)
    }

    fn transport_name(&self) -> &'static str {
        "recording"
    }
}

/// A clock that only moves when told to
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn at(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn advance(&self, by: ChronoDuration) {
        *self.now.lock().unwrap() += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

/// 2024-03-01T10:00:00Z
pub fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap()
}

/// Engine settings with a long poll interval and no manual coalescing
pub fn test_config() -> EngineConfig {
    EngineConfig {
        poll_interval_secs: 3600,
        fetch_timeout_secs: 5,
        commit_timeout_secs: 5,
        coalesce_window_ms: 0,
        ..EngineConfig::default()
    }
}

/// Everything a contract test needs to drive the engine
pub struct Harness {
    pub gateway: Arc<ScriptedGateway>,
    pub store: Arc<MemoryDeviceStore>,
    /// What the engine writes through; shares state with `store`
    pub faults: Arc<FaultyStore>,
    pub clock: Arc<ManualClock>,
    pub transport: Arc<RecordingTransport>,
    pub notifier: Notifier,
    pub engine: Arc<ReconciliationEngine>,
    pub service: TrackerService,
}

impl Harness {
    /// Engine over a memory store, notifying `endpoints`
    pub fn new(endpoints: Vec<WebhookEndpoint>) -> Self {
        Self::with_config(endpoints, test_config())
    }

    pub fn with_config(endpoints: Vec<WebhookEndpoint>, config: EngineConfig) -> Self {
        let gateway = Arc::new(ScriptedGateway::new());
        let store = Arc::new(MemoryDeviceStore::new());
        let faults = Arc::new(FaultyStore::wrap(MemoryDeviceStore::clone(&store)));
        let clock = Arc::new(ManualClock::at(epoch()));
        let transport = Arc::new(RecordingTransport::new());
        let notifier = Notifier::spawn(
            endpoints,
            Arc::clone(&transport) as Arc<dyn WebhookTransport>,
            config.event_channel_capacity,
        );

        let engine = ReconciliationEngine::new(
            Arc::clone(&gateway) as Arc<dyn ControllerGateway>,
            Arc::clone(&faults) as Arc<dyn DeviceStore>,
            config,
        )
        .expect("engine construction succeeds")
        .with_clock(Arc::clone(&clock) as Arc<dyn Clock>)
        .with_notifier(notifier.clone());
        let engine = Arc::new(engine);
        let service = TrackerService::new(Arc::clone(&engine));

        Self {
            gateway,
            store,
            faults,
            clock,
            transport,
            notifier,
            engine,
            service,
        }
    }

    /// Harness with one generic endpoint subscribed to every event kind
    pub fn with_generic_endpoint(url: &str) -> Self {
        Self::new(vec![
            WebhookEndpoint::new("generic", WebhookKind::Generic, url)
                .with_events(roamwatch_core::EventFilter::all()),
        ])
    }

    /// Wait until the notifier has attempted `count` deliveries
    pub async fn wait_for_posts(&self, count: usize) {
        let waited = tokio::time::timeout(Duration::from_secs(5), async {
            while self.transport.posts().len() < count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await;
        assert!(
            waited.is_ok(),
            "expected {} webhook posts, saw {}",
            count,
            self.transport.posts().len()
        );
    }
}
