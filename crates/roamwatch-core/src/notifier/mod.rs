//! Webhook notifier
//!
//! The Notifier turns committed [`DomainEvent`]s into webhook deliveries.
//!
//! ## Delivery Model
//!
//! ```text
//!  engine ── notify() ──► bounded queue ──► worker task
//!                                               │
//!                        ┌──────────────────────┼──────────────────────┐
//!                        ▼                      ▼                      ▼
//!                  endpoint A             endpoint B             endpoint C
//! ```
//!
//! - `notify()` never blocks and never fails: a full queue drops the event
//!   with a warning.
//! - The worker handles events in the order they were queued. For each
//!   event, all subscribed endpoints are posted concurrently and
//!   independently; one endpoint's failure never delays or cancels another.
//! - Failures are logged and counted, never retried, never propagated.
//! - `close()` stops intake, lets the worker drain what is queued, and
//!   waits for it.

pub mod format;

use arc_swap::ArcSwapOption;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{Mutex, mpsc};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use crate::config::WebhookEndpoint;
use crate::mac::MacAddress;
use crate::model::{DeviceRef, DomainEvent, OfflineDuration, Uplink};
use crate::traits::WebhookTransport;

/// Delivery counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NotifierStats {
    /// Events accepted into the queue
    pub queued: u64,
    /// Events dropped because the queue was full or closed
    pub dropped: u64,
    /// Successful endpoint deliveries
    pub delivered: u64,
    /// Failed endpoint deliveries
    pub failed: u64,
}

#[derive(Default)]
struct Counters {
    queued: AtomicU64,
    dropped: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
}

struct Inner {
    tx: ArcSwapOption<mpsc::Sender<DomainEvent>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    endpoints: Arc<Vec<WebhookEndpoint>>,
    transport: Arc<dyn WebhookTransport>,
    counters: Arc<Counters>,
}

/// Handle to the webhook delivery worker
///
/// Cheap to clone; all clones feed the same worker.
#[derive(Clone)]
pub struct Notifier {
    inner: Arc<Inner>,
}

impl Notifier {
    /// Start the delivery worker on the current runtime
    ///
    /// # Parameters
    ///
    /// - `endpoints`: configured webhook endpoints (disabled ones are kept but skipped)
    /// - `transport`: the POST implementation
    /// - `capacity`: queue depth before events are dropped
    pub fn spawn(
        endpoints: Vec<WebhookEndpoint>,
        transport: Arc<dyn WebhookTransport>,
        capacity: usize,
    ) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let endpoints = Arc::new(endpoints);
        let counters = Arc::new(Counters::default());

        let worker = tokio::spawn(run_worker(
            rx,
            Arc::clone(&endpoints),
            Arc::clone(&transport),
            Arc::clone(&counters),
        ));

        info!(
            "Notifier started: {} endpoints via {} transport",
            endpoints.len(),
            transport.transport_name()
        );

        Self {
            inner: Arc::new(Inner {
                tx: ArcSwapOption::from_pointee(tx),
                worker: Mutex::new(Some(worker)),
                endpoints,
                transport,
                counters,
            }),
        }
    }

    /// Queue an event for delivery. Never blocks.
    pub fn notify(&self, event: DomainEvent) {
        let guard = self.inner.tx.load();
        let Some(tx) = guard.as_ref() else {
            debug!("Notifier closed, dropping {} event", event.kind());
            self.inner.counters.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        };

        match tx.try_send(event) {
            Ok(()) => {
                self.inner.counters.queued.fetch_add(1, Ordering::Relaxed);
            }
            Err(mpsc::error::TrySendError::Full(event)) => {
                // Delivery is slower than event generation
                warn!(
                    "Notification queue full, dropping {} event for {}. Consider increasing event_channel_capacity.",
                    event.kind(),
                    event.device().name
                );
                self.inner.counters.dropped.fetch_add(1, Ordering::Relaxed);
            }
            Err(mpsc::error::TrySendError::Closed(event)) => {
                warn!("Notification worker gone, dropping {} event", event.kind());
                self.inner.counters.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Queue a cycle's events, preserving their order
    pub fn notify_all<I: IntoIterator<Item = DomainEvent>>(&self, events: I) {
        for event in events {
            self.notify(event);
        }
    }

    /// Configured endpoints
    pub fn endpoints(&self) -> &[WebhookEndpoint] {
        &self.inner.endpoints
    }

    pub fn stats(&self) -> NotifierStats {
        let c = &self.inner.counters;
        NotifierStats {
            queued: c.queued.load(Ordering::Relaxed),
            dropped: c.dropped.load(Ordering::Relaxed),
            delivered: c.delivered.load(Ordering::Relaxed),
            failed: c.failed.load(Ordering::Relaxed),
        }
    }

    /// Send a synthetic `connected` notification to one endpoint and report
    /// the result.
    ///
    /// This is the only synchronous delivery path. The endpoint's `enabled`
    /// flag and event filter are ignored.
    pub async fn test_endpoint(&self, name: &str) -> Result<u16, crate::Error> {
        let endpoint = self
            .inner
            .endpoints
            .iter()
            .find(|e| e.name == name)
            .ok_or_else(|| crate::Error::not_found(format!("webhook endpoint '{}'", name)))?;

        let event = test_event()?;
        let payload = format::payload_for(endpoint.kind, &event);
        let status = self.inner.transport.post(&endpoint.url, &payload).await?;
        info!("Test notification delivered to {} ({})", endpoint.name, status);
        Ok(status)
    }

    /// Stop accepting events, drain the queue and wait for the worker
    pub async fn close(&self) {
        self.inner.tx.store(None);

        let worker = self.inner.worker.lock().await.take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                warn!("Notification worker ended abnormally: {}", e);
            }
            debug!("Notifier drained");
        }
    }
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier")
            .field("endpoints", &self.inner.endpoints.len())
            .field("transport", &self.inner.transport.transport_name())
            .field("stats", &self.stats())
            .finish()
    }
}

fn test_event() -> Result<DomainEvent, crate::Error> {
    Ok(DomainEvent::Connected {
        device: DeviceRef {
            id: 0,
            name: "Test Device".to_string(),
            mac: MacAddress::parse("00:00:00:00:00:00")?,
        },
        uplink: Uplink::Wireless {
            ap_mac: MacAddress::parse("00:00:00:00:00:01")?,
            ssid: None,
            band: None,
        },
        ap_name: "Test AP".to_string(),
        signal: Some(-50),
        offline: OfflineDuration::Unknown,
        at: chrono::Utc::now(),
    })
}

async fn run_worker(
    mut rx: mpsc::Receiver<DomainEvent>,
    endpoints: Arc<Vec<WebhookEndpoint>>,
    transport: Arc<dyn WebhookTransport>,
    counters: Arc<Counters>,
) {
    while let Some(event) = rx.recv().await {
        deliver(&event, &endpoints, &transport, &counters).await;
    }
    debug!("Notification worker stopped");
}

/// Post one event to every subscribed endpoint and wait for all of them
async fn deliver(
    event: &DomainEvent,
    endpoints: &[WebhookEndpoint],
    transport: &Arc<dyn WebhookTransport>,
    counters: &Arc<Counters>,
) {
    let mut deliveries = JoinSet::new();

    for endpoint in endpoints.iter().filter(|e| e.wants(event.kind())) {
        let payload = format::payload_for(endpoint.kind, event);
        let url = endpoint.url.clone();
        let name = endpoint.name.clone();
        let transport = Arc::clone(transport);
        let counters = Arc::clone(counters);
        let kind = event.kind();
        let device = event.device().name.clone();

        deliveries.spawn(async move {
            match transport.post(&url, &payload).await {
                Ok(status) => {
                    debug!("Webhook {} delivered {} for {} ({})", name, kind, device, status);
                    counters.delivered.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    warn!("Webhook {} failed for {} event of {}: {}", name, kind, device, e);
                    counters.failed.fetch_add(1, Ordering::Relaxed);
                }
            }
        });
    }

    while let Some(joined) = deliveries.join_next().await {
        if let Err(e) = joined {
            warn!("Webhook delivery task panicked: {}", e);
            counters.failed.fetch_add(1, Ordering::Relaxed);
        }
    }
}
