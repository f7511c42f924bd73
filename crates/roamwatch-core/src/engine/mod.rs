//! Reconciliation engine
//!
//! The ReconciliationEngine is responsible for:
//! - Polling the controller for active clients
//! - Diffing them against the tracked devices
//! - Committing connection state and history as one unit per cycle
//! - Handing the resulting events to the Notifier and the Broadcaster
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────┐
//! │ ControllerGateway │── [ClientObservation] ──┐
//! └───────────────────┘                         │
//!                                               ▼
//!                                  ┌─────────────────────────┐
//!                                  │  ReconciliationEngine   │
//!                                  └─────────────────────────┘
//!                                               │
//!         ┌─────────────────────────────────────┼───────────────────────────┐
//!         │                                     │                           │
//!         ▼                                     ▼                           ▼
//! ┌──────────────┐                     ┌──────────────┐            ┌────────────────┐
//! │ DeviceStore  │                     │   Notifier   │            │ LiveBroadcaster│
//! │ (one commit) │                     │  (webhooks)  │            │  (snapshots)   │
//! └──────────────┘                     └──────────────┘            └────────────────┘
//! ```
//!
//! ## Cycle Flow
//!
//! 1. Snapshot the registry
//! 2. Fetch active clients (bounded by `fetch_timeout`); on failure the
//!    cycle aborts with no mutation and the next tick retries
//! 3. Resolve names for newly joined APs/switches, all lookups sharing one
//!    `fetch_timeout` deadline
//! 4. Plan every device transition (see [`reconcile`])
//! 5. Commit the whole batch (bounded by `commit_timeout`)
//! 6. Queue events for delivery and broadcast the new device list
//!
//! ## Single Flight
//!
//! Cycles never overlap. A trigger that arrives while a cycle is running
//! waits for it and receives its result. A manual trigger arriving within
//! `coalesce_window` of a completed cycle also receives that result.
//!
//! ## Cancellation
//!
//! Each cycle runs in its own task, so a caller that stops waiting never
//! interrupts it. Commit and publication (steps 5 and 6) form a further
//! task: when `commit_timeout` expires the cycle reports a persistence
//! failure, and a commit that still lands later publishes its own events.

pub mod reconcile;
pub mod status;

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, oneshot, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::broadcast::LiveBroadcaster;
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::mac::MacAddress;
use crate::model::{DeviceId, DomainEvent, LiveSnapshot};
use crate::notifier::Notifier;
use crate::traits::device_store::CommitReport;
use crate::traits::{Clock, ControllerGateway, DeviceStore, SystemClock};

pub use status::EngineStatus;

/// Result of one reconciliation cycle
#[derive(Debug, Clone)]
pub struct CycleReport {
    /// Timestamp applied to every transition in the cycle
    pub cycle_at: DateTime<Utc>,
    /// Committed events, in device-processing order
    pub events: Vec<DomainEvent>,
    /// Devices whose state was written
    pub applied: usize,
    /// Devices deleted by a user while the cycle ran
    pub skipped: Vec<DeviceId>,
    /// True when this caller received another trigger's result
    pub coalesced: bool,
}

impl CycleReport {
    fn shared(&self) -> Self {
        Self {
            coalesced: true,
            ..self.clone()
        }
    }
}

/// Single-flight bookkeeping shared with spawned cycle tasks
#[derive(Default)]
struct Flight {
    /// Held for the whole duration of a cycle
    last_cycle: Mutex<Option<CompletedCycle>>,
    /// Cycles executed (not replayed) since start
    executed: AtomicU64,
}

impl Flight {
    async fn run(
        &self,
        runner: CycleRunner,
        window: Duration,
        executed_before: u64,
    ) -> Result<CycleReport> {
        let mut last = self.last_cycle.lock().await;

        if let Some(done) = last.as_ref() {
            let finished_while_waiting = self.executed.load(Ordering::Acquire) != executed_before;
            let recent = !window.is_zero() && done.finished_at.elapsed() < window;
            if finished_while_waiting || recent {
                debug!("Coalescing cycle request with the last completed cycle");
                return done.replay();
            }
        }

        let outcome = runner.execute().await;
        let completed = CompletedCycle {
            finished_at: Instant::now(),
            outcome,
        };
        let result = completed.replay().map(|r| CycleReport {
            coalesced: false,
            ..r
        });
        *last = Some(completed);
        self.executed.fetch_add(1, Ordering::Release);
        result
    }
}

struct CompletedCycle {
    finished_at: Instant,
    outcome: Result<CycleReport>,
}

impl CompletedCycle {
    fn replay(&self) -> Result<CycleReport> {
        match &self.outcome {
            Ok(report) => Ok(report.shared()),
            Err(e) => Err(e.reissue()),
        }
    }
}

/// Core reconciliation engine
///
/// ## Lifecycle
///
/// 1. Create with [`ReconciliationEngine::new()`]
/// 2. Optionally attach a notifier, broadcaster and clock
/// 3. Drive with [`ReconciliationEngine::run()`] or call
///    [`trigger_cycle()`](Self::trigger_cycle) on demand
///
/// ## Threading
///
/// All methods take `&self`; wrap the engine in an `Arc` to share it
/// between the scheduler and request handlers.
pub struct ReconciliationEngine {
    runner: CycleRunner,
    flight: Arc<Flight>,
}

/// Everything one cycle needs, cloned into the cycle's task
#[derive(Clone)]
struct CycleRunner {
    gateway: Arc<dyn ControllerGateway>,
    store: Arc<dyn DeviceStore>,
    clock: Arc<dyn Clock>,
    notifier: Option<Notifier>,
    broadcaster: Arc<LiveBroadcaster>,
    config: EngineConfig,
    status: Arc<watch::Sender<EngineStatus>>,
}

impl ReconciliationEngine {
    /// Create a new engine
    ///
    /// # Parameters
    ///
    /// - `gateway`: controller gateway implementation
    /// - `store`: device store implementation
    /// - `config`: engine settings (validated here)
    pub fn new(
        gateway: Arc<dyn ControllerGateway>,
        store: Arc<dyn DeviceStore>,
        config: EngineConfig,
    ) -> Result<Self> {
        config.validate()?;

        let (status, _) = watch::channel(EngineStatus::default());

        Ok(Self {
            runner: CycleRunner {
                gateway,
                store,
                clock: Arc::new(SystemClock),
                notifier: None,
                broadcaster: Arc::new(LiveBroadcaster::new()),
                config,
                status: Arc::new(status),
            },
            flight: Arc::new(Flight::default()),
        })
    }

    /// Use `clock` instead of the system clock
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.runner.clock = clock;
        self
    }

    /// Deliver committed events through `notifier`
    pub fn with_notifier(mut self, notifier: Notifier) -> Self {
        self.runner.notifier = Some(notifier);
        self
    }

    /// Share an existing broadcaster
    pub fn with_broadcaster(mut self, broadcaster: Arc<LiveBroadcaster>) -> Self {
        self.runner.broadcaster = broadcaster;
        self
    }

    pub fn gateway(&self) -> &Arc<dyn ControllerGateway> {
        &self.runner.gateway
    }

    pub fn store(&self) -> &Arc<dyn DeviceStore> {
        &self.runner.store
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.runner.clock
    }

    pub fn notifier(&self) -> Option<&Notifier> {
        self.runner.notifier.as_ref()
    }

    pub fn broadcaster(&self) -> &Arc<LiveBroadcaster> {
        &self.runner.broadcaster
    }

    pub fn config(&self) -> &EngineConfig {
        &self.runner.config
    }

    /// Current health
    pub fn status(&self) -> EngineStatus {
        self.runner.status.borrow().clone()
    }

    /// Cycles actually executed, successful or not; replays are not counted
    pub fn cycles_executed(&self) -> u64 {
        self.flight.executed.load(Ordering::Acquire)
    }

    /// Watch health changes
    pub fn subscribe_status(&self) -> watch::Receiver<EngineStatus> {
        self.runner.status.subscribe()
    }

    /// Run a scheduled cycle
    ///
    /// Waits for any in-flight cycle. If one completed while waiting, its
    /// result is returned instead of starting another.
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        self.single_flight(Duration::ZERO).await
    }

    /// Run a cycle on demand (manual refresh)
    ///
    /// Like [`run_cycle`](Self::run_cycle), but also reuses a cycle that
    /// finished within `coalesce_window`.
    pub async fn trigger_cycle(&self) -> Result<CycleReport> {
        self.single_flight(self.runner.config.coalesce_window()).await
    }

    /// Dropping the returned future abandons the wait, not the cycle
    async fn single_flight(&self, window: Duration) -> Result<CycleReport> {
        let executed_before = self.flight.executed.load(Ordering::Acquire);
        let flight = Arc::clone(&self.flight);
        let runner = self.runner.clone();

        tokio::spawn(async move { flight.run(runner, window, executed_before).await })
            .await
            .unwrap_or_else(|e| Err(Error::Other(format!("Cycle task failed: {}", e))))
    }

    /// Run the engine
    ///
    /// Runs a cycle every `poll_interval` until SIGINT. A cycle in progress
    /// when the signal arrives is finished before returning.
    ///
    /// # Returns
    ///
    /// - `Ok(())`: Clean shutdown
    /// - `Err(Error)`: Store flush failed on the way out
    pub async fn run(&self) -> Result<()> {
        self.run_internal(None).await
    }

    /// Run the engine until `shutdown_rx` fires (or SIGINT when `None`)
    pub async fn run_with_shutdown(&self, shutdown_rx: Option<oneshot::Receiver<()>>) -> Result<()> {
        self.run_internal(shutdown_rx).await
    }

    async fn run_internal(&self, shutdown_rx: Option<oneshot::Receiver<()>>) -> Result<()> {
        info!(
            "Reconciliation engine started: polling {} every {}s",
            self.runner.gateway.gateway_name(),
            self.runner.config.poll_interval_secs
        );

        let shutdown = async {
            match shutdown_rx {
                Some(rx) => {
                    let _ = rx.await;
                }
                None => {
                    if let Err(e) = tokio::signal::ctrl_c().await {
                        error!("Failed to listen for CTRL-C: {}", e);
                        std::future::pending::<()>().await;
                    }
                }
            }
        };
        tokio::pin!(shutdown);

        let mut ticker = tokio::time::interval(self.runner.config.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                // The cycle runs to completion inside this branch, so a
                // shutdown never interrupts a commit.
                _ = ticker.tick() => {
                    // Failures are recorded in the status; the next tick retries
                    let _ = self.run_cycle().await;
                }

                _ = &mut shutdown => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        self.runner.store.flush().await?;
        info!("Device store flushed, engine stopped");

        Ok(())
    }
}

impl std::fmt::Debug for ReconciliationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconciliationEngine")
            .field("gateway", &self.runner.gateway.gateway_name())
            .field("config", &self.runner.config)
            .field("status", &*self.runner.status.borrow())
            .finish()
    }
}

impl CycleRunner {
    /// One full cycle with status bookkeeping
    async fn execute(&self) -> Result<CycleReport> {
        match self.reconcile_once().await {
            Ok(report) => {
                let at = self.clock.now();
                self.status
                    .send_modify(|s| s.record_success(at, report.events.len()));
                if report.events.is_empty() {
                    debug!("Cycle complete: no transitions");
                } else {
                    info!("Cycle complete: {} events", report.events.len());
                }
                Ok(report)
            }
            Err(e) => {
                let at = self.clock.now();
                self.status.send_modify(|s| s.record_failure(at, &e));
                if e.is_upstream() {
                    warn!("Cycle aborted, controller unavailable: {}", e);
                } else {
                    error!("Cycle failed: {}", e);
                }
                Err(e)
            }
        }
    }

    async fn reconcile_once(&self) -> Result<CycleReport> {
        let snapshot = tokio::time::timeout(self.config.commit_timeout(), self.store.snapshot())
            .await
            .map_err(|_| {
                Error::persistence(format!(
                    "registry snapshot exceeded {}s",
                    self.config.commit_timeout_secs
                ))
            })??;

        let observations = tokio::time::timeout(
            self.config.fetch_timeout(),
            self.gateway.list_active_clients(),
        )
        .await
        .map_err(|_| {
            Error::upstream(format!(
                "controller fetch exceeded {}s",
                self.config.fetch_timeout_secs
            ))
        })??;
        debug!(
            "Fetched {} active clients from {}",
            observations.len(),
            self.gateway.gateway_name()
        );

        let observed = reconcile::index_observations(observations);
        let ap_names = self
            .resolve_names(reconcile::uplinks_to_resolve(&snapshot, &observed))
            .await;

        let now = self.clock.now();
        let plan = reconcile::plan_cycle(&snapshot, &observed, &ap_names, now);

        let publish = tokio::spawn(self.clone().commit_and_publish(plan, now));
        let (commit, events) = match tokio::time::timeout(self.config.commit_timeout(), publish).await {
            Ok(Ok(outcome)) => outcome?,
            Ok(Err(e)) => return Err(Error::persistence(format!("Commit task failed: {}", e))),
            Err(_) => {
                return Err(Error::persistence(format!(
                    "store commit exceeded {}s",
                    self.config.commit_timeout_secs
                )));
            }
        };

        Ok(CycleReport {
            cycle_at: now,
            events,
            applied: commit.applied,
            skipped: commit.skipped,
            coalesced: false,
        })
    }

    /// Commit the batch, then hand its events to the notifier and broadcaster
    ///
    /// Nothing is published unless the commit succeeds.
    async fn commit_and_publish(
        self,
        plan: reconcile::CyclePlan,
        now: DateTime<Utc>,
    ) -> Result<(CommitReport, Vec<DomainEvent>)> {
        let mut commit = self.store.commit_cycle(plan.batch).await?;

        let events: Vec<DomainEvent> = plan
            .events
            .into_iter()
            .filter(|e| !commit.skipped.contains(&e.device().id))
            .collect();

        for event in &events {
            info!(
                "{} {} ({}){}",
                event.device().name,
                event.kind(),
                event.device().mac,
                event.ap_name().map(|ap| format!(" @ {}", ap)).unwrap_or_default()
            );
        }

        if let Some(notifier) = &self.notifier {
            notifier.notify_all(events.iter().cloned());
        }
        self.broadcaster.broadcast(LiveSnapshot {
            taken_at: now,
            devices: std::mem::take(&mut commit.devices),
        });

        Ok((commit, events))
    }

    /// Resolve display names; any failure falls back to the raw MAC
    ///
    /// All lookups share one `fetch_timeout` deadline, and an unreachable
    /// controller ends the phase instead of being asked once per uplink.
    async fn resolve_names(&self, macs: Vec<MacAddress>) -> HashMap<MacAddress, String> {
        let deadline = Instant::now() + self.config.fetch_timeout();
        let mut names = HashMap::with_capacity(macs.len());
        let mut lookups_enabled = true;

        for mac in macs {
            let name = if lookups_enabled {
                match tokio::time::timeout_at(deadline, self.gateway.resolve_ap(&mac)).await {
                    Ok(Ok(descriptor)) => descriptor.display_name(&mac),
                    Ok(Err(e)) => {
                        debug!("AP name lookup failed for {}: {}", mac, e);
                        if e.is_upstream() {
                            lookups_enabled = false;
                        }
                        mac.to_string()
                    }
                    Err(_) => {
                        debug!("AP name lookups ran out of time at {}", mac);
                        lookups_enabled = false;
                        mac.to_string()
                    }
                }
            } else {
                mac.to_string()
            };
            names.insert(mac, name);
        }

        names
    }
}
