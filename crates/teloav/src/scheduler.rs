//! Cycle scheduler
//!
//! Drives `read ingest -> resolve -> discover each endpoint -> reconcile ->
//! conditional write` either once or on a fixed interval.
//!
//! The state machine itself is the pure [`transition`] function; [`Scheduler`]
//! performs the I/O for each state. Shutdown is cooperative: the flag is
//! checked after each cycle and at least every [`SHUTDOWN_POLL_INTERVAL`]
//! while waiting, never in the middle of a discovery session.

use crate::client::Connector;
use crate::config::ServiceConfig;
use crate::document::{self, ConfigDocument, DocumentFormat};
use crate::reconciler::Reconciler;
use crate::resolver;
use crate::session;
use crate::types::DiscoveryResult;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use teloav_logging::{LogLine, RecentLogs};
use tokio::time::Instant;
use tracing::{error, info};

/// Upper bound on how long a shutdown request goes unnoticed while waiting.
pub const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_millis(250);

// ============================================================================
// Run mode and shutdown
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Exactly one cycle
    Once,
    /// A cycle, then one every interval until shutdown
    Every(Duration),
}

impl RunMode {
    /// Zero or negative seconds means a single run.
    pub fn from_polling_interval(seconds: i64) -> Self {
        if seconds <= 0 {
            RunMode::Once
        } else {
            RunMode::Every(Duration::from_secs(seconds.unsigned_abs()))
        }
    }

    pub fn interval(&self) -> Option<Duration> {
        match self {
            RunMode::Once => None,
            RunMode::Every(interval) => Some(*interval),
        }
    }
}

/// Level-triggered shutdown flag shared with signal handlers.
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal(Arc<AtomicBool>);

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap an existing flag (as registered with a signal handler).
    pub fn from_flag(flag: Arc<AtomicBool>) -> Self {
        Self(flag)
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

// ============================================================================
// State machine
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    RunningCycle,
    Waiting { next_run: DateTime<Utc> },
    ShuttingDown,
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerEvent {
    Start,
    CycleFinished { at: DateTime<Utc> },
    IntervalElapsed,
    ShutdownRequested,
}

/// Next state for `event` in `state`. Events that do not apply leave the
/// state unchanged.
pub fn transition(state: SchedulerState, event: SchedulerEvent, mode: RunMode) -> SchedulerState {
    use SchedulerEvent as E;
    use SchedulerState as S;

    match (state, event) {
        (S::Idle, E::Start) => S::RunningCycle,
        (S::Idle, E::ShutdownRequested) => S::Stopped,
        (S::RunningCycle, E::CycleFinished { at }) => match mode.interval() {
            None => S::Stopped,
            Some(interval) => S::Waiting {
                next_run: add_interval(at, interval),
            },
        },
        // The in-flight cycle has already completed when this is observed.
        (S::RunningCycle, E::ShutdownRequested) => S::ShuttingDown,
        (S::Waiting { .. }, E::IntervalElapsed) => S::RunningCycle,
        (S::Waiting { .. }, E::ShutdownRequested) => S::Stopped,
        (S::ShuttingDown, _) => S::Stopped,
        (state, _) => state,
    }
}

fn add_interval(at: DateTime<Utc>, interval: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(interval)
        .ok()
        .and_then(|d| at.checked_add_signed(d))
        .unwrap_or(at)
}

// ============================================================================
// Cycle snapshots
// ============================================================================

/// Persistence outcome of one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReconcileOutcome {
    pub changed: bool,
    pub updated_blocks: usize,
    /// Whether the egress file was actually written
    pub written: bool,
}

/// Read-only view of one finished cycle, handed to observers by value.
#[derive(Debug, Clone)]
pub struct CycleSnapshot {
    /// 1-based cycle counter
    pub cycle: u64,
    /// Per-endpoint results in resolver order
    pub results: Vec<DiscoveryResult>,
    pub last_cycle_at: DateTime<Utc>,
    pub next_cycle_at: Option<DateTime<Utc>>,
    /// `None` when the cycle aborted before reconciliation
    pub outcome: Option<ReconcileOutcome>,
    /// Whether the ingest file differed from the previous cycle's
    pub ingest_changed: bool,
    /// Why the cycle stopped early, if it did
    pub aborted: Option<String>,
    pub recent_logs: Vec<LogLine>,
}

impl CycleSnapshot {
    pub fn total_nodes(&self) -> usize {
        self.results.iter().map(|r| r.nodes.len()).sum()
    }
}

/// Receives a snapshot after every cycle.
pub trait CycleObserver {
    fn on_cycle(&mut self, snapshot: CycleSnapshot);
}

impl<F> CycleObserver for F
where
    F: FnMut(CycleSnapshot),
{
    fn on_cycle(&mut self, snapshot: CycleSnapshot) {
        self(snapshot)
    }
}

// ============================================================================
// Scheduler
// ============================================================================

pub struct Scheduler<C: Connector> {
    config: ServiceConfig,
    connector: C,
    reconciler: Reconciler,
    shutdown: ShutdownSignal,
    recent_logs: Option<RecentLogs>,
    last_ingest: Option<Vec<u8>>,
    cycles: u64,
}

impl<C: Connector> Scheduler<C> {
    pub fn new(config: ServiceConfig, connector: C, shutdown: ShutdownSignal) -> Self {
        let reconciler = Reconciler::new(config.include_data_type);
        Self {
            config,
            connector,
            reconciler,
            shutdown,
            recent_logs: None,
            last_ingest: None,
            cycles: 0,
        }
    }

    /// Attach the log ring buffer copied into each snapshot.
    pub fn with_recent_logs(mut self, logs: RecentLogs) -> Self {
        self.recent_logs = Some(logs);
        self
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Run until the mode completes or shutdown is requested. Returns the
    /// number of cycles run.
    pub async fn run<O: CycleObserver>(&mut self, observer: &mut O) -> u64 {
        let mode = self.config.run_mode();
        let mut state = SchedulerState::Idle;
        let mut deadline = Instant::now();

        if self.config.seed_egress {
            self.seed();
        }

        loop {
            state = match state {
                SchedulerState::Idle => {
                    let event = if self.shutdown.is_requested() {
                        SchedulerEvent::ShutdownRequested
                    } else {
                        SchedulerEvent::Start
                    };
                    transition(SchedulerState::Idle, event, mode)
                }
                SchedulerState::RunningCycle => {
                    let snapshot = self.run_cycle().await;
                    let at = snapshot.last_cycle_at;
                    observer.on_cycle(snapshot);
                    if let Some(interval) = mode.interval() {
                        deadline = Instant::now() + interval;
                    }
                    let event = if self.shutdown.is_requested() {
                        SchedulerEvent::ShutdownRequested
                    } else {
                        SchedulerEvent::CycleFinished { at }
                    };
                    transition(SchedulerState::RunningCycle, event, mode)
                }
                SchedulerState::Waiting { next_run } => {
                    info!(
                        next_run = %next_run.format("%Y-%m-%d %H:%M:%S"),
                        "Waiting for next cycle"
                    );
                    let event = self.wait_until(deadline).await;
                    transition(SchedulerState::Waiting { next_run }, event, mode)
                }
                SchedulerState::ShuttingDown => {
                    info!("Shutdown requested, not starting another cycle");
                    transition(
                        SchedulerState::ShuttingDown,
                        SchedulerEvent::ShutdownRequested,
                        mode,
                    )
                }
                SchedulerState::Stopped => break,
            };
        }

        info!(cycles = self.cycles, "Scheduler stopped");
        self.cycles
    }

    /// Sleep in short slices until `deadline`, returning early on shutdown.
    async fn wait_until(&self, deadline: Instant) -> SchedulerEvent {
        loop {
            if self.shutdown.is_requested() {
                return SchedulerEvent::ShutdownRequested;
            }
            let now = Instant::now();
            if now >= deadline {
                return SchedulerEvent::IntervalElapsed;
            }
            tokio::time::sleep((deadline - now).min(SHUTDOWN_POLL_INTERVAL)).await;
        }
    }

    fn seed(&self) {
        let ingest = self.config.ingest_path();
        let egress = self.config.egress_path();
        match document::seed_egress(ingest, egress) {
            Ok(()) => info!(
                from = %ingest.display(),
                to = %egress.display(),
                "Seeded output config"
            ),
            Err(e) => error!(error = %e, "Failed to copy initial config file"),
        }
    }

    /// Run one full cycle. Never fails: errors abort the cycle and are
    /// reported in the snapshot.
    pub async fn run_cycle(&mut self) -> CycleSnapshot {
        self.cycles += 1;
        let started = Utc::now();
        let ingest_path = self.config.ingest_path().to_path_buf();
        let egress_path = self.config.egress_path().to_path_buf();

        info!(path = %ingest_path.display(), "Reading Telegraf configuration");
        let bytes = match std::fs::read(&ingest_path) {
            Ok(bytes) => bytes,
            Err(e) => {
                let reason = format!("Failed to read {}: {}", ingest_path.display(), e);
                return self.abort(started, false, reason);
            }
        };
        let format = DocumentFormat::from_path(&ingest_path);
        let ingest = match ConfigDocument::from_bytes(&bytes, format) {
            Ok(doc) => doc,
            Err(e) => {
                let reason = format!("Failed to parse {}: {}", ingest_path.display(), e);
                return self.abort(started, false, reason);
            }
        };

        let ingest_changed = self.last_ingest.as_deref() != Some(bytes.as_slice());
        if ingest_changed {
            if self.last_ingest.is_some() {
                info!("Detected change in input configuration file");
            }
            self.last_ingest = Some(bytes);
        }

        let previous = match ConfigDocument::load_optional(&egress_path) {
            Ok(previous) => previous,
            Err(e) => {
                let reason = format!("Failed to read {}: {}", egress_path.display(), e);
                return self.abort(started, ingest_changed, reason);
            }
        };

        let endpoints = match resolver::endpoints_from_document(&ingest) {
            Ok(endpoints) => endpoints,
            Err(e) => return self.abort(started, ingest_changed, e.to_string()),
        };
        info!("Found {} endpoint(s) to monitor", endpoints.len());

        let options = self.config.walk_options();
        let results = session::discover_all(&self.connector, &endpoints, &options).await;

        let reconciliation = self.reconciler.reconcile(&ingest, previous.as_ref(), &results);
        let written = if reconciliation.changed {
            match reconciliation.document.save_atomic(&egress_path) {
                Ok(()) => {
                    info!(
                        path = %egress_path.display(),
                        updated = reconciliation.updated_blocks,
                        "Updated Telegraf config written ({} endpoint(s) updated)",
                        reconciliation.updated_blocks
                    );
                    true
                }
                Err(e) => {
                    error!(error = %e, "Error writing config file");
                    false
                }
            }
        } else {
            info!("No configuration changes detected, skipping file write");
            false
        };

        CycleSnapshot {
            cycle: self.cycles,
            results,
            last_cycle_at: started,
            next_cycle_at: self.next_cycle_at(),
            outcome: Some(ReconcileOutcome {
                changed: reconciliation.changed,
                updated_blocks: reconciliation.updated_blocks,
                written,
            }),
            ingest_changed,
            aborted: None,
            recent_logs: self.recent_log_lines(),
        }
    }

    fn abort(&self, started: DateTime<Utc>, ingest_changed: bool, reason: String) -> CycleSnapshot {
        error!("{}", reason);
        CycleSnapshot {
            cycle: self.cycles,
            results: Vec::new(),
            last_cycle_at: started,
            next_cycle_at: self.next_cycle_at(),
            outcome: None,
            ingest_changed,
            aborted: Some(reason),
            recent_logs: self.recent_log_lines(),
        }
    }

    fn next_cycle_at(&self) -> Option<DateTime<Utc>> {
        self.config
            .run_mode()
            .interval()
            .map(|interval| add_interval(Utc::now(), interval))
    }

    fn recent_log_lines(&self) -> Vec<LogLine> {
        self.recent_logs
            .as_ref()
            .map(|logs| logs.snapshot())
            .unwrap_or_default()
    }
}
