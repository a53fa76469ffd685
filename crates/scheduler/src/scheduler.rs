//! Adaptive scheduler: turns usage snapshots into dispatched experiments.

use crate::claims::{BackoffConfig, ClaimToken, SchedulerState};
use adaptune_core::{
    CapabilityKind, ExperimentRun, Stage, StageFailure, TargetId, UsageRecord,
};
use adaptune_experiment::{Orchestrator, ResultSink};
use adaptune_registry::CapabilityRegistry;
use adaptune_usage::{ScorePolicy, ThresholdPolicy, UsageTracker};
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Configuration for the scheduler loop.
#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    /// Interval between ticks
    pub tick_interval: Duration,
    /// Max concurrent experiments
    pub max_concurrent: NonZeroUsize,
    /// Backoff applied to rate-limited targets
    pub backoff: BackoffConfig,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(60),
            max_concurrent: NonZeroUsize::new(2).unwrap_or(NonZeroUsize::MIN),
            backoff: BackoffConfig::default(),
        }
    }
}

impl SchedulerConfig {
    /// Create the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the tick interval.
    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    /// Set the concurrency limit.
    pub fn with_max_concurrent(mut self, max: NonZeroUsize) -> Self {
        self.max_concurrent = max;
        self
    }

    /// Set the backoff configuration.
    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }
}

/// A tick failed before dispatching; logged and skipped, never fatal.
#[derive(Debug, thiserror::Error)]
pub enum TickError {
    /// One of the configured plugins is not registered
    #[error("required capability missing: {0}")]
    MissingCapability(#[from] adaptune_core::RegistryError),
}

/// Periodic driver: scan usage, select hot targets, dispatch experiments.
///
/// The loop itself is single-owner; each dispatched experiment runs as an
/// independent task bounded by the configured concurrency, so a stalled
/// plugin can never delay scanning or dispatching other targets.
pub struct Scheduler {
    registry: Arc<CapabilityRegistry>,
    tracker: Arc<UsageTracker>,
    policy: Arc<dyn ScorePolicy>,
    orchestrator: Arc<Orchestrator>,
    sink: Arc<dyn ResultSink>,
    state: Arc<SchedulerState>,
    config: SchedulerConfig,
}

impl Scheduler {
    /// Create a scheduler with the default configuration and a threshold
    /// policy matching the tracker's.
    pub fn new(
        registry: Arc<CapabilityRegistry>,
        tracker: Arc<UsageTracker>,
        orchestrator: Arc<Orchestrator>,
        sink: Arc<dyn ResultSink>,
    ) -> Self {
        let config = SchedulerConfig::default();
        let policy = Arc::new(ThresholdPolicy::from_config(tracker.config()));
        Self {
            registry,
            tracker,
            policy,
            orchestrator,
            sink,
            state: Arc::new(SchedulerState::new(config.backoff)),
            config,
        }
    }

    /// Replace the scoring policy.
    pub fn with_policy(mut self, policy: Arc<dyn ScorePolicy>) -> Self {
        self.policy = policy;
        self
    }

    /// Replace the configuration. Resets claim and backoff state.
    pub fn with_config(mut self, config: SchedulerConfig) -> Self {
        self.state = Arc::new(SchedulerState::new(config.backoff));
        self.config = config;
        self
    }

    /// The scheduler's claim and backoff state.
    pub fn state(&self) -> Arc<SchedulerState> {
        Arc::clone(&self.state)
    }

    /// The scheduler's configuration.
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Run one scan → select → dispatch cycle.
    ///
    /// Returns the join handles of the dispatched experiments.
    pub async fn tick(&self) -> Result<Vec<JoinHandle<()>>, TickError> {
        // preflight: the configured plugins must resolve before claiming
        let experiment_config = self.orchestrator.config();
        self.registry
            .lookup(CapabilityKind::Experiment, &experiment_config.experiment)?;
        self.registry
            .lookup(CapabilityKind::Strategy, &experiment_config.strategy)?;
        self.registry
            .lookup(CapabilityKind::Evaluator, &experiment_config.evaluator)?;

        let snapshot = self.tracker.snapshot();
        let now = snapshot.taken_at;

        let mut candidates: Vec<&UsageRecord> = snapshot
            .records
            .iter()
            .filter(|r| self.policy.is_hot(r))
            .filter(|r| self.state.eligible(&r.target, now))
            .collect();
        candidates.sort_by(|a, b| {
            self.policy
                .score(b)
                .partial_cmp(&self.policy.score(a))
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let slots = self
            .config
            .max_concurrent
            .get()
            .saturating_sub(self.state.in_flight_len());

        let mut handles = Vec::new();
        for record in candidates.into_iter().take(slots) {
            // the claim is the atomic arbiter; an overlapping selection
            // pass may have won the race for this target
            let Some(claim) = self.state.try_claim(&record.target) else {
                debug!("{} already in flight, skipping", record.target);
                continue;
            };
            debug!("Dispatching experiment for {}", record.target);
            handles.push(self.dispatch(record.clone(), claim));
        }
        Ok(handles)
    }

    fn dispatch(&self, record: UsageRecord, claim: ClaimToken) -> JoinHandle<()> {
        let orchestrator = Arc::clone(&self.orchestrator);
        let sink = Arc::clone(&self.sink);
        let state = Arc::clone(&self.state);
        let target = record.target.clone();
        let usage = serde_json::to_value(&record).unwrap_or(serde_json::Value::Null);

        tokio::spawn(async move {
            // catch boundary: a panicking experiment becomes a recorded
            // error outcome, and the claim token's drop frees the slot
            let inner = tokio::spawn({
                let orchestrator = Arc::clone(&orchestrator);
                let sink = Arc::clone(&sink);
                let target = target.clone();
                async move {
                    orchestrator
                        .run(target, usage, Some(Box::new(claim)), sink.as_ref())
                        .await
                }
            });

            match inner.await {
                Ok(run) => {
                    if run.rate_limited() {
                        let until = state.note_rate_limit(&run.target, chrono::Utc::now());
                        warn!("{} rate limited, backing off until {}", run.target, until);
                    } else {
                        state.clear_backoff(&run.target);
                    }
                }
                Err(err) if err.is_panic() => {
                    error!("Experiment task for {} panicked", target);
                    sink.record(panicked_run(target)).await;
                }
                Err(_) => {}
            }
        })
    }

    /// Drive ticks until shutdown is signaled.
    ///
    /// A failing tick is logged and skipped; the loop never terminates
    /// because of it.
    pub async fn run_loop(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        info!(
            "Scheduler started: tick every {:?}, up to {} concurrent experiments",
            self.config.tick_interval, self.config.max_concurrent,
        );

        let mut interval = tokio::time::interval(self.config.tick_interval);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.tick().await {
                        Ok(handles) => {
                            if !handles.is_empty() {
                                debug!("Dispatched {} experiments", handles.len());
                            }
                        }
                        Err(e) => warn!("Tick skipped: {}", e),
                    }
                }
                _ = shutdown.recv() => {
                    info!("Scheduler shutting down");
                    break;
                }
            }
        }
    }
}

fn panicked_run(target: TargetId) -> ExperimentRun {
    let mut run = ExperimentRun::new(target);
    run.begin_setup();
    run.setup_failed(StageFailure {
        stage: Stage::Setup,
        reason: "experiment task panicked".to_string(),
        rate_limited: false,
    });
    run.begin_cleanup();
    run.finish();
    run
}
