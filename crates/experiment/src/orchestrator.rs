//! Experiment orchestration: the setup → run → evaluate → cleanup machine.

use crate::sink::ResultSink;
use adaptune_core::{
    CapabilityKind, CleanupWarning, Evaluation, EvaluationVerdict, ExperimentRun,
    ExperimentState, InvokeError, Outcome, PluginCall, PluginOutput, Stage, StageError,
    StageFailure, TargetId,
};
use adaptune_invoke::Invoker;
use adaptune_registry::CapabilityRegistry;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A claim on a target's in-flight slot.
///
/// The scheduler hands one to the orchestrator on dispatch; the orchestrator
/// releases it when the run reaches a terminal state, before the result
/// sink sees the run, so the target is eligible again by the next tick.
pub trait Claim: Send {
    /// Give the in-flight slot back.
    fn release(self: Box<Self>);
}

/// Configuration for experiment runs.
#[derive(Debug, Clone)]
pub struct ExperimentConfig {
    /// Name of the experiment-kind plugin owning setup and cleanup
    pub experiment: String,
    /// Name of the strategy invoked in the run stage
    pub strategy: String,
    /// Name of the evaluator invoked in the evaluating stage
    pub evaluator: String,
    /// Rating at or above which a successful evaluation counts as adopted
    pub adoption_threshold: f64,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            experiment: "noop".to_string(),
            strategy: "passthrough".to_string(),
            evaluator: "size-heuristic".to_string(),
            adoption_threshold: 0.7,
        }
    }
}

impl ExperimentConfig {
    /// Create the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the experiment plugin name.
    pub fn with_experiment(mut self, name: impl Into<String>) -> Self {
        self.experiment = name.into();
        self
    }

    /// Set the strategy plugin name.
    pub fn with_strategy(mut self, name: impl Into<String>) -> Self {
        self.strategy = name.into();
        self
    }

    /// Set the evaluator plugin name.
    pub fn with_evaluator(mut self, name: impl Into<String>) -> Self {
        self.evaluator = name.into();
        self
    }

    /// Set the adoption threshold.
    pub fn with_adoption_threshold(mut self, threshold: f64) -> Self {
        self.adoption_threshold = threshold;
        self
    }
}

/// Map an evaluation to the run outcome under an adoption threshold.
pub fn adopt(evaluation: &Evaluation, threshold: f64) -> Outcome {
    if evaluation.outcome == EvaluationVerdict::Success && evaluation.success_rating >= threshold
    {
        Outcome::Success
    } else {
        Outcome::Failure
    }
}

/// Drives one experiment at a time through its state machine.
///
/// All plugin faults arrive pre-normalized from the invocation layer; a
/// stage error short-circuits the remaining forward stages, and cleanup
/// runs exactly once on every path with whatever partial data exists.
pub struct Orchestrator {
    registry: Arc<CapabilityRegistry>,
    invoker: Arc<Invoker>,
    config: ExperimentConfig,
}

impl Orchestrator {
    /// Create an orchestrator with the default configuration.
    pub fn new(registry: Arc<CapabilityRegistry>, invoker: Arc<Invoker>) -> Self {
        Self {
            registry,
            invoker,
            config: ExperimentConfig::default(),
        }
    }

    /// Set the experiment configuration.
    pub fn with_config(mut self, config: ExperimentConfig) -> Self {
        self.config = config;
        self
    }

    /// The orchestrator's configuration.
    pub fn config(&self) -> &ExperimentConfig {
        &self.config
    }

    /// Run a full experiment: drive the stages, release the claim, hand the
    /// finished run to the sink.
    pub async fn run(
        &self,
        target: TargetId,
        usage: Value,
        claim: Option<Box<dyn Claim>>,
        sink: &dyn ResultSink,
    ) -> ExperimentRun {
        let run = self.execute(target, usage).await;

        // release before the sink sees the run, so the target is already
        // eligible again when a dashboard reacts to the result
        if let Some(claim) = claim {
            claim.release();
        }
        sink.record(run.clone()).await;
        run
    }

    /// Drive the state machine without claim or sink involvement.
    pub async fn execute(&self, target: TargetId, usage: Value) -> ExperimentRun {
        let mut run = ExperimentRun::new(target.clone());
        debug!("Experiment {} started for {}", run.id, run.target);

        run.begin_setup();
        let setup_call = {
            let target = target.clone();
            |options| PluginCall::Setup { target, options }
        };
        match self
            .stage(Stage::Setup, CapabilityKind::Experiment, &self.config.experiment, setup_call)
            .await
        {
            Ok(PluginOutput::SetupData(data)) => run.setup_complete(data),
            Ok(other) => run.setup_failed(unexpected_output(Stage::Setup, &other)),
            Err(err) => run.setup_failed(failure_of(err)),
        }

        if run.state == ExperimentState::SetupComplete {
            run.begin_run();
            let artifact = artifact_of(run.setup_data.as_ref());
            let propose_call = {
                let target = target.clone();
                let usage = usage.clone();
                move |options| PluginCall::Propose {
                    target,
                    artifact,
                    usage,
                    options,
                }
            };
            match self
                .stage(Stage::Run, CapabilityKind::Strategy, &self.config.strategy, propose_call)
                .await
            {
                Ok(PluginOutput::Proposal(proposal)) => run.run_complete(proposal),
                Ok(other) => run.run_failed(unexpected_output(Stage::Run, &other)),
                Err(err) => run.run_failed(failure_of(err)),
            }
        }

        if run.state == ExperimentState::RunComplete {
            run.begin_evaluation();
            match run.run_result.clone() {
                None => run.evaluation_failed(StageFailure {
                    stage: Stage::Evaluate,
                    reason: "run stage produced no result".to_string(),
                    rate_limited: false,
                }),
                Some(proposal) => {
                    let evaluate_call = {
                        let target = target.clone();
                        let original = artifact_of(run.setup_data.as_ref());
                        let metrics = json!({
                            "expected_improvements": proposal.expected_improvements,
                        });
                        move |options| PluginCall::Evaluate {
                            target,
                            original,
                            candidate: proposal.optimized_artifact,
                            metrics,
                            options,
                        }
                    };
                    match self
                        .stage(
                            Stage::Evaluate,
                            CapabilityKind::Evaluator,
                            &self.config.evaluator,
                            evaluate_call,
                        )
                        .await
                    {
                        Ok(PluginOutput::Evaluation(evaluation)) => {
                            let outcome = adopt(&evaluation, self.config.adoption_threshold);
                            run.evaluated(evaluation, outcome);
                        }
                        Ok(other) => {
                            run.evaluation_failed(unexpected_output(Stage::Evaluate, &other))
                        }
                        Err(err) => run.evaluation_failed(failure_of(err)),
                    }
                }
            }
        }

        // cleanup always runs, with whatever partial data is available
        run.begin_cleanup();
        let cleanup_call = {
            let target = target.clone();
            let setup_data = run.setup_data.clone();
            let run_result = run
                .run_result
                .as_ref()
                .and_then(|p| serde_json::to_value(p).ok());
            let outcome = run.outcome;
            move |options| PluginCall::Cleanup {
                target,
                setup_data,
                run_result,
                outcome,
                options,
            }
        };
        if let Err(err) = self
            .stage(
                Stage::Cleanup,
                CapabilityKind::Experiment,
                &self.config.experiment,
                cleanup_call,
            )
            .await
        {
            warn!("Cleanup for {} failed: {}", run.target, err);
            run.add_warning(CleanupWarning {
                message: err.to_string(),
                at: chrono::Utc::now(),
            });
        }
        run.finish();

        info!(
            "Experiment {} for {} finished: {}",
            run.id,
            run.target,
            run.outcome.unwrap_or(Outcome::Error),
        );
        run
    }

    async fn stage(
        &self,
        stage: Stage,
        kind: CapabilityKind,
        name: &str,
        make_call: impl FnOnce(Value) -> PluginCall,
    ) -> Result<PluginOutput, StageError> {
        let descriptor = self.registry.lookup(kind, name).map_err(|e| StageError {
            stage,
            source: InvokeError::Exception(e.to_string()),
        })?;
        let options = descriptor.defaults.options_value();
        self.invoker
            .invoke(&descriptor, make_call(options))
            .await
            .map_err(|source| StageError { stage, source })
    }
}

fn failure_of(err: StageError) -> StageFailure {
    StageFailure {
        stage: err.stage,
        rate_limited: err.source.is_rate_limited(),
        reason: err.source.to_string(),
    }
}

fn unexpected_output(stage: Stage, output: &PluginOutput) -> StageFailure {
    StageFailure {
        stage,
        reason: format!("unexpected output variant: {output:?}"),
        rate_limited: false,
    }
}

fn artifact_of(setup_data: Option<&Value>) -> Value {
    match setup_data {
        Some(data) => data.get("artifact").cloned().unwrap_or_else(|| data.clone()),
        None => Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::MemorySink;
    use adaptune_core::{CapabilityDescriptor, Plugin, RateLimited};
    use adaptune_registry::builtin;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    /// Experiment plugin that counts cleanup calls and can fail any stage.
    struct ProbeExperiment {
        fail_setup: bool,
        fail_cleanup: bool,
        cleanups: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Plugin for ProbeExperiment {
        async fn call(&self, call: PluginCall) -> Result<Value, anyhow::Error> {
            match call {
                PluginCall::Setup { target, .. } => {
                    if self.fail_setup {
                        anyhow::bail!("setup exploded");
                    }
                    Ok(json!({"artifact": {"target": target.as_str()}}))
                }
                PluginCall::Cleanup { .. } => {
                    self.cleanups.fetch_add(1, Ordering::SeqCst);
                    if self.fail_cleanup {
                        anyhow::bail!("cleanup exploded");
                    }
                    Ok(Value::Null)
                }
                other => anyhow::bail!("unexpected call: {}", other.kind()),
            }
        }
    }

    struct FailingStrategy;

    #[async_trait]
    impl Plugin for FailingStrategy {
        async fn call(&self, _call: PluginCall) -> Result<Value, anyhow::Error> {
            Err(anyhow::Error::new(RateLimited::with_retry_after(
                Duration::from_secs(30),
            )))
        }
    }

    struct FixedEvaluator {
        rating: f64,
    }

    #[async_trait]
    impl Plugin for FixedEvaluator {
        async fn call(&self, _call: PluginCall) -> Result<Value, anyhow::Error> {
            Ok(json!({
                "outcome": "success",
                "success_rating": self.rating,
            }))
        }
    }

    fn harness(cleanups: Arc<AtomicUsize>, fail_setup: bool, fail_cleanup: bool) -> Orchestrator {
        let mut registry = CapabilityRegistry::new();
        builtin::register_defaults(&mut registry).unwrap();
        registry
            .register(CapabilityDescriptor::new(
                CapabilityKind::Experiment,
                "probe",
                "counts cleanups",
                Arc::new(ProbeExperiment {
                    fail_setup,
                    fail_cleanup,
                    cleanups,
                }),
            ))
            .unwrap();
        registry
            .register(CapabilityDescriptor::new(
                CapabilityKind::Strategy,
                "rate-limited",
                "always rate limited",
                Arc::new(FailingStrategy),
            ))
            .unwrap();
        registry
            .register(CapabilityDescriptor::new(
                CapabilityKind::Evaluator,
                "lukewarm",
                "rates below the default threshold",
                Arc::new(FixedEvaluator { rating: 0.4 }),
            ))
            .unwrap();

        Orchestrator::new(Arc::new(registry), Arc::new(Invoker::new()))
            .with_config(ExperimentConfig::new().with_experiment("probe"))
    }

    #[tokio::test]
    async fn happy_path_walks_every_state() {
        let cleanups = Arc::new(AtomicUsize::new(0));
        let orchestrator = harness(Arc::clone(&cleanups), false, false);

        let run = orchestrator
            .execute(TargetId::new("Mod.fn/2"), Value::Null)
            .await;

        assert_eq!(run.outcome, Some(Outcome::Success));
        assert_eq!(cleanups.load(Ordering::SeqCst), 1);
        assert_eq!(
            run.history,
            vec![
                ExperimentState::Created,
                ExperimentState::SetupRunning,
                ExperimentState::SetupComplete,
                ExperimentState::Running,
                ExperimentState::RunComplete,
                ExperimentState::Evaluating,
                ExperimentState::Evaluated,
                ExperimentState::CleaningUp,
                ExperimentState::Done,
            ]
        );
    }

    #[tokio::test]
    async fn setup_failure_short_circuits_but_cleans_up() {
        let cleanups = Arc::new(AtomicUsize::new(0));
        let orchestrator = harness(Arc::clone(&cleanups), true, false);

        let run = orchestrator
            .execute(TargetId::new("Mod.fn/2"), Value::Null)
            .await;

        assert_eq!(run.outcome, Some(Outcome::Error));
        assert_eq!(run.failure.as_ref().unwrap().stage, Stage::Setup);
        assert!(run.run_result.is_none());
        assert!(run.evaluation.is_none());
        // cleanup still ran exactly once
        assert_eq!(cleanups.load(Ordering::SeqCst), 1);
        assert!(run.state.is_terminal());
    }

    #[tokio::test]
    async fn run_failure_records_rate_limiting() {
        let cleanups = Arc::new(AtomicUsize::new(0));
        let orchestrator = harness(Arc::clone(&cleanups), false, false);
        let orchestrator = Orchestrator {
            config: orchestrator.config.clone().with_strategy("rate-limited"),
            ..orchestrator
        };

        let run = orchestrator
            .execute(TargetId::new("Mod.fn/2"), Value::Null)
            .await;

        assert_eq!(run.outcome, Some(Outcome::Error));
        assert!(run.rate_limited());
        assert_eq!(run.failure.as_ref().unwrap().stage, Stage::Run);
        assert_eq!(cleanups.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn low_rating_is_failure_not_error() {
        let cleanups = Arc::new(AtomicUsize::new(0));
        let orchestrator = harness(Arc::clone(&cleanups), false, false);
        let orchestrator = Orchestrator {
            config: orchestrator.config.clone().with_evaluator("lukewarm"),
            ..orchestrator
        };

        let run = orchestrator
            .execute(TargetId::new("Mod.fn/2"), Value::Null)
            .await;

        assert_eq!(run.outcome, Some(Outcome::Failure));
        assert!(run.failure.is_none());
        assert_eq!(run.evaluation.as_ref().unwrap().success_rating, 0.4);
        assert_eq!(cleanups.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cleanup_failure_is_a_warning_not_an_outcome() {
        let cleanups = Arc::new(AtomicUsize::new(0));
        let orchestrator = harness(Arc::clone(&cleanups), false, true);

        let run = orchestrator
            .execute(TargetId::new("Mod.fn/2"), Value::Null)
            .await;

        assert_eq!(run.outcome, Some(Outcome::Success));
        assert_eq!(run.warnings.len(), 1);
        assert!(run.warnings[0].message.contains("cleanup exploded"));
    }

    struct FlagClaim {
        released: Arc<AtomicBool>,
    }

    impl Claim for FlagClaim {
        fn release(self: Box<Self>) {
            self.released.store(true, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn claim_is_released_before_sink_handoff() {
        let cleanups = Arc::new(AtomicUsize::new(0));
        let orchestrator = harness(cleanups, false, false);
        let released = Arc::new(AtomicBool::new(false));
        let sink = MemorySink::new();

        let run = orchestrator
            .run(
                TargetId::new("Mod.fn/2"),
                Value::Null,
                Some(Box::new(FlagClaim {
                    released: Arc::clone(&released),
                })),
                &sink,
            )
            .await;

        assert!(released.load(Ordering::SeqCst));
        assert_eq!(sink.runs().await.len(), 1);
        assert_eq!(run.outcome, Some(Outcome::Success));
    }
}
