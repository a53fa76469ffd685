//! One-shot propose/evaluate runs outside the scheduler loop.
//!
//! Useful for manual invocation: no claim, no sink, no usage snapshot —
//! just a strategy and an evaluator against a caller-supplied artifact,
//! reporting the failing stage and reason synchronously.

use crate::orchestrator::{adopt, ExperimentConfig};
use adaptune_core::{
    CapabilityKind, Evaluation, InvokeError, Outcome, PluginCall, PluginOutput, Stage,
    StageFailure, StrategyProposal, TargetId,
};
use adaptune_invoke::Invoker;
use adaptune_registry::CapabilityRegistry;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::debug;

/// Request for a one-shot run.
#[derive(Debug, Clone)]
pub struct AdHocRequest {
    /// Target the artifact belongs to
    pub target: TargetId,
    /// The original artifact to optimize
    pub artifact: Value,
    /// Usage data handed to the strategy, if any
    pub usage: Option<Value>,
    /// Strategy selector; falls back to the configured default
    pub strategy: Option<String>,
    /// Evaluator selector; falls back to the configured default
    pub evaluator: Option<String>,
}

impl AdHocRequest {
    /// Request with default plugin selection and no usage data.
    pub fn new(target: TargetId, artifact: Value) -> Self {
        Self {
            target,
            artifact,
            usage: None,
            strategy: None,
            evaluator: None,
        }
    }

    /// Select a strategy by name.
    pub fn with_strategy(mut self, name: impl Into<String>) -> Self {
        self.strategy = Some(name.into());
        self
    }

    /// Select an evaluator by name.
    pub fn with_evaluator(mut self, name: impl Into<String>) -> Self {
        self.evaluator = Some(name.into());
        self
    }
}

/// Combined result of a one-shot run.
#[derive(Debug, Clone, Serialize)]
pub struct AdHocReport {
    /// Target the run was against
    pub target: TargetId,
    /// The strategy's proposal, if the run stage completed
    pub proposal: Option<StrategyProposal>,
    /// The evaluator's output, if the evaluating stage completed
    pub evaluation: Option<Evaluation>,
    /// Combined verdict
    pub outcome: Outcome,
    /// Failing stage and reason when the outcome is `Error`
    pub failure: Option<StageFailure>,
}

/// Invoke a strategy then an evaluator directly and report the combined
/// result.
pub async fn run_once(
    registry: &CapabilityRegistry,
    invoker: &Invoker,
    config: &ExperimentConfig,
    request: AdHocRequest,
) -> AdHocReport {
    let strategy = request.strategy.as_deref().unwrap_or(&config.strategy);
    let evaluator = request.evaluator.as_deref().unwrap_or(&config.evaluator);
    debug!(
        "Ad hoc run for {} via {}/{}",
        request.target, strategy, evaluator
    );

    let mut report = AdHocReport {
        target: request.target.clone(),
        proposal: None,
        evaluation: None,
        outcome: Outcome::Error,
        failure: None,
    };

    let proposal = match call(
        registry,
        invoker,
        CapabilityKind::Strategy,
        strategy,
        |options| PluginCall::Propose {
            target: request.target.clone(),
            artifact: request.artifact.clone(),
            usage: request.usage.clone().unwrap_or(Value::Null),
            options,
        },
    )
    .await
    {
        Ok(PluginOutput::Proposal(proposal)) => proposal,
        Ok(other) => {
            report.failure = Some(StageFailure {
                stage: Stage::Run,
                reason: format!("unexpected output variant: {other:?}"),
                rate_limited: false,
            });
            return report;
        }
        Err(failure) => {
            report.failure = Some(failure);
            return report;
        }
    };
    report.proposal = Some(proposal.clone());

    match call(
        registry,
        invoker,
        CapabilityKind::Evaluator,
        evaluator,
        |options| PluginCall::Evaluate {
            target: request.target.clone(),
            original: request.artifact.clone(),
            candidate: proposal.optimized_artifact.clone(),
            metrics: json!({
                "expected_improvements": proposal.expected_improvements,
            }),
            options,
        },
    )
    .await
    {
        Ok(PluginOutput::Evaluation(evaluation)) => {
            report.outcome = adopt(&evaluation, config.adoption_threshold);
            report.evaluation = Some(evaluation);
        }
        Ok(other) => {
            report.failure = Some(StageFailure {
                stage: Stage::Evaluate,
                reason: format!("unexpected output variant: {other:?}"),
                rate_limited: false,
            });
        }
        Err(failure) => {
            report.failure = Some(failure);
        }
    }
    report
}

async fn call(
    registry: &CapabilityRegistry,
    invoker: &Invoker,
    kind: CapabilityKind,
    name: &str,
    make_call: impl FnOnce(Value) -> PluginCall,
) -> Result<PluginOutput, StageFailure> {
    let stage = match kind {
        CapabilityKind::Evaluator => Stage::Evaluate,
        _ => Stage::Run,
    };
    let descriptor = registry.lookup(kind, name).map_err(|e| StageFailure {
        stage,
        reason: e.to_string(),
        rate_limited: false,
    })?;
    let options = descriptor.defaults.options_value();
    invoker
        .invoke(&descriptor, make_call(options))
        .await
        .map_err(|e: InvokeError| StageFailure {
            stage,
            rate_limited: e.is_rate_limited(),
            reason: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use adaptune_registry::builtin;

    fn registry() -> CapabilityRegistry {
        let mut registry = CapabilityRegistry::new();
        builtin::register_defaults(&mut registry).unwrap();
        registry
    }

    #[tokio::test]
    async fn passthrough_roundtrip_reports_an_outcome() {
        let registry = registry();
        let invoker = Invoker::new();
        let config = ExperimentConfig::default();

        let report = run_once(
            &registry,
            &invoker,
            &config,
            AdHocRequest::new(TargetId::new("Mod.fn/2"), json!({"code": "fn f() {}"})),
        )
        .await;

        // passthrough candidate has the same size, so the size heuristic
        // rates it 0.5: below the default adoption threshold
        assert_eq!(report.outcome, Outcome::Failure);
        assert!(report.proposal.is_some());
        assert!(report.evaluation.is_some());
        assert!(report.failure.is_none());
    }

    #[tokio::test]
    async fn unknown_strategy_reports_the_failing_stage() {
        let registry = registry();
        let invoker = Invoker::new();
        let config = ExperimentConfig::default();

        let report = run_once(
            &registry,
            &invoker,
            &config,
            AdHocRequest::new(TargetId::new("Mod.fn/2"), Value::Null)
                .with_strategy("nonexistent"),
        )
        .await;

        assert_eq!(report.outcome, Outcome::Error);
        let failure = report.failure.unwrap();
        assert_eq!(failure.stage, Stage::Run);
        assert!(failure.reason.contains("not found"));
        assert!(report.proposal.is_none());
    }
}
