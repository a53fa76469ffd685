//! Plugin contract: the uniform call surface between the core and collaborators.

use crate::capability::CapabilityKind;
use crate::experiment::Outcome;
use crate::id::TargetId;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A pluggable implementation behind a capability descriptor.
///
/// Implementations may call out to an AI/LLM service internally; the core
/// only ever observes the success/failure contract enforced by the
/// invocation layer, never prompts or API payloads.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Handle one typed call and return a raw JSON result.
    ///
    /// The raw value is validated against the per-kind output contract by
    /// the invocation layer before any other component sees it.
    async fn call(&self, call: PluginCall) -> Result<Value, anyhow::Error>;
}

/// Typed request for each operation the core makes against a plugin.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum PluginCall {
    /// Produce a structured analysis of a target (analyzer kind).
    Analyze {
        /// Target under analysis
        target: TargetId,
        /// Analyzer options
        options: Value,
    },
    /// Propose an optimized candidate (strategy kind).
    Propose {
        /// Target under optimization
        target: TargetId,
        /// Original artifact, as produced by experiment setup
        artifact: Value,
        /// Usage data backing the decision to optimize
        usage: Value,
        /// Strategy options
        options: Value,
    },
    /// Score a candidate against the original (evaluator kind).
    Evaluate {
        /// Target under evaluation
        target: TargetId,
        /// Original artifact
        original: Value,
        /// Proposed candidate artifact
        candidate: Value,
        /// Metrics gathered during the run stage
        metrics: Value,
        /// Evaluator options
        options: Value,
    },
    /// Prepare a trial for a target (experiment kind).
    Setup {
        /// Target of the trial
        target: TargetId,
        /// Experiment options
        options: Value,
    },
    /// Tear a trial down (experiment kind). Issued exactly once per run,
    /// with whatever partial data the run produced.
    Cleanup {
        /// Target of the trial
        target: TargetId,
        /// Setup data, if the setup stage completed
        setup_data: Option<Value>,
        /// Run result, if the run stage completed
        run_result: Option<Value>,
        /// Outcome decided so far, if any
        outcome: Option<Outcome>,
        /// Experiment options
        options: Value,
    },
    /// Report one activity event against a target (tracker kind).
    Record {
        /// Target that was exercised
        target: TargetId,
        /// Time spent in the call, milliseconds
        elapsed_ms: u64,
    },
}

impl PluginCall {
    /// The capability kind this call is addressed to.
    pub fn kind(&self) -> CapabilityKind {
        match self {
            Self::Analyze { .. } => CapabilityKind::Analyzer,
            Self::Propose { .. } => CapabilityKind::Strategy,
            Self::Evaluate { .. } => CapabilityKind::Evaluator,
            Self::Setup { .. } | Self::Cleanup { .. } => CapabilityKind::Experiment,
            Self::Record { .. } => CapabilityKind::Tracker,
        }
    }

    /// The target the call concerns.
    pub fn target(&self) -> &TargetId {
        match self {
            Self::Analyze { target, .. }
            | Self::Propose { target, .. }
            | Self::Evaluate { target, .. }
            | Self::Setup { target, .. }
            | Self::Cleanup { target, .. }
            | Self::Record { target, .. } => target,
        }
    }
}

/// Strategy output contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyProposal {
    /// The proposed replacement artifact
    pub optimized_artifact: Value,
    /// Why the strategy believes the candidate is better
    pub explanation: String,
    /// Expected improvements, free-form
    #[serde(default)]
    pub expected_improvements: Vec<String>,
}

/// Evaluator's own judgment of a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationVerdict {
    /// The candidate is an improvement
    Success,
    /// The candidate is not an improvement
    Failure,
}

/// Evaluator output contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evaluation {
    /// The evaluator's verdict
    pub outcome: EvaluationVerdict,
    /// Confidence in the candidate, 0.0..=1.0
    pub success_rating: f64,
    /// Risks the evaluator identified
    #[serde(default)]
    pub risks: Vec<String>,
    /// Follow-up recommendations
    #[serde(default)]
    pub recommendations: Vec<String>,
}

/// Validated result of an invocation, typed per call.
#[derive(Debug, Clone)]
pub enum PluginOutput {
    /// Analyzer result: arbitrary structured map
    Analysis(serde_json::Map<String, Value>),
    /// Strategy result
    Proposal(StrategyProposal),
    /// Evaluator result
    Evaluation(Evaluation),
    /// Experiment setup result, opaque to the core
    SetupData(Value),
    /// Experiment cleanup acknowledged
    CleanupAck,
    /// Tracker acknowledged; carries the updated call count
    Recorded(u64),
}
