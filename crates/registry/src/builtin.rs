//! Built-in baseline plugins.
//!
//! These make the engine usable end-to-end without an external AI
//! collaborator: a strategy that proposes the original artifact unchanged,
//! an evaluator that rates candidates on serialized size, and an experiment
//! lifecycle that packages the target as its own artifact.

use crate::registry::CapabilityRegistry;
use adaptune_core::{
    CapabilityDescriptor, CapabilityKind, Plugin, PluginCall, RegistryError,
};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

/// Strategy that returns the original artifact unchanged.
///
/// Useful as a baseline: any real strategy should beat it.
pub struct PassthroughStrategy;

#[async_trait]
impl Plugin for PassthroughStrategy {
    async fn call(&self, call: PluginCall) -> Result<Value, anyhow::Error> {
        match call {
            PluginCall::Propose { artifact, .. } => Ok(json!({
                "optimized_artifact": artifact,
                "explanation": "passthrough: no transformation applied",
                "expected_improvements": [],
            })),
            other => Err(anyhow::anyhow!(
                "passthrough strategy cannot handle {} calls",
                other.kind()
            )),
        }
    }
}

/// Evaluator that rates a candidate by serialized size against the original.
///
/// A smaller candidate rates above 0.5, an equal one exactly 0.5; the
/// verdict is success when the candidate did not grow.
pub struct SizeHeuristicEvaluator;

impl SizeHeuristicEvaluator {
    fn size_of(value: &Value) -> usize {
        serde_json::to_string(value).map(|s| s.len()).unwrap_or(0)
    }
}

#[async_trait]
impl Plugin for SizeHeuristicEvaluator {
    async fn call(&self, call: PluginCall) -> Result<Value, anyhow::Error> {
        match call {
            PluginCall::Evaluate {
                original, candidate, ..
            } => {
                let original_size = Self::size_of(&original).max(1) as f64;
                let candidate_size = Self::size_of(&candidate).max(1) as f64;
                let rating = (original_size / (original_size + candidate_size)).clamp(0.0, 1.0);
                let grew = candidate_size > original_size;

                let mut risks = Vec::new();
                if grew {
                    risks.push("candidate is larger than the original".to_string());
                }

                Ok(json!({
                    "outcome": if grew { "failure" } else { "success" },
                    "success_rating": rating,
                    "risks": risks,
                    "recommendations": [],
                }))
            }
            other => Err(anyhow::anyhow!(
                "size-heuristic evaluator cannot handle {} calls",
                other.kind()
            )),
        }
    }
}

/// Experiment lifecycle with no external resources.
///
/// Setup packages the target identifier as the artifact; cleanup has
/// nothing to release and acknowledges immediately.
pub struct NoopExperiment;

#[async_trait]
impl Plugin for NoopExperiment {
    async fn call(&self, call: PluginCall) -> Result<Value, anyhow::Error> {
        match call {
            PluginCall::Setup { target, .. } => Ok(json!({
                "artifact": { "target": target.as_str() },
            })),
            PluginCall::Cleanup { .. } => Ok(Value::Null),
            other => Err(anyhow::anyhow!(
                "noop experiment cannot handle {} calls",
                other.kind()
            )),
        }
    }
}

/// Register the built-in baseline plugins.
pub fn register_defaults(registry: &mut CapabilityRegistry) -> Result<(), RegistryError> {
    registry.register(CapabilityDescriptor::new(
        CapabilityKind::Strategy,
        "passthrough",
        "Baseline strategy returning the original artifact unchanged",
        Arc::new(PassthroughStrategy),
    ))?;
    registry.register(CapabilityDescriptor::new(
        CapabilityKind::Evaluator,
        "size-heuristic",
        "Rates candidates by serialized size against the original",
        Arc::new(SizeHeuristicEvaluator),
    ))?;
    registry.register(CapabilityDescriptor::new(
        CapabilityKind::Experiment,
        "noop",
        "Experiment lifecycle with no external resources",
        Arc::new(NoopExperiment),
    ))?;
    Ok(())
}
