//! Per-kind validation of raw plugin results.

use adaptune_core::{
    CapabilityKind, Evaluation, InvokeError, PluginCall, PluginOutput, StrategyProposal,
};
use serde_json::Value;

/// Validate a raw result against the output contract of the call that
/// produced it.
///
/// Setup data and cleanup results are opaque by contract; analyzer,
/// strategy, evaluator and tracker results carry a required shape.
pub fn validate_output(call: &PluginCall, value: Value) -> Result<PluginOutput, InvokeError> {
    match call {
        PluginCall::Analyze { .. } => match value {
            Value::Object(map) => Ok(PluginOutput::Analysis(map)),
            other => Err(malformed(
                CapabilityKind::Analyzer,
                format!("expected an object, got {}", kind_of(&other)),
            )),
        },
        PluginCall::Propose { .. } => serde_json::from_value::<StrategyProposal>(value)
            .map(PluginOutput::Proposal)
            .map_err(|e| malformed(CapabilityKind::Strategy, e.to_string())),
        PluginCall::Evaluate { .. } => {
            let evaluation: Evaluation = serde_json::from_value(value)
                .map_err(|e| malformed(CapabilityKind::Evaluator, e.to_string()))?;
            if !(0.0..=1.0).contains(&evaluation.success_rating) {
                return Err(malformed(
                    CapabilityKind::Evaluator,
                    format!(
                        "success_rating must be within 0.0..=1.0, got {}",
                        evaluation.success_rating
                    ),
                ));
            }
            Ok(PluginOutput::Evaluation(evaluation))
        }
        PluginCall::Setup { .. } => Ok(PluginOutput::SetupData(value)),
        PluginCall::Cleanup { .. } => Ok(PluginOutput::CleanupAck),
        PluginCall::Record { .. } => match value.as_u64() {
            Some(count) => Ok(PluginOutput::Recorded(count)),
            None => Err(malformed(
                CapabilityKind::Tracker,
                format!("expected a call count, got {}", kind_of(&value)),
            )),
        },
    }
}

fn malformed(kind: CapabilityKind, detail: String) -> InvokeError {
    InvokeError::MalformedResult(kind, detail)
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a bool",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
