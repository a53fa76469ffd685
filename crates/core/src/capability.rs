//! Capability descriptors and per-kind option defaults.

use crate::contract::Plugin;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Kind of a registered capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityKind {
    /// Produces a structured analysis of a target
    Analyzer,
    /// Proposes an optimized candidate for a target
    Strategy,
    /// Scores a candidate against the original
    Evaluator,
    /// Receives usage reports for targets
    Tracker,
    /// Owns experiment setup and cleanup
    Experiment,
}

impl CapabilityKind {
    /// Stable lowercase name, as used in CLI flags and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Analyzer => "analyzer",
            Self::Strategy => "strategy",
            Self::Evaluator => "evaluator",
            Self::Tracker => "tracker",
            Self::Experiment => "experiment",
        }
    }

    /// All kinds, in registry listing order.
    pub fn all() -> [CapabilityKind; 5] {
        [
            Self::Analyzer,
            Self::Strategy,
            Self::Evaluator,
            Self::Tracker,
            Self::Experiment,
        ]
    }
}

impl std::fmt::Display for CapabilityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CapabilityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "analyzer" => Ok(Self::Analyzer),
            "strategy" => Ok(Self::Strategy),
            "evaluator" => Ok(Self::Evaluator),
            "tracker" => Ok(Self::Tracker),
            "experiment" => Ok(Self::Experiment),
            other => Err(format!("unknown capability kind: {other}")),
        }
    }
}

/// Recognized options for an analyzer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzerDefaults {
    /// Call-graph depth to inspect around the target
    pub depth: u32,
    /// Whether callers of the target are included in the analysis
    pub include_callers: bool,
}

impl Default for AnalyzerDefaults {
    fn default() -> Self {
        Self {
            depth: 1,
            include_callers: false,
        }
    }
}

/// Recognized options for a strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyDefaults {
    /// How many candidates the strategy may propose per run
    pub max_candidates: u32,
    /// Whether an explanation is required alongside the candidate
    pub explain: bool,
}

impl Default for StrategyDefaults {
    fn default() -> Self {
        Self {
            max_candidates: 1,
            explain: true,
        }
    }
}

/// Recognized options for an evaluator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluatorDefaults {
    /// Rating at or above which a candidate counts as adopted (0.0..=1.0)
    pub adoption_threshold: f64,
    /// Cap on reported risks
    pub max_risks: u32,
}

impl Default for EvaluatorDefaults {
    fn default() -> Self {
        Self {
            adoption_threshold: 0.7,
            max_risks: 8,
        }
    }
}

/// Recognized options for a usage tracker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerDefaults {
    /// Rolling window length in seconds
    pub window_secs: u64,
    /// Calls within the window at which a target counts as hot
    pub hot_threshold: u64,
}

impl Default for TrackerDefaults {
    fn default() -> Self {
        Self {
            window_secs: 300,
            hot_threshold: 50,
        }
    }
}

/// Recognized options for an experiment lifecycle plugin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentDefaults {
    /// Whether setup artifacts are kept after cleanup
    pub keep_artifacts: bool,
}

impl Default for ExperimentDefaults {
    fn default() -> Self {
        Self {
            keep_artifacts: false,
        }
    }
}

/// Option defaults for a capability, tagged by kind.
///
/// Validated at registration time so a misconfigured plugin is rejected
/// before it can be invoked.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PluginDefaults {
    /// Analyzer options
    Analyzer(AnalyzerDefaults),
    /// Strategy options
    Strategy(StrategyDefaults),
    /// Evaluator options
    Evaluator(EvaluatorDefaults),
    /// Tracker options
    Tracker(TrackerDefaults),
    /// Experiment options
    Experiment(ExperimentDefaults),
}

impl PluginDefaults {
    /// The kind these defaults belong to.
    pub fn kind(&self) -> CapabilityKind {
        match self {
            Self::Analyzer(_) => CapabilityKind::Analyzer,
            Self::Strategy(_) => CapabilityKind::Strategy,
            Self::Evaluator(_) => CapabilityKind::Evaluator,
            Self::Tracker(_) => CapabilityKind::Tracker,
            Self::Experiment(_) => CapabilityKind::Experiment,
        }
    }

    /// Defaults matching `kind`, all fields at their documented values.
    pub fn for_kind(kind: CapabilityKind) -> Self {
        match kind {
            CapabilityKind::Analyzer => Self::Analyzer(AnalyzerDefaults::default()),
            CapabilityKind::Strategy => Self::Strategy(StrategyDefaults::default()),
            CapabilityKind::Evaluator => Self::Evaluator(EvaluatorDefaults::default()),
            CapabilityKind::Tracker => Self::Tracker(TrackerDefaults::default()),
            CapabilityKind::Experiment => Self::Experiment(ExperimentDefaults::default()),
        }
    }

    /// Check option values against their documented ranges.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Self::Analyzer(d) => {
                if d.depth == 0 {
                    return Err("depth must be at least 1".to_string());
                }
            }
            Self::Strategy(d) => {
                if d.max_candidates == 0 {
                    return Err("max_candidates must be at least 1".to_string());
                }
            }
            Self::Evaluator(d) => {
                if !(0.0..=1.0).contains(&d.adoption_threshold) {
                    return Err(format!(
                        "adoption_threshold must be within 0.0..=1.0, got {}",
                        d.adoption_threshold
                    ));
                }
            }
            Self::Tracker(d) => {
                if d.window_secs == 0 {
                    return Err("window_secs must be at least 1".to_string());
                }
            }
            Self::Experiment(_) => {}
        }
        Ok(())
    }

    /// The inner option struct as a JSON value, as passed to plugin calls.
    pub fn options_value(&self) -> serde_json::Value {
        let value = match self {
            Self::Analyzer(d) => serde_json::to_value(d),
            Self::Strategy(d) => serde_json::to_value(d),
            Self::Evaluator(d) => serde_json::to_value(d),
            Self::Tracker(d) => serde_json::to_value(d),
            Self::Experiment(d) => serde_json::to_value(d),
        };
        value.unwrap_or(serde_json::Value::Null)
    }
}

/// A named, typed plugin registration.
///
/// Immutable after registration; the registry hands out `Arc` clones.
#[derive(Clone)]
pub struct CapabilityDescriptor {
    /// Kind of the capability
    pub kind: CapabilityKind,
    /// Name, unique per kind
    pub name: String,
    /// Human-readable description
    pub description: String,
    /// The implementation behind this capability
    pub handle: Arc<dyn Plugin>,
    /// Option defaults passed to every invocation
    pub defaults: PluginDefaults,
}

impl CapabilityDescriptor {
    /// Create a descriptor with defaults matching its kind.
    pub fn new(
        kind: CapabilityKind,
        name: impl Into<String>,
        description: impl Into<String>,
        handle: Arc<dyn Plugin>,
    ) -> Self {
        Self {
            kind,
            name: name.into(),
            description: description.into(),
            handle,
            defaults: PluginDefaults::for_kind(kind),
        }
    }

    /// Override the option defaults.
    pub fn with_defaults(mut self, defaults: PluginDefaults) -> Self {
        self.defaults = defaults;
        self
    }
}

impl std::fmt::Debug for CapabilityDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityDescriptor")
            .field("kind", &self.kind)
            .field("name", &self.name)
            .field("description", &self.description)
            .field("defaults", &self.defaults)
            .finish_non_exhaustive()
    }
}
