//! Adaptune core data models.
//!
//! This crate defines the fundamental data structures shared by the
//! adaptive optimization engine: capability descriptors, the plugin
//! contract, usage records, and experiment run records.

#![warn(missing_docs)]

// Core identities
mod id;

// Capabilities and the plugin contract
mod capability;
mod contract;

// Usage tracking
mod usage;

// Experiment lifecycle
mod experiment;

// Error taxonomy
mod error;

// Re-exports
pub use id::{RunId, TargetId};

pub use capability::{
    AnalyzerDefaults, CapabilityDescriptor, CapabilityKind, EvaluatorDefaults,
    ExperimentDefaults, PluginDefaults, StrategyDefaults, TrackerDefaults,
};
pub use contract::{
    Evaluation, EvaluationVerdict, Plugin, PluginCall, PluginOutput, StrategyProposal,
};
pub use usage::{UsageEvent, UsageRecord, UsageSnapshot};
pub use experiment::{
    CleanupWarning, ExperimentRun, ExperimentState, Outcome, Stage, StageFailure,
};
pub use error::{InvokeError, RateLimited, RegistryError, StageError};

/// Timestamp type
pub type Time = chrono::DateTime<chrono::Utc>;
