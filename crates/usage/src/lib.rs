//! Usage tracking: per-target activity records, snapshots, scoring policy.

mod policy;
mod tracker;

pub use policy::{ScorePolicy, ThresholdPolicy};
pub use tracker::{TrackerConfig, UsageTracker};
