//! Usage records and snapshots.

use crate::id::TargetId;
use crate::Time;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// One activity report against a target.
#[derive(Debug, Clone, Copy)]
pub struct UsageEvent {
    /// Time spent in the call
    pub elapsed: Duration,
}

impl UsageEvent {
    /// Create an event for a call that took `elapsed`.
    pub fn new(elapsed: Duration) -> Self {
        Self { elapsed }
    }
}

/// Accumulated activity for a single target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageRecord {
    /// The target this record describes
    pub target: TargetId,
    /// Calls observed since tracking began
    pub call_count: u64,
    /// Total time spent across all recorded calls
    pub cumulative_time: Duration,
    /// When the target was last exercised
    pub last_seen: Time,
    /// Start of the current rolling window
    pub window_started: Time,
    /// Calls observed inside the current window
    pub window_count: u64,
}

impl UsageRecord {
    /// Fresh record for a target first seen now.
    pub fn new(target: TargetId) -> Self {
        let now = chrono::Utc::now();
        Self {
            target,
            call_count: 0,
            cumulative_time: Duration::ZERO,
            last_seen: now,
            window_started: now,
            window_count: 0,
        }
    }

    /// Mean time per recorded call.
    pub fn mean_call_time(&self) -> Duration {
        if self.call_count == 0 {
            Duration::ZERO
        } else {
            self.cumulative_time / self.call_count as u32
        }
    }
}

/// Immutable point-in-time copy of all usage records.
///
/// Each record reflects a single consistent write; the snapshot as a whole
/// is consumed once per scheduler tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageSnapshot {
    /// When the snapshot was taken
    pub taken_at: Time,
    /// Records, ordered by target
    pub records: Vec<UsageRecord>,
}

impl UsageSnapshot {
    /// Look up the record for a target.
    pub fn get(&self, target: &TargetId) -> Option<&UsageRecord> {
        self.records.iter().find(|r| &r.target == target)
    }

    /// Number of targets in the snapshot.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the snapshot holds no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
