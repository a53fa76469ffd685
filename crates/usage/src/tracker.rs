//! Usage tracking with non-blocking snapshots.

use adaptune_core::{Plugin, PluginCall, TargetId, UsageEvent, UsageRecord, UsageSnapshot};
use async_trait::async_trait;
use dashmap::DashMap;
use std::time::Duration;

/// Configuration for the usage tracker.
#[derive(Debug, Clone, Copy)]
pub struct TrackerConfig {
    /// Rolling window length
    pub window: Duration,
    /// Calls within the window at which a target counts as hot
    pub hot_threshold: u64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(300),
            hot_threshold: 50,
        }
    }
}

impl TrackerConfig {
    /// Create the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the rolling window length.
    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    /// Set the hot threshold.
    pub fn with_hot_threshold(mut self, hot_threshold: u64) -> Self {
        self.hot_threshold = hot_threshold;
        self
    }
}

/// Records per-target activity and produces point-in-time snapshots.
///
/// Records live in a sharded concurrent map: each `record` call mutates one
/// record under its shard lock, so an update is never observed half-applied,
/// and `snapshot` only briefly touches one shard at a time — writers on
/// other shards are never blocked.
pub struct UsageTracker {
    records: DashMap<TargetId, UsageRecord>,
    config: TrackerConfig,
}

impl UsageTracker {
    /// Create a tracker with the default configuration.
    pub fn new() -> Self {
        Self::with_config(TrackerConfig::default())
    }

    /// Create a tracker with the given configuration.
    pub fn with_config(config: TrackerConfig) -> Self {
        Self {
            records: DashMap::new(),
            config,
        }
    }

    /// The tracker's configuration.
    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Record one activity event against a target, creating the record if
    /// absent. Returns the updated call count.
    pub fn record(&self, target: &TargetId, event: UsageEvent) -> u64 {
        let now = chrono::Utc::now();
        let window = chrono::Duration::from_std(self.config.window)
            .unwrap_or_else(|_| chrono::Duration::max_value());

        let mut entry = self
            .records
            .entry(target.clone())
            .or_insert_with(|| UsageRecord::new(target.clone()));
        let record = entry.value_mut();

        // roll the window before counting this call
        if now - record.window_started > window {
            record.window_started = now;
            record.window_count = 0;
        }

        record.call_count += 1;
        record.window_count += 1;
        record.cumulative_time += event.elapsed;
        record.last_seen = now;
        record.call_count
    }

    /// Take a point-in-time snapshot of all records, ordered by target.
    pub fn snapshot(&self) -> UsageSnapshot {
        let mut records: Vec<UsageRecord> =
            self.records.iter().map(|r| r.value().clone()).collect();
        records.sort_by(|a, b| a.target.cmp(&b.target));
        tracing::debug!("Snapshot of {} targets", records.len());
        UsageSnapshot {
            taken_at: chrono::Utc::now(),
            records,
        }
    }

    /// Drop all records.
    pub fn reset(&self) {
        self.records.clear();
    }

    /// Number of tracked targets.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether no target has been recorded.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl Default for UsageTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// The tracker doubles as a `tracker`-kind capability so collaborators can
/// report usage through the registry.
#[async_trait]
impl Plugin for UsageTracker {
    async fn call(&self, call: PluginCall) -> Result<serde_json::Value, anyhow::Error> {
        match call {
            PluginCall::Record { target, elapsed_ms } => {
                let count =
                    self.record(&target, UsageEvent::new(Duration::from_millis(elapsed_ms)));
                Ok(serde_json::json!(count))
            }
            other => Err(anyhow::anyhow!(
                "usage tracker cannot handle {} calls",
                other.kind()
            )),
        }
    }
}
