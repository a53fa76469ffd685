//! Scoring and hot-target policy.

use crate::tracker::TrackerConfig;
use adaptune_core::UsageRecord;
use std::time::Duration;

/// Strategy for turning usage records into scheduling decisions.
///
/// The exact scoring formula is deliberately injectable; the scheduler only
/// relies on "higher score first" and the hot predicate.
pub trait ScorePolicy: Send + Sync {
    /// Priority score for a record; higher means more worth experimenting on.
    fn score(&self, record: &UsageRecord) -> f64;

    /// Whether the record's activity crossed the hot threshold within the
    /// rolling window.
    fn is_hot(&self, record: &UsageRecord) -> bool;
}

/// Default policy: call volume within the window, weighted by mean call
/// time so expensive targets rank above merely chatty ones.
pub struct ThresholdPolicy {
    hot_threshold: u64,
    window: Duration,
}

impl ThresholdPolicy {
    /// Create a policy with an explicit threshold and window.
    pub fn new(hot_threshold: u64, window: Duration) -> Self {
        Self {
            hot_threshold,
            window,
        }
    }

    /// Create a policy matching a tracker's configuration.
    pub fn from_config(config: &TrackerConfig) -> Self {
        Self::new(config.hot_threshold, config.window)
    }
}

impl Default for ThresholdPolicy {
    fn default() -> Self {
        Self::from_config(&TrackerConfig::default())
    }
}

impl ScorePolicy for ThresholdPolicy {
    fn score(&self, record: &UsageRecord) -> f64 {
        let mean_ms = record.mean_call_time().as_secs_f64() * 1000.0;
        record.window_count as f64 * (1.0 + mean_ms)
    }

    fn is_hot(&self, record: &UsageRecord) -> bool {
        if record.window_count < self.hot_threshold {
            return false;
        }
        // a stale record whose window was never rolled is not hot anymore
        let window = chrono::Duration::from_std(self.window)
            .unwrap_or_else(|_| chrono::Duration::max_value());
        chrono::Utc::now() - record.window_started <= window
    }
}
