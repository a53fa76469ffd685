//! Result sinks: where finished experiment runs are handed off.
//!
//! Retention is the collaborator's decision; the core keeps nothing
//! durable and assumes no history survives a restart.

use adaptune_core::{ExperimentRun, Outcome};
use async_trait::async_trait;
use std::collections::VecDeque;
use tokio::sync::Mutex;
use tracing::info;

/// Receives finished experiment runs.
#[async_trait]
pub trait ResultSink: Send + Sync {
    /// Accept a terminal run.
    async fn record(&self, run: ExperimentRun);
}

/// Keeps the most recent runs in memory. Used by tests and the CLI.
pub struct MemorySink {
    runs: Mutex<VecDeque<ExperimentRun>>,
    capacity: usize,
}

impl MemorySink {
    /// Create a sink holding up to 256 runs.
    pub fn new() -> Self {
        Self::with_capacity(256)
    }

    /// Create a sink holding up to `capacity` runs; older runs are dropped.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            runs: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    /// All retained runs, oldest first.
    pub async fn runs(&self) -> Vec<ExperimentRun> {
        self.runs.lock().await.iter().cloned().collect()
    }

    /// The most recently recorded run.
    pub async fn last(&self) -> Option<ExperimentRun> {
        self.runs.lock().await.back().cloned()
    }

    /// Number of retained runs.
    pub async fn len(&self) -> usize {
        self.runs.lock().await.len()
    }

    /// Whether no run has been recorded yet.
    pub async fn is_empty(&self) -> bool {
        self.runs.lock().await.is_empty()
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResultSink for MemorySink {
    async fn record(&self, run: ExperimentRun) {
        let mut runs = self.runs.lock().await;
        if runs.len() == self.capacity {
            runs.pop_front();
        }
        runs.push_back(run);
    }
}

/// Reports finished runs through tracing.
pub struct LogSink;

#[async_trait]
impl ResultSink for LogSink {
    async fn record(&self, run: ExperimentRun) {
        info!(
            "Run {} for {}: {} ({} warnings)",
            run.id,
            run.target,
            run.outcome.unwrap_or(Outcome::Error),
            run.warnings.len(),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use adaptune_core::TargetId;

    fn finished_run(name: &str) -> ExperimentRun {
        let mut run = ExperimentRun::new(TargetId::new(name));
        run.begin_setup();
        run.setup_failed(adaptune_core::StageFailure {
            stage: adaptune_core::Stage::Setup,
            reason: "test".to_string(),
            rate_limited: false,
        });
        run.begin_cleanup();
        run.finish();
        run
    }

    #[tokio::test]
    async fn memory_sink_retains_in_order() {
        let sink = MemorySink::new();
        assert!(sink.is_empty().await);

        sink.record(finished_run("a.fn/0")).await;
        sink.record(finished_run("b.fn/1")).await;

        let runs = sink.runs().await;
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].target.as_str(), "a.fn/0");
        assert_eq!(sink.last().await.unwrap().target.as_str(), "b.fn/1");
    }

    #[tokio::test]
    async fn memory_sink_drops_oldest_beyond_capacity() {
        let sink = MemorySink::with_capacity(2);
        sink.record(finished_run("a.fn/0")).await;
        sink.record(finished_run("b.fn/1")).await;
        sink.record(finished_run("c.fn/2")).await;

        let runs = sink.runs().await;
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].target.as_str(), "b.fn/1");
    }
}
