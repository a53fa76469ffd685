//! Keeps the scheduler's driver loop alive across abnormal exits.

use crate::scheduler::Scheduler;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, error};

/// Restarts the driver loop if it ever exits abnormally.
///
/// The loop itself converts tick failures into skipped ticks; the
/// supervisor is the last line of defense against a bug taking the whole
/// scheduling function down with it.
pub struct Supervisor {
    scheduler: Arc<Scheduler>,
    restart_delay: Duration,
}

impl Supervisor {
    /// Supervise a scheduler with a 5-second restart delay.
    pub fn new(scheduler: Arc<Scheduler>) -> Self {
        Self {
            scheduler,
            restart_delay: Duration::from_secs(5),
        }
    }

    /// Set the delay between abnormal exit and restart.
    pub fn with_restart_delay(mut self, delay: Duration) -> Self {
        self.restart_delay = delay;
        self
    }

    /// Run the driver loop until shutdown, respawning it after a panic.
    pub async fn run(&self, shutdown: broadcast::Sender<()>) {
        loop {
            let handle = tokio::spawn(Arc::clone(&self.scheduler).run_loop(shutdown.subscribe()));
            match handle.await {
                Ok(()) => {
                    debug!("Scheduler loop exited cleanly");
                    break;
                }
                Err(err) if err.is_panic() => {
                    error!(
                        "Scheduler loop panicked, restarting in {:?}",
                        self.restart_delay
                    );
                    tokio::time::sleep(self.restart_delay).await;
                }
                Err(_) => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use adaptune_experiment::{MemorySink, Orchestrator, ResultSink};
    use adaptune_invoke::Invoker;
    use adaptune_registry::{builtin, CapabilityRegistry};
    use adaptune_usage::UsageTracker;

    fn scheduler() -> Arc<Scheduler> {
        let mut registry = CapabilityRegistry::new();
        builtin::register_defaults(&mut registry).unwrap();
        let registry = Arc::new(registry);
        let tracker = Arc::new(UsageTracker::new());
        let orchestrator = Arc::new(Orchestrator::new(
            Arc::clone(&registry),
            Arc::new(Invoker::new()),
        ));
        Arc::new(Scheduler::new(
            registry,
            tracker,
            orchestrator,
            Arc::new(MemorySink::new()) as Arc<dyn ResultSink>,
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn supervisor_exits_with_the_loop_on_shutdown() {
        let supervisor = Supervisor::new(scheduler());
        let (shutdown_tx, _) = broadcast::channel(1);

        let tx = shutdown_tx.clone();
        let handle = tokio::spawn(async move { supervisor.run(tx).await });

        tokio::time::sleep(Duration::from_secs(2)).await;
        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();
    }
}
