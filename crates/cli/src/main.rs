//! Adaptune CLI - adaptive optimization engine.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncBufReadExt;
use tracing::{info, warn, Level};

use adaptune_core::{
    CapabilityDescriptor, CapabilityKind, Plugin, TargetId, UsageEvent,
};
use adaptune_experiment::{
    run_once, AdHocRequest, ExperimentConfig, LogSink, Orchestrator, ResultSink,
};
use adaptune_invoke::{Invoker, InvokerConfig};
use adaptune_registry::{builtin, CapabilityRegistry};
use adaptune_scheduler::{Scheduler, SchedulerConfig, Supervisor};
use adaptune_usage::{TrackerConfig, UsageTracker};

#[derive(Parser)]
#[command(name = "adaptune")]
#[command(about = "Adaptive optimization engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a one-shot strategy + evaluator pass against a target
    Run {
        /// Target identifier (e.g. "Mod.fn/2")
        target: String,
        /// Strategy plugin name
        #[arg(long)]
        strategy: Option<String>,
        /// Evaluator plugin name
        #[arg(long)]
        evaluator: Option<String>,
        /// Path to a JSON file holding the original artifact
        #[arg(long)]
        artifact: Option<PathBuf>,
        /// Rating at which a successful evaluation counts as adopted
        #[arg(long, default_value = "0.7")]
        threshold: f64,
        /// Write the JSON report here instead of stdout
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Read usage events from stdin and schedule experiments periodically
    Watch {
        /// Seconds between scheduler ticks
        #[arg(long, default_value = "60")]
        interval_secs: u64,
        /// Max concurrent experiments
        #[arg(long, default_value = "2")]
        max_concurrent: usize,
        /// Rolling usage window in seconds
        #[arg(long, default_value = "300")]
        window_secs: u64,
        /// Calls within the window at which a target counts as hot
        #[arg(long, default_value = "50")]
        hot_threshold: u64,
        /// Per-plugin-call timeout in seconds
        #[arg(long, default_value = "30")]
        call_timeout_secs: u64,
    },
    /// List registered capabilities
    List {
        /// Filter by kind (analyzer, strategy, evaluator, tracker, experiment)
        #[arg(long)]
        kind: Option<String>,
    },
    /// Read usage events from stdin until EOF and print a snapshot
    Report,
}

/// One usage event on the wire: `{"target": "Mod.fn/2", "elapsed_ms": 12}`.
#[derive(serde::Deserialize)]
struct WireEvent {
    target: String,
    #[serde(default)]
    elapsed_ms: u64,
}

fn base_registry() -> Result<CapabilityRegistry> {
    let mut registry = CapabilityRegistry::new();
    builtin::register_defaults(&mut registry)?;
    Ok(registry)
}

async fn feed_tracker_from_stdin(tracker: Arc<UsageTracker>) {
    let stdin = tokio::io::stdin();
    let mut lines = tokio::io::BufReader::new(stdin).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<WireEvent>(&line) {
            Ok(event) => {
                tracker.record(
                    &TargetId::new(event.target),
                    UsageEvent::new(Duration::from_millis(event.elapsed_ms)),
                );
            }
            Err(e) => warn!("Ignoring malformed usage event: {}", e),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            target,
            strategy,
            evaluator,
            artifact,
            threshold,
            out,
        } => {
            let registry = base_registry()?;
            let invoker = Invoker::new();
            let config = ExperimentConfig::new().with_adoption_threshold(threshold);

            let artifact = match artifact {
                Some(path) => serde_json::from_str(&std::fs::read_to_string(path)?)?,
                None => serde_json::json!({ "target": target }),
            };

            let mut request = AdHocRequest::new(TargetId::new(target), artifact);
            if let Some(name) = strategy {
                request = request.with_strategy(name);
            }
            if let Some(name) = evaluator {
                request = request.with_evaluator(name);
            }

            let report = run_once(&registry, &invoker, &config, request).await;
            if let Some(failure) = &report.failure {
                eprintln!("{} stage failed: {}", failure.stage, failure.reason);
            }

            let rendered = serde_json::to_string_pretty(&report)?;
            match out {
                Some(path) => {
                    std::fs::write(&path, rendered)?;
                    println!("Outcome: {} (report written to {})", report.outcome, path.display());
                }
                None => println!("{rendered}"),
            }
        }
        Commands::Watch {
            interval_secs,
            max_concurrent,
            window_secs,
            hot_threshold,
            call_timeout_secs,
        } => {
            let tracker = Arc::new(UsageTracker::with_config(
                TrackerConfig::new()
                    .with_window(Duration::from_secs(window_secs))
                    .with_hot_threshold(hot_threshold),
            ));

            let mut registry = base_registry()?;
            registry.register(CapabilityDescriptor::new(
                CapabilityKind::Tracker,
                "default",
                "In-process usage tracker",
                Arc::clone(&tracker) as Arc<dyn Plugin>,
            ))?;
            let registry = Arc::new(registry);

            let invoker = Arc::new(Invoker::with_config(
                InvokerConfig::new()
                    .with_call_timeout(Duration::from_secs(call_timeout_secs)),
            ));
            let orchestrator = Arc::new(Orchestrator::new(Arc::clone(&registry), invoker));
            let sink = Arc::new(LogSink) as Arc<dyn ResultSink>;

            let scheduler = Arc::new(
                Scheduler::new(registry, Arc::clone(&tracker), orchestrator, sink).with_config(
                    SchedulerConfig::new()
                        .with_tick_interval(Duration::from_secs(interval_secs))
                        .with_max_concurrent(
                            NonZeroUsize::new(max_concurrent).unwrap_or(NonZeroUsize::MIN),
                        ),
                ),
            );

            tokio::spawn(feed_tracker_from_stdin(tracker));

            let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);
            let ctrl_c_tx = shutdown_tx.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("Interrupt received, shutting down");
                    let _ = ctrl_c_tx.send(());
                }
            });

            Supervisor::new(scheduler).run(shutdown_tx).await;
        }
        Commands::List { kind } => {
            let mut registry = base_registry()?;
            registry.register(CapabilityDescriptor::new(
                CapabilityKind::Tracker,
                "default",
                "In-process usage tracker",
                Arc::new(UsageTracker::new()) as Arc<dyn Plugin>,
            ))?;

            let kinds: Vec<CapabilityKind> = match kind {
                Some(s) => vec![s.parse().map_err(|e: String| anyhow::anyhow!(e))?],
                None => CapabilityKind::all().to_vec(),
            };

            for kind in kinds {
                for descriptor in registry.list(kind) {
                    println!(
                        "{}/{} - {}",
                        descriptor.kind, descriptor.name, descriptor.description
                    );
                }
            }
        }
        Commands::Report => {
            let tracker = Arc::new(UsageTracker::new());
            feed_tracker_from_stdin(Arc::clone(&tracker)).await;

            let snapshot = tracker.snapshot();
            println!(
                "{:<40} {:>8} {:>8} {:>12}",
                "TARGET", "CALLS", "WINDOW", "TOTAL MS"
            );
            for record in &snapshot.records {
                println!(
                    "{:<40} {:>8} {:>8} {:>12}",
                    record.target,
                    record.call_count,
                    record.window_count,
                    record.cumulative_time.as_millis(),
                );
            }
        }
    }

    Ok(())
}
