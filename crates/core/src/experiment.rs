//! Experiment run records and lifecycle states.

use crate::contract::{Evaluation, StrategyProposal};
use crate::id::{RunId, TargetId};
use crate::Time;
use serde::{Deserialize, Serialize};

/// Lifecycle state of an experiment run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExperimentState {
    /// Run created, nothing started
    Created,
    /// Setup stage in flight
    SetupRunning,
    /// Setup produced data
    SetupComplete,
    /// Setup stage failed
    SetupFailed,
    /// Run stage in flight
    Running,
    /// Run stage produced a result
    RunComplete,
    /// Run stage failed
    RunFailed,
    /// Evaluation stage in flight
    Evaluating,
    /// Evaluation decided an outcome
    Evaluated,
    /// Cleanup stage in flight
    CleaningUp,
    /// Terminal state
    Done,
}

impl ExperimentState {
    /// Whether `next` is a legal successor of `self`.
    ///
    /// Forward stages are strictly ordered; every failure path converges on
    /// `CleaningUp` so cleanup is reachable from anywhere a stage can fail.
    pub fn can_transition(self, next: ExperimentState) -> bool {
        use ExperimentState::*;
        matches!(
            (self, next),
            (Created, SetupRunning)
                | (SetupRunning, SetupComplete)
                | (SetupRunning, SetupFailed)
                | (SetupComplete, Running)
                | (SetupFailed, CleaningUp)
                | (Running, RunComplete)
                | (Running, RunFailed)
                | (RunComplete, Evaluating)
                | (RunFailed, CleaningUp)
                | (Evaluating, Evaluated)
                | (Evaluated, CleaningUp)
                | (CleaningUp, Done)
        )
    }

    /// Whether the run is finished.
    pub fn is_terminal(self) -> bool {
        matches!(self, ExperimentState::Done)
    }
}

/// Terminal verdict of an experiment run.
///
/// `Error` means a stage itself failed, as opposed to the evaluation
/// judging the candidate unsuccessful.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// The candidate was judged an improvement
    Success,
    /// The candidate was judged not good enough
    Failure,
    /// A stage failed before a judgment could be made
    Error,
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Failure => write!(f, "failure"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Forward stages of an experiment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Prepare the trial
    Setup,
    /// Produce a candidate
    Run,
    /// Judge the candidate
    Evaluate,
    /// Tear the trial down
    Cleanup,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Setup => write!(f, "setup"),
            Self::Run => write!(f, "run"),
            Self::Evaluate => write!(f, "evaluate"),
            Self::Cleanup => write!(f, "cleanup"),
        }
    }
}

/// Which stage failed and why.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageFailure {
    /// The stage that failed
    pub stage: Stage,
    /// Normalized reason
    pub reason: String,
    /// Whether the failure signaled upstream rate limiting
    pub rate_limited: bool,
}

/// Non-fatal cleanup failure attached to a finished run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupWarning {
    /// What went wrong
    pub message: String,
    /// When it was recorded
    pub at: Time,
}

/// One full trial against a target.
///
/// Created by the scheduler on dispatch, owned exclusively by its
/// orchestrator until terminal, then handed to the result sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentRun {
    /// Unique run identifier
    pub id: RunId,
    /// Target under trial
    pub target: TargetId,
    /// Current lifecycle state
    pub state: ExperimentState,
    /// Every state entered, in order
    pub history: Vec<ExperimentState>,
    /// Data produced by setup, if it completed
    pub setup_data: Option<serde_json::Value>,
    /// Proposal produced by the run stage, if it completed
    pub run_result: Option<StrategyProposal>,
    /// Evaluator output, if evaluation completed
    pub evaluation: Option<Evaluation>,
    /// Terminal verdict, set before cleanup begins
    pub outcome: Option<Outcome>,
    /// Failing stage and reason when the outcome is `Error`
    pub failure: Option<StageFailure>,
    /// Cleanup warnings; never override the outcome
    pub warnings: Vec<CleanupWarning>,
    /// When the run started
    pub started_at: Time,
    /// When the run reached `Done`
    pub finished_at: Option<Time>,
}

impl ExperimentRun {
    /// Create a run in `Created` state.
    pub fn new(target: TargetId) -> Self {
        Self {
            id: RunId::new(),
            target,
            state: ExperimentState::Created,
            history: vec![ExperimentState::Created],
            setup_data: None,
            run_result: None,
            evaluation: None,
            outcome: None,
            failure: None,
            warnings: Vec::new(),
            started_at: chrono::Utc::now(),
            finished_at: None,
        }
    }

    fn enter(&mut self, next: ExperimentState) {
        debug_assert!(
            self.state.can_transition(next),
            "illegal transition {:?} -> {:?}",
            self.state,
            next
        );
        self.state = next;
        self.history.push(next);
    }

    /// Enter the setup stage.
    pub fn begin_setup(&mut self) {
        self.enter(ExperimentState::SetupRunning);
    }

    /// Record successful setup.
    pub fn setup_complete(&mut self, data: serde_json::Value) {
        self.setup_data = Some(data);
        self.enter(ExperimentState::SetupComplete);
    }

    /// Record a failed setup stage; the outcome becomes `Error`.
    pub fn setup_failed(&mut self, failure: StageFailure) {
        self.outcome = Some(Outcome::Error);
        self.failure = Some(failure);
        self.enter(ExperimentState::SetupFailed);
    }

    /// Enter the run stage.
    pub fn begin_run(&mut self) {
        self.enter(ExperimentState::Running);
    }

    /// Record a successful run stage.
    pub fn run_complete(&mut self, proposal: StrategyProposal) {
        self.run_result = Some(proposal);
        self.enter(ExperimentState::RunComplete);
    }

    /// Record a failed run stage; the outcome becomes `Error`.
    pub fn run_failed(&mut self, failure: StageFailure) {
        self.outcome = Some(Outcome::Error);
        self.failure = Some(failure);
        self.enter(ExperimentState::RunFailed);
    }

    /// Enter the evaluation stage.
    pub fn begin_evaluation(&mut self) {
        self.enter(ExperimentState::Evaluating);
    }

    /// Record the evaluator's judgment.
    pub fn evaluated(&mut self, evaluation: Evaluation, outcome: Outcome) {
        self.evaluation = Some(evaluation);
        self.outcome = Some(outcome);
        self.enter(ExperimentState::Evaluated);
    }

    /// Record a failed evaluation stage; the outcome becomes `Error`.
    pub fn evaluation_failed(&mut self, failure: StageFailure) {
        self.outcome = Some(Outcome::Error);
        self.failure = Some(failure);
        self.enter(ExperimentState::Evaluated);
    }

    /// Enter the cleanup stage. Legal from every failure path.
    pub fn begin_cleanup(&mut self) {
        self.enter(ExperimentState::CleaningUp);
    }

    /// Attach a cleanup warning without touching the outcome.
    pub fn add_warning(&mut self, warning: CleanupWarning) {
        self.warnings.push(warning);
    }

    /// Mark the run terminal.
    pub fn finish(&mut self) {
        self.enter(ExperimentState::Done);
        self.finished_at = Some(chrono::Utc::now());
    }

    /// Whether a stage failure signaled upstream rate limiting.
    pub fn rate_limited(&self) -> bool {
        self.failure.as_ref().is_some_and(|f| f.rate_limited)
    }

    /// Wall-clock duration, if the run finished.
    pub fn duration(&self) -> Option<chrono::Duration> {
        self.finished_at.map(|t| t - self.started_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_transitions_are_strictly_ordered() {
        use ExperimentState::*;
        assert!(Created.can_transition(SetupRunning));
        assert!(SetupRunning.can_transition(SetupComplete));
        assert!(SetupComplete.can_transition(Running));
        assert!(Running.can_transition(RunComplete));
        assert!(RunComplete.can_transition(Evaluating));
        assert!(Evaluating.can_transition(Evaluated));
        assert!(Evaluated.can_transition(CleaningUp));
        assert!(CleaningUp.can_transition(Done));

        assert!(!Created.can_transition(Running));
        assert!(!SetupComplete.can_transition(Evaluating));
        assert!(!Done.can_transition(Created));
    }

    #[test]
    fn cleanup_is_reachable_from_every_failure_path() {
        use ExperimentState::*;
        assert!(SetupFailed.can_transition(CleaningUp));
        assert!(RunFailed.can_transition(CleaningUp));
        assert!(Evaluated.can_transition(CleaningUp));
        // but never straight to Done
        assert!(!SetupFailed.can_transition(Done));
        assert!(!RunFailed.can_transition(Done));
    }

    #[test]
    fn setup_failure_sets_error_outcome() {
        let mut run = ExperimentRun::new(TargetId::new("Mod.fn/2"));
        run.begin_setup();
        run.setup_failed(StageFailure {
            stage: Stage::Setup,
            reason: "boom".to_string(),
            rate_limited: false,
        });
        run.begin_cleanup();
        run.finish();

        assert_eq!(run.outcome, Some(Outcome::Error));
        assert!(run.state.is_terminal());
        assert!(run.finished_at.is_some());
        assert_eq!(
            run.history,
            vec![
                ExperimentState::Created,
                ExperimentState::SetupRunning,
                ExperimentState::SetupFailed,
                ExperimentState::CleaningUp,
                ExperimentState::Done,
            ]
        );
    }

    #[test]
    fn cleanup_warnings_never_override_outcome() {
        let mut run = ExperimentRun::new(TargetId::new("Mod.fn/2"));
        run.begin_setup();
        run.setup_complete(serde_json::json!({"artifact": "orig"}));
        run.begin_run();
        run.run_complete(StrategyProposal {
            optimized_artifact: serde_json::json!("cand"),
            explanation: "inlined".to_string(),
            expected_improvements: vec![],
        });
        run.begin_evaluation();
        run.evaluated(
            Evaluation {
                outcome: crate::contract::EvaluationVerdict::Success,
                success_rating: 0.9,
                risks: vec![],
                recommendations: vec![],
            },
            Outcome::Success,
        );
        run.begin_cleanup();
        run.add_warning(CleanupWarning {
            message: "scratch dir left behind".to_string(),
            at: chrono::Utc::now(),
        });
        run.finish();

        assert_eq!(run.outcome, Some(Outcome::Success));
        assert_eq!(run.warnings.len(), 1);
    }

    #[test]
    fn rate_limited_flag_comes_from_failure() {
        let mut run = ExperimentRun::new(TargetId::new("Mod.fn/2"));
        assert!(!run.rate_limited());

        run.begin_setup();
        run.setup_complete(serde_json::Value::Null);
        run.begin_run();
        run.run_failed(StageFailure {
            stage: Stage::Run,
            reason: "429".to_string(),
            rate_limited: true,
        });
        assert!(run.rate_limited());
        assert_eq!(run.outcome, Some(Outcome::Error));
    }
}
