use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// What happens to the rest of a run when a task fails.
///
/// - `CascadeSkip`: the failed task's transitive dependents are skipped and
///   no further task is started; pending tasks on independent branches are
///   skipped as well. Tasks that are already running finish normally.
/// - `ContinueOnError`: only the transitive dependents are skipped;
///   independent branches of the DAG keep executing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
pub enum FailurePolicy {
    /// Independent branches do not complete normally under this policy; use
    /// `ContinueOnError` for that.
    #[default]
    #[serde(rename = "cascade", alias = "cascade-skip", alias = "cascade_skip")]
    CascadeSkip,
    #[serde(rename = "continue", alias = "continue-on-error", alias = "continue_on_error")]
    ContinueOnError,
}

impl FromStr for FailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "cascade" | "cascade-skip" | "cascade_skip" => Ok(FailurePolicy::CascadeSkip),
            "continue" | "continue-on-error" | "continue_on_error" => {
                Ok(FailurePolicy::ContinueOnError)
            }
            other => Err(format!(
                "invalid failure_policy: {other} (expected \"cascade\" or \"continue\")"
            )),
        }
    }
}

/// Behaviour of `start_run` while another run is still active.
///
/// - `Reject` (default): fail with `RunAlreadyActive`.
/// - `Preempt`: request cancellation of the active run and queue the new
///   one; it starts once the previous run has wound down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StartWhileActiveBehaviour {
    #[default]
    Reject,
    Preempt,
}

impl FromStr for StartWhileActiveBehaviour {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "reject" => Ok(StartWhileActiveBehaviour::Reject),
            "preempt" => Ok(StartWhileActiveBehaviour::Preempt),
            other => Err(format!(
                "invalid start_while_active: {other} (expected \"reject\" or \"preempt\")"
            )),
        }
    }
}

/// Engine knobs shared by the scheduler, the tracker and the pipeline facade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineOptions {
    pub failure_policy: FailurePolicy,
    /// Upper bound on tasks running at the same time. `1` means strictly
    /// sequential execution in resolved order.
    pub max_workers: usize,
    /// How many runs the tracker keeps for later inspection.
    pub history_limit: usize,
    pub start_while_active: StartWhileActiveBehaviour,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            failure_policy: FailurePolicy::default(),
            max_workers: 1,
            history_limit: 20,
            start_while_active: StartWhileActiveBehaviour::default(),
        }
    }
}

impl EngineOptions {
    pub fn is_sequential(&self) -> bool {
        self.max_workers <= 1
    }
}
