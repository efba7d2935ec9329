// src/dag/task_info.rs

//! Task states and the per-run scheduling record of a task.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::dag::registry::TaskDefinition;
use crate::exec::WorkUnit;
use crate::tracker::RunId;

/// Canonical task identifier type used throughout the engine.
pub type TaskId = String;

/// State of a single task instance within a run.
///
/// Tasks move `Pending -> Running -> {Success | Failed}`, or
/// `Pending -> Skipped` when they never get to start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Pending,
    Running,
    Success,
    Failed,
    Skipped,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Success | TaskState::Failed | TaskState::Skipped
        )
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskState::Pending => "pending",
            TaskState::Running => "running",
            TaskState::Success => "success",
            TaskState::Failed => "failed",
            TaskState::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

/// Scheduler-side record of a task for the current run.
#[derive(Debug, Clone)]
pub struct TaskInfo {
    pub id: TaskId,
    /// Direct dependencies, in ascending id order.
    pub deps: Vec<TaskId>,
    pub state: TaskState,
}

impl TaskInfo {
    pub fn from_definition(def: &TaskDefinition) -> Self {
        Self {
            id: def.id.clone(),
            deps: def.dependencies.iter().cloned().collect(),
            state: TaskState::Pending,
        }
    }
}

/// Description of a task that the scheduler wants the executor to run now.
#[derive(Clone)]
pub struct ScheduledTask {
    pub task_id: TaskId,
    pub run_id: RunId,
    pub work: Arc<dyn WorkUnit>,
    /// Outputs of the task's direct dependencies, keyed by task id.
    pub upstream: BTreeMap<TaskId, Value>,
    /// Number of extra attempts allowed after the first failure.
    pub retries: u32,
    pub retry_delay: Duration,
}

impl ScheduledTask {
    pub fn from_definition(
        def: &TaskDefinition,
        run_id: RunId,
        upstream: BTreeMap<TaskId, Value>,
    ) -> Self {
        Self {
            task_id: def.id.clone(),
            run_id,
            work: Arc::clone(&def.work),
            upstream,
            retries: def.retries,
            retry_delay: def.retry_delay,
        }
    }
}

impl std::fmt::Debug for ScheduledTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScheduledTask")
            .field("task_id", &self.task_id)
            .field("run_id", &self.run_id)
            .field("upstream", &self.upstream.keys().collect::<Vec<_>>())
            .field("retries", &self.retries)
            .finish_non_exhaustive()
    }
}
