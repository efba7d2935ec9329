// src/tracker/snapshot.rs

//! Point-in-time, serializable views of a run.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::dag::{TaskId, TaskState};
use crate::tracker::run::{Run, RunId, RunState, TaskInstance};

/// Coherent copy of one task instance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskSnapshot {
    pub task_id: TaskId,
    pub description: String,
    pub state: TaskState,
    pub attempt: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
    pub error: Option<String>,
    pub skip_reason: Option<String>,
    pub output: Option<Value>,
    pub log_lines: Vec<String>,
    #[serde(skip)]
    pub duration: Option<Duration>,
}

impl From<&TaskInstance> for TaskSnapshot {
    fn from(t: &TaskInstance) -> Self {
        Self {
            task_id: t.task_id.clone(),
            description: t.description.clone(),
            state: t.state,
            attempt: t.attempt,
            started_at: t.started_at,
            ended_at: t.ended_at,
            duration_ms: t.duration.map(millis),
            error: t.error.clone(),
            skip_reason: t.skip_reason.clone(),
            output: t.output.clone(),
            log_lines: t.log_lines.clone(),
            duration: t.duration,
        }
    }
}

/// Task counters of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub total: usize,
    /// Tasks in a terminal state.
    pub finished: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub running: usize,
    pub pending: usize,
    /// `finished / total` in percent, rounded down.
    pub percent: u8,
}

impl Progress {
    fn of(run: &Run) -> Self {
        let total = run.tasks.len();
        let succeeded = run.count(TaskState::Success);
        let failed = run.count(TaskState::Failed);
        let skipped = run.count(TaskState::Skipped);
        let finished = succeeded + failed + skipped;
        let percent = if total == 0 {
            100
        } else {
            (finished * 100 / total) as u8
        };

        Self {
            total,
            finished,
            succeeded,
            failed,
            skipped,
            running: run.count(TaskState::Running),
            pending: run.count(TaskState::Pending),
            percent,
        }
    }
}

/// Consistent point-in-time view of a run, as returned by `get_status`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSnapshot {
    pub run_id: RunId,
    pub dag_name: String,
    pub overall_state: RunState,
    /// True once the run was closed by its worker.
    pub finished: bool,
    pub created_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
    pub progress: Progress,
    pub cancel_requested: bool,
    pub aborted: Option<String>,
    /// Task instances in resolved order.
    pub tasks: Vec<TaskSnapshot>,
    /// Concatenated run log.
    pub log: Vec<String>,
    #[serde(skip)]
    pub duration: Option<Duration>,
}

impl From<&Run> for RunSnapshot {
    fn from(run: &Run) -> Self {
        Self {
            run_id: run.run_id,
            dag_name: run.dag_name.clone(),
            overall_state: run.overall_state(),
            finished: run.finished,
            created_at: run.created_at,
            ended_at: run.ended_at,
            duration_ms: run.duration.map(millis),
            progress: Progress::of(run),
            cancel_requested: run.cancel_requested,
            aborted: run.aborted.clone(),
            tasks: run.tasks.iter().map(TaskSnapshot::from).collect(),
            log: run.log.clone(),
            duration: run.duration,
        }
    }
}

impl RunSnapshot {
    pub fn task(&self, id: &str) -> Option<&TaskSnapshot> {
        self.tasks.iter().find(|t| t.task_id == id)
    }

    pub fn state_of(&self, id: &str) -> Option<TaskState> {
        self.task(id).map(|t| t.state)
    }

    /// Sum of the recorded durations of all tasks that ran.
    pub fn total_task_duration(&self) -> Duration {
        self.tasks.iter().filter_map(|t| t.duration).sum()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Short listing entry used by `list_runs`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub run_id: RunId,
    pub dag_name: String,
    pub overall_state: RunState,
    pub created_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub progress: Progress,
}

impl From<&Run> for RunSummary {
    fn from(run: &Run) -> Self {
        Self {
            run_id: run.run_id,
            dag_name: run.dag_name.clone(),
            overall_state: run.overall_state(),
            created_at: run.created_at,
            ended_at: run.ended_at,
            progress: Progress::of(run),
        }
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
