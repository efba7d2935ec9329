// src/tracker/run.rs

//! Run and task instance records owned by the tracker.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::watch;
use tokio::time::Instant;
use uuid::Uuid;

use crate::dag::{TaskId, TaskState};
use crate::engine::TaskOutcome;
use crate::errors::{EtlDagError, Result};

/// Identifier of one pipeline run (UUID v4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for RunId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self)
    }
}

/// Aggregate state of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Running,
    Success,
    Failed,
    Cancelled,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, RunState::Running)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunState::Running => "running",
            RunState::Success => "success",
            RunState::Failed => "failed",
            RunState::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// One task's record within a run.
#[derive(Debug, Clone)]
pub struct TaskInstance {
    pub task_id: TaskId,
    pub description: String,
    pub state: TaskState,
    /// Current attempt number, starting at 1.
    pub attempt: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration: Option<Duration>,
    pub log_lines: Vec<String>,
    pub error: Option<String>,
    pub skip_reason: Option<String>,
    pub output: Option<Value>,
    started_instant: Option<Instant>,
}

impl TaskInstance {
    pub fn new(task_id: impl Into<TaskId>, description: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            description: description.into(),
            state: TaskState::Pending,
            attempt: 1,
            started_at: None,
            ended_at: None,
            duration: None,
            log_lines: Vec::new(),
            error: None,
            skip_reason: None,
            output: None,
            started_instant: None,
        }
    }

    fn invalid(&self, to: TaskState) -> EtlDagError {
        EtlDagError::InvalidTransition {
            task: self.task_id.clone(),
            from: self.state,
            to,
        }
    }

    pub(crate) fn start(&mut self) -> Result<()> {
        if self.state != TaskState::Pending {
            return Err(self.invalid(TaskState::Running));
        }
        self.state = TaskState::Running;
        self.started_at = Some(Utc::now());
        self.started_instant = Some(Instant::now());
        Ok(())
    }

    /// The only `Running -> Running` step: a failed attempt with retries left.
    pub(crate) fn retry(&mut self) -> Result<u32> {
        if self.state != TaskState::Running {
            return Err(self.invalid(TaskState::Running));
        }
        self.attempt += 1;
        Ok(self.attempt)
    }

    pub(crate) fn complete(&mut self, outcome: &TaskOutcome) -> Result<()> {
        if self.state != TaskState::Running {
            return Err(self.invalid(outcome.target_state()));
        }
        match outcome {
            TaskOutcome::Success(output) => {
                self.output = Some(output.clone());
            }
            TaskOutcome::Failed(error) => {
                self.error = Some(error.clone());
            }
        }
        self.settle(outcome.target_state());
        Ok(())
    }

    pub(crate) fn skip(&mut self, reason: &str) -> Result<()> {
        if self.state != TaskState::Pending {
            return Err(self.invalid(TaskState::Skipped));
        }
        self.state = TaskState::Skipped;
        self.skip_reason = Some(reason.to_string());
        Ok(())
    }

    fn settle(&mut self, state: TaskState) {
        let now = Utc::now();
        self.state = state;
        // Wall clocks may step backwards; ended_at never precedes started_at.
        self.ended_at = Some(match self.started_at {
            Some(started) if started > now => started,
            _ => now,
        });
        self.duration = self.started_instant.map(|i| i.elapsed());
    }

    /// Force a running task into `Failed` when its run is closed under it.
    pub(crate) fn force_fail(&mut self, error: &str) {
        self.error.get_or_insert_with(|| error.to_string());
        self.settle(TaskState::Failed);
    }
}

/// One end-to-end execution attempt of the task graph.
#[derive(Debug)]
pub struct Run {
    pub run_id: RunId,
    pub dag_name: String,
    pub created_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration: Option<Duration>,
    /// One instance per registered task, in resolved order.
    pub tasks: Vec<TaskInstance>,
    /// `[timestamp] task: line` entries, in emission order.
    pub log: Vec<String>,
    pub cancel_requested: bool,
    pub aborted: Option<String>,
    pub finished: bool,
    index: HashMap<TaskId, usize>,
    created_instant: Instant,
    cancel_tx: watch::Sender<bool>,
}

impl Run {
    pub fn new(run_id: RunId, dag_name: impl Into<String>, tasks: Vec<TaskInstance>) -> Self {
        let index = tasks
            .iter()
            .enumerate()
            .map(|(i, t)| (t.task_id.clone(), i))
            .collect();
        let (cancel_tx, _) = watch::channel(false);

        Self {
            run_id,
            dag_name: dag_name.into(),
            created_at: Utc::now(),
            ended_at: None,
            duration: None,
            tasks,
            log: Vec::new(),
            cancel_requested: false,
            aborted: None,
            finished: false,
            index,
            created_instant: Instant::now(),
            cancel_tx,
        }
    }

    pub fn task(&self, id: &str) -> Option<&TaskInstance> {
        self.index.get(id).map(|&i| &self.tasks[i])
    }

    pub(crate) fn task_mut(&mut self, id: &str) -> Result<&mut TaskInstance> {
        match self.index.get(id) {
            Some(&i) => Ok(&mut self.tasks[i]),
            None => Err(EtlDagError::TaskNotFound(id.to_string())),
        }
    }

    pub fn count(&self, state: TaskState) -> usize {
        self.tasks.iter().filter(|t| t.state == state).count()
    }

    /// Aggregate state, derived from the task instances.
    ///
    /// `Failed` is sticky: it is reported as soon as one task failed, even
    /// while other branches are still running.
    pub fn overall_state(&self) -> RunState {
        let any = |s: TaskState| self.tasks.iter().any(|t| t.state == s);

        if self.aborted.is_some() || any(TaskState::Failed) {
            RunState::Failed
        } else if any(TaskState::Pending) || any(TaskState::Running) {
            RunState::Running
        } else if self.tasks.iter().all(|t| t.state == TaskState::Success) {
            RunState::Success
        } else if self.cancel_requested {
            RunState::Cancelled
        } else {
            RunState::Failed
        }
    }

    pub fn is_active(&self) -> bool {
        !self.finished
    }

    pub(crate) fn push_log(&mut self, task: Option<&str>, line: &str, at: DateTime<Utc>) {
        let stamp = at.format("%Y-%m-%d %H:%M:%S%.3f");
        let entry = match task {
            Some(task) => format!("[{stamp}] {task}: {line}"),
            None => format!("[{stamp}] {line}"),
        };
        self.log.push(entry);
    }

    /// Flag the run as cancelled and wake the worker driving it.
    pub(crate) fn request_cancel(&mut self) -> bool {
        if self.finished || self.cancel_requested {
            return false;
        }
        self.cancel_requested = true;
        self.cancel_tx.send_replace(true);
        true
    }

    pub(crate) fn cancel_receiver(&self) -> watch::Receiver<bool> {
        self.cancel_tx.subscribe()
    }

    /// Close the run. Tasks left behind by an aborted run are settled so the
    /// snapshot stays complete: pending ones are skipped, running ones failed.
    pub(crate) fn finish(&mut self) -> Vec<(TaskId, TaskState)> {
        let mut settled = Vec::new();
        let reason = match &self.aborted {
            Some(reason) => format!("run aborted: {reason}"),
            None => "run closed before task finished".to_string(),
        };

        for task in &mut self.tasks {
            match task.state {
                TaskState::Pending => {
                    task.state = TaskState::Skipped;
                    task.skip_reason = Some(reason.clone());
                    settled.push((task.task_id.clone(), TaskState::Skipped));
                }
                TaskState::Running => {
                    task.force_fail(&reason);
                    settled.push((task.task_id.clone(), TaskState::Failed));
                }
                _ => {}
            }
        }

        let now = Utc::now();
        self.ended_at = Some(now.max(self.created_at));
        self.duration = Some(self.created_instant.elapsed());
        self.finished = true;
        settled
    }
}
