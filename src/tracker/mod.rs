// src/tracker/mod.rs

//! Run tracker: the single source of truth for run state.
//!
//! The execution engine writes every transition here; everybody else reads
//! snapshots. All state sits behind one `RwLock` and every write is a single
//! critical section, so a reader never sees a half-applied transition.
//! Task execution never holds the lock, so `get_status` stays responsive
//! while a run is in flight.

pub mod run;
pub mod snapshot;

use std::collections::VecDeque;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::dag::{ExecutionPlan, TaskId, TaskState};
use crate::engine::TaskOutcome;
use crate::errors::{EtlDagError, Result};
use crate::events::{EventSink, RunEvent};
use crate::types::{EngineOptions, StartWhileActiveBehaviour};

pub use run::{Run, RunId, RunState, TaskInstance};
pub use snapshot::{Progress, RunSnapshot, RunSummary, TaskSnapshot};

/// Marks the run that currently owns the engine.
///
/// Created by `start_run`, cleared when that run is finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveRunHandle {
    pub run_id: RunId,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct TrackerState {
    /// Oldest first.
    runs: VecDeque<Run>,
    active: Option<ActiveRunHandle>,
}

impl TrackerState {
    fn run(&self, run_id: &RunId) -> Result<&Run> {
        self.runs
            .iter()
            .find(|r| r.run_id == *run_id)
            .ok_or_else(|| EtlDagError::RunNotFound(run_id.to_string()))
    }

    fn run_mut(&mut self, run_id: &RunId) -> Result<&mut Run> {
        self.runs
            .iter_mut()
            .find(|r| r.run_id == *run_id)
            .ok_or_else(|| EtlDagError::RunNotFound(run_id.to_string()))
    }
}

struct Shared {
    state: RwLock<TrackerState>,
    sink: Arc<dyn EventSink>,
    /// Bumped every time a run is finished; wakes `wait_for` callers.
    finished_tx: watch::Sender<u64>,
    dag_name: String,
    /// `(task id, description)` in resolved order.
    tasks: Vec<(TaskId, String)>,
    options: EngineOptions,
}

/// Cheaply clonable handle to the shared tracker state.
#[derive(Clone)]
pub struct RunTracker {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for RunTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunTracker")
            .field("dag_name", &self.shared.dag_name)
            .field("tasks", &self.shared.tasks.len())
            .finish_non_exhaustive()
    }
}

impl RunTracker {
    pub fn new(
        dag_name: impl Into<String>,
        plan: &ExecutionPlan,
        options: EngineOptions,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        let tasks = plan
            .order()
            .iter()
            .map(|id| {
                let description = plan
                    .definition(id)
                    .map(|def| def.description.clone())
                    .unwrap_or_default();
                (id.clone(), description)
            })
            .collect();
        let (finished_tx, _) = watch::channel(0);

        Self {
            shared: Arc::new(Shared {
                state: RwLock::new(TrackerState::default()),
                sink,
                finished_tx,
                dag_name: dag_name.into(),
                tasks,
                options,
            }),
        }
    }

    pub fn dag_name(&self) -> &str {
        &self.shared.dag_name
    }

    fn read(&self) -> RwLockReadGuard<'_, TrackerState> {
        // A panic while holding the lock cannot leave a half-applied
        // transition behind, so the state is still usable.
        self.shared
            .state
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, TrackerState> {
        self.shared
            .state
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn emit(&self, event: RunEvent) {
        self.shared.sink.emit(&event);
    }

    fn log_locked(&self, run: &mut Run, task: Option<&str>, line: &str) {
        let timestamp = Utc::now();
        run.push_log(task, line, timestamp);
        self.emit(RunEvent::Log {
            run_id: run.run_id,
            task_id: task.map(str::to_string),
            line: line.to_string(),
            timestamp,
        });
    }

    fn transition_locked(&self, run: &Run, task: &str, state: TaskState) {
        self.emit(RunEvent::Transition {
            run_id: run.run_id,
            task_id: task.to_string(),
            state,
            timestamp: Utc::now(),
        });
    }

    /// Create a new run with every task `Pending`.
    ///
    /// Fails with `RunAlreadyActive` while another run is active, unless the
    /// tracker was configured to preempt: the active run is then cancelled
    /// and the new one becomes the active run.
    pub fn start_run(&self) -> Result<RunId> {
        let mut state = self.write();

        if let Some(active) = state.active {
            match self.shared.options.start_while_active {
                StartWhileActiveBehaviour::Reject => {
                    return Err(EtlDagError::RunAlreadyActive(active.run_id));
                }
                StartWhileActiveBehaviour::Preempt => {
                    let previous = state.run_mut(&active.run_id)?;
                    if previous.request_cancel() {
                        self.log_locked(previous, None, "run cancelled: preempted by a new run");
                    }
                    info!(run_id = %active.run_id, "preempting active run");
                }
            }
        }

        let run_id = RunId::new();
        let tasks = self
            .shared
            .tasks
            .iter()
            .map(|(id, description)| TaskInstance::new(id.clone(), description.clone()))
            .collect();
        let mut run = Run::new(run_id, self.shared.dag_name.clone(), tasks);
        let line = format!(
            "run created for dag '{}' ({} tasks)",
            self.shared.dag_name,
            run.tasks.len()
        );
        self.log_locked(&mut run, None, &line);

        state.active = Some(ActiveRunHandle {
            run_id,
            started_at: run.created_at,
        });
        state.runs.push_back(run);
        info!(%run_id, dag = %self.shared.dag_name, "run created");
        Ok(run_id)
    }

    /// Consistent point-in-time view of a run.
    pub fn get_status(&self, run_id: &RunId) -> Result<RunSnapshot> {
        let state = self.read();
        state.run(run_id).map(RunSnapshot::from)
    }

    /// Append a log line to the run, and to `task` if given.
    ///
    /// Lines for a task that already reached a terminal state are rejected.
    pub fn append_log(&self, run_id: &RunId, task: Option<&str>, line: &str) -> Result<()> {
        let mut state = self.write();
        let run = state.run_mut(run_id)?;

        if let Some(task) = task {
            let instance = run.task_mut(task)?;
            if instance.state.is_terminal() {
                return Err(EtlDagError::TaskFinalized(task.to_string()));
            }
            instance.log_lines.push(line.to_string());
        }
        self.log_locked(run, task, line);
        Ok(())
    }

    /// Request best-effort cancellation. Returns `false` if the run already
    /// finished or cancellation was already requested.
    pub fn cancel_run(&self, run_id: &RunId) -> Result<bool> {
        let mut state = self.write();
        let run = state.run_mut(run_id)?;
        let requested = run.request_cancel();
        if requested {
            info!(%run_id, "cancellation requested");
            self.log_locked(run, None, "cancellation requested");
        }
        Ok(requested)
    }

    /// Up to `limit` runs, newest first.
    pub fn list_runs(&self, limit: usize) -> Vec<RunSummary> {
        let state = self.read();
        state
            .runs
            .iter()
            .rev()
            .take(limit)
            .map(RunSummary::from)
            .collect()
    }

    pub fn latest_run(&self) -> Option<RunSnapshot> {
        self.read().runs.back().map(RunSnapshot::from)
    }

    pub fn active_run(&self) -> Option<RunId> {
        self.read().active.map(|a| a.run_id)
    }

    /// Forget every finished run. Returns how many were removed.
    pub fn clear_history(&self) -> usize {
        let mut state = self.write();
        let before = state.runs.len();
        state.runs.retain(|r| r.is_active());
        let removed = before - state.runs.len();
        debug!(removed, "run history cleared");
        removed
    }

    /// Wait until the run has been finished and return its final snapshot.
    pub async fn wait_for(&self, run_id: &RunId) -> Result<RunSnapshot> {
        let mut finished_rx = self.shared.finished_tx.subscribe();
        loop {
            let snapshot = self.get_status(run_id)?;
            if snapshot.finished {
                return Ok(snapshot);
            }
            if finished_rx.changed().await.is_err() {
                return Err(EtlDagError::WorkerStopped);
            }
        }
    }

    /// Receiver that flips to `true` when cancellation is requested.
    pub fn cancel_receiver(&self, run_id: &RunId) -> Result<watch::Receiver<bool>> {
        Ok(self.read().run(run_id)?.cancel_receiver())
    }

    /// `Pending -> Running`.
    pub fn start_task(&self, run_id: &RunId, task: &str) -> Result<()> {
        let mut state = self.write();
        let run = state.run_mut(run_id)?;
        run.task_mut(task)?.start()?;
        self.transition_locked(run, task, TaskState::Running);
        self.log_locked(run, Some(task), "started");
        Ok(())
    }

    /// Record a failed attempt of a task that will be retried.
    /// Returns the number of the next attempt.
    pub fn retry_task(&self, run_id: &RunId, task: &str, error: &str) -> Result<u32> {
        let mut state = self.write();
        let run = state.run_mut(run_id)?;
        let instance = run.task_mut(task)?;
        let failed_attempt = instance.attempt;
        let next = instance.retry()?;
        let line = format!("attempt {failed_attempt} failed: {error}; retrying (attempt {next})");
        instance.log_lines.push(line.clone());
        warn!(%run_id, task, attempt = failed_attempt, error, "task attempt failed; retrying");
        self.log_locked(run, Some(task), &line);
        Ok(next)
    }

    /// `Running -> Success | Failed`.
    pub fn complete_task(&self, run_id: &RunId, task: &str, outcome: &TaskOutcome) -> Result<()> {
        let mut state = self.write();
        let run = state.run_mut(run_id)?;
        let instance = run.task_mut(task)?;

        let line = match outcome {
            TaskOutcome::Success(output) => format!("succeeded with result {output}"),
            TaskOutcome::Failed(error) => format!("failed: {error}"),
        };
        // Pushed first: the instance is immutable once terminal.
        if instance.state == TaskState::Running {
            instance.log_lines.push(line.clone());
        }
        instance.complete(outcome)?;

        self.transition_locked(run, task, outcome.target_state());
        self.log_locked(run, Some(task), &line);
        Ok(())
    }

    /// `Pending -> Skipped`.
    pub fn skip_task(&self, run_id: &RunId, task: &str, reason: &str) -> Result<()> {
        let mut state = self.write();
        let run = state.run_mut(run_id)?;
        run.task_mut(task)?.skip(reason)?;
        self.transition_locked(run, task, TaskState::Skipped);
        self.log_locked(run, Some(task), &format!("skipped: {reason}"));
        Ok(())
    }

    /// Flag the run as aborted after an integrity violation.
    pub fn abort_run(&self, run_id: &RunId, reason: &str) -> Result<()> {
        let mut state = self.write();
        let run = state.run_mut(run_id)?;
        if run.aborted.is_none() {
            run.aborted = Some(reason.to_string());
            self.log_locked(run, None, &format!("run aborted: {reason}"));
        }
        Ok(())
    }

    /// Close a run and release the active slot.
    ///
    /// Any task still pending or running is settled so the final snapshot is
    /// complete. Old finished runs beyond the history limit are evicted.
    pub fn finish_run(&self, run_id: &RunId) -> Result<RunSnapshot> {
        let mut state = self.write();
        let run = state.run_mut(run_id)?;
        if run.finished {
            return Ok(RunSnapshot::from(&*run));
        }

        for (task, settled) in run.finish() {
            warn!(%run_id, task = %task, state = %settled, "settled task left behind by run");
            self.transition_locked(run, &task, settled);
        }

        let overall = run.overall_state();
        self.log_locked(run, None, &format!("run finished: {overall}"));
        self.emit(RunEvent::RunFinished {
            run_id: *run_id,
            state: overall,
            timestamp: run.ended_at.unwrap_or_else(Utc::now),
        });
        let snapshot = RunSnapshot::from(&*run);

        if state.active.is_some_and(|a| a.run_id == *run_id) {
            state.active = None;
        }
        self.evict_locked(&mut state);
        drop(state);

        info!(%run_id, state = %overall, "run finished");
        self.shared.finished_tx.send_modify(|n| *n += 1);
        Ok(snapshot)
    }

    fn evict_locked(&self, state: &mut TrackerState) {
        let limit = self.shared.options.history_limit.max(1);
        while state.runs.len() > limit {
            let Some(pos) = state.runs.iter().position(|r| !r.is_active()) else {
                break;
            };
            if let Some(evicted) = state.runs.remove(pos) {
                debug!(run_id = %evicted.run_id, "evicted run from history");
            }
        }
    }
}
