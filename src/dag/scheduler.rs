use std::collections::{BTreeMap, HashMap};

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::dag::plan::ExecutionPlan;
use crate::dag::scheduler_step::{SchedulerStep, SkippedTask};
use crate::dag::state_manager::{ReadOnlyStateManager, StateManager};
use crate::dag::task_info::{ScheduledTask, TaskId, TaskInfo, TaskState};
use crate::engine::TaskOutcome;
use crate::errors::{EtlDagError, Result};
use crate::tracker::RunId;
use crate::types::{EngineOptions, FailurePolicy};

/// Scheduler holds the immutable plan plus the mutable state of one run.
///
/// It is responsible for:
/// - deciding which pending tasks are ready (all dependencies `Success`)
/// - bounding how many tasks run at once
/// - applying the failure policy when a task fails
/// - skipping everything that has not started on cancel/abort
///
/// It performs no IO; the engine runtime turns its steps into tracker
/// writes and executor dispatches.
#[derive(Debug)]
pub struct Scheduler {
    plan: ExecutionPlan,
    run_id: RunId,
    policy: FailurePolicy,
    max_workers: usize,
    tasks: HashMap<TaskId, TaskInfo>,
    /// Result payloads of succeeded tasks, handed to their dependents.
    outputs: HashMap<TaskId, Value>,
    /// Once set, no further task is started in this run.
    halted: Option<String>,
    started: bool,
    finished: bool,
}

impl Scheduler {
    pub fn new(plan: &ExecutionPlan, run_id: RunId, options: &EngineOptions) -> Self {
        let tasks = plan
            .registry()
            .iter()
            .map(|def| (def.id.clone(), TaskInfo::from_definition(def)))
            .collect();

        Self {
            plan: plan.clone(),
            run_id,
            policy: options.failure_policy,
            max_workers: options.max_workers.max(1),
            tasks,
            outputs: HashMap::new(),
            halted: None,
            started: false,
            finished: false,
        }
    }

    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    /// Current state of `task` in this run, `None` for unknown ids.
    pub fn run_state_of(&self, task: &str) -> Option<TaskState> {
        self.tasks.get(task).map(|info| info.state)
    }

    /// Whether all dependencies of `task` succeeded. `None` for unknown ids.
    pub fn deps_satisfied(&self, task: &str) -> Option<bool> {
        let info = self.tasks.get(task)?;
        Some(ReadOnlyStateManager::new(&self.tasks).deps_satisfied_for_info(info))
    }

    pub fn running_count(&self) -> usize {
        ReadOnlyStateManager::new(&self.tasks).running_count()
    }

    /// True once every task reached a terminal state.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn halt_reason(&self) -> Option<&str> {
        self.halted.as_deref()
    }

    /// Task ids in resolved order.
    pub fn task_ids(&self) -> &[TaskId] {
        self.plan.order()
    }

    /// Kick off the run: schedule the first batch of ready tasks.
    pub fn step_start(&mut self) -> SchedulerStep {
        if self.started {
            warn!(run_id = %self.run_id, "scheduler already started; ignoring");
            return SchedulerStep::default();
        }
        self.started = true;
        debug!(run_id = %self.run_id, tasks = self.tasks.len(), "scheduler: starting run");

        SchedulerStep {
            newly_scheduled: self.collect_ready(),
            newly_skipped: Vec::new(),
            run_just_finished: self.maybe_finish_run(),
        }
    }

    /// Record the outcome of a running task and work out what happens next.
    ///
    /// Fails with `InvalidTransition` if the task is not `Running`; the
    /// caller treats that as a broken scheduling invariant.
    pub fn step_completion(&mut self, task: &str, outcome: &TaskOutcome) -> Result<SchedulerStep> {
        let info = self
            .tasks
            .get_mut(task)
            .ok_or_else(|| EtlDagError::TaskNotFound(task.to_string()))?;

        let target = outcome.target_state();
        if info.state != TaskState::Running {
            return Err(EtlDagError::InvalidTransition {
                task: task.to_string(),
                from: info.state,
                to: target,
            });
        }
        info.state = target;

        let mut newly_skipped = Vec::new();

        match outcome {
            TaskOutcome::Success(output) => {
                debug!(run_id = %self.run_id, task, "task completed successfully");
                self.outputs.insert(task.to_string(), output.clone());
            }
            TaskOutcome::Failed(error) => {
                warn!(
                    run_id = %self.run_id,
                    task,
                    error = %error,
                    policy = ?self.policy,
                    "task failed; skipping dependents"
                );

                let mut manager = StateManager::new(self.plan.graph(), self.plan.order(), &mut self.tasks);
                let reason = format!("upstream task '{task}' failed");
                newly_skipped.extend(manager.mark_dependents_skipped(task).into_iter().map(|id| {
                    SkippedTask {
                        task_id: id,
                        reason: reason.clone(),
                    }
                }));

                if self.policy == FailurePolicy::CascadeSkip && self.halted.is_none() {
                    let reason = format!("run halted after failure of task '{task}'");
                    info!(run_id = %self.run_id, task, "cascade policy: no further tasks will start");
                    newly_skipped.extend(self.halt(reason));
                }
            }
        }

        Ok(SchedulerStep {
            newly_scheduled: self.collect_ready(),
            newly_skipped,
            run_just_finished: self.maybe_finish_run(),
        })
    }

    /// Best-effort stop: nothing new starts, pending tasks are skipped.
    pub fn step_cancel(&mut self) -> SchedulerStep {
        if self.finished {
            return SchedulerStep::default();
        }
        info!(run_id = %self.run_id, running = self.running_count(), "scheduler: run cancelled");

        SchedulerStep {
            newly_scheduled: Vec::new(),
            newly_skipped: self.halt("run cancelled".to_string()),
            run_just_finished: self.maybe_finish_run(),
        }
    }

    /// Abort after an integrity violation.
    ///
    /// Pending tasks are skipped. `stranded` names a task the scheduler
    /// believes is running but that will never report back; it is settled as
    /// failed so the run can still finish.
    pub fn step_abort(&mut self, reason: &str, stranded: Option<&str>) -> SchedulerStep {
        warn!(run_id = %self.run_id, reason, ?stranded, "scheduler: aborting run");

        if let Some(info) = stranded.and_then(|t| self.tasks.get_mut(t)) {
            if info.state == TaskState::Running {
                info.state = TaskState::Failed;
            }
        }

        SchedulerStep {
            newly_scheduled: Vec::new(),
            newly_skipped: self.halt(format!("run aborted: {reason}")),
            run_just_finished: self.maybe_finish_run(),
        }
    }

    fn halt(&mut self, reason: String) -> Vec<SkippedTask> {
        let mut manager = StateManager::new(self.plan.graph(), self.plan.order(), &mut self.tasks);
        let skipped = manager
            .skip_all_pending()
            .into_iter()
            .map(|id| SkippedTask {
                task_id: id,
                reason: reason.clone(),
            })
            .collect();

        if self.halted.is_none() {
            self.halted = Some(reason);
        }
        skipped
    }

    fn collect_ready(&mut self) -> Vec<ScheduledTask> {
        if self.halted.is_some() {
            return Vec::new();
        }

        let slots = self.max_workers.saturating_sub(self.running_count());
        let mut manager = StateManager::new(self.plan.graph(), self.plan.order(), &mut self.tasks);
        let ready = manager.collect_new_ready_tasks(slots);

        ready
            .into_iter()
            .filter_map(|id| {
                let def = self.plan.definition(&id)?;
                let upstream: BTreeMap<TaskId, Value> = def
                    .dependencies
                    .iter()
                    .filter_map(|dep| self.outputs.get(dep).map(|v| (dep.clone(), v.clone())))
                    .collect();
                info!(run_id = %self.run_id, task = %id, "scheduling task");
                Some(ScheduledTask::from_definition(def, self.run_id, upstream))
            })
            .collect()
    }

    fn maybe_finish_run(&mut self) -> bool {
        if self.finished {
            return false;
        }

        let manager = StateManager::new(self.plan.graph(), self.plan.order(), &mut self.tasks);
        if manager.all_tasks_terminal() {
            info!(run_id = %self.run_id, "scheduler: all tasks terminal; run finished");
            self.finished = true;
            true
        } else {
            false
        }
    }
}
