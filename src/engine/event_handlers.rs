// src/engine/event_handlers.rs

//! Event handling logic for the core runtime.

use tracing::{debug, error};

use crate::dag::{ScheduledTask, Scheduler, SchedulerStep, SkippedTask, TaskId};
use crate::engine::TaskOutcome;

/// Command produced by the pure core, to be executed by the outer IO shell.
///
/// Commands of one step must be applied in order: a task is finished before
/// its dependents are skipped or dispatched.
#[derive(Debug, Clone)]
pub enum CoreCommand {
    /// Record the outcome of a running task.
    FinishTask { task: TaskId, outcome: TaskOutcome },
    /// Record that these tasks will never run.
    SkipTasks(Vec<SkippedTask>),
    /// Mark these tasks running and send them to the executor.
    DispatchTasks(Vec<ScheduledTask>),
    /// Flag the run as aborted; it finishes as failed.
    AbortRun { reason: String },
    /// Every task is terminal; the run can be closed.
    FinishRun,
}

/// Decision returned by the core after handling a single `RuntimeEvent`.
#[derive(Debug, Clone)]
pub struct CoreStep {
    pub commands: Vec<CoreCommand>,
    /// Whether the outer runtime loop should keep waiting for events.
    pub keep_running: bool,
}

impl CoreStep {
    fn from_scheduler(scheduler: &Scheduler, mut commands: Vec<CoreCommand>, step: SchedulerStep) -> Self {
        push_scheduler_step(&mut commands, step);
        CoreStep {
            commands,
            keep_running: !scheduler.is_finished(),
        }
    }
}

/// Seed the run with the first batch of ready tasks.
pub fn handle_run_start(scheduler: &mut Scheduler) -> CoreStep {
    let step = scheduler.step_start();
    CoreStep::from_scheduler(scheduler, Vec::new(), step)
}

/// Handle a task completion event.
///
/// A completion the scheduler cannot accept (unknown task, task not
/// running) is an integrity violation and aborts the run.
pub fn handle_task_completion(
    scheduler: &mut Scheduler,
    task: TaskId,
    outcome: TaskOutcome,
) -> CoreStep {
    match scheduler.step_completion(&task, &outcome) {
        Ok(step) => {
            let commands = vec![CoreCommand::FinishTask { task, outcome }];
            CoreStep::from_scheduler(scheduler, commands, step)
        }
        Err(err) => {
            error!(run_id = %scheduler.run_id(), task = %task, error = %err, "rejected task completion");
            handle_integrity_violation(scheduler, err.to_string(), None)
        }
    }
}

/// Stop scheduling new work; running tasks are waited for.
pub fn handle_cancel(scheduler: &mut Scheduler) -> CoreStep {
    let step = scheduler.step_cancel();
    CoreStep::from_scheduler(scheduler, Vec::new(), step)
}

pub fn handle_integrity_violation(
    scheduler: &mut Scheduler,
    reason: String,
    task: Option<TaskId>,
) -> CoreStep {
    let step = scheduler.step_abort(&reason, task.as_deref());
    CoreStep::from_scheduler(scheduler, vec![CoreCommand::AbortRun { reason }], step)
}

fn push_scheduler_step(commands: &mut Vec<CoreCommand>, step: SchedulerStep) {
    debug!(
        scheduled = ?step.scheduled_ids(),
        skipped = ?step.skipped_ids(),
        finished = step.run_just_finished,
        "scheduler step"
    );

    if !step.newly_skipped.is_empty() {
        commands.push(CoreCommand::SkipTasks(step.newly_skipped));
    }
    if !step.newly_scheduled.is_empty() {
        commands.push(CoreCommand::DispatchTasks(step.newly_scheduled));
    }
    if step.run_just_finished {
        commands.push(CoreCommand::FinishRun);
    }
}
