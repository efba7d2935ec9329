// src/engine/core.rs

//! Pure core runtime state machine.
//!
//! This module contains a synchronous, deterministic "core runtime" that
//! consumes [`RuntimeEvent`]s and produces:
//! - an updated scheduler state
//! - a list of commands describing what the IO shell should do next
//!
//! The async shell (`engine::runtime::Runtime`) is responsible for:
//! - reading events from channels
//! - writing transitions to the run tracker
//! - sending `ScheduledTask`s to the executor
//!
//! The core is unit tested without any Tokio, channels or tracker.

use crate::dag::{Scheduler, TaskState};
use crate::engine::RuntimeEvent;
use crate::engine::event_handlers::{
    CoreStep, handle_cancel, handle_integrity_violation, handle_run_start,
    handle_task_completion,
};

/// Pure core runtime state for one run.
///
/// It has **no** channels, no Tokio types, and does not perform any IO.
#[derive(Debug)]
pub struct CoreRuntime {
    scheduler: Scheduler,
    cancel_requested: bool,
}

impl CoreRuntime {
    pub fn new(scheduler: Scheduler) -> Self {
        Self {
            scheduler,
            cancel_requested: false,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.scheduler.is_finished()
    }

    /// Scheduler-side state of a task (for tests and diagnostics).
    pub fn state_of(&self, task: &str) -> Option<TaskState> {
        self.scheduler.run_state_of(task)
    }

    pub fn running_count(&self) -> usize {
        self.scheduler.running_count()
    }

    /// Produce the commands that start the run.
    pub fn start(&mut self) -> CoreStep {
        handle_run_start(&mut self.scheduler)
    }

    /// Handle a single runtime event, updating core state and returning the
    /// resulting commands for the IO shell.
    pub fn step(&mut self, event: RuntimeEvent) -> CoreStep {
        match event {
            RuntimeEvent::TaskCompleted { task, outcome } => {
                handle_task_completion(&mut self.scheduler, task, outcome)
            }
            RuntimeEvent::CancelRequested => {
                if self.cancel_requested {
                    return CoreStep {
                        commands: Vec::new(),
                        keep_running: !self.scheduler.is_finished(),
                    };
                }
                self.cancel_requested = true;
                handle_cancel(&mut self.scheduler)
            }
            RuntimeEvent::IntegrityViolation { reason, task } => {
                handle_integrity_violation(&mut self.scheduler, reason, task)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dag::{ExecutionPlan, TaskRegistry};
    use crate::engine::{CoreCommand, TaskOutcome};
    use crate::exec::SimulatedWork;
    use crate::tracker::RunId;
    use crate::types::EngineOptions;
    use serde_json::json;

    fn core() -> CoreRuntime {
        let mut reg = TaskRegistry::new();
        reg.register("extract", Vec::<String>::new(), SimulatedWork::default()).unwrap();
        reg.register("transform", ["extract"], SimulatedWork::default()).unwrap();
        reg.register("load", ["transform"], SimulatedWork::default()).unwrap();
        let plan = ExecutionPlan::build(reg.finalize().unwrap()).unwrap();
        CoreRuntime::new(Scheduler::new(&plan, RunId::new(), &EngineOptions::default()))
    }

    fn dispatched(step: &CoreStep) -> Vec<String> {
        step.commands
            .iter()
            .filter_map(|c| match c {
                CoreCommand::DispatchTasks(tasks) => Some(tasks.iter().map(|t| t.task_id.clone())),
                _ => None,
            })
            .flatten()
            .collect()
    }

    #[test]
    fn completion_finishes_task_before_dispatching_dependents() {
        let mut core = core();
        let step = core.start();
        assert_eq!(dispatched(&step), vec!["extract"]);

        let step = core.step(RuntimeEvent::TaskCompleted {
            task: "extract".into(),
            outcome: TaskOutcome::Success(json!(1)),
        });
        assert!(matches!(
            step.commands.first(),
            Some(CoreCommand::FinishTask { task, .. }) if task == "extract"
        ));
        assert_eq!(dispatched(&step), vec!["transform"]);
        assert!(step.keep_running);
    }

    #[test]
    fn failure_skips_downstream_and_finishes_run() {
        let mut core = core();
        core.start();
        let step = core.step(RuntimeEvent::TaskCompleted {
            task: "extract".into(),
            outcome: TaskOutcome::Failed("no source".into()),
        });

        assert!(!step.keep_running);
        assert!(matches!(step.commands.last(), Some(CoreCommand::FinishRun)));
        assert_eq!(core.state_of("load"), Some(TaskState::Skipped));
    }

    #[test]
    fn duplicate_completion_aborts_run() {
        let mut core = core();
        core.start();
        let ok = || TaskOutcome::Success(json!(null));
        core.step(RuntimeEvent::TaskCompleted { task: "extract".into(), outcome: ok() });

        let step = core.step(RuntimeEvent::TaskCompleted { task: "extract".into(), outcome: ok() });
        assert!(matches!(step.commands.first(), Some(CoreCommand::AbortRun { .. })));
        // transform is still running and gets waited for.
        assert!(step.keep_running);
        assert_eq!(core.state_of("load"), Some(TaskState::Skipped));

        let step = core.step(RuntimeEvent::TaskCompleted { task: "transform".into(), outcome: ok() });
        assert!(dispatched(&step).is_empty());
        assert!(!step.keep_running);
    }

    #[test]
    fn repeated_cancel_is_a_no_op() {
        let mut core = core();
        core.start();
        let first = core.step(RuntimeEvent::CancelRequested);
        assert!(matches!(first.commands.first(), Some(CoreCommand::SkipTasks(t)) if t.len() == 2));
        let second = core.step(RuntimeEvent::CancelRequested);
        assert!(second.commands.is_empty());
        assert!(second.keep_running);
    }
}
