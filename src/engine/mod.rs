// src/engine/mod.rs

//! Execution engine for a single pipeline run.
//!
//! This module ties together:
//! - the per-run DAG scheduler
//! - the run tracker, which records every transition
//! - the executor backend that actually runs work units
//! - the worker that serialises runs and drives them one at a time
//!
//! The pure core state machine lives in [`core`]; the async/IO shell is
//! implemented in [`runtime`].

use serde_json::Value;

use crate::dag::{TaskId, TaskState};

/// Outcome of one task instance, as reported by the executor.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    /// The work unit returned; its output is handed to dependents.
    Success(Value),
    /// The work unit failed (error, panic) after all attempts.
    Failed(String),
}

impl TaskOutcome {
    pub fn target_state(&self) -> TaskState {
        match self {
            TaskOutcome::Success(_) => TaskState::Success,
            TaskOutcome::Failed(_) => TaskState::Failed,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, TaskOutcome::Success(_))
    }
}

/// Events flowing into the runtime from executors and run control.
#[derive(Debug, Clone)]
pub enum RuntimeEvent {
    /// A task instance finished with a concrete outcome.
    TaskCompleted { task: TaskId, outcome: TaskOutcome },
    /// Someone called `cancel_run` for this run.
    CancelRequested,
    /// A state write was rejected; scheduling can no longer be trusted.
    ///
    /// `task` names a task the scheduler marked running but that never
    /// reached the executor.
    IntegrityViolation {
        reason: String,
        task: Option<TaskId>,
    },
}

pub mod core;
pub mod event_handlers;
pub mod runtime;
pub mod worker;

pub use core::CoreRuntime;
pub use event_handlers::{CoreCommand, CoreStep};
pub use runtime::Runtime;
pub use worker::{execute_run, execute_run_with, spawn_run_worker};
