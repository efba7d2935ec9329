// src/dag/scheduler_step.rs

//! Step-by-step execution result types for the scheduler.

use crate::dag::task_info::{ScheduledTask, TaskId};

/// A task the scheduler moved from `Pending` to `Skipped`, with the reason
/// that ends up on the task instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedTask {
    pub task_id: TaskId,
    pub reason: String,
}

/// Structured result of a single scheduler "step".
#[derive(Debug, Clone, Default)]
pub struct SchedulerStep {
    /// Tasks that became ready and were marked `Running` in this step.
    pub newly_scheduled: Vec<ScheduledTask>,
    /// Tasks that were skipped in this step, in resolved order.
    pub newly_skipped: Vec<SkippedTask>,
    /// Whether this step left every task in a terminal state.
    pub run_just_finished: bool,
}

impl SchedulerStep {
    pub fn scheduled_ids(&self) -> Vec<&str> {
        self.newly_scheduled
            .iter()
            .map(|t| t.task_id.as_str())
            .collect()
    }

    pub fn skipped_ids(&self) -> Vec<&str> {
        self.newly_skipped
            .iter()
            .map(|t| t.task_id.as_str())
            .collect()
    }
}
