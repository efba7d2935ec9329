// src/dag/mod.rs

//! Task registry, dependency resolution and per-run scheduling.
//!
//! - [`registry`] collects task definitions and validates them once.
//! - [`resolver`] turns a validated registry into a deterministic order.
//! - [`graph`] keeps both edge directions for failure propagation.
//! - [`plan`] bundles the above into the immutable input of every run.
//! - [`scheduler`] contains the per-run state machine that decides
//!   which tasks are ready to run, and what gets skipped.
//! - [`task_info`] provides task states and scheduled task types.
//! - [`scheduler_step`] defines the result type for scheduler steps.
//! - [`state_manager`] manages per-run state transitions.

pub mod graph;
pub mod plan;
pub mod registry;
pub mod resolver;
pub mod scheduler;
pub mod scheduler_step;
pub mod state_manager;
pub mod task_info;

pub use graph::DagGraph;
pub use plan::ExecutionPlan;
pub use registry::{FinalizedRegistry, TaskDefinition, TaskRegistry};
pub use resolver::{resolve, resolve_unvalidated};
pub use scheduler::Scheduler;
pub use scheduler_step::{SchedulerStep, SkippedTask};
pub use task_info::{ScheduledTask, TaskId, TaskInfo, TaskState};
