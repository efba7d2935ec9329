// src/exec/mod.rs

//! Task execution layer.
//!
//! - [`work`] defines the `WorkUnit` trait, the per-attempt `TaskContext`
//!   and the ready-made units (`SimulatedWork`, closures).
//! - [`task_runner`] runs one scheduled task: attempts, retries, panic
//!   capture, and the final `TaskCompleted` event.
//! - [`backend`] provides the `ExecutorBackend` trait and the concrete
//!   `WorkerPoolBackend` that the runtime uses in production, and which
//!   tests can replace with a fake implementation.

pub mod backend;
pub mod task_runner;
pub mod work;

pub use backend::{ExecutorBackend, WorkerPoolBackend};
pub use task_runner::run_task;
pub use work::{
    SimulatedWork, TaskContext, TaskLogger, WorkFuture, WorkUnit, blocking_work, work_fn,
};
