// src/exec/backend.rs

//! Pluggable executor backend abstraction.
//!
//! The runtime talks to an `ExecutorBackend` instead of spawning work
//! itself. This makes it easy to swap in a fake executor in tests while
//! keeping the production implementation here.
//!
//! - `WorkerPoolBackend` is the default implementation. Every dispatched
//!   task gets its own tokio task; the scheduler already bounds how many
//!   are in flight.
//! - Tests can provide their own `ExecutorBackend` that, for example, records
//!   which tasks were scheduled and directly emits `TaskCompleted` events.

use std::future::Future;
use std::pin::Pin;

use tokio::sync::mpsc;
use tracing::debug;

use crate::dag::ScheduledTask;
use crate::engine::RuntimeEvent;
use crate::errors::Result;
use crate::tracker::RunTracker;

use super::task_runner::run_task;

/// Trait abstracting how scheduled tasks are executed.
pub trait ExecutorBackend: Send {
    /// Dispatch the given tasks for execution.
    ///
    /// The tasks are already `Running` in the tracker. The implementation
    /// must eventually report one `RuntimeEvent::TaskCompleted` per task.
    fn spawn_ready_tasks(
        &mut self,
        tasks: Vec<ScheduledTask>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

/// Executor backend used in production.
pub struct WorkerPoolBackend {
    runtime_tx: mpsc::UnboundedSender<RuntimeEvent>,
    tracker: RunTracker,
}

impl WorkerPoolBackend {
    pub fn new(runtime_tx: mpsc::UnboundedSender<RuntimeEvent>, tracker: RunTracker) -> Self {
        Self {
            runtime_tx,
            tracker,
        }
    }
}

impl ExecutorBackend for WorkerPoolBackend {
    fn spawn_ready_tasks(
        &mut self,
        tasks: Vec<ScheduledTask>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            for task in tasks {
                debug!(run_id = %task.run_id, task = %task.task_id, "spawning task");
                tokio::spawn(run_task(task, self.tracker.clone(), self.runtime_tx.clone()));
            }
            Ok(())
        })
    }
}
