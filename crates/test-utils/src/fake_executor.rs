use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use serde_json::json;
use tokio::sync::mpsc;
use etldag::dag::ScheduledTask;
use etldag::engine::{RuntimeEvent, TaskOutcome};
use etldag::errors::{EtlDagError, Result};
use etldag::exec::ExecutorBackend;

/// A fake executor that:
/// - records which tasks were "run", in dispatch order
/// - immediately reports `TaskCompleted` for each scheduled task
///   (success unless the task was registered as failing)
/// - can report a task's completion twice, to provoke integrity errors.
pub struct FakeExecutor {
    runtime_tx: mpsc::UnboundedSender<RuntimeEvent>,
    executed: Arc<Mutex<Vec<String>>>,
    failures: HashMap<String, String>,
    duplicate: HashSet<String>,
}

impl FakeExecutor {
    pub fn new(
        runtime_tx: mpsc::UnboundedSender<RuntimeEvent>,
        executed: Arc<Mutex<Vec<String>>>,
    ) -> Self {
        Self {
            runtime_tx,
            executed,
            failures: HashMap::new(),
            duplicate: HashSet::new(),
        }
    }

    pub fn failing(mut self, task: &str, error: &str) -> Self {
        self.failures.insert(task.to_string(), error.to_string());
        self
    }

    pub fn completing_twice(mut self, task: &str) -> Self {
        self.duplicate.insert(task.to_string());
        self
    }
}

impl ExecutorBackend for FakeExecutor {
    fn spawn_ready_tasks(
        &mut self,
        tasks: Vec<ScheduledTask>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let tx = self.runtime_tx.clone();
        let executed = Arc::clone(&self.executed);

        Box::pin(async move {
            for t in tasks {
                {
                    let mut guard = executed.lock().unwrap();
                    guard.push(t.task_id.clone());
                }

                let outcome = match self.failures.get(&t.task_id) {
                    Some(err) => TaskOutcome::Failed(err.clone()),
                    None => TaskOutcome::Success(json!({ "task": t.task_id })),
                };
                let times = if self.duplicate.contains(&t.task_id) { 2 } else { 1 };

                for _ in 0..times {
                    tx.send(RuntimeEvent::TaskCompleted {
                        task: t.task_id.clone(),
                        outcome: outcome.clone(),
                    })
                    .map_err(|_| EtlDagError::WorkerStopped)?;
                }
            }
            Ok(())
        })
    }
}
