// src/exec/task_runner.rs

//! Runs one scheduled task to completion, including retries.

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::dag::ScheduledTask;
use crate::engine::{RuntimeEvent, TaskOutcome};
use crate::exec::work::{TaskContext, TaskLogger};
use crate::tracker::RunTracker;

/// Run a single task, retrying failed attempts while retries remain, and
/// emit exactly one `TaskCompleted` event for it.
///
/// Errors and panics of the work unit become `TaskOutcome::Failed`; they
/// never reach the caller.
pub async fn run_task(
    task: ScheduledTask,
    tracker: RunTracker,
    runtime_tx: mpsc::UnboundedSender<RuntimeEvent>,
) {
    let task_id = task.task_id.clone();
    let run_id = task.run_id;
    let outcome = run_attempts(&task, &tracker).await;

    match &outcome {
        TaskOutcome::Success(_) => info!(%run_id, task = %task_id, "task succeeded"),
        TaskOutcome::Failed(err) => error!(%run_id, task = %task_id, error = %err, "task failed"),
    }

    if runtime_tx
        .send(RuntimeEvent::TaskCompleted {
            task: task_id.clone(),
            outcome,
        })
        .is_err()
    {
        warn!(%run_id, task = %task_id, "runtime gone; dropping task completion");
    }
}

async fn run_attempts(task: &ScheduledTask, tracker: &RunTracker) -> TaskOutcome {
    let mut attempt = 1;

    loop {
        debug!(run_id = %task.run_id, task = %task.task_id, attempt, "starting attempt");

        let error = match run_once(task, tracker, attempt).await {
            Ok(output) => return TaskOutcome::Success(output),
            Err(error) => error,
        };

        if attempt > task.retries {
            return TaskOutcome::Failed(error);
        }

        match tracker.retry_task(&task.run_id, &task.task_id, &error) {
            Ok(next) => attempt = next,
            Err(err) => {
                // The tracker no longer accepts this task; report the failure
                // and let the scheduler sort out the inconsistency.
                warn!(run_id = %task.run_id, task = %task.task_id, error = %err, "retry rejected");
                return TaskOutcome::Failed(error);
            }
        }

        if !task.retry_delay.is_zero() {
            tokio::time::sleep(task.retry_delay).await;
        }
    }
}

/// One invocation of the work unit, isolated in its own tokio task so a
/// panic is contained and reported as an error.
async fn run_once(
    task: &ScheduledTask,
    tracker: &RunTracker,
    attempt: u32,
) -> Result<serde_json::Value, String> {
    let logger = TaskLogger::new(tracker.clone(), task.run_id, task.task_id.clone());
    let ctx = TaskContext::new(
        task.run_id,
        task.task_id.clone(),
        attempt,
        task.upstream.clone(),
        logger,
    );
    let work = task.work.clone();

    let handle = tokio::spawn(async move { work.run(ctx).await });
    match handle.await {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(err)) => Err(format!("{err:#}")),
        Err(join_err) if join_err.is_panic() => Err(format!(
            "work unit panicked: {}",
            panic_message(join_err.into_panic())
        )),
        Err(join_err) => Err(format!("work unit did not complete: {join_err}")),
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use std::time::Duration;

    use serde_json::json;

    use crate::dag::{ExecutionPlan, TaskRegistry, TaskState};
    use crate::events::NullSink;
    use crate::exec::work::{WorkUnit, work_fn};
    use crate::exec::SimulatedWork;
    use crate::tracker::RunId;
    use crate::types::EngineOptions;

    fn setup(work: impl WorkUnit + 'static, retries: u32) -> (RunTracker, RunId, ScheduledTask) {
        let mut reg = TaskRegistry::new();
        reg.register_definition(
            crate::dag::TaskDefinition::new("extract", work).retries(retries, Duration::from_millis(10)),
        )
        .unwrap();
        let plan = ExecutionPlan::build(reg.finalize().unwrap()).unwrap();
        let tracker = RunTracker::new("t", &plan, EngineOptions::default(), Arc::new(NullSink));
        let run_id = tracker.start_run().unwrap();
        tracker.start_task(&run_id, "extract").unwrap();
        let def = plan.definition("extract").unwrap();
        let task = ScheduledTask::from_definition(def, run_id, BTreeMap::new());
        (tracker, run_id, task)
    }

    async fn outcome_of(tracker: RunTracker, task: ScheduledTask) -> TaskOutcome {
        let (tx, mut rx) = mpsc::unbounded_channel();
        run_task(task, tracker, tx).await;
        match rx.recv().await {
            Some(RuntimeEvent::TaskCompleted { outcome, .. }) => outcome,
            other => panic!("expected TaskCompleted, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retries_until_success() {
        let (tracker, run_id, task) = setup(SimulatedWork::new("extract").records(5).flaky(2, "timeout"), 2);
        let outcome = outcome_of(tracker.clone(), task).await;
        assert_eq!(outcome.target_state(), TaskState::Success);

        let snap = tracker.get_status(&run_id).unwrap();
        let instance = snap.task("extract").unwrap();
        assert_eq!(instance.attempt, 3);
        assert_eq!(
            instance
                .log_lines
                .iter()
                .filter(|l| l.contains("retrying"))
                .count(),
            2
        );
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_last_retry() {
        let (tracker, _, task) = setup(SimulatedWork::default().failing("file not found"), 1);
        let outcome = outcome_of(tracker, task).await;
        assert_eq!(outcome, TaskOutcome::Failed("file not found".into()));
    }

    #[tokio::test]
    async fn panicking_work_is_reported_as_failure() {
        let work = work_fn(|_ctx| async move {
            if true {
                panic!("bad row");
            }
            Ok(json!(null))
        });
        let (tracker, _, task) = setup(work, 0);
        match outcome_of(tracker, task).await {
            TaskOutcome::Failed(msg) => assert!(msg.contains("bad row"), "got {msg}"),
            other => panic!("expected failure, got {other:?}"),
        }
    }
}
