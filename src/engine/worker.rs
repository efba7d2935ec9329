// src/engine/worker.rs

//! The dedicated background worker that executes runs one at a time.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::dag::{ExecutionPlan, Scheduler};
use crate::engine::{CoreRuntime, Runtime, RuntimeEvent};
use crate::errors::Result;
use crate::exec::{ExecutorBackend, WorkerPoolBackend};
use crate::tracker::{RunId, RunSnapshot, RunTracker};
use crate::types::EngineOptions;

/// Spawn the run worker. Run ids sent on the returned channel are executed
/// sequentially, in submission order. The worker stops once every sender
/// has been dropped.
pub fn spawn_run_worker(
    plan: ExecutionPlan,
    tracker: RunTracker,
    options: EngineOptions,
) -> (mpsc::UnboundedSender<RunId>, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<RunId>();

    let handle = tokio::spawn(async move {
        info!(dag = %tracker.dag_name(), "run worker started");

        while let Some(run_id) = rx.recv().await {
            match execute_run(&plan, &tracker, &options, run_id).await {
                Ok(snapshot) => {
                    debug!(%run_id, state = %snapshot.overall_state, "run worker finished run");
                }
                Err(err) => {
                    error!(%run_id, error = %err, "run could not be executed");
                    // Close the record anyway so waiters are released.
                    if let Err(err) = tracker.finish_run(&run_id) {
                        error!(%run_id, error = %err, "failed to close run");
                    }
                }
            }
        }

        info!("run worker stopped");
    });

    (tx, handle)
}

/// Execute one run with the production executor.
pub async fn execute_run(
    plan: &ExecutionPlan,
    tracker: &RunTracker,
    options: &EngineOptions,
    run_id: RunId,
) -> Result<RunSnapshot> {
    let tracker_for_executor = tracker.clone();
    execute_run_with(plan, tracker, options, run_id, move |runtime_tx| {
        WorkerPoolBackend::new(runtime_tx, tracker_for_executor)
    })
    .await
}

/// Execute one run with a custom executor backend.
///
/// `make_executor` receives the sender it must report `TaskCompleted`
/// events on.
pub async fn execute_run_with<E, F>(
    plan: &ExecutionPlan,
    tracker: &RunTracker,
    options: &EngineOptions,
    run_id: RunId,
    make_executor: F,
) -> Result<RunSnapshot>
where
    E: ExecutorBackend,
    F: FnOnce(mpsc::UnboundedSender<RuntimeEvent>) -> E,
{
    let (runtime_tx, runtime_rx) = mpsc::unbounded_channel();
    let executor = make_executor(runtime_tx);
    let core = CoreRuntime::new(Scheduler::new(plan, run_id, options));

    Runtime::new(core, runtime_rx, executor, tracker.clone(), run_id)?
        .run()
        .await
}
