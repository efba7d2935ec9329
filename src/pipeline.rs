// src/pipeline.rs

//! Query surface of the engine.
//!
//! A `Pipeline` owns the execution plan, the run tracker and the dedicated
//! run worker. Callers (the CLI, a web view) only ever go through here.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::dag::{ExecutionPlan, FinalizedRegistry};
use crate::engine::spawn_run_worker;
use crate::errors::{EtlDagError, Result};
use crate::events::EventSink;
use crate::tracker::{RunId, RunSnapshot, RunSummary, RunTracker};
use crate::types::EngineOptions;

pub struct Pipeline {
    plan: ExecutionPlan,
    tracker: RunTracker,
    options: EngineOptions,
    worker_tx: mpsc::UnboundedSender<RunId>,
    worker: JoinHandle<()>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("dag_name", &self.tracker.dag_name())
            .field("tasks", &self.plan.order())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    /// Resolve the plan and spawn the run worker.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(
        dag_name: impl Into<String>,
        registry: FinalizedRegistry,
        options: EngineOptions,
        sink: Arc<dyn EventSink>,
    ) -> Result<Self> {
        let plan = ExecutionPlan::build(registry)?;
        let tracker = RunTracker::new(dag_name, &plan, options, sink);
        let (worker_tx, worker) = spawn_run_worker(plan.clone(), tracker.clone(), options);

        info!(
            dag = %tracker.dag_name(),
            tasks = plan.len(),
            max_workers = options.max_workers,
            policy = ?options.failure_policy,
            "pipeline ready"
        );

        Ok(Self {
            plan,
            tracker,
            options,
            worker_tx,
            worker,
        })
    }

    /// Create a run and queue it on the worker.
    pub fn start_run(&self) -> Result<RunId> {
        let run_id = self.tracker.start_run()?;

        if self.worker_tx.send(run_id).is_err() {
            error!(%run_id, "run worker is gone; closing run");
            self.tracker.finish_run(&run_id)?;
            return Err(EtlDagError::WorkerStopped);
        }
        Ok(run_id)
    }

    pub fn get_status(&self, run_id: &RunId) -> Result<RunSnapshot> {
        self.tracker.get_status(run_id)
    }

    /// Best-effort stop. Returns `false` if there was nothing to cancel.
    pub fn cancel_run(&self, run_id: &RunId) -> Result<bool> {
        self.tracker.cancel_run(run_id)
    }

    pub fn list_runs(&self, limit: usize) -> Vec<RunSummary> {
        self.tracker.list_runs(limit)
    }

    pub fn latest_run(&self) -> Option<RunSnapshot> {
        self.tracker.latest_run()
    }

    pub fn active_run(&self) -> Option<RunId> {
        self.tracker.active_run()
    }

    pub fn clear_history(&self) -> usize {
        self.tracker.clear_history()
    }

    pub async fn wait_for(&self, run_id: &RunId) -> Result<RunSnapshot> {
        self.tracker.wait_for(run_id).await
    }

    pub fn plan(&self) -> &ExecutionPlan {
        &self.plan
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    pub fn tracker(&self) -> &RunTracker {
        &self.tracker
    }

    /// Stop accepting runs and wait for the worker to drain its queue.
    pub async fn shutdown(self) -> Result<()> {
        let Pipeline {
            worker_tx, worker, ..
        } = self;
        drop(worker_tx);
        worker
            .await
            .map_err(|e| EtlDagError::Other(anyhow::anyhow!("run worker failed: {e}")))
    }
}
