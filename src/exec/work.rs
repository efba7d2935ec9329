// src/exec/work.rs

//! Work units: the opaque callables behind each task.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use serde_json::{Value, json};
use tracing::warn;

use crate::dag::TaskId;
use crate::tracker::{RunId, RunTracker};

pub type WorkFuture<'a> = Pin<Box<dyn Future<Output = anyhow::Result<Value>> + Send + 'a>>;

/// A unit of pipeline work.
///
/// Receives the outputs of its direct dependencies through the context and
/// returns its own result payload. Errors (and panics) turn the task
/// `Failed`; they never escape the engine.
pub trait WorkUnit: Send + Sync {
    fn run(&self, ctx: TaskContext) -> WorkFuture<'_>;
}

/// Handle for appending lines to the running task's log.
#[derive(Clone)]
pub struct TaskLogger {
    tracker: Option<RunTracker>,
    run_id: RunId,
    task_id: TaskId,
}

impl TaskLogger {
    pub fn new(tracker: RunTracker, run_id: RunId, task_id: impl Into<TaskId>) -> Self {
        Self {
            tracker: Some(tracker),
            run_id,
            task_id: task_id.into(),
        }
    }

    /// Logger that discards every line.
    pub fn detached(run_id: RunId, task_id: impl Into<TaskId>) -> Self {
        Self {
            tracker: None,
            run_id,
            task_id: task_id.into(),
        }
    }

    pub fn log(&self, line: impl AsRef<str>) {
        let Some(tracker) = &self.tracker else {
            return;
        };
        if let Err(err) = tracker.append_log(&self.run_id, Some(&self.task_id), line.as_ref()) {
            warn!(run_id = %self.run_id, task = %self.task_id, error = %err, "dropping task log line");
        }
    }
}

impl fmt::Debug for TaskLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskLogger")
            .field("run_id", &self.run_id)
            .field("task_id", &self.task_id)
            .field("attached", &self.tracker.is_some())
            .finish()
    }
}

/// Input handed to a work unit for one attempt.
#[derive(Debug, Clone)]
pub struct TaskContext {
    run_id: RunId,
    task_id: TaskId,
    attempt: u32,
    upstream: BTreeMap<TaskId, Value>,
    logger: TaskLogger,
}

impl TaskContext {
    pub fn new(
        run_id: RunId,
        task_id: impl Into<TaskId>,
        attempt: u32,
        upstream: BTreeMap<TaskId, Value>,
        logger: TaskLogger,
    ) -> Self {
        Self {
            run_id,
            task_id: task_id.into(),
            attempt,
            upstream,
            logger,
        }
    }

    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// 1 for the first attempt.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Outputs of the direct dependencies, keyed by task id.
    pub fn upstream(&self) -> &BTreeMap<TaskId, Value> {
        &self.upstream
    }

    pub fn upstream_output(&self, task: &str) -> Option<&Value> {
        self.upstream.get(task)
    }

    pub fn log(&self, line: impl AsRef<str>) {
        self.logger.log(line);
    }

    pub fn logger(&self) -> &TaskLogger {
        &self.logger
    }
}

struct FnWork<F>(F);

impl<F, Fut> WorkUnit for FnWork<F>
where
    F: Fn(TaskContext) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    fn run(&self, ctx: TaskContext) -> WorkFuture<'_> {
        Box::pin((self.0)(ctx))
    }
}

/// Wrap an async closure as a work unit.
pub fn work_fn<F, Fut>(f: F) -> impl WorkUnit
where
    F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    FnWork(f)
}

struct BlockingWork<F>(Arc<F>);

impl<F> WorkUnit for BlockingWork<F>
where
    F: Fn(TaskContext) -> anyhow::Result<Value> + Send + Sync + 'static,
{
    fn run(&self, ctx: TaskContext) -> WorkFuture<'_> {
        let f = Arc::clone(&self.0);
        Box::pin(async move {
            tokio::task::spawn_blocking(move || f(ctx))
                .await
                .map_err(|e| anyhow!("blocking work did not complete: {e}"))?
        })
    }
}

/// Wrap a blocking closure; it runs on tokio's blocking pool.
pub fn blocking_work<F>(f: F) -> impl WorkUnit
where
    F: Fn(TaskContext) -> anyhow::Result<Value> + Send + Sync + 'static,
{
    BlockingWork(Arc::new(f))
}

/// Stand-in for a real ETL step: waits, logs a few lines, reports a record
/// count and optionally fails.
#[derive(Debug, Clone, Default)]
pub struct SimulatedWork {
    pub description: String,
    pub delay: Duration,
    pub lines: Vec<String>,
    /// Records produced. `None` sums the `records` of upstream outputs.
    pub records: Option<u64>,
    /// Error message to fail with on every attempt.
    pub failure: Option<String>,
    /// Fail only the first `n` attempts, then succeed.
    pub fail_attempts: u32,
}

impl SimulatedWork {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            ..Self::default()
        }
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn line(mut self, line: impl Into<String>) -> Self {
        self.lines.push(line.into());
        self
    }

    pub fn records(mut self, records: u64) -> Self {
        self.records = Some(records);
        self
    }

    pub fn failing(mut self, error: impl Into<String>) -> Self {
        self.failure = Some(error.into());
        self
    }

    pub fn flaky(mut self, attempts: u32, error: impl Into<String>) -> Self {
        self.fail_attempts = attempts;
        self.failure = Some(error.into());
        self
    }
}

impl WorkUnit for SimulatedWork {
    fn run(&self, ctx: TaskContext) -> WorkFuture<'_> {
        Box::pin(async move {
            if !self.description.is_empty() {
                ctx.log(&self.description);
            }
            for line in &self.lines {
                ctx.log(line);
            }
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }

            if let Some(error) = &self.failure {
                if self.fail_attempts == 0 || ctx.attempt() <= self.fail_attempts {
                    return Err(anyhow!("{error}"));
                }
            }

            let records = self.records.unwrap_or_else(|| {
                ctx.upstream()
                    .values()
                    .filter_map(|v| v.get("records").and_then(Value::as_u64))
                    .sum()
            });
            ctx.log(format!("{records} records processed"));

            Ok(json!({
                "task": ctx.task_id(),
                "records": records,
                "upstream": ctx.upstream().keys().collect::<Vec<_>>(),
            }))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(attempt: u32, upstream: BTreeMap<TaskId, Value>) -> TaskContext {
        let run_id = RunId::new();
        TaskContext::new(run_id, "transform", attempt, upstream, TaskLogger::detached(run_id, "transform"))
    }

    #[tokio::test]
    async fn simulated_work_sums_upstream_records() {
        let upstream = BTreeMap::from([
            ("load_a".to_string(), json!({"records": 3})),
            ("load_b".to_string(), json!({"records": 4})),
        ]);
        let out = SimulatedWork::default().run(ctx(1, upstream)).await.unwrap();
        assert_eq!(out["records"], json!(7));
        assert_eq!(out["upstream"], json!(["load_a", "load_b"]));
    }

    #[tokio::test]
    async fn flaky_work_recovers_after_configured_attempts() {
        let work = SimulatedWork::new("flaky").records(1).flaky(2, "timeout");
        assert!(work.run(ctx(1, BTreeMap::new())).await.is_err());
        assert!(work.run(ctx(2, BTreeMap::new())).await.is_err());
        assert!(work.run(ctx(3, BTreeMap::new())).await.is_ok());

        let always = SimulatedWork::default().failing("file not found");
        let err = always.run(ctx(5, BTreeMap::new())).await.unwrap_err();
        assert_eq!(err.to_string(), "file not found");
    }

    #[tokio::test]
    async fn closures_can_be_used_as_work() {
        let async_work = work_fn(|ctx: TaskContext| async move { Ok(json!(ctx.attempt())) });
        assert_eq!(async_work.run(ctx(2, BTreeMap::new())).await.unwrap(), json!(2));

        let sync_work = blocking_work(|ctx: TaskContext| Ok(json!(ctx.task_id())));
        assert_eq!(sync_work.run(ctx(1, BTreeMap::new())).await.unwrap(), json!("transform"));
    }
}
