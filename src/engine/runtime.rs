// src/engine/runtime.rs

use std::collections::VecDeque;
use std::fmt;

use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::dag::{ScheduledTask, SkippedTask};
use crate::errors::Result;
use crate::exec::ExecutorBackend;
use crate::tracker::{RunId, RunSnapshot, RunTracker};

use super::core::CoreRuntime;
use super::{CoreCommand, CoreStep, RuntimeEvent};

/// Drives one run: feeds `RuntimeEvent`s into the pure core, writes the
/// resulting transitions to the tracker and hands ready tasks to an
/// `ExecutorBackend`.
///
/// The tracker rejecting a write is an integrity violation; it is fed back
/// into the core, which aborts the run.
pub struct Runtime<E: ExecutorBackend> {
    core: CoreRuntime,
    event_rx: mpsc::UnboundedReceiver<RuntimeEvent>,
    cancel_rx: watch::Receiver<bool>,
    executor: E,
    tracker: RunTracker,
    run_id: RunId,
}

impl<E: ExecutorBackend> fmt::Debug for Runtime<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("run_id", &self.run_id)
            .field("core", &self.core)
            .finish_non_exhaustive()
    }
}

impl<E: ExecutorBackend> Runtime<E> {
    pub fn new(
        core: CoreRuntime,
        event_rx: mpsc::UnboundedReceiver<RuntimeEvent>,
        executor: E,
        tracker: RunTracker,
        run_id: RunId,
    ) -> Result<Self> {
        let cancel_rx = tracker.cancel_receiver(&run_id)?;
        Ok(Self {
            core,
            event_rx,
            cancel_rx,
            executor,
            tracker,
            run_id,
        })
    }

    /// Main event loop. Returns the final snapshot once every task is
    /// terminal and the run has been closed in the tracker.
    pub async fn run(mut self) -> Result<RunSnapshot> {
        info!(run_id = %self.run_id, "run started");

        // A run cancelled while still queued never starts a task.
        let mut cancel_seen = *self.cancel_rx.borrow_and_update();
        let mut keep_running = if cancel_seen {
            info!(run_id = %self.run_id, "run cancelled before it started");
            self.handle(RuntimeEvent::CancelRequested).await
        } else {
            let step = self.core.start();
            self.apply(step).await
        };

        while keep_running {
            tokio::select! {
                maybe_event = self.event_rx.recv() => {
                    let Some(event) = maybe_event else {
                        error!(run_id = %self.run_id, "executor channel closed with tasks in flight");
                        break;
                    };
                    debug!(run_id = %self.run_id, ?event, "runtime received event");
                    keep_running = self.handle(event).await;
                }
                changed = self.cancel_rx.changed(), if !cancel_seen => {
                    cancel_seen = true;
                    if changed.is_ok() && *self.cancel_rx.borrow_and_update() {
                        keep_running = self.handle(RuntimeEvent::CancelRequested).await;
                    }
                }
            }
        }

        let snapshot = self.tracker.finish_run(&self.run_id)?;
        info!(
            run_id = %self.run_id,
            state = %snapshot.overall_state,
            succeeded = snapshot.progress.succeeded,
            failed = snapshot.progress.failed,
            skipped = snapshot.progress.skipped,
            "run finished"
        );
        Ok(snapshot)
    }

    async fn handle(&mut self, event: RuntimeEvent) -> bool {
        let step = self.core.step(event);
        self.apply(step).await
    }

    /// Execute the commands of a step in order. Commands caused by an
    /// integrity violation are queued behind the current ones.
    async fn apply(&mut self, step: CoreStep) -> bool {
        let mut keep_running = step.keep_running;
        let mut pending: VecDeque<CoreCommand> = step.commands.into();

        while let Some(command) = pending.pop_front() {
            for violation in self.execute_command(command).await {
                warn!(run_id = %self.run_id, ?violation, "integrity violation; aborting run");
                let follow_up = self.core.step(violation);
                keep_running = follow_up.keep_running;
                pending.extend(follow_up.commands);
            }
        }

        keep_running
    }

    /// Execute a single command from the core. Returns the integrity
    /// violations it ran into.
    async fn execute_command(&mut self, command: CoreCommand) -> Vec<RuntimeEvent> {
        match command {
            CoreCommand::FinishTask { task, outcome } => {
                match self.tracker.complete_task(&self.run_id, &task, &outcome) {
                    Ok(()) => Vec::new(),
                    Err(err) => vec![violation(err.to_string(), None)],
                }
            }
            CoreCommand::SkipTasks(tasks) => self.skip(tasks),
            CoreCommand::DispatchTasks(tasks) => self.spawn_ready(tasks).await,
            CoreCommand::AbortRun { reason } => {
                if let Err(err) = self.tracker.abort_run(&self.run_id, &reason) {
                    error!(run_id = %self.run_id, error = %err, "failed to flag run as aborted");
                }
                Vec::new()
            }
            CoreCommand::FinishRun => {
                debug!(run_id = %self.run_id, "core reports every task terminal");
                Vec::new()
            }
        }
    }

    fn skip(&mut self, tasks: Vec<SkippedTask>) -> Vec<RuntimeEvent> {
        tasks
            .into_iter()
            .filter_map(|skipped| {
                self.tracker
                    .skip_task(&self.run_id, &skipped.task_id, &skipped.reason)
                    .err()
                    .map(|err| violation(err.to_string(), None))
            })
            .collect()
    }

    /// Mark tasks running in the tracker, then hand them to the executor.
    ///
    /// A task the tracker refuses to start, or that the executor does not
    /// accept, will never report back; it is named in the violation so the
    /// scheduler stops waiting for it.
    async fn spawn_ready(&mut self, tasks: Vec<ScheduledTask>) -> Vec<RuntimeEvent> {
        let mut violations = Vec::new();
        let mut accepted = Vec::with_capacity(tasks.len());

        for task in tasks {
            match self.tracker.start_task(&self.run_id, &task.task_id) {
                Ok(()) => accepted.push(task),
                Err(err) => violations.push(violation(err.to_string(), Some(task.task_id.clone()))),
            }
        }

        if accepted.is_empty() {
            return violations;
        }

        let names: Vec<_> = accepted.iter().map(|t| t.task_id.clone()).collect();
        debug!(run_id = %self.run_id, ?names, "spawning ready tasks");

        if let Err(err) = self.executor.spawn_ready_tasks(accepted).await {
            let reason = format!("executor rejected tasks: {err}");
            violations.extend(names.into_iter().map(|task| violation(reason.clone(), Some(task))));
        }
        violations
    }
}

fn violation(reason: String, task: Option<String>) -> RuntimeEvent {
    RuntimeEvent::IntegrityViolation { reason, task }
}
