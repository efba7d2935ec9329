// src/events.rs

//! Event sink: ordered transition and log events for observers.
//!
//! The tracker emits every event while holding its write lock, so a sink
//! sees events in exactly the order the state changes happened.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::dag::{TaskId, TaskState};
use crate::tracker::{RunId, RunState};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunEvent {
    /// A task instance changed state.
    Transition {
        run_id: RunId,
        task_id: TaskId,
        state: TaskState,
        timestamp: DateTime<Utc>,
    },
    /// A log line was appended; `task_id` is `None` for run-level lines.
    Log {
        run_id: RunId,
        task_id: Option<TaskId>,
        line: String,
        timestamp: DateTime<Utc>,
    },
    /// The run reached its terminal state.
    RunFinished {
        run_id: RunId,
        state: RunState,
        timestamp: DateTime<Utc>,
    },
}

impl RunEvent {
    pub fn run_id(&self) -> RunId {
        match self {
            RunEvent::Transition { run_id, .. }
            | RunEvent::Log { run_id, .. }
            | RunEvent::RunFinished { run_id, .. } => *run_id,
        }
    }

    pub fn task_id(&self) -> Option<&str> {
        match self {
            RunEvent::Transition { task_id, .. } => Some(task_id),
            RunEvent::Log { task_id, .. } => task_id.as_deref(),
            RunEvent::RunFinished { .. } => None,
        }
    }
}

/// Receiver of run events.
///
/// `emit` is called with the tracker's lock held: implementations must not
/// block or call back into the tracker.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &RunEvent);
}

/// Drops every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: &RunEvent) {}
}

/// Buffers events in memory for polling consumers (and tests).
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<RunEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything emitted so far.
    pub fn events(&self) -> Vec<RunEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Take everything emitted since the last drain.
    pub fn drain(&self) -> Vec<RunEvent> {
        match self.events.lock() {
            Ok(mut events) => std::mem::take(&mut *events),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }
}

impl EventSink for MemorySink {
    fn emit(&self, event: &RunEvent) {
        match self.events.lock() {
            Ok(mut events) => events.push(event.clone()),
            Err(poisoned) => poisoned.into_inner().push(event.clone()),
        }
    }
}

/// Forwards events to a tokio channel for subscribers.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<RunEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<RunEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: &RunEvent) {
        // A dropped receiver just means nobody is listening anymore.
        let _ = self.tx.send(event.clone());
    }
}

/// Turns events into structured `tracing` records.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: &RunEvent) {
        match event {
            RunEvent::Transition {
                run_id,
                task_id,
                state,
                ..
            } => {
                if *state == TaskState::Failed {
                    warn!(%run_id, task = %task_id, %state, "task transition");
                } else {
                    info!(%run_id, task = %task_id, %state, "task transition");
                }
            }
            RunEvent::Log {
                run_id,
                task_id,
                line,
                ..
            } => {
                info!(%run_id, task = task_id.as_deref().unwrap_or("-"), "{line}");
            }
            RunEvent::RunFinished { run_id, state, .. } => {
                info!(%run_id, %state, "run finished");
            }
        }
    }
}

/// Delivers every event to each inner sink, in order.
#[derive(Default, Clone)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl EventSink for FanoutSink {
    fn emit(&self, event: &RunEvent) {
        for sink in &self.sinks {
            sink.emit(event);
        }
    }
}
