// src/errors.rs

//! Crate-wide error type.
//!
//! Variants follow the error taxonomy of the engine:
//! - registration errors are fatal at startup,
//! - run-control errors are returned to the caller as-is,
//! - integrity errors mean a scheduling invariant broke and the run is aborted.
//!
//! Task execution errors never show up here; they are captured on the task
//! instance as a `Failed` state.

use thiserror::Error;

use crate::dag::TaskState;
use crate::tracker::RunId;

#[derive(Error, Debug)]
pub enum EtlDagError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Task already registered: {0}")]
    DuplicateTask(String),

    #[error("Task '{task}' depends on unknown task '{dependency}'")]
    UnknownDependency { task: String, dependency: String },

    #[error("Task '{task}' references task '{dependency}' which was never registered")]
    MissingDependency { task: String, dependency: String },

    #[error("Cycle detected in DAG involving task '{0}'")]
    CycleDetected(String),

    #[error("Run {0} is still active; wait for it to finish or cancel it")]
    RunAlreadyActive(RunId),

    #[error("Run not found: {0}")]
    RunNotFound(String),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Task '{0}' already reached a terminal state")]
    TaskFinalized(String),

    #[error("Invalid transition for task '{task}': {from:?} -> {to:?}")]
    InvalidTransition {
        task: String,
        from: TaskState,
        to: TaskState,
    },

    #[error("Pipeline worker is not running")]
    WorkerStopped,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl EtlDagError {
    /// Registration errors can only happen while building the registry.
    pub fn is_registration_error(&self) -> bool {
        matches!(
            self,
            EtlDagError::DuplicateTask(_)
                | EtlDagError::UnknownDependency { .. }
                | EtlDagError::MissingDependency { .. }
                | EtlDagError::CycleDetected(_)
        )
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, EtlDagError>;
