// src/config/model.rs

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Deserialize;

use crate::dag::{FinalizedRegistry, TaskDefinition, TaskRegistry};
use crate::errors::{EtlDagError, Result};
use crate::exec::SimulatedWork;
use crate::types::{EngineOptions, FailurePolicy, StartWhileActiveBehaviour};

/// Top-level configuration as read from a TOML file.
///
/// ```toml
/// [config]
/// dag_name = "b3_data_pipeline_demo"
/// failure_policy = "cascade"
/// max_workers = 2
///
/// [task.start]
/// description = "Start the ETL pipeline"
///
/// [task.extract_data]
/// after = ["start"]
/// sleep_ms = 800
/// records = 1200
/// ```
///
/// All sections are optional and have reasonable defaults, but validation
/// requires at least one task.
///
/// This is the *raw* deserialized form; it may contain unknown `after`
/// references or cycles. Use `ConfigFile::try_from` to validate it.
#[derive(Debug, Clone, Deserialize)]
pub struct RawConfigFile {
    /// Global engine settings from `[config]`.
    #[serde(default)]
    pub config: ConfigSection,

    /// All tasks from `[task.<name>]`, keyed by task id.
    #[serde(default)]
    pub task: BTreeMap<String, TaskConfig>,
}

/// Validated configuration.
///
/// Constructed via `TryFrom<RawConfigFile>`, which registers every task
/// and finalizes the registry once, so registration errors surface at load
/// time.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub config: ConfigSection,
    pub task: BTreeMap<String, TaskConfig>,
}

impl ConfigFile {
    /// Build without validation; `TryFrom<RawConfigFile>` is the checked path.
    pub fn new_unchecked(config: ConfigSection, task: BTreeMap<String, TaskConfig>) -> Self {
        Self { config, task }
    }

    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            failure_policy: self.config.failure_policy,
            max_workers: self.config.max_workers,
            history_limit: self.config.history_limit,
            start_while_active: self.config.start_while_active,
        }
    }

    /// Register every task with a simulated work unit and finalize.
    pub fn build_registry(&self) -> Result<FinalizedRegistry> {
        let mut registry = TaskRegistry::new();
        for (id, task) in &self.task {
            registry.register_deferred(task.to_definition(id))?;
        }
        registry.finalize()
    }

    /// Make `task` fail on every attempt (the `--fail` CLI override).
    pub fn force_failure(&mut self, task: &str) -> Result<()> {
        let cfg = self
            .task
            .get_mut(task)
            .ok_or_else(|| EtlDagError::TaskNotFound(task.to_string()))?;
        cfg.fail = true;
        cfg.fail_attempts = 0;
        cfg.retries = 0;
        Ok(())
    }
}

/// `[config]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigSection {
    /// Name shown on every run.
    #[serde(default = "default_dag_name")]
    pub dag_name: String,

    /// `"cascade"` (default) or `"continue"`.
    #[serde(default)]
    pub failure_policy: FailurePolicy,

    /// Upper bound on concurrently running tasks; 1 runs sequentially.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// How many runs are kept for inspection.
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,

    /// `"reject"` (default) or `"preempt"`.
    #[serde(default)]
    pub start_while_active: StartWhileActiveBehaviour,
}

fn default_dag_name() -> String {
    "etl_pipeline".to_string()
}

fn default_max_workers() -> usize {
    1
}

fn default_history_limit() -> usize {
    20
}

impl Default for ConfigSection {
    fn default() -> Self {
        Self {
            dag_name: default_dag_name(),
            failure_policy: FailurePolicy::default(),
            max_workers: default_max_workers(),
            history_limit: default_history_limit(),
            start_while_active: StartWhileActiveBehaviour::default(),
        }
    }
}

/// `[task.<name>]` section. Every task runs a simulated ETL step.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaskConfig {
    #[serde(default)]
    pub description: String,

    /// Dependency list: this task waits for all tasks listed here.
    #[serde(default)]
    pub after: Vec<String>,

    /// Simulated processing time.
    #[serde(default)]
    pub sleep_ms: u64,

    /// Lines appended to the task log while it runs.
    #[serde(default)]
    pub lines: Vec<String>,

    /// Records produced; when unset, the sum of the upstream records.
    #[serde(default)]
    pub records: Option<u64>,

    /// Fail the task.
    #[serde(default)]
    pub fail: bool,

    /// Only fail the first `n` attempts (0 = every attempt).
    #[serde(default)]
    pub fail_attempts: u32,

    /// Error message used when `fail` is set.
    #[serde(default)]
    pub error: Option<String>,

    #[serde(default)]
    pub retries: u32,

    #[serde(default)]
    pub retry_delay_ms: u64,
}

impl TaskConfig {
    pub fn to_work(&self) -> SimulatedWork {
        let failure = self.fail.then(|| {
            self.error
                .clone()
                .unwrap_or_else(|| "task failed".to_string())
        });

        SimulatedWork {
            description: self.description.clone(),
            delay: Duration::from_millis(self.sleep_ms),
            lines: self.lines.clone(),
            records: self.records,
            failure,
            fail_attempts: self.fail_attempts,
        }
    }

    pub fn to_definition(&self, id: &str) -> TaskDefinition {
        TaskDefinition::new(id, self.to_work())
            .after(self.after.iter().cloned())
            .description(self.description.clone())
            .retries(self.retries, Duration::from_millis(self.retry_delay_ms))
    }
}
