#![allow(dead_code)]

use std::collections::BTreeMap;
use std::time::Duration;

use etldag::config::{ConfigFile, ConfigSection, RawConfigFile, TaskConfig};
use etldag::dag::{FinalizedRegistry, TaskDefinition, TaskRegistry};
use etldag::exec::SimulatedWork;
use etldag::types::FailurePolicy;

/// The demo ETL graph: `start -> extract -> transform -> {load_a, load_b}
/// -> validate -> end`.
pub const ETL_TASKS: [(&str, &[&str]); 7] = [
    ("start", &[]),
    ("extract", &["start"]),
    ("transform", &["extract"]),
    ("load_a", &["transform"]),
    ("load_b", &["transform"]),
    ("validate", &["load_a", "load_b"]),
    ("end", &["validate"]),
];

/// Builder for `ConfigFile` to simplify test setup.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new() -> Self {
        Self {
            config: RawConfigFile {
                config: ConfigSection::default(),
                task: BTreeMap::new(),
            },
        }
    }

    pub fn with_task(mut self, name: &str, task: TaskConfig) -> Self {
        self.config.task.insert(name.to_string(), task);
        self
    }

    pub fn with_policy(mut self, policy: FailurePolicy) -> Self {
        self.config.config.failure_policy = policy;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.config.config.max_workers = workers;
        self
    }

    pub fn raw(self) -> RawConfigFile {
        self.config
    }

    pub fn build(self) -> ConfigFile {
        ConfigFile::try_from(self.config).expect("Failed to build valid config from builder")
    }
}

impl Default for ConfigFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `TaskConfig`.
pub struct TaskConfigBuilder {
    task: TaskConfig,
}

impl TaskConfigBuilder {
    pub fn new(description: &str) -> Self {
        Self {
            task: TaskConfig {
                description: description.to_string(),
                ..TaskConfig::default()
            },
        }
    }

    pub fn after(mut self, dep: &str) -> Self {
        self.task.after.push(dep.to_string());
        self
    }

    pub fn sleep_ms(mut self, ms: u64) -> Self {
        self.task.sleep_ms = ms;
        self
    }

    pub fn records(mut self, records: u64) -> Self {
        self.task.records = Some(records);
        self
    }

    pub fn line(mut self, line: &str) -> Self {
        self.task.lines.push(line.to_string());
        self
    }

    pub fn fail(mut self, error: &str) -> Self {
        self.task.fail = true;
        self.task.error = Some(error.to_string());
        self
    }

    pub fn retries(mut self, retries: u32, delay_ms: u64) -> Self {
        self.task.retries = retries;
        self.task.retry_delay_ms = delay_ms;
        self
    }

    pub fn build(self) -> TaskConfig {
        self.task
    }
}

/// Builder for a finalized registry of simulated tasks.
pub struct RegistryBuilder {
    tasks: Vec<(String, Vec<String>, SimulatedWork)>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self { tasks: Vec::new() }
    }

    /// The demo ETL graph, every task sleeping `delay`.
    pub fn etl(delay: Duration) -> Self {
        let mut builder = Self::new();
        for (id, deps) in ETL_TASKS {
            builder = builder.task(id, deps, SimulatedWork::new(id).delay(delay));
        }
        builder
    }

    /// Add (or replace) a task.
    pub fn task(mut self, id: &str, deps: &[&str], work: SimulatedWork) -> Self {
        self.tasks.retain(|(existing, _, _)| existing != id);
        self.tasks.push((
            id.to_string(),
            deps.iter().map(|d| d.to_string()).collect(),
            work,
        ));
        self
    }

    /// Make an already added task fail with `error`.
    pub fn failing(mut self, id: &str, error: &str) -> Self {
        for (existing, _, work) in &mut self.tasks {
            if existing == id {
                work.failure = Some(error.to_string());
            }
        }
        self
    }

    /// Change the delay of an already added task.
    pub fn delay(mut self, id: &str, delay: Duration) -> Self {
        for (existing, _, work) in &mut self.tasks {
            if existing == id {
                work.delay = delay;
            }
        }
        self
    }

    pub fn registry(self) -> TaskRegistry {
        let mut registry = TaskRegistry::new();
        for (id, deps, work) in self.tasks {
            registry
                .register_deferred(TaskDefinition::new(id, work).after(deps))
                .expect("duplicate task in RegistryBuilder");
        }
        registry
    }

    pub fn build(self) -> FinalizedRegistry {
        self.registry()
            .finalize()
            .expect("RegistryBuilder produced an invalid graph")
    }
}

impl Default for RegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}
