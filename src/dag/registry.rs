// src/dag/registry.rs

//! Static task definitions and their validation.
//!
//! Tasks are registered on a [`TaskRegistry`] at startup. Once every task is
//! in, [`TaskRegistry::finalize`] checks the whole set (missing references,
//! cycles) and hands back a read-only [`FinalizedRegistry`].

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;
use tracing::debug;

use crate::dag::task_info::TaskId;
use crate::errors::{EtlDagError, Result};
use crate::exec::WorkUnit;

/// Immutable definition of a single task.
#[derive(Clone)]
pub struct TaskDefinition {
    pub id: TaskId,
    pub description: String,
    /// Tasks that must reach `Success` before this one may start.
    pub dependencies: BTreeSet<TaskId>,
    pub work: Arc<dyn WorkUnit>,
    pub retries: u32,
    pub retry_delay: Duration,
}

impl TaskDefinition {
    pub fn new(id: impl Into<TaskId>, work: impl WorkUnit + 'static) -> Self {
        Self::from_arc(id, Arc::new(work))
    }

    pub fn from_arc(id: impl Into<TaskId>, work: Arc<dyn WorkUnit>) -> Self {
        Self {
            id: id.into(),
            description: String::new(),
            dependencies: BTreeSet::new(),
            work,
            retries: 0,
            retry_delay: Duration::ZERO,
        }
    }

    pub fn after<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<TaskId>,
    {
        self.dependencies.extend(deps.into_iter().map(Into::into));
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn retries(mut self, retries: u32, delay: Duration) -> Self {
        self.retries = retries;
        self.retry_delay = delay;
        self
    }
}

impl std::fmt::Debug for TaskDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskDefinition")
            .field("id", &self.id)
            .field("description", &self.description)
            .field("dependencies", &self.dependencies)
            .field("retries", &self.retries)
            .finish_non_exhaustive()
    }
}

/// Mutable collection of task definitions, validated by [`finalize`].
///
/// [`finalize`]: TaskRegistry::finalize
#[derive(Debug, Default, Clone)]
pub struct TaskRegistry {
    tasks: BTreeMap<TaskId, TaskDefinition>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task whose dependencies are all already registered.
    pub fn register<I, S>(
        &mut self,
        id: impl Into<TaskId>,
        dependencies: I,
        work: impl WorkUnit + 'static,
    ) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<TaskId>,
    {
        self.register_definition(TaskDefinition::new(id, work).after(dependencies))
    }

    /// Strict registration: every dependency must be registered before its
    /// dependents.
    pub fn register_definition(&mut self, def: TaskDefinition) -> Result<()> {
        self.ensure_unique(&def.id)?;

        if let Some(dep) = def
            .dependencies
            .iter()
            .find(|dep| !self.tasks.contains_key(dep.as_str()))
        {
            return Err(EtlDagError::UnknownDependency {
                task: def.id.clone(),
                dependency: dep.clone(),
            });
        }

        debug!(task = %def.id, deps = ?def.dependencies, "registered task");
        self.tasks.insert(def.id.clone(), def);
        Ok(())
    }

    /// Deferred registration: dependency references are only checked by
    /// [`TaskRegistry::finalize`].
    pub fn register_deferred(&mut self, def: TaskDefinition) -> Result<()> {
        self.ensure_unique(&def.id)?;
        debug!(task = %def.id, deps = ?def.dependencies, "registered task (deferred)");
        self.tasks.insert(def.id.clone(), def);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.tasks.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&TaskDefinition> {
        self.tasks.get(id)
    }

    /// Definitions in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = &TaskDefinition> {
        self.tasks.values()
    }

    /// Validate the whole task set and freeze it.
    pub fn finalize(self) -> Result<FinalizedRegistry> {
        ensure_references_exist(&self.tasks)?;
        ensure_acyclic(&self.tasks)?;
        debug!(tasks = self.tasks.len(), "task registry finalized");
        Ok(FinalizedRegistry { tasks: self.tasks })
    }

    fn ensure_unique(&self, id: &str) -> Result<()> {
        if self.tasks.contains_key(id) {
            return Err(EtlDagError::DuplicateTask(id.to_string()));
        }
        Ok(())
    }
}

/// Validated, read-only task set.
#[derive(Debug, Clone)]
pub struct FinalizedRegistry {
    tasks: BTreeMap<TaskId, TaskDefinition>,
}

impl FinalizedRegistry {
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&TaskDefinition> {
        self.tasks.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TaskDefinition> {
        self.tasks.values()
    }

    pub fn task_ids(&self) -> impl Iterator<Item = &str> {
        self.tasks.keys().map(|s| s.as_str())
    }
}

pub(crate) fn ensure_references_exist(tasks: &BTreeMap<TaskId, TaskDefinition>) -> Result<()> {
    for def in tasks.values() {
        for dep in &def.dependencies {
            if !tasks.contains_key(dep) {
                return Err(EtlDagError::MissingDependency {
                    task: def.id.clone(),
                    dependency: dep.clone(),
                });
            }
        }
    }
    Ok(())
}

fn ensure_acyclic(tasks: &BTreeMap<TaskId, TaskDefinition>) -> Result<()> {
    // Edge direction: dep -> task.
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

    for id in tasks.keys() {
        graph.add_node(id.as_str());
    }

    for def in tasks.values() {
        for dep in &def.dependencies {
            graph.add_edge(dep.as_str(), def.id.as_str(), ());
        }
    }

    // Self loops count as cycles for toposort.
    match toposort(&graph, None) {
        Ok(_) => Ok(()),
        Err(cycle) => Err(EtlDagError::CycleDetected(cycle.node_id().to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::SimulatedWork;

    fn noop() -> SimulatedWork {
        SimulatedWork::default()
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut reg = TaskRegistry::new();
        reg.register("start", Vec::<String>::new(), noop()).unwrap();
        let err = reg.register("start", Vec::<String>::new(), noop()).unwrap_err();
        assert!(matches!(err, EtlDagError::DuplicateTask(ref id) if id == "start"));
    }

    #[test]
    fn strict_registration_requires_registered_dependencies() {
        let mut reg = TaskRegistry::new();
        let err = reg.register("extract", ["start"], noop()).unwrap_err();
        match err {
            EtlDagError::UnknownDependency { task, dependency } => {
                assert_eq!(task, "extract");
                assert_eq!(dependency, "start");
            }
            other => panic!("expected UnknownDependency, got {other:?}"),
        }
        assert!(reg.is_empty());
    }

    #[test]
    fn finalize_reports_missing_dependency() {
        let mut reg = TaskRegistry::new();
        reg.register_deferred(TaskDefinition::new("load", noop()).after(["transform"]))
            .unwrap();
        let err = reg.finalize().unwrap_err();
        assert!(matches!(
            err,
            EtlDagError::MissingDependency { ref task, ref dependency }
                if task == "load" && dependency == "transform"
        ));
    }

    #[test]
    fn finalize_detects_two_node_cycle() {
        let mut reg = TaskRegistry::new();
        reg.register_deferred(TaskDefinition::new("A", noop()).after(["B"]))
            .unwrap();
        reg.register_deferred(TaskDefinition::new("B", noop()).after(["A"]))
            .unwrap();
        match reg.finalize().unwrap_err() {
            EtlDagError::CycleDetected(member) => {
                assert!(member == "A" || member == "B", "got {member}");
            }
            other => panic!("expected CycleDetected, got {other:?}"),
        }
    }

    #[test]
    fn finalize_detects_self_dependency() {
        let mut reg = TaskRegistry::new();
        reg.register_deferred(TaskDefinition::new("loop", noop()).after(["loop"]))
            .unwrap();
        assert!(matches!(
            reg.finalize().unwrap_err(),
            EtlDagError::CycleDetected(ref m) if m == "loop"
        ));
    }

    #[test]
    fn finalized_registry_lists_tasks_in_id_order() {
        let mut reg = TaskRegistry::new();
        reg.register("b", Vec::<String>::new(), noop()).unwrap();
        reg.register("a", ["b"], noop()).unwrap();
        let fin = reg.finalize().unwrap();
        assert_eq!(fin.task_ids().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(fin.get("a").unwrap().dependencies.len(), 1);
    }
}
