// src/dag/state_manager.rs

//! Per-run state transitions for tasks in the scheduler.

use std::collections::{HashMap, HashSet};

use tracing::{debug, warn};

use crate::dag::DagGraph;
use crate::dag::task_info::{TaskId, TaskInfo, TaskState};

/// Mutating view over the scheduler's per-run task map.
pub struct StateManager<'a> {
    graph: &'a DagGraph,
    order: &'a [TaskId],
    tasks: &'a mut HashMap<TaskId, TaskInfo>,
}

impl<'a> StateManager<'a> {
    pub fn new(
        graph: &'a DagGraph,
        order: &'a [TaskId],
        tasks: &'a mut HashMap<TaskId, TaskInfo>,
    ) -> Self {
        Self {
            graph,
            order,
            tasks,
        }
    }

    /// Mark every transitive dependent of `root` that has not started yet as
    /// `Skipped`.
    ///
    /// Dependents can only start once all their dependencies succeeded, so
    /// everything downstream of a failed or skipped task is still `Pending`.
    /// Returns the newly skipped ids in resolved order.
    pub fn mark_dependents_skipped(&mut self, root: &str) -> Vec<TaskId> {
        let mut stack: Vec<TaskId> = self.graph.dependents_of(root).to_vec();
        let mut visited: HashSet<TaskId> = HashSet::new();
        let mut newly_skipped = HashSet::new();

        while let Some(name) = stack.pop() {
            if !visited.insert(name.clone()) {
                continue;
            }

            match self.tasks.get_mut(&name) {
                Some(info) if info.state == TaskState::Pending => {
                    info.state = TaskState::Skipped;
                    debug!(task = %info.id, upstream = %root, "dependent skipped");
                    newly_skipped.insert(name.clone());
                }
                Some(info) if info.state == TaskState::Running => {
                    // Would mean a task started without a successful dependency.
                    warn!(task = %info.id, upstream = %root, "dependent already running");
                }
                Some(_) => {}
                None => {
                    warn!(task = %name, "node in DAG not present in tasks map");
                }
            }

            stack.extend(self.graph.dependents_of(&name).iter().cloned());
        }

        self.in_resolved_order(newly_skipped)
    }

    /// Mark every `Pending` task as `Skipped`. Running tasks are left alone.
    pub fn skip_all_pending(&mut self) -> Vec<TaskId> {
        let mut skipped = HashSet::new();
        for info in self.tasks.values_mut() {
            if info.state == TaskState::Pending {
                info.state = TaskState::Skipped;
                skipped.insert(info.id.clone());
            }
        }
        self.in_resolved_order(skipped)
    }

    /// Pick up to `limit` pending tasks whose dependencies all succeeded,
    /// walking the resolved order, and mark them `Running`.
    pub fn collect_new_ready_tasks(&mut self, limit: usize) -> Vec<TaskId> {
        let mut ready = Vec::new();
        if limit == 0 {
            return ready;
        }

        // Decide first, then mutate; marking a task Running never changes
        // whether another task's dependencies are satisfied.
        let candidates: Vec<TaskId> = {
            let tasks: &HashMap<TaskId, TaskInfo> = self.tasks;
            let ro = ReadOnlyStateManager::new(tasks);
            self.order
                .iter()
                .filter(|id| {
                    tasks.get(id.as_str()).is_some_and(|info| {
                        info.state == TaskState::Pending && ro.deps_satisfied_for_info(info)
                    })
                })
                .take(limit)
                .cloned()
                .collect()
        };

        for id in candidates {
            if let Some(info) = self.tasks.get_mut(&id) {
                debug!(task = %info.id, "dependencies satisfied; marking Running");
                info.state = TaskState::Running;
                ready.push(id);
            }
        }

        ready
    }

    pub fn all_tasks_terminal(&self) -> bool {
        self.tasks.values().all(|info| info.state.is_terminal())
    }

    fn in_resolved_order(&self, ids: HashSet<TaskId>) -> Vec<TaskId> {
        self.order
            .iter()
            .filter(|id| ids.contains(*id))
            .cloned()
            .collect()
    }
}

/// Read-only view used for dependency checks with shared access only.
pub struct ReadOnlyStateManager<'a> {
    tasks: &'a HashMap<TaskId, TaskInfo>,
}

impl<'a> ReadOnlyStateManager<'a> {
    pub fn new(tasks: &'a HashMap<TaskId, TaskInfo>) -> Self {
        Self { tasks }
    }

    /// A task may start only when every direct dependency is `Success`.
    pub fn deps_satisfied_for_info(&self, info: &TaskInfo) -> bool {
        info.deps.iter().all(|dep| match self.tasks.get(dep) {
            Some(d) => d.state == TaskState::Success,
            None => {
                warn!(task = %info.id, dep = %dep, "dependency missing from tasks map");
                false
            }
        })
    }

    pub fn running_count(&self) -> usize {
        self.tasks
            .values()
            .filter(|info| info.state == TaskState::Running)
            .count()
    }
}
