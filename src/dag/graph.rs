// src/dag/graph.rs

use std::collections::{BTreeSet, HashMap};

use crate::dag::registry::FinalizedRegistry;
use crate::dag::task_info::TaskId;

/// Internal node structure: stores immediate deps and dependents.
#[derive(Debug, Clone)]
struct DagNode {
    /// Direct dependencies, ascending.
    deps: Vec<TaskId>,
    /// Direct dependents, ascending.
    dependents: Vec<TaskId>,
}

/// In-memory adjacency view of a finalized registry.
///
/// Acyclicity and reference validity are already guaranteed by
/// `TaskRegistry::finalize`; this only keeps both edge directions around for
/// scheduling and failure propagation.
#[derive(Debug, Clone)]
pub struct DagGraph {
    nodes: HashMap<TaskId, DagNode>,
}

impl DagGraph {
    pub fn from_registry(registry: &FinalizedRegistry) -> Self {
        let mut nodes: HashMap<TaskId, DagNode> = registry
            .iter()
            .map(|def| {
                (
                    def.id.clone(),
                    DagNode {
                        deps: def.dependencies.iter().cloned().collect(),
                        dependents: Vec::new(),
                    },
                )
            })
            .collect();

        // Registry iteration is ordered, so dependents end up sorted too.
        for def in registry.iter() {
            for dep in &def.dependencies {
                if let Some(dep_node) = nodes.get_mut(dep) {
                    dep_node.dependents.push(def.id.clone());
                }
            }
        }

        Self { nodes }
    }

    /// All task ids, in no particular order.
    pub fn tasks(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn dependencies_of(&self, id: &str) -> &[TaskId] {
        self.nodes
            .get(id)
            .map(|n| n.deps.as_slice())
            .unwrap_or(&[])
    }

    pub fn dependents_of(&self, id: &str) -> &[TaskId] {
        self.nodes
            .get(id)
            .map(|n| n.dependents.as_slice())
            .unwrap_or(&[])
    }

    /// Every task reachable from `id` along dependent edges (excluding `id`).
    pub fn transitive_dependents(&self, id: &str) -> BTreeSet<TaskId> {
        let mut seen = BTreeSet::new();
        let mut stack: Vec<&str> = self.dependents_of(id).iter().map(|s| s.as_str()).collect();

        while let Some(name) = stack.pop() {
            if seen.insert(name.to_string()) {
                stack.extend(self.dependents_of(name).iter().map(|s| s.as_str()));
            }
        }

        seen
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dag::registry::TaskRegistry;
    use crate::exec::SimulatedWork;

    #[test]
    fn transitive_dependents_follow_every_branch() {
        let mut reg = TaskRegistry::new();
        reg.register("start", Vec::<String>::new(), SimulatedWork::default()).unwrap();
        reg.register("extract", ["start"], SimulatedWork::default()).unwrap();
        reg.register("load_a", ["extract"], SimulatedWork::default()).unwrap();
        reg.register("load_b", ["extract"], SimulatedWork::default()).unwrap();
        reg.register("end", ["load_a", "load_b"], SimulatedWork::default()).unwrap();
        let graph = DagGraph::from_registry(&reg.finalize().unwrap());

        assert_eq!(graph.dependents_of("extract"), ["load_a", "load_b"]);
        assert_eq!(graph.dependencies_of("end"), ["load_a", "load_b"]);

        let downstream: Vec<_> = graph.transitive_dependents("extract").into_iter().collect();
        assert_eq!(downstream, vec!["end", "load_a", "load_b"]);
        assert!(graph.transitive_dependents("end").is_empty());
    }
}
