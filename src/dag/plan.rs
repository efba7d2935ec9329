// src/dag/plan.rs

use std::sync::Arc;

use crate::dag::graph::DagGraph;
use crate::dag::registry::{FinalizedRegistry, TaskDefinition};
use crate::dag::resolver::resolve;
use crate::dag::task_info::TaskId;
use crate::errors::Result;

/// Everything a run needs to know about the static task set: the finalized
/// registry, its adjacency view and the resolved execution order.
///
/// Built once per pipeline and shared (cheaply cloned) by every run.
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    registry: Arc<FinalizedRegistry>,
    graph: Arc<DagGraph>,
    order: Arc<Vec<TaskId>>,
}

impl ExecutionPlan {
    pub fn build(registry: FinalizedRegistry) -> Result<Self> {
        let order = resolve(&registry)?;
        let graph = DagGraph::from_registry(&registry);
        Ok(Self {
            registry: Arc::new(registry),
            graph: Arc::new(graph),
            order: Arc::new(order),
        })
    }

    /// Task ids in resolved (topological, id-tie-broken) order.
    pub fn order(&self) -> &[TaskId] {
        &self.order
    }

    pub fn graph(&self) -> &DagGraph {
        &self.graph
    }

    pub fn registry(&self) -> &FinalizedRegistry {
        &self.registry
    }

    pub fn definition(&self, id: &str) -> Option<&TaskDefinition> {
        self.registry.get(id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
