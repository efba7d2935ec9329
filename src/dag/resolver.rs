// src/dag/resolver.rs

//! Deterministic topological ordering of the task set.
//!
//! Kahn's algorithm with the ready set kept in a `BTreeSet`, so whenever
//! several tasks are free to go next the lexicographically smallest id wins.
//! The same registry therefore always yields the same plan.

use std::collections::{BTreeMap, BTreeSet};

use crate::dag::registry::{FinalizedRegistry, TaskRegistry, ensure_references_exist};
use crate::dag::task_info::TaskId;
use crate::errors::{EtlDagError, Result};

/// Resolve the execution order of a finalized registry.
pub fn resolve(registry: &FinalizedRegistry) -> Result<Vec<TaskId>> {
    topological_order(
        registry
            .iter()
            .map(|def| (def.id.as_str(), &def.dependencies)),
    )
}

/// Resolve a registry that has not been through `finalize()` yet.
///
/// Re-checks references and cycles, failing fast instead of producing a
/// partial order.
pub fn resolve_unvalidated(registry: &TaskRegistry) -> Result<Vec<TaskId>> {
    let tasks = registry
        .iter()
        .map(|def| (def.id.clone(), def.clone()))
        .collect();
    ensure_references_exist(&tasks)?;
    topological_order(
        registry
            .iter()
            .map(|def| (def.id.as_str(), &def.dependencies)),
    )
}

fn topological_order<'a>(
    nodes: impl Iterator<Item = (&'a str, &'a BTreeSet<TaskId>)>,
) -> Result<Vec<TaskId>> {
    let deps: BTreeMap<&str, &BTreeSet<TaskId>> = nodes.collect();

    let mut in_degree: BTreeMap<&str, usize> = BTreeMap::new();
    let mut dependents: BTreeMap<&str, Vec<&str>> = BTreeMap::new();

    for (&id, task_deps) in &deps {
        let known: Vec<&str> = task_deps
            .iter()
            .map(|d| d.as_str())
            .filter(|d| deps.contains_key(d))
            .collect();
        in_degree.insert(id, known.len());
        for dep in known {
            dependents.entry(dep).or_default().push(id);
        }
    }

    let mut ready: BTreeSet<&str> = in_degree
        .iter()
        .filter(|(_, degree)| **degree == 0)
        .map(|(id, _)| *id)
        .collect();

    let mut order = Vec::with_capacity(deps.len());

    while let Some(next) = ready.pop_first() {
        order.push(next.to_string());

        for &dependent in dependents.get(next).map(Vec::as_slice).unwrap_or(&[]) {
            if let Some(degree) = in_degree.get_mut(dependent) {
                *degree -= 1;
                if *degree == 0 {
                    ready.insert(dependent);
                }
            }
        }
    }

    if order.len() < deps.len() {
        let member = find_cycle_member(&deps, &in_degree);
        return Err(EtlDagError::CycleDetected(member));
    }

    Ok(order)
}

/// Walk unresolved dependency edges until a node repeats; that node sits on
/// a cycle (tasks merely downstream of a cycle never repeat).
fn find_cycle_member(
    deps: &BTreeMap<&str, &BTreeSet<TaskId>>,
    in_degree: &BTreeMap<&str, usize>,
) -> String {
    let unresolved = |id: &str| in_degree.get(id).is_some_and(|d| *d > 0);

    let Some(mut current) = in_degree
        .iter()
        .find(|(_, degree)| **degree > 0)
        .map(|(id, _)| *id)
    else {
        return String::new();
    };

    let mut visited = BTreeSet::new();
    while visited.insert(current) {
        let next = deps
            .get(current)
            .and_then(|ds| ds.iter().map(|d| d.as_str()).find(|&d| unresolved(d)));
        match next {
            Some(n) => current = n,
            None => break,
        }
    }

    current.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dag::registry::TaskDefinition;
    use crate::exec::SimulatedWork;

    fn etl_registry() -> TaskRegistry {
        let mut reg = TaskRegistry::new();
        let tasks: [(&str, &[&str]); 7] = [
            ("start", &[]),
            ("extract", &["start"]),
            ("transform", &["extract"]),
            ("load_b", &["transform"]),
            ("load_a", &["transform"]),
            ("validate", &["load_a", "load_b"]),
            ("end", &["validate"]),
        ];
        for (id, deps) in tasks {
            reg.register(id, deps.iter().copied(), SimulatedWork::default())
                .unwrap();
        }
        reg
    }

    #[test]
    fn etl_chain_resolves_with_lexicographic_ties() {
        let fin = etl_registry().finalize().unwrap();
        let order = resolve(&fin).unwrap();
        assert_eq!(
            order,
            vec!["start", "extract", "transform", "load_a", "load_b", "validate", "end"]
        );
    }

    #[test]
    fn independent_roots_are_ordered_by_id() {
        let mut reg = TaskRegistry::new();
        for id in ["zeta", "alpha", "mid"] {
            reg.register(id, Vec::<String>::new(), SimulatedWork::default())
                .unwrap();
        }
        reg.register("after_zeta", ["zeta"], SimulatedWork::default())
            .unwrap();
        let order = resolve(&reg.finalize().unwrap()).unwrap();
        // "after_zeta" only becomes ready once "zeta" is emitted.
        assert_eq!(order, vec!["alpha", "mid", "zeta", "after_zeta"]);
    }

    #[test]
    fn repeated_resolution_is_identical() {
        let fin = etl_registry().finalize().unwrap();
        let first = resolve(&fin).unwrap();
        for _ in 0..10 {
            assert_eq!(resolve(&fin).unwrap(), first);
        }
    }

    #[test]
    fn unvalidated_registry_with_cycle_fails_fast() {
        let mut reg = TaskRegistry::new();
        reg.register_deferred(TaskDefinition::new("a", SimulatedWork::default()).after(["c"]))
            .unwrap();
        reg.register_deferred(TaskDefinition::new("b", SimulatedWork::default()).after(["a"]))
            .unwrap();
        reg.register_deferred(TaskDefinition::new("c", SimulatedWork::default()).after(["b"]))
            .unwrap();
        // Downstream of the cycle, but not part of it.
        reg.register_deferred(TaskDefinition::new("d", SimulatedWork::default()).after(["a"]))
            .unwrap();

        match resolve_unvalidated(&reg).unwrap_err() {
            EtlDagError::CycleDetected(member) => {
                assert!(["a", "b", "c"].contains(&member.as_str()), "got {member}");
            }
            other => panic!("expected CycleDetected, got {other:?}"),
        }
    }

    #[test]
    fn unvalidated_registry_with_missing_dependency_fails() {
        let mut reg = TaskRegistry::new();
        reg.register_deferred(TaskDefinition::new("a", SimulatedWork::default()).after(["ghost"]))
            .unwrap();
        assert!(matches!(
            resolve_unvalidated(&reg).unwrap_err(),
            EtlDagError::MissingDependency { .. }
        ));
    }
}
