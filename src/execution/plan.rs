//! # Execution Plans
//!
//! Dependency-ordered batch scheduling over a finite set of executables.
//!
//! An [`ExecutionPlan`] yields leaves first: an executable becomes ready once every child
//! it depends on (within the planned set) has been removed from the plan. A
//! [`ReverseExecutionPlan`] yields dependents first and is used for teardown.
//!
//! Plans are ephemeral. They are built per scheduling pass, keep only the remaining set and
//! the derived frontier, and reject cyclic inputs at construction before anything runs.
//!
//! ```rust
//! use conference_broker::execution::{ExecutableId, ExecutionPlan};
//!
//! let room = ExecutableId(1);
//! let compartment = ExecutableId(2);
//! let mut plan = ExecutionPlan::from_dependencies([(room, vec![]), (compartment, vec![room])])?;
//!
//! assert_eq!(plan.pop_executables(), vec![room]);
//! plan.remove_executable(room);
//! assert_eq!(plan.pop_executables(), vec![compartment]);
//! # Ok::<(), conference_broker::execution::PlanError>(())
//! ```

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use thiserror::Error;

use super::executable::{Executable, ExecutableId};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    /// The child relation restricted to the planned set is cyclic
    #[error("Dependency cycle between executables {}", format_ids(.executables))]
    DependencyCycle { executables: Vec<ExecutableId> },
}

fn format_ids(ids: &[ExecutableId]) -> String {
    ids.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Node bookkeeping; `blockers` are the edges that must be removed before the node is ready
#[derive(Debug, Clone, Default)]
struct Node {
    blockers: BTreeSet<ExecutableId>,
    unblocks: BTreeSet<ExecutableId>,
    pending: usize,
}

#[derive(Debug, Clone)]
struct DependencyGraph {
    nodes: BTreeMap<ExecutableId, Node>,
}

impl DependencyGraph {
    /// Build from `(executable, children)` pairs, ignoring edges leaving the set
    fn build<I, C>(dependencies: I, reversed: bool) -> Result<Self, PlanError>
    where
        I: IntoIterator<Item = (ExecutableId, C)>,
        C: IntoIterator<Item = ExecutableId>,
    {
        let declared: Vec<(ExecutableId, Vec<ExecutableId>)> = dependencies
            .into_iter()
            .map(|(id, children)| (id, children.into_iter().collect()))
            .collect();

        let mut nodes: BTreeMap<ExecutableId, Node> = declared
            .iter()
            .map(|(id, _)| (*id, Node::default()))
            .collect();

        for (id, children) in &declared {
            for child in children {
                if !nodes.contains_key(child) {
                    continue;
                }
                // Forward: the parent waits for its child. Reverse: the child waits for its parent.
                let (waiting, blocking) = if reversed { (*child, *id) } else { (*id, *child) };
                if let Some(node) = nodes.get_mut(&waiting) {
                    node.blockers.insert(blocking);
                }
                if let Some(node) = nodes.get_mut(&blocking) {
                    node.unblocks.insert(waiting);
                }
            }
        }

        for node in nodes.values_mut() {
            node.pending = node.blockers.len();
        }

        let graph = Self { nodes };
        graph.check_acyclic()?;
        Ok(graph)
    }

    /// Kahn's algorithm over a copy of the pending counters
    fn check_acyclic(&self) -> Result<(), PlanError> {
        let mut pending: BTreeMap<ExecutableId, usize> = self
            .nodes
            .iter()
            .map(|(id, node)| (*id, node.pending))
            .collect();
        let mut ready: VecDeque<ExecutableId> = pending
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(id, _)| *id)
            .collect();

        while let Some(id) = ready.pop_front() {
            pending.remove(&id);
            if let Some(node) = self.nodes.get(&id) {
                for next in &node.unblocks {
                    if let Some(count) = pending.get_mut(next) {
                        *count -= 1;
                        if *count == 0 {
                            ready.push_back(*next);
                        }
                    }
                }
            }
        }

        if pending.is_empty() {
            Ok(())
        } else {
            Err(PlanError::DependencyCycle {
                executables: pending.into_keys().collect(),
            })
        }
    }

    fn frontier(&self) -> Vec<ExecutableId> {
        self.nodes
            .iter()
            .filter(|(_, node)| node.pending == 0)
            .map(|(id, _)| *id)
            .collect()
    }

    fn remove(&mut self, id: ExecutableId) -> bool {
        let Some(node) = self.nodes.remove(&id) else {
            return false;
        };
        for next in &node.unblocks {
            if let Some(waiting) = self.nodes.get_mut(next) {
                if waiting.blockers.remove(&id) {
                    waiting.pending -= 1;
                }
            }
        }
        for previous in &node.blockers {
            if let Some(blocking) = self.nodes.get_mut(previous) {
                blocking.unblocks.remove(&id);
            }
        }
        true
    }
}

/// Leaves-first scheduler used to start executables
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    graph: DependencyGraph,
}

impl ExecutionPlan {
    pub fn new(executables: &[Executable]) -> Result<Self, PlanError> {
        Self::from_dependencies(
            executables
                .iter()
                .map(|executable| (executable.id, executable.children.clone())),
        )
    }

    pub fn from_dependencies<I, C>(dependencies: I) -> Result<Self, PlanError>
    where
        I: IntoIterator<Item = (ExecutableId, C)>,
        C: IntoIterator<Item = ExecutableId>,
    {
        Ok(Self {
            graph: DependencyGraph::build(dependencies, false)?,
        })
    }

    /// Ready executables in declaration order; empty only once the plan is exhausted
    pub fn pop_executables(&self) -> Vec<ExecutableId> {
        self.graph.frontier()
    }

    /// Mark an executable as done; returns `false` if it was not in the plan
    pub fn remove_executable(&mut self, id: ExecutableId) -> bool {
        self.graph.remove(id)
    }

    pub fn contains(&self, id: ExecutableId) -> bool {
        self.graph.nodes.contains_key(&id)
    }

    pub fn is_empty(&self) -> bool {
        self.graph.nodes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.graph.nodes.len()
    }
}

/// Dependents-first scheduler used to stop executables
#[derive(Debug, Clone)]
pub struct ReverseExecutionPlan {
    graph: DependencyGraph,
}

impl ReverseExecutionPlan {
    pub fn new(executables: &[Executable]) -> Result<Self, PlanError> {
        Self::from_dependencies(
            executables
                .iter()
                .map(|executable| (executable.id, executable.children.clone())),
        )
    }

    pub fn from_dependencies<I, C>(dependencies: I) -> Result<Self, PlanError>
    where
        I: IntoIterator<Item = (ExecutableId, C)>,
        C: IntoIterator<Item = ExecutableId>,
    {
        Ok(Self {
            graph: DependencyGraph::build(dependencies, true)?,
        })
    }

    /// Executables nothing remaining depends on, in reverse declaration order
    pub fn pop_executables(&self) -> Vec<ExecutableId> {
        let mut frontier = self.graph.frontier();
        frontier.reverse();
        frontier
    }

    pub fn remove_executable(&mut self, id: ExecutableId) -> bool {
        self.graph.remove(id)
    }

    pub fn contains(&self, id: ExecutableId) -> bool {
        self.graph.nodes.contains_key(&id)
    }

    pub fn is_empty(&self) -> bool {
        self.graph.nodes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.graph.nodes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: u64) -> ExecutableId {
        ExecutableId(n)
    }

    /// E1 -> E5, E2 -> E1, E3 -> E2, E4 -> E3, E5 -> E4 (parent -> child)
    fn ring() -> Vec<(ExecutableId, Vec<ExecutableId>)> {
        vec![
            (id(1), vec![id(5)]),
            (id(2), vec![id(1)]),
            (id(3), vec![id(2)]),
            (id(4), vec![id(3)]),
            (id(5), vec![id(4)]),
        ]
    }

    fn drain_forward(mut plan: ExecutionPlan) -> Vec<ExecutableId> {
        let mut order = Vec::new();
        loop {
            let batch = plan.pop_executables();
            if batch.is_empty() {
                break;
            }
            for executable in batch {
                plan.remove_executable(executable);
                order.push(executable);
            }
        }
        order
    }

    fn drain_reverse(mut plan: ReverseExecutionPlan) -> Vec<ExecutableId> {
        let mut order = Vec::new();
        loop {
            let batch = plan.pop_executables();
            if batch.is_empty() {
                break;
            }
            for executable in batch {
                plan.remove_executable(executable);
                order.push(executable);
            }
        }
        order
    }

    #[test]
    fn test_full_ring_is_rejected() {
        let error = ExecutionPlan::from_dependencies(ring()).unwrap_err();
        let PlanError::DependencyCycle { executables } = &error;
        assert_eq!(executables, &vec![id(1), id(2), id(3), id(4), id(5)]);
        assert!(error.to_string().contains("exe:3"));

        assert!(ReverseExecutionPlan::from_dependencies(ring()).is_err());
    }

    #[test]
    fn test_subset_ignores_edges_leaving_the_set() {
        let subset: Vec<_> = ring().into_iter().skip(1).collect();

        let forward = ExecutionPlan::from_dependencies(subset.clone()).unwrap();
        assert_eq!(drain_forward(forward), vec![id(2), id(3), id(4), id(5)]);

        let reverse = ReverseExecutionPlan::from_dependencies(subset).unwrap();
        assert_eq!(drain_reverse(reverse), vec![id(5), id(4), id(3), id(2)]);
    }

    #[test]
    fn test_self_loop_is_a_cycle() {
        let result = ExecutionPlan::from_dependencies([(id(1), vec![id(1)]), (id(2), vec![])]);
        assert_eq!(
            result.unwrap_err(),
            PlanError::DependencyCycle {
                executables: vec![id(1)]
            }
        );
    }

    #[test]
    fn test_pop_does_not_mutate() {
        let mut plan =
            ExecutionPlan::from_dependencies([(id(1), vec![]), (id(2), vec![]), (id(3), vec![id(1), id(2)])])
                .unwrap();

        assert_eq!(plan.pop_executables(), vec![id(1), id(2)]);
        assert_eq!(plan.pop_executables(), vec![id(1), id(2)]);
        assert_eq!(plan.len(), 3);

        assert!(plan.remove_executable(id(1)));
        assert!(!plan.remove_executable(id(1)));
        assert_eq!(plan.pop_executables(), vec![id(2)]);

        plan.remove_executable(id(2));
        assert_eq!(plan.pop_executables(), vec![id(3)]);
        plan.remove_executable(id(3));
        assert!(plan.is_empty());
        assert!(plan.pop_executables().is_empty());
    }

    #[test]
    fn test_duplicate_edges_count_once() {
        let mut plan =
            ExecutionPlan::from_dependencies([(id(1), vec![]), (id(2), vec![id(1), id(1)])]).unwrap();
        plan.remove_executable(id(1));
        assert_eq!(plan.pop_executables(), vec![id(2)]);
    }

    #[test]
    fn test_reverse_stops_dependents_first() {
        // Two connections into one room, wrapped by a compartment
        let room = id(1);
        let first = id(2);
        let second = id(3);
        let compartment = id(4);
        let dependencies = vec![
            (room, vec![]),
            (first, vec![room]),
            (second, vec![room]),
            (compartment, vec![first, second]),
        ];

        let mut plan = ReverseExecutionPlan::from_dependencies(dependencies).unwrap();
        assert_eq!(plan.pop_executables(), vec![compartment]);
        plan.remove_executable(compartment);
        assert_eq!(plan.pop_executables(), vec![second, first]);
        plan.remove_executable(first);
        assert_eq!(plan.pop_executables(), vec![second]);
        plan.remove_executable(second);
        assert_eq!(plan.pop_executables(), vec![room]);
    }
}
