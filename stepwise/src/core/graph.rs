//! Step dependency graph, cycle detection, and topological ordering.
//!
//! Adjacency list plus in-degree counts (Kahn's algorithm). Nodes left with a
//! nonzero in-degree after the ready queue drains form (or hang off) a cycle.
//! A cycle is not an error: callers fall back to generation order.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};

use tracing::warn;

use crate::plan::ExecutionStep;

/// A `depends_on` entry that did not resolve to a step in the plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownDependency {
    pub step_id: String,
    pub reference: String,
}

/// Result of ordering a set of steps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopoOrder {
    /// Indices into the input slice, in execution order.
    pub order: Vec<usize>,
    /// Ids of steps that could not be ordered because of a cycle, in input order.
    pub cyclic: Vec<String>,
}

impl TopoOrder {
    pub fn has_cycle(&self) -> bool {
        !self.cyclic.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct DependencyGraph {
    ids: Vec<String>,
    /// `dependents[i]` lists the steps that wait on step `i`.
    dependents: Vec<Vec<usize>>,
    in_degree: Vec<usize>,
}

impl DependencyGraph {
    /// Build the graph from `depends_on` references. References to unknown ids
    /// are ignored here; see [`prune_unknown_dependencies`].
    pub fn build(steps: &[ExecutionStep]) -> Self {
        let index: HashMap<&str, usize> = steps
            .iter()
            .enumerate()
            .map(|(i, step)| (step.id.as_str(), i))
            .collect();

        let mut dependents = vec![Vec::new(); steps.len()];
        let mut in_degree = vec![0usize; steps.len()];

        for (i, step) in steps.iter().enumerate() {
            let mut seen = HashSet::new();
            for dep in &step.depends_on {
                let Some(&from) = index.get(dep.as_str()) else {
                    continue;
                };
                if seen.insert(from) {
                    dependents[from].push(i);
                    in_degree[i] += 1;
                }
            }
        }

        Self {
            ids: steps.iter().map(|step| step.id.clone()).collect(),
            dependents,
            in_degree,
        }
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Kahn's algorithm. Among ready steps the earliest generated one goes
    /// first, so an unconstrained plan keeps its generation order.
    ///
    /// If a cycle remains, the returned order is the full generation order and
    /// `cyclic` lists the steps that were never released.
    pub fn topological_order(&self) -> TopoOrder {
        let mut in_degree = self.in_degree.clone();
        let mut ready: BinaryHeap<Reverse<usize>> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, degree)| **degree == 0)
            .map(|(i, _)| Reverse(i))
            .collect();

        let mut order = Vec::with_capacity(self.len());
        while let Some(Reverse(node)) = ready.pop() {
            order.push(node);
            for &dependent in &self.dependents[node] {
                in_degree[dependent] -= 1;
                if in_degree[dependent] == 0 {
                    ready.push(Reverse(dependent));
                }
            }
        }

        if order.len() == self.len() {
            return TopoOrder {
                order,
                cyclic: Vec::new(),
            };
        }

        let cyclic: Vec<String> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, degree)| **degree > 0)
            .map(|(i, _)| self.ids[i].clone())
            .collect();
        warn!(
            cyclic = ?cyclic,
            "dependency cycle detected, falling back to generation order"
        );
        TopoOrder {
            order: (0..self.len()).collect(),
            cyclic,
        }
    }
}

/// Remove `depends_on` entries that do not name a step in `steps`.
///
/// Returns the dropped references so callers can surface them.
pub fn prune_unknown_dependencies(steps: &mut [ExecutionStep]) -> Vec<UnknownDependency> {
    let known: HashSet<String> = steps.iter().map(|step| step.id.clone()).collect();
    let mut dropped = Vec::new();

    for step in steps.iter_mut() {
        let step_id = step.id.clone();
        step.depends_on.retain(|reference| {
            if known.contains(reference) {
                return true;
            }
            warn!(step_id = %step_id, reference = %reference, "dropping unknown dependency");
            dropped.push(UnknownDependency {
                step_id: step_id.clone(),
                reference: reference.clone(),
            });
            false
        });
    }

    dropped
}

/// Steps in execution order plus the cycle report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderedSteps {
    pub steps: Vec<ExecutionStep>,
    pub cyclic: Vec<String>,
}

/// Order `steps` so every step follows its dependencies, or keep generation
/// order when the graph has a cycle. `depends_on` edges are left intact.
pub fn order_steps(steps: Vec<ExecutionStep>) -> OrderedSteps {
    let topo = DependencyGraph::build(&steps).topological_order();
    let mut slots: Vec<Option<ExecutionStep>> = steps.into_iter().map(Some).collect();
    let ordered = topo
        .order
        .iter()
        .filter_map(|&i| slots[i].take())
        .collect();
    OrderedSteps {
        steps: ordered,
        cyclic: topo.cyclic,
    }
}
