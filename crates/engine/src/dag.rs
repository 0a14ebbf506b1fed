//! DAG validation, run before a spec is registered.
//!
//! Rules enforced:
//! 1. The spec contains at least one node and node IDs are unique.
//! 2. Every `depends_on` entry references an existing node other than itself.
//! 3. Estimated costs are non-negative and timeouts, when set, are non-zero.
//! 4. The dependency graph is acyclic (Kahn's algorithm must drain it).
//!
//! Returns node IDs in topological order; ties are broken by declaration
//! order so the result is deterministic.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::error::ValidationError;
use crate::models::NodeSpec;

/// Validate the node list and return it in topological execution order.
///
/// # Errors
/// - [`ValidationError::EmptyWorkflow`] if there are no nodes.
/// - [`ValidationError::DuplicateNodeId`] if two nodes share an ID.
/// - [`ValidationError::SelfDependency`] / [`ValidationError::UnknownDependency`]
///   for bad `depends_on` entries.
/// - [`ValidationError::NegativeCost`] for a negative cost estimate.
/// - [`ValidationError::ZeroTimeout`] for `timeout_secs: 0`.
/// - [`ValidationError::CycleDetected`] if the graph is not acyclic.
pub fn validate_dag(nodes: &[NodeSpec]) -> Result<Vec<String>, ValidationError> {
    let topology = Topology::build(nodes)?;
    Ok(topology
        .order
        .iter()
        .map(|&idx| nodes[idx].id.clone())
        .collect())
}

/// Index-based view of a validated DAG.
///
/// Indices refer to positions in the node list the topology was built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    /// `dependencies[i]`: nodes `i` waits for.
    pub dependencies: Vec<Vec<usize>>,
    /// `dependents[i]`: nodes waiting for `i`, in declaration order.
    pub dependents: Vec<Vec<usize>>,
    /// Topological order.
    pub order: Vec<usize>,
}

impl Topology {
    pub fn build(nodes: &[NodeSpec]) -> Result<Self, ValidationError> {
        if nodes.is_empty() {
            return Err(ValidationError::EmptyWorkflow);
        }

        // -------------------------------------------------------------------
        // 1. Ensure node IDs are unique
        // -------------------------------------------------------------------
        let mut index: HashMap<&str, usize> = HashMap::with_capacity(nodes.len());
        for (i, node) in nodes.iter().enumerate() {
            if index.insert(node.id.as_str(), i).is_some() {
                return Err(ValidationError::DuplicateNodeId(node.id.clone()));
            }
        }

        // -------------------------------------------------------------------
        // 2. Resolve dependencies
        // -------------------------------------------------------------------
        let mut dependencies: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];

        for (i, node) in nodes.iter().enumerate() {
            if node.estimated_cost_cents < 0 {
                return Err(ValidationError::NegativeCost {
                    node_id: node.id.clone(),
                    cost_cents: node.estimated_cost_cents,
                });
            }
            if node.timeout_secs == Some(0) {
                return Err(ValidationError::ZeroTimeout(node.id.clone()));
            }

            // A repeated entry counts once.
            let mut seen: HashSet<&str> = HashSet::new();
            for dep in &node.depends_on {
                if dep == &node.id {
                    return Err(ValidationError::SelfDependency(node.id.clone()));
                }
                let &j = index.get(dep.as_str()).ok_or_else(|| {
                    ValidationError::UnknownDependency {
                        node_id: node.id.clone(),
                        missing: dep.clone(),
                    }
                })?;
                if seen.insert(dep.as_str()) {
                    dependencies[i].push(j);
                    dependents[j].push(i);
                }
            }
        }
        for list in &mut dependents {
            list.sort_unstable();
        }

        // -------------------------------------------------------------------
        // 3. Topological sort (Kahn's algorithm)
        // -------------------------------------------------------------------
        let mut in_degree: Vec<usize> = dependencies.iter().map(Vec::len).collect();

        // Seed with nodes that have no dependencies, in declaration order.
        let mut queue: VecDeque<usize> = (0..nodes.len()).filter(|&i| in_degree[i] == 0).collect();
        let mut order: Vec<usize> = Vec::with_capacity(nodes.len());

        while let Some(i) = queue.pop_front() {
            order.push(i);
            for &d in &dependents[i] {
                in_degree[d] -= 1;
                if in_degree[d] == 0 {
                    queue.push_back(d);
                }
            }
        }

        // Anything left with a non-zero in-degree sits on (or behind) a cycle.
        if order.len() != nodes.len() {
            let stuck = (0..nodes.len())
                .filter(|&i| in_degree[i] > 0)
                .map(|i| nodes[i].id.clone())
                .collect();
            return Err(ValidationError::CycleDetected(stuck));
        }

        Ok(Self {
            dependencies,
            dependents,
            order,
        })
    }
}
