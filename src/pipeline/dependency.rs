//! Generation order over a declared content dependency graph.
//!
//! Kahn's algorithm with a lexicographic ready set, so the same input always
//! yields the same order. Cycles never abort: whatever cannot be ordered is
//! appended in input order and reported.

use std::collections::{BTreeSet, HashMap, HashSet};

/// node -> nodes whose content it needs. May cross taxonomy branches.
pub type DependencyGraph = HashMap<String, Vec<String>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// Every input node exactly once.
    pub order: Vec<String>,
    /// Nodes left over by a cycle, in input order (also the tail of `order`).
    pub cyclic: Vec<String>,
}

impl Resolution {
    pub fn has_cycle(&self) -> bool {
        !self.cyclic.is_empty()
    }
}

/// Topologically order `nodes`, counting only dependencies that are themselves in `nodes`.
pub fn resolve<S: AsRef<str>>(nodes: &[S], graph: &DependencyGraph) -> Resolution {
    // Dedup while keeping first-seen input order.
    let mut seen = HashSet::new();
    let input: Vec<&str> = nodes
        .iter()
        .map(AsRef::as_ref)
        .filter(|n| seen.insert(*n))
        .collect();
    let members: HashSet<&str> = input.iter().copied().collect();

    let mut in_degree: HashMap<&str, usize> = input.iter().map(|n| (*n, 0)).collect();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();

    for &node in &input {
        let Some(deps) = graph.get(node) else {
            continue;
        };
        let unique: HashSet<&str> = deps
            .iter()
            .map(String::as_str)
            .filter(|d| members.contains(d))
            .collect();
        for dep in unique {
            *in_degree.entry(node).or_default() += 1;
            dependents.entry(dep).or_default().push(node);
        }
    }

    let mut ready: BTreeSet<&str> = input
        .iter()
        .copied()
        .filter(|n| in_degree.get(n) == Some(&0))
        .collect();

    let mut order: Vec<String> = Vec::with_capacity(input.len());
    let mut placed: HashSet<&str> = HashSet::with_capacity(input.len());

    while let Some(node) = ready.pop_first() {
        order.push(node.to_string());
        placed.insert(node);
        if let Some(next) = dependents.get(node) {
            for &dependent in next {
                if let Some(degree) = in_degree.get_mut(dependent) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.insert(dependent);
                    }
                }
            }
        }
    }

    let cyclic: Vec<String> = input
        .iter()
        .filter(|n| !placed.contains(*n))
        .map(|n| n.to_string())
        .collect();

    if !cyclic.is_empty() {
        tracing::warn!(
            nodes = ?cyclic,
            "Dependency cycle detected, appending remaining nodes in input order"
        );
        order.extend(cyclic.iter().cloned());
    }

    Resolution { order, cyclic }
}

/// Split an ordered node list into contiguous batches of at most `batch_size`.
///
/// A batch closes early when the next node directly depends on a member, so
/// nodes sharing a batch never need each other's output.
pub fn plan_batches(order: &[String], graph: &DependencyGraph, batch_size: usize) -> Vec<Vec<String>> {
    let batch_size = batch_size.max(1);
    let mut batches: Vec<Vec<String>> = Vec::new();
    let mut current: Vec<String> = Vec::new();

    for node in order {
        let needs_member = graph
            .get(node)
            .is_some_and(|deps| deps.iter().any(|d| current.contains(d)));

        if current.len() >= batch_size || needs_member {
            batches.push(std::mem::take(&mut current));
        }
        current.push(node.clone());
    }
    if !current.is_empty() {
        batches.push(current);
    }
    batches
}
