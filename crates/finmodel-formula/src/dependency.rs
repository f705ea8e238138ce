//! Dependency tracking for formula calculation

use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap};

/// Dependency graph over field indices
///
/// Nodes are numbered in registration order; that order breaks ties whenever
/// several fields are ready to be evaluated at once, which keeps the evaluation
/// order stable across builds.
#[derive(Debug, Default, Clone)]
pub struct DependencyGraph {
    /// Field → Fields that depend on it (dependents)
    dependents: Vec<BTreeSet<usize>>,
    /// Field → Fields it depends on (precedents)
    precedents: Vec<BTreeSet<usize>>,
}

impl DependencyGraph {
    /// Create a graph with `nodes` fields and no edges
    pub fn new(nodes: usize) -> Self {
        Self {
            dependents: vec![BTreeSet::new(); nodes],
            precedents: vec![BTreeSet::new(); nodes],
        }
    }

    pub fn len(&self) -> usize {
        self.dependents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dependents.is_empty()
    }

    /// Add a dependency: dependent depends on precedent
    ///
    /// Indices outside the graph are ignored.
    pub fn add_dependency(&mut self, precedent: usize, dependent: usize) {
        if precedent >= self.len() || dependent >= self.len() {
            return;
        }
        self.dependents[precedent].insert(dependent);
        self.precedents[dependent].insert(precedent);
    }

    /// Get fields that depend directly on the given field
    pub fn get_dependents(&self, node: usize) -> impl Iterator<Item = usize> + '_ {
        self.dependents
            .get(node)
            .into_iter()
            .flat_map(|set| set.iter().copied())
    }

    /// Get fields that the given field depends on directly
    pub fn get_precedents(&self, node: usize) -> impl Iterator<Item = usize> + '_ {
        self.precedents
            .get(node)
            .into_iter()
            .flat_map(|set| set.iter().copied())
    }

    /// Order every node so that precedents come before their dependents
    ///
    /// Kahn's algorithm; among ready nodes the lowest index goes first. Fails with
    /// the cycles found when the graph is not acyclic.
    pub fn topological_order(&self) -> Result<Vec<usize>, Vec<Vec<usize>>> {
        let mut in_degree: Vec<usize> = self.precedents.iter().map(BTreeSet::len).collect();
        let mut ready: BinaryHeap<Reverse<usize>> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, &d)| d == 0)
            .map(|(node, _)| Reverse(node))
            .collect();

        let mut order = Vec::with_capacity(self.len());
        while let Some(Reverse(node)) = ready.pop() {
            order.push(node);
            for dependent in self.get_dependents(node) {
                in_degree[dependent] -= 1;
                if in_degree[dependent] == 0 {
                    ready.push(Reverse(dependent));
                }
            }
        }

        if order.len() == self.len() {
            Ok(order)
        } else {
            Err(self.find_cycles())
        }
    }

    /// Find circular references
    ///
    /// Each cycle is a path along "depends on" edges that starts and ends at the same
    /// node, rotated to start at its lowest index (`[a, b, c, a]` where a depends on b).
    /// Rotations of the same cycle are reported once.
    pub fn find_cycles(&self) -> Vec<Vec<usize>> {
        let mut state = vec![Visit::New; self.len()];
        let mut stack = Vec::new();
        let mut cycles = BTreeSet::new();

        for node in 0..self.len() {
            if state[node] == Visit::New {
                self.detect_cycles(node, &mut state, &mut stack, &mut cycles);
            }
        }

        cycles.into_iter().collect()
    }

    fn detect_cycles(
        &self,
        node: usize,
        state: &mut [Visit],
        stack: &mut Vec<usize>,
        cycles: &mut BTreeSet<Vec<usize>>,
    ) {
        state[node] = Visit::InStack;
        stack.push(node);

        for precedent in self.get_precedents(node) {
            match state[precedent] {
                Visit::New => self.detect_cycles(precedent, state, stack, cycles),
                Visit::InStack => {
                    if let Some(pos) = stack.iter().position(|&n| n == precedent) {
                        cycles.insert(canonical_cycle(&stack[pos..]));
                    }
                }
                Visit::Done => {}
            }
        }

        stack.pop();
        state[node] = Visit::Done;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Visit {
    New,
    InStack,
    Done,
}

/// Rotate a cycle to start at its smallest node and close it
fn canonical_cycle(members: &[usize]) -> Vec<usize> {
    let start = members
        .iter()
        .enumerate()
        .min_by_key(|(_, &n)| n)
        .map_or(0, |(i, _)| i);
    let mut cycle: Vec<usize> = members[start..]
        .iter()
        .chain(&members[..start])
        .copied()
        .collect();
    if let Some(&first) = cycle.first() {
        cycle.push(first);
    }
    cycle
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_add_dependency() {
        let mut graph = DependencyGraph::new(2);
        graph.add_dependency(0, 1);

        assert!(graph.get_dependents(0).any(|n| n == 1));
        assert!(graph.get_precedents(1).any(|n| n == 0));
        assert_eq!(graph.get_precedents(0).count(), 0);
    }

    #[test]
    fn test_topological_order_breaks_ties_by_index() {
        // 3 depends on 0 and 2; 1 depends on 3
        let mut graph = DependencyGraph::new(4);
        graph.add_dependency(0, 3);
        graph.add_dependency(2, 3);
        graph.add_dependency(3, 1);

        assert_eq!(graph.topological_order().unwrap(), vec![0, 2, 3, 1]);
    }

    #[test]
    fn test_circular_reference() {
        // 0 -> 1 -> 2 -> 0 (circular), 3 is independent
        let mut graph = DependencyGraph::new(4);
        graph.add_dependency(0, 1);
        graph.add_dependency(1, 2);
        graph.add_dependency(2, 0);

        // 0 depends on 2, 2 depends on 1, 1 depends on 0
        assert_eq!(graph.topological_order(), Err(vec![vec![0, 2, 1, 0]]));
    }

    #[test]
    fn test_self_reference() {
        let mut graph = DependencyGraph::new(2);
        graph.add_dependency(1, 1);
        assert_eq!(graph.find_cycles(), vec![vec![1, 1]]);
    }

    #[test]
    fn test_separate_cycles_are_all_reported() {
        let mut graph = DependencyGraph::new(5);
        graph.add_dependency(0, 1);
        graph.add_dependency(1, 0);
        graph.add_dependency(3, 4);
        graph.add_dependency(4, 3);

        assert_eq!(graph.find_cycles(), vec![vec![0, 1, 0], vec![3, 4, 3]]);
    }
}
