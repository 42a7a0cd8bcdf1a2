//! Topological ordering and cycle detection.

use petgraph::algo::kosaraju_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use std::cmp::Reverse;
use std::collections::BinaryHeap;

use super::node::ResourceNode;

/// Lazy topological iterator over a resource graph (Kahn's algorithm).
///
/// Among nodes whose dependencies are all visited, the earliest declared
/// node is yielded first.
#[derive(Debug)]
pub struct TopologicalOrder<'a> {
    nodes: &'a [ResourceNode],
    dependents: &'a [Vec<usize>],
    remaining: Vec<usize>,
    ready: BinaryHeap<Reverse<usize>>,
}

impl<'a> TopologicalOrder<'a> {
    pub(super) fn new(
        nodes: &'a [ResourceNode],
        dependencies: &'a [Vec<usize>],
        dependents: &'a [Vec<usize>],
    ) -> Self {
        let remaining: Vec<usize> = dependencies.iter().map(Vec::len).collect();
        let ready = remaining
            .iter()
            .enumerate()
            .filter(|(_, deg)| **deg == 0)
            .map(|(i, _)| Reverse(i))
            .collect();

        Self {
            nodes,
            dependents,
            remaining,
            ready,
        }
    }
}

impl<'a> Iterator for TopologicalOrder<'a> {
    type Item = &'a ResourceNode;

    fn next(&mut self) -> Option<Self::Item> {
        let Reverse(i) = self.ready.pop()?;
        for &dependent in &self.dependents[i] {
            self.remaining[dependent] -= 1;
            if self.remaining[dependent] == 0 {
                self.ready.push(Reverse(dependent));
            }
        }
        Some(&self.nodes[i])
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.ready.len(), Some(self.nodes.len()))
    }
}

/// Returns the indices of every node lying on a dependency cycle: members of
/// strongly connected components with more than one node, or with a self loop.
pub(super) fn cycle_members(dependencies: &[Vec<usize>]) -> Vec<usize> {
    let mut graph: DiGraph<(), ()> = DiGraph::with_capacity(dependencies.len(), 0);
    for _ in dependencies {
        graph.add_node(());
    }
    graph.extend_with_edges(
        dependencies
            .iter()
            .enumerate()
            .flat_map(|(v, deps)| deps.iter().map(move |&w| (NodeIndex::new(v), NodeIndex::new(w)))),
    );

    let mut members: Vec<usize> = kosaraju_scc(&graph)
        .into_iter()
        .filter(|c| c.len() > 1 || c.first().is_some_and(|v| dependencies[v.index()].contains(&v.index())))
        .flatten()
        .map(NodeIndex::index)
        .collect();
    members.sort_unstable();
    members
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acyclic_has_no_members() {
        let deps = vec![vec![], vec![0], vec![0, 1]];
        assert!(cycle_members(&deps).is_empty());
    }

    #[test]
    fn test_two_disjoint_cycles() {
        // 0 <-> 1, 2 -> 3 -> 4 -> 2, 5 -> 0
        let deps = vec![vec![1], vec![0], vec![3], vec![4], vec![2], vec![0]];
        assert_eq!(cycle_members(&deps), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_self_loop_is_a_cycle() {
        let deps = vec![vec![], vec![1], vec![1]];
        assert_eq!(cycle_members(&deps), vec![1]);
    }

    #[test]
    fn test_long_chains_do_not_exhaust_the_stack() {
        let n = 200_000;
        let mut deps: Vec<Vec<usize>> = (0..n).map(|v| if v == 0 { vec![] } else { vec![v - 1] }).collect();
        assert!(cycle_members(&deps).is_empty());

        deps[0].push(n - 1);
        assert_eq!(cycle_members(&deps).len(), n);
    }
}
