use std::collections::VecDeque;

use itertools::Itertools;
use ndarray::prelude::*;
use serde::{Deserialize, Serialize};

use super::UnGraph;
use crate::{
    types::{Error, FxIndexSet, Result},
    NodeId,
};

/// A directed graph over [`NodeId`]s, backed by a dense adjacency matrix
/// (`spec.md` §4.D, component D).
///
/// Acyclicity is not enforced by `add_arc` itself — mirroring the teacher's
/// `DiGraph`, which only tracks edges — but [`Dag::topological_sort`]
/// detects a cycle the moment one would make the ordering impossible, and
/// every caller that needs a DAG invariant (e.g. the BayesNet facade) goes
/// through that check before relying on acyclicity.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Dag {
    nodes: FxIndexSet<NodeId>,
    adjacency: Array2<bool>,
}

impl Dag {
    /// Builds an arc-less DAG over `nodes`.
    pub fn empty<I>(nodes: I) -> Self
    where
        I: IntoIterator<Item = NodeId>,
    {
        let nodes: FxIndexSet<NodeId> = nodes.into_iter().collect();
        let n = nodes.len();
        Self {
            nodes,
            adjacency: Array2::from_elem((n, n), false),
        }
    }

    /// Returns the number of nodes.
    #[inline]
    pub fn order(&self) -> usize {
        self.nodes.len()
    }

    /// Returns `true` if `x` is a node of this graph.
    #[inline]
    pub fn has_node(&self, x: NodeId) -> bool {
        self.nodes.contains(&x)
    }

    /// Iterates over the nodes of this graph, in dense position order.
    pub fn nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.iter().copied()
    }

    fn index_of(&self, x: NodeId) -> usize {
        self.nodes
            .get_index_of(&x)
            .unwrap_or_else(|| panic!("node {x} is not part of this graph"))
    }

    /// Adds a node with no incident arcs, if not already present.
    pub fn add_node(&mut self, x: NodeId) -> bool {
        if self.nodes.contains(&x) {
            return false;
        }
        self.nodes.insert(x);
        let n = self.nodes.len();
        let mut adjacency = Array2::from_elem((n, n), false);
        adjacency
            .slice_mut(s![..n - 1, ..n - 1])
            .assign(&self.adjacency);
        self.adjacency = adjacency;
        true
    }

    /// Removes `x` and every arc incident to it.
    pub fn remove_node(&mut self, x: NodeId) -> bool {
        let Some(i) = self.nodes.get_index_of(&x) else {
            return false;
        };
        self.nodes.shift_remove_index(i);

        let n = self.nodes.len();
        let mut adjacency = Array2::from_elem((n, n), false);
        for (new_i, old_i) in (0..).filter(|&k| k != i).take(n).enumerate() {
            for (new_j, old_j) in (0..).filter(|&k| k != i).take(n).enumerate() {
                adjacency[[new_i, new_j]] = self.adjacency[[old_i, old_j]];
            }
        }
        self.adjacency = adjacency;
        true
    }

    /// Returns `true` if an arc `x -> y` exists.
    pub fn has_arc(&self, x: NodeId, y: NodeId) -> bool {
        self.adjacency[[self.index_of(x), self.index_of(y)]]
    }

    /// Adds the arc `x -> y`. Returns `true` if the arc was newly added.
    pub fn add_arc(&mut self, x: NodeId, y: NodeId) -> bool {
        let (i, j) = (self.index_of(x), self.index_of(y));
        if self.adjacency[[i, j]] {
            return false;
        }
        self.adjacency[[i, j]] = true;
        true
    }

    /// Removes the arc `x -> y`, if present.
    pub fn del_arc(&mut self, x: NodeId, y: NodeId) -> bool {
        let (i, j) = (self.index_of(x), self.index_of(y));
        if !self.adjacency[[i, j]] {
            return false;
        }
        self.adjacency[[i, j]] = false;
        true
    }

    /// Returns the parents of `x`.
    pub fn parents(&self, x: NodeId) -> Vec<NodeId> {
        let j = self.index_of(x);
        self.adjacency
            .column(j)
            .indexed_iter()
            .filter_map(|(i, &has_arc)| has_arc.then(|| self.nodes[i]))
            .collect()
    }

    /// Returns the children of `x`.
    pub fn children(&self, x: NodeId) -> Vec<NodeId> {
        let i = self.index_of(x);
        self.adjacency
            .row(i)
            .indexed_iter()
            .filter_map(|(j, &has_arc)| has_arc.then(|| self.nodes[j]))
            .collect()
    }

    /// Returns the ancestors of `x` (not including `x`), sorted by id.
    pub fn ancestors(&self, x: NodeId) -> Vec<NodeId> {
        let mut visited = FxIndexSet::default();
        let mut stack = VecDeque::from([x]);
        while let Some(y) = stack.pop_back() {
            for z in self.parents(y) {
                if visited.insert(z) {
                    stack.push_back(z);
                }
            }
        }
        visited.into_iter().sorted().collect()
    }

    /// Returns the descendants of `x` (not including `x`), sorted by id.
    pub fn descendants(&self, x: NodeId) -> Vec<NodeId> {
        let mut visited = FxIndexSet::default();
        let mut stack = VecDeque::from([x]);
        while let Some(y) = stack.pop_back() {
            for z in self.children(y) {
                if visited.insert(z) {
                    stack.push_back(z);
                }
            }
        }
        visited.into_iter().sorted().collect()
    }

    /// Returns a topological order of the nodes via Kahn's algorithm.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CycleDetected`] naming a node on a cycle if the
    /// graph is not acyclic.
    pub fn topological_sort(&self) -> Result<Vec<NodeId>> {
        let n = self.nodes.len();
        let mut in_degree: Vec<usize> = (0..n).map(|j| self.adjacency.column(j).iter().filter(|&&b| b).count()).collect();

        let mut queue: VecDeque<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
        let mut order = Vec::with_capacity(n);

        while let Some(i) = queue.pop_front() {
            order.push(self.nodes[i]);
            for j in 0..n {
                if self.adjacency[[i, j]] {
                    in_degree[j] -= 1;
                    if in_degree[j] == 0 {
                        queue.push_back(j);
                    }
                }
            }
        }

        if order.len() != n {
            let stuck = (0..n)
                .find(|&i| in_degree[i] > 0)
                .expect("fewer nodes ordered than exist implies some node still has positive in-degree");
            return Err(Error::CycleDetected(self.nodes[stuck]));
        }

        Ok(order)
    }

    /// Builds the moral graph: an undirected copy of this DAG's skeleton
    /// with every pair of parents of a common child connected.
    ///
    /// Grounded in the teacher's `moralize` free function, specialized to a
    /// single concrete graph pair instead of the teacher's generic
    /// `DirectedGraph -> UndirectedGraph` conversion.
    pub fn moralize(&self) -> UnGraph {
        let mut h = UnGraph::empty(self.nodes());
        for (x, y) in self.arcs() {
            h.add_edge(x, y);
        }
        for x in self.nodes() {
            for pair in self.parents(x).into_iter().combinations(2) {
                h.add_edge(pair[0], pair[1]);
            }
        }
        h
    }

    /// Returns every arc as a `(parent, child)` pair.
    pub fn arcs(&self) -> Vec<(NodeId, NodeId)> {
        self.adjacency
            .indexed_iter()
            .filter_map(|((i, j), &has_arc)| has_arc.then(|| (self.nodes[i], self.nodes[j])))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(i: u32) -> NodeId {
        NodeId(i)
    }

    #[test]
    fn topological_sort_orders_parents_before_children() {
        let mut g = Dag::empty([id(0), id(1), id(2)]);
        g.add_arc(id(0), id(1));
        g.add_arc(id(1), id(2));
        let order = g.topological_sort().unwrap();
        let pos = |x: NodeId| order.iter().position(|&y| y == x).unwrap();
        assert!(pos(id(0)) < pos(id(1)));
        assert!(pos(id(1)) < pos(id(2)));
    }

    #[test]
    fn topological_sort_detects_cycle() {
        let mut g = Dag::empty([id(0), id(1)]);
        g.add_arc(id(0), id(1));
        g.add_arc(id(1), id(0));
        assert!(matches!(g.topological_sort(), Err(Error::CycleDetected(_))));
    }

    #[test]
    fn moralize_connects_co_parents() {
        // A -> C, B -> C: moral graph must have an A-B edge.
        let mut g = Dag::empty([id(0), id(1), id(2)]);
        g.add_arc(id(0), id(2));
        g.add_arc(id(1), id(2));
        let h = g.moralize();
        assert!(h.has_edge(id(0), id(1)));
        assert!(h.has_edge(id(0), id(2)));
        assert!(h.has_edge(id(1), id(2)));
    }

    #[test]
    fn ancestors_and_descendants_are_transitive() {
        let mut g = Dag::empty([id(0), id(1), id(2)]);
        g.add_arc(id(0), id(1));
        g.add_arc(id(1), id(2));
        assert_eq!(g.ancestors(id(2)), vec![id(1), id(0)].into_iter().sorted().collect::<Vec<_>>());
        assert!(g.descendants(id(0)).contains(&id(2)));
    }
}
