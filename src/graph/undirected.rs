use ndarray::prelude::*;
use serde::{Deserialize, Serialize};

use crate::{types::FxIndexSet, NodeId};

/// An undirected graph over [`NodeId`]s, backed by a dense adjacency matrix.
///
/// Used for the moral graph derived from a [`crate::graph::Dag`] (`spec.md`
/// §4.D) and for the elimination graph built during triangulation. Mirrors
/// the teacher's `UnGraph`, keyed by `NodeId` rather than string labels —
/// `nodes` gives every node a dense position, and `adjacency[[i, j]]` tracks
/// the edge between the nodes at positions `i` and `j`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UnGraph {
    nodes: FxIndexSet<NodeId>,
    adjacency: Array2<bool>,
}

impl UnGraph {
    /// Builds an edgeless graph over `nodes`.
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

    /// Returns `true` if an edge between `x` and `y` exists.
    pub fn has_edge(&self, x: NodeId, y: NodeId) -> bool {
        self.adjacency[[self.index_of(x), self.index_of(y)]]
    }

    /// Adds an undirected edge between `x` and `y`. Returns `true` if the
    /// edge was newly added, `false` if it already existed.
    pub fn add_edge(&mut self, x: NodeId, y: NodeId) -> bool {
        let (i, j) = (self.index_of(x), self.index_of(y));
        if self.adjacency[[i, j]] {
            return false;
        }
        self.adjacency[[i, j]] = true;
        self.adjacency[[j, i]] = true;
        true
    }

    /// Removes the undirected edge between `x` and `y`, if present.
    pub fn del_edge(&mut self, x: NodeId, y: NodeId) -> bool {
        let (i, j) = (self.index_of(x), self.index_of(y));
        if !self.adjacency[[i, j]] {
            return false;
        }
        self.adjacency[[i, j]] = false;
        self.adjacency[[j, i]] = false;
        true
    }

    /// Returns the neighbors of `x`.
    pub fn neighbors(&self, x: NodeId) -> Vec<NodeId> {
        let i = self.index_of(x);
        self.adjacency
            .row(i)
            .indexed_iter()
            .filter_map(|(j, &has_edge)| has_edge.then(|| self.nodes[j]))
            .collect()
    }

    /// Returns every edge as an ordered pair `(x, y)` with `x`'s position
    /// not greater than `y`'s, so each undirected edge is reported once.
    pub fn edges(&self) -> Vec<(NodeId, NodeId)> {
        self.adjacency
            .indexed_iter()
            .filter_map(|((i, j), &has_edge)| (has_edge && i <= j).then(|| (self.nodes[i], self.nodes[j])))
            .collect()
    }

    /// Adds a node with no incident edges, if not already present.
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

    /// Removes `x` and every edge incident to it.
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
}
