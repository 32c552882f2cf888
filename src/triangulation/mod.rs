use std::collections::VecDeque;

use itertools::Itertools;
use log::{debug, trace};
use serde::{Deserialize, Serialize};

use crate::{
    graph::{Dag, UnGraph},
    types::{Error, FxIndexSet, FxMap, Result, QUASI_RATIO, WEIGHT_THRESHOLD},
    NodeId,
};

mod union_find;
use union_find::UnionFind;

/// Constrains the order in which variables may be eliminated during
/// triangulation (`spec.md` §4.E).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum EliminationPolicy {
    /// Any remaining variable may be eliminated next; the heuristic is free
    /// to pick whichever minimizes fill-in.
    Unconstrained,
    /// Variables are partitioned into ordered tiers: every variable in tier
    /// `i` must be eliminated before any variable in tier `i + 1`, but the
    /// heuristic is free to order variables within a tier.
    PartialOrdered(Vec<Vec<NodeId>>),
    /// Variables must be eliminated in exactly this order.
    Ordered(Vec<NodeId>),
}

/// Tuning knobs for [`Triangulator`] (`spec.md` §6).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TriangulationConfig {
    pub policy: EliminationPolicy,
    /// Whether to run a post-pass that merges any clique subsumed by a neighbor.
    pub minimality: bool,
    /// Minimum ratio of present to possible edges among a node's neighbors
    /// for it to be accepted as quasi-simplicial.
    pub quasi_ratio: f64,
    /// Additional log-weight, over the best simplicial weight seen so far,
    /// an almost- or quasi-simplicial node may carry and still be preferred
    /// over a non-simplicial elimination.
    pub weight_threshold: f64,
}

impl Default for TriangulationConfig {
    fn default() -> Self {
        Self {
            policy: EliminationPolicy::Unconstrained,
            minimality: true,
            quasi_ratio: QUASI_RATIO,
            weight_threshold: WEIGHT_THRESHOLD,
        }
    }
}

/// How cleanly a node can be eliminated from the current working graph.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
enum Category {
    /// Its neighbors already form a clique: eliminating it adds no fill-in.
    Simplicial,
    /// Exactly one pair of neighbors is missing an edge.
    AlmostSimplicial,
    /// The neighbor-induced subgraph is at least `quasi_ratio` complete.
    QuasiSimplicial,
    Other,
}

/// A single clique of a [`JunctionTree`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Clique {
    pub vars: FxIndexSet<NodeId>,
}

/// A tree of overlapping variable cliques satisfying the running
/// intersection property (`spec.md` §4.F), produced by [`Triangulator::run`].
///
/// A disconnected moral graph yields a junction *forest*: `cliques`/`edges`
/// may hold several disjoint connected components, one per component of the
/// original graph, and `roots` carries exactly one root clique index per
/// component (`spec.md` §4.E "Outputs").
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JunctionTree {
    cliques: Vec<Clique>,
    /// Undirected adjacency between clique indices.
    edges: Vec<FxIndexSet<usize>>,
    roots: Vec<usize>,
}

impl JunctionTree {
    /// Builds a junction tree directly from its parts, bypassing
    /// triangulation. Used by the inference engine's tests, which need a
    /// single connected tree without constructing a full `Dag`/
    /// `Triangulator` around it.
    pub(crate) fn from_parts(cliques: Vec<Clique>, edges: Vec<FxIndexSet<usize>>, root: usize) -> Self {
        Self { cliques, edges, roots: vec![root] }
    }

    #[inline]
    pub fn cliques(&self) -> &[Clique] {
        &self.cliques
    }

    /// Returns one root clique index per connected component.
    #[inline]
    pub fn roots(&self) -> &[usize] {
        &self.roots
    }

    /// Returns the neighboring clique indices of `i`.
    pub fn neighbors(&self, i: usize) -> impl Iterator<Item = usize> + '_ {
        self.edges[i].iter().copied()
    }

    /// Returns the index of a clique that is a superset of `vars`, if any.
    pub fn clique_containing(&self, vars: &[NodeId]) -> Option<usize> {
        self.cliques
            .iter()
            .position(|c| vars.iter().all(|x| c.vars.contains(x)))
    }

    /// Returns a traversal order covering every clique of every component,
    /// each preceded by its parent (or `None` if it is a component's root)
    /// — the order the inference engine collects/distributes messages in.
    pub fn topological_order(&self) -> Vec<(usize, Option<usize>)> {
        let mut visited = vec![false; self.cliques.len()];
        let mut order = Vec::with_capacity(self.cliques.len());
        for &root in &self.roots {
            if visited[root] {
                continue;
            }
            let mut stack = vec![(root, None)];
            visited[root] = true;
            while let Some((i, parent)) = stack.pop() {
                order.push((i, parent));
                for j in self.neighbors(i) {
                    if !visited[j] {
                        visited[j] = true;
                        stack.push((j, Some(i)));
                    }
                }
            }
        }
        order
    }
}

/// Builds a [`JunctionTree`] from a [`crate::graph::Dag`]'s moral graph by
/// triangulating it through simplicial-node elimination (`spec.md` §4.E).
///
/// The elimination loop, clique-weight bookkeeping, and progress/cancellation
/// hook follow the shape of the teacher's heuristic triangulation routines
/// (`MaximumCardinalitySearch::fill_in`); the concrete simplicial/
/// almost-simplicial/quasi-simplicial classification and the bottom-up
/// elimination-tree-to-junction-tree construction below are authored against
/// those idioms, since the upstream triangulation this crate's specification
/// was distilled from only exposes its interface, not its body.
pub struct Triangulator<'a> {
    moral: UnGraph,
    log_domain: &'a FxMap<NodeId, f64>,
    config: TriangulationConfig,
}

/// The phase reported to a [`Triangulator::run`] progress callback.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Elimination,
    JunctionTreeConstruction,
}

impl<'a> Triangulator<'a> {
    /// `log_domain` must map every node of `dag` to the natural log of its
    /// variable's domain size; it drives the clique-weight heuristic.
    pub fn new(dag: &Dag, log_domain: &'a FxMap<NodeId, f64>, config: TriangulationConfig) -> Self {
        Self {
            moral: dag.moralize(),
            log_domain,
            config,
        }
    }

    fn log_weight(&self, nodes: impl IntoIterator<Item = NodeId>) -> f64 {
        nodes.into_iter().map(|x| self.log_domain[&x]).sum()
    }

    fn classify(&self, g: &UnGraph, x: NodeId) -> (Category, f64) {
        let ne = g.neighbors(x);
        let weight = self.log_weight(std::iter::once(x).chain(ne.iter().copied()));

        let possible = ne.len() * ne.len().saturating_sub(1) / 2;
        let missing = ne
            .iter()
            .combinations(2)
            .filter(|pair| !g.has_edge(*pair[0], *pair[1]))
            .count();

        let category = if missing == 0 {
            Category::Simplicial
        } else if missing == 1 {
            Category::AlmostSimplicial
        } else if possible > 0 && (possible - missing) as f64 / possible as f64 >= self.config.quasi_ratio {
            Category::QuasiSimplicial
        } else {
            Category::Other
        };

        (category, weight)
    }

    fn eligible(&self, remaining: &FxIndexSet<NodeId>, eliminated_count: usize) -> Vec<NodeId> {
        match &self.config.policy {
            EliminationPolicy::Unconstrained => remaining.iter().copied().collect(),
            EliminationPolicy::Ordered(order) => vec![order[eliminated_count]],
            EliminationPolicy::PartialOrdered(tiers) => {
                let tier = tiers
                    .iter()
                    .find(|tier| tier.iter().any(|x| remaining.contains(x)))
                    .expect("partial order must cover every remaining node");
                tier.iter().copied().filter(|x| remaining.contains(x)).collect()
            }
        }
    }

    /// Picks the next node to eliminate from `g`, given the running minimum
    /// simplicial weight seen so far.
    fn select(&self, g: &UnGraph, candidates: &[NodeId], best_simplicial: &mut f64) -> NodeId {
        let classified: Vec<(NodeId, Category, f64)> = candidates
            .iter()
            .map(|&x| {
                let (cat, w) = self.classify(g, x);
                (x, cat, w)
            })
            .collect();

        if let Some(&(x, _, w)) = classified
            .iter()
            .filter(|(_, c, _)| *c == Category::Simplicial)
            .min_by(|a, b| a.2.total_cmp(&b.2))
        {
            *best_simplicial = best_simplicial.min(w);
            return x;
        }

        let threshold = *best_simplicial + self.config.weight_threshold;
        if let Some(&(x, _, _)) = classified
            .iter()
            .filter(|(_, c, w)| matches!(c, Category::AlmostSimplicial | Category::QuasiSimplicial) && *w <= threshold)
            .min_by(|a, b| a.2.total_cmp(&b.2))
        {
            return x;
        }

        classified
            .iter()
            .min_by(|a, b| a.2.total_cmp(&b.2))
            .map(|&(x, _, _)| x)
            .expect("candidates must be non-empty")
    }

    /// Runs the full triangulation and junction-tree construction.
    ///
    /// `on_progress` is invoked after each elimination step and after the
    /// junction tree has been built; returning `false` cancels the
    /// operation early via [`Error::Cancelled`].
    pub fn run(&self, mut on_progress: impl FnMut(Phase, usize, usize) -> bool) -> Result<JunctionTree> {
        let mut g = self.moral.clone();
        let n = g.order();
        let mut remaining: FxIndexSet<NodeId> = g.nodes().collect();
        let mut order = Vec::with_capacity(n);
        // created_clique[i] = the vertex set of the clique formed when the
        // i-th node in `order` was eliminated.
        let mut created_clique: Vec<FxIndexSet<NodeId>> = Vec::with_capacity(n);
        let mut best_simplicial = f64::INFINITY;

        while !remaining.is_empty() {
            let candidates = self.eligible(&remaining, order.len());
            let x = self.select(&g, &candidates, &mut best_simplicial);

            let ne: Vec<NodeId> = g.neighbors(x).into_iter().filter(|y| remaining.contains(y)).collect();
            for pair in ne.iter().combinations(2) {
                g.add_edge(*pair[0], *pair[1]);
            }

            let mut clique: FxIndexSet<NodeId> = ne.iter().copied().collect();
            clique.insert(x);
            created_clique.push(clique);

            remaining.shift_remove(&x);
            order.push(x);
            trace!("eliminated {x}, {} node(s) remaining", remaining.len());

            if !on_progress(Phase::Elimination, order.len(), n) {
                return Err(Error::Cancelled("triangulation".into()));
            }
        }
        debug!("elimination order computed: {} node(s)", order.len());

        let tree = self.build_junction_tree(&order, created_clique)?;
        if !on_progress(Phase::JunctionTreeConstruction, 1, 1) {
            return Err(Error::Cancelled("junction tree construction".into()));
        }

        Ok(tree)
    }

    fn build_junction_tree(&self, order: &[NodeId], created_clique: Vec<FxIndexSet<NodeId>>) -> Result<JunctionTree> {
        let n = order.len();
        if n == 0 {
            // An empty BN has no variables to eliminate and no cliques;
            // `spec.md` §8 requires this to yield a valid, empty junction
            // tree rather than underflow on the node count below.
            return Ok(JunctionTree { cliques: Vec::new(), edges: Vec::new(), roots: Vec::new() });
        }
        let position: FxMap<NodeId, usize> = order.iter().enumerate().map(|(i, &x)| (x, i)).collect();

        // elimination_tree_parent[i] = index (in `order`) of the remaining
        // neighbor of order[i] eliminated earliest after it, or None if
        // order[i]'s clique is a root of the elimination tree.
        let mut tree_parent: Vec<Option<usize>> = Vec::with_capacity(n);
        for i in 0..n {
            let later_members: Vec<usize> = created_clique[i]
                .iter()
                .filter(|&&y| y != order[i])
                .map(|y| position[y])
                .collect();
            tree_parent.push(later_members.into_iter().min());
        }

        let mut uf = UnionFind::new(n);
        // subsumed[i]: true if clique i got merged into its parent's clique.
        for i in 0..n {
            if let Some(p) = tree_parent[i] {
                let (ri, rp) = (uf.find(i), uf.find(p));
                if ri != rp && created_clique[i].iter().all(|x| created_clique[p].contains(x)) {
                    uf.union(i, p);
                }
            }
        }

        // Collect one junction-tree node per remaining union-find root, in
        // first-seen order so the root of the elimination tree ends up
        // reachable.
        let mut root_to_index: FxMap<usize, usize> = FxMap::default();
        let mut cliques: Vec<Clique> = Vec::new();
        for i in 0..n {
            let root = uf.find(i);
            let idx = *root_to_index.entry(root).or_insert_with(|| {
                cliques.push(Clique { vars: FxIndexSet::default() });
                cliques.len() - 1
            });
            cliques[idx].vars.extend(created_clique[i].iter().copied());
        }

        let mut edges: Vec<FxIndexSet<usize>> = vec![FxIndexSet::default(); cliques.len()];
        for i in 0..n {
            if let Some(p) = tree_parent[i] {
                let (a, b) = (root_to_index[&uf.find(i)], root_to_index[&uf.find(p)]);
                if a != b {
                    edges[a].insert(b);
                    edges[b].insert(a);
                }
            }
        }

        if self.config.minimality {
            (cliques, edges) = Self::minimize(cliques, edges);
        }

        let roots = self.select_roots(&cliques, &edges);
        let tree = JunctionTree { cliques, edges, roots };

        debug_assert!(
            Self::satisfies_running_intersection(&tree),
            "junction tree construction must satisfy the running intersection property"
        );

        Ok(tree)
    }

    /// Merges every clique that is a subset of one of its neighbors into
    /// that neighbor, preserving the running intersection property.
    fn minimize(mut cliques: Vec<Clique>, mut edges: Vec<FxIndexSet<usize>>) -> (Vec<Clique>, Vec<FxIndexSet<usize>>) {
        loop {
            let subsumed = (0..cliques.len()).find_map(|i| {
                edges[i].iter().find(|&&j| {
                    cliques[i].vars.iter().all(|x| cliques[j].vars.contains(x))
                }).map(|&j| (i, j))
            });

            let Some((i, j)) = subsumed else { break };

            let i_neighbors: Vec<usize> = edges[i].iter().copied().filter(|&k| k != j).collect();
            for k in i_neighbors {
                edges[k].shift_remove(&i);
                edges[k].insert(j);
                edges[j].insert(k);
            }
            edges[j].shift_remove(&i);

            cliques.remove(i);
            edges.remove(i);
            for adj in edges.iter_mut() {
                *adj = adj.iter().map(|&k| if k > i { k - 1 } else { k }).collect();
            }
        }

        (cliques, edges)
    }

    /// Picks one root clique per connected component of `cliques`/`edges`,
    /// preferring the lightest clique (lowest combined log-domain-size) and
    /// breaking ties by the lowest-valued [`NodeId`] in the clique, so root
    /// selection is deterministic regardless of construction order.
    fn select_roots(&self, cliques: &[Clique], edges: &[FxIndexSet<usize>]) -> Vec<usize> {
        let n = cliques.len();
        let mut visited = vec![false; n];
        let mut roots = Vec::new();

        for start in 0..n {
            if visited[start] {
                continue;
            }
            let mut component = vec![start];
            visited[start] = true;
            let mut queue = VecDeque::from([start]);
            while let Some(i) = queue.pop_front() {
                for j in edges[i].iter().copied() {
                    if !visited[j] {
                        visited[j] = true;
                        component.push(j);
                        queue.push_back(j);
                    }
                }
            }

            let root = component
                .into_iter()
                .min_by(|&a, &b| {
                    let wa = self.log_weight(cliques[a].vars.iter().copied());
                    let wb = self.log_weight(cliques[b].vars.iter().copied());
                    wa.total_cmp(&wb).then_with(|| cliques[a].vars.iter().min().cmp(&cliques[b].vars.iter().min()))
                })
                .expect("a connected component is never empty");
            roots.push(root);
        }

        roots
    }

    fn satisfies_running_intersection(tree: &JunctionTree) -> bool {
        for x in tree.cliques.iter().flat_map(|c| c.vars.iter().copied()).unique() {
            let owners: Vec<usize> = tree
                .cliques
                .iter()
                .enumerate()
                .filter_map(|(i, c)| c.vars.contains(&x).then_some(i))
                .collect();
            if owners.is_empty() {
                continue;
            }
            let mut visited = vec![false; tree.cliques.len()];
            let mut queue = VecDeque::from([owners[0]]);
            visited[owners[0]] = true;
            let mut count = 1;
            while let Some(i) = queue.pop_front() {
                for j in tree.neighbors(i) {
                    if !visited[j] && tree.cliques[j].vars.contains(&x) {
                        visited[j] = true;
                        count += 1;
                        queue.push_back(j);
                    }
                }
            }
            if count != owners.len() {
                return false;
            }
        }
        true
    }
}

/// Resolves the clique that should own a node's conditional probability
/// table: the clique created when the earliest-eliminated member of
/// `{x} ∪ parents(x)` was eliminated.
///
/// Moralization already makes `{x} ∪ parents(x)` a clique of the moral
/// graph before any fill-in is added, so whichever of its members is
/// eliminated first is guaranteed to still have every other family member
/// as a neighbor at that moment — the created clique at that step is
/// therefore a superset of the family, satisfying the family-preservation
/// requirement (`spec.md` §4.F).
pub fn family_head(dag: &Dag, x: NodeId, elimination_order: &[NodeId]) -> NodeId {
    let position: FxMap<NodeId, usize> = elimination_order.iter().enumerate().map(|(i, &y)| (y, i)).collect();
    std::iter::once(x)
        .chain(dag.parents(x))
        .min_by_key(|y| position[y])
        .expect("family always contains at least x")
}
