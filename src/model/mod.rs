use std::sync::RwLock;

use log::warn;
use ndarray::Axis;

use crate::{
    config::Config,
    factor::Factor,
    graph::{Dag, UnGraph},
    inference::Engine,
    triangulation::{Phase, Triangulator},
    types::{Error, FxIndexMap, FxMap, Result, EPSILON},
    variable::{NodeIdCounter, Variable},
    NodeId,
};

/// The exact-inference facade over a discrete Bayesian network (`spec.md`
/// §4.H, component H): owns the variable registry, the DAG, every
/// variable's conditional probability table, and a cached moral graph.
///
/// Grounded in the teacher's `CategoricalBayesianNetwork`
/// (`models/bayesian_network/categorical.rs`) for the overall
/// registry-plus-graph-plus-CPTs shape, and in `types::Cache`
/// (`Arc<RwLock<Map<K, V>>>`) for the single-entry moral-graph cache: one
/// `RwLock` per network, invalidated on every structural mutation and
/// rebuilt lazily on the next read (`spec.md` §5).
pub struct BayesianNetwork {
    counter: NodeIdCounter,
    variables: FxIndexMap<NodeId, Variable>,
    names: FxMap<String, NodeId>,
    dag: Dag,
    cpts: FxMap<NodeId, Factor>,
    moral_cache: RwLock<Option<UnGraph>>,
    config: Config,
}

impl BayesianNetwork {
    pub fn new(config: Config) -> Self {
        Self {
            counter: NodeIdCounter::new(),
            variables: FxIndexMap::default(),
            names: FxMap::default(),
            dag: Dag::empty(std::iter::empty()),
            cpts: FxMap::default(),
            moral_cache: RwLock::new(None),
            config,
        }
    }

    #[inline]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[inline]
    pub fn variable(&self, x: NodeId) -> Result<&Variable> {
        self.variables.get(&x).ok_or(Error::UnregisteredVariable(x))
    }

    pub fn variables(&self) -> impl Iterator<Item = &Variable> {
        self.variables.values()
    }

    #[inline]
    pub fn dag(&self) -> &Dag {
        &self.dag
    }

    /// Registers a new variable and returns its fresh [`NodeId`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateName`] if `name` is already registered.
    pub fn add_variable<I, L>(&mut self, name: impl Into<String>, labels: I) -> Result<NodeId>
    where
        I: IntoIterator<Item = L>,
        L: Into<String>,
    {
        let name = name.into();
        if self.names.contains_key(&name) {
            return Err(Error::DuplicateName(name));
        }

        let id = self.counter.next();
        self.dag.add_node(id);
        self.variables.insert(id, Variable::new(id, name.clone(), labels));
        self.names.insert(name, id);
        self.invalidate_moral_cache();

        Ok(id)
    }

    /// Removes a variable, its arcs, and every CPT that referenced it
    /// (either as its own distribution or as a parent).
    pub fn remove_variable(&mut self, x: NodeId) -> Result<()> {
        let variable = self.variables.shift_remove(&x).ok_or(Error::UnregisteredVariable(x))?;
        self.names.remove(variable.name());
        self.dag.remove_node(x);
        self.cpts.remove(&x);

        let stale: Vec<NodeId> = self
            .cpts
            .iter()
            .filter(|(_, f)| f.in_scope(x))
            .map(|(&id, _)| id)
            .collect();
        for id in stale {
            self.cpts.remove(&id);
        }

        self.invalidate_moral_cache();
        Ok(())
    }

    /// Renames a variable.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateName`] if `new_name` is already in use.
    pub fn rename_variable(&mut self, x: NodeId, new_name: impl Into<String>) -> Result<()> {
        let new_name = new_name.into();
        if self.names.contains_key(&new_name) {
            return Err(Error::DuplicateName(new_name));
        }

        let variable = self.variables.get_mut(&x).ok_or(Error::UnregisteredVariable(x))?;
        let old_name = variable.name().to_owned();
        variable.rename(new_name.clone());
        self.names.remove(&old_name);
        self.names.insert(new_name, x);

        Ok(())
    }

    /// Adds the arc `parent -> child`.
    ///
    /// `child`'s CPT, if any, is dropped: its scope depended on the old
    /// parent set and is no longer valid.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnregisteredVariable`] if either endpoint is
    /// unknown, or [`Error::CycleDetected`] if the arc would close a cycle —
    /// in which case the arc is not added.
    pub fn add_arc(&mut self, parent: NodeId, child: NodeId) -> Result<()> {
        if !self.dag.has_node(parent) {
            return Err(Error::UnregisteredVariable(parent));
        }
        if !self.dag.has_node(child) {
            return Err(Error::UnregisteredVariable(child));
        }

        self.dag.add_arc(parent, child);
        if let Err(e) = self.dag.topological_sort() {
            self.dag.del_arc(parent, child);
            return Err(e);
        }

        self.cpts.remove(&child);
        self.invalidate_moral_cache();
        Ok(())
    }

    /// Removes the arc `parent -> child`, if present. `child`'s CPT, if
    /// any, is dropped for the same reason as in [`Self::add_arc`].
    pub fn del_arc(&mut self, parent: NodeId, child: NodeId) -> bool {
        let removed = self.dag.del_arc(parent, child);
        if removed {
            self.cpts.remove(&child);
            self.invalidate_moral_cache();
        }
        removed
    }

    fn invalidate_moral_cache(&mut self) {
        *self.moral_cache.write().unwrap() = None;
    }

    /// Returns the moral graph of this network's DAG, rebuilding and
    /// caching it on first access after any structural mutation.
    pub fn moral_graph(&self) -> UnGraph {
        if let Some(g) = self.moral_cache.read().unwrap().as_ref() {
            return g.clone();
        }
        let g = self.dag.moralize();
        *self.moral_cache.write().unwrap() = Some(g.clone());
        g
    }

    fn is_normalized(factor: &Factor) -> bool {
        factor
            .values()
            .sum_axis(Axis(0))
            .iter()
            .all(|&mass| (mass - 1.0).abs() < EPSILON)
    }

    /// Sets the conditional probability table of `x`, laid out as
    /// `[x, parents(x)...]` with `parents(x)` in this network's current
    /// parent-query order.
    ///
    /// When `strict` is `false`, a table that does not sum to one along
    /// `x`'s axis is accepted with a logged warning instead of an error —
    /// useful for tables assembled from data where small numerical drift is
    /// expected to be corrected later.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnregisteredVariable`] if `x` is unknown,
    /// [`Error::ShapeMismatch`] if `values` does not match `x`'s declared
    /// shape, and [`Error::CPTNotNormalized`] if `strict` is `true` and the
    /// table does not sum to one along `x`'s axis.
    pub fn set_cpt(&mut self, x: NodeId, values: Vec<f64>, strict: bool) -> Result<()> {
        let variable = self.variable(x)?.clone();
        let parents = self.dag.parents(x);

        let mut scope = vec![x];
        scope.extend(parents.iter().copied());
        let mut domain = vec![variable.domain_size()];
        for &p in &parents {
            domain.push(self.variable(p)?.domain_size());
        }

        let factor = Factor::new(scope, domain, values)?;
        if !Self::is_normalized(&factor) {
            if strict {
                return Err(Error::CPTNotNormalized(variable.name().to_owned()));
            }
            warn!(
                "CPT for variable `{}` does not sum to one along its own axis; accepted under non-strict ingestion",
                variable.name()
            );
        }

        self.cpts.insert(x, factor);
        Ok(())
    }

    #[inline]
    pub fn cpt(&self, x: NodeId) -> Option<&Factor> {
        self.cpts.get(&x)
    }

    /// Triangulates the current moral graph and builds a fresh inference
    /// [`Engine`] over it, folding every registered CPT into the clique that
    /// carries its family.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CycleDetected`] if the DAG is not acyclic,
    /// [`Error::Cancelled`] if `on_progress` returns `false`, and
    /// [`Error::InvariantViolated`] if triangulation produced a junction
    /// tree that does not carry some variable's family — a bug in this
    /// crate, not a caller error.
    pub fn build_engine(&self, on_progress: impl FnMut(Phase, usize, usize) -> bool) -> Result<Engine> {
        self.dag.topological_sort()?;

        let log_domain: FxMap<NodeId, f64> = self
            .variables
            .iter()
            .map(|(&id, v)| (id, (v.domain_size() as f64).ln()))
            .collect();
        let domain: FxMap<NodeId, usize> = self.variables.iter().map(|(&id, v)| (id, v.domain_size())).collect();

        let triangulator = Triangulator::new(&self.dag, &log_domain, self.config.triangulation.clone());
        let tree = triangulator.run(on_progress)?;

        let mut base: Vec<Factor> = tree
            .cliques()
            .iter()
            .map(|c| {
                let vars: Vec<NodeId> = c.vars.iter().copied().collect();
                let dom: Vec<usize> = vars.iter().map(|x| domain[x]).collect();
                Factor::ones(vars, dom)
            })
            .collect();

        for (&x, cpt) in &self.cpts {
            let i = tree
                .clique_containing(cpt.scope())
                .ok_or_else(|| Error::InvariantViolated(format!("no clique carries the family of variable {x}")))?;
            base[i] = base[i].combine(cpt);
        }

        Ok(Engine::new(tree, base, domain, self.config.engine.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_arc_rejects_cycles_and_rolls_back() {
        let mut bn = BayesianNetwork::new(Config::default());
        let a = bn.add_variable("A", ["0", "1"]).unwrap();
        let b = bn.add_variable("B", ["0", "1"]).unwrap();
        bn.add_arc(a, b).unwrap();
        assert!(matches!(bn.add_arc(b, a), Err(Error::CycleDetected(_))));
        assert!(!bn.dag.has_arc(b, a));
    }

    #[test]
    fn duplicate_name_is_rejected() {
        let mut bn = BayesianNetwork::new(Config::default());
        bn.add_variable("A", ["0", "1"]).unwrap();
        assert!(matches!(bn.add_variable("A", ["0", "1"]), Err(Error::DuplicateName(_))));
    }

    #[test]
    fn non_strict_ingestion_warns_instead_of_erroring() {
        let mut bn = BayesianNetwork::new(Config::default());
        let a = bn.add_variable("A", ["0", "1"]).unwrap();
        assert!(bn.set_cpt(a, vec![0.3, 0.3], false).is_ok());
        assert!(matches!(bn.set_cpt(a, vec![0.3, 0.3], true), Err(Error::CPTNotNormalized(_))));
    }

    #[test]
    fn moral_graph_cache_reflects_structural_changes() {
        let mut bn = BayesianNetwork::new(Config::default());
        let a = bn.add_variable("A", ["0", "1"]).unwrap();
        let b = bn.add_variable("B", ["0", "1"]).unwrap();
        let c = bn.add_variable("C", ["0", "1"]).unwrap();
        bn.add_arc(a, c).unwrap();
        bn.add_arc(b, c).unwrap();

        let moral = bn.moral_graph();
        assert!(moral.has_edge(a, b));

        bn.del_arc(b, c);
        let moral = bn.moral_graph();
        assert!(!moral.has_edge(a, b));
    }

    #[test]
    fn build_engine_answers_chain_posterior() {
        let mut bn = BayesianNetwork::new(Config::default());
        let a = bn.add_variable("A", ["lo", "hi"]).unwrap();
        let b = bn.add_variable("B", ["lo", "hi"]).unwrap();
        bn.add_arc(a, b).unwrap();

        bn.set_cpt(a, vec![0.6, 0.4], true).unwrap();
        bn.set_cpt(b, vec![0.7, 0.3, 0.2, 0.8], true).unwrap();

        let mut engine = bn.build_engine(|_, _, _| true).unwrap();
        let post_a = engine.posterior(&[a]).unwrap();
        assert!((post_a.values()[[0]] - 0.6).abs() < 1e-9);
        assert!((post_a.values()[[1]] - 0.4).abs() < 1e-9);
    }
}
