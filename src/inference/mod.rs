mod evidence;
pub use evidence::*;

use log::{debug, trace};

use crate::{
    config::EngineConfig,
    factor::Factor,
    schedule::Schedule,
    triangulation::JunctionTree,
    types::{Error, FxMap, Result},
    NodeId,
};

/// The phase reported to an [`Engine::propagate_with_progress`] callback.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    /// Messages flowing from the leaves toward a component's root.
    Collect,
    /// Messages flowing from a component's root back out to the leaves.
    Distribute,
}

/// The propagation status of an [`Engine`] (`spec.md` §4.G).
///
/// The junction tree itself is built and cached one level up, by the
/// BayesNet facade (see `crate::model`); an `Engine` only tracks whether
/// *its own* messages are current with respect to the evidence currently
/// set on it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EngineState {
    /// No message pass has run yet since this engine was built or its
    /// evidence last changed.
    Stale,
    /// Every message is current; queries can be answered without recomputation.
    Propagated,
}

/// A Shafer-Shenoy (lazy propagation) exact inference engine bound to a
/// fixed [`JunctionTree`] (`spec.md` §4.G, component G).
///
/// Grounded in the teacher's `CatPhi` (`models/potentials/categorical.rs`):
/// clique potentials are combined and marginalized with the same
/// `combine`/`project` operations `Factor` exposes, and evidence division is
/// avoided the way `CatPhi::DivAssign` avoids it — by construction here,
/// since Shafer-Shenoy combines messages rather than dividing them out.
pub struct Engine {
    tree: JunctionTree,
    /// The factor(s) owned by each clique, not yet combined into one table —
    /// kept separate so evidence can be folded in without discarding the
    /// original CPT-derived potential.
    base: Vec<Factor>,
    domain: FxMap<NodeId, usize>,
    evidence: Evidence,
    /// Messages keyed by the directed tree edge `(from, to)`.
    messages: FxMap<(usize, usize), Factor>,
    state: EngineState,
    config: EngineConfig,
}

impl Engine {
    /// Builds an engine from a junction tree and one base potential per
    /// clique (the pointwise product of every CPT the BayesNet facade
    /// assigned to that clique via `crate::triangulation::family_head`).
    pub fn new(tree: JunctionTree, base: Vec<Factor>, domain: FxMap<NodeId, usize>, config: EngineConfig) -> Self {
        assert_eq!(tree.cliques().len(), base.len(), "one base potential is required per clique");
        Self {
            tree,
            base,
            domain,
            evidence: Evidence::default(),
            messages: FxMap::default(),
            state: EngineState::Stale,
            config,
        }
    }

    #[inline]
    pub fn state(&self) -> EngineState {
        self.state
    }

    #[inline]
    pub fn junction_tree(&self) -> &JunctionTree {
        &self.tree
    }

    /// Sets hard evidence `x = k`, invalidating any previously propagated messages.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EvidenceOnUnknownVariable`] if no clique carries `x`,
    /// and [`Error::InvalidEvidenceVector`] if `k` is out of bounds for `x`'s domain.
    pub fn observe_hard(&mut self, x: NodeId, k: usize) -> Result<()> {
        self.clique_of(x)?;
        let size = self.domain[&x];
        if k >= size {
            return Err(Error::InvalidEvidenceVector(
                x.to_string(),
                format!("label index {k} out of bounds for domain size {size}"),
            ));
        }
        self.evidence.set_hard(x, k);
        self.state = EngineState::Stale;
        Ok(())
    }

    /// Sets soft evidence, a nonnegative likelihood vector over `x`'s domain.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EvidenceOnUnknownVariable`] if no clique carries `x`,
    /// and [`Error::InvalidEvidenceVector`] if `e` has the wrong length or a
    /// negative or non-finite entry.
    pub fn observe_soft(&mut self, x: NodeId, e: Vec<f64>) -> Result<()> {
        self.clique_of(x)?;
        let size = self.domain[&x];
        if e.len() != size {
            return Err(Error::InvalidEvidenceVector(
                x.to_string(),
                format!("expected length {size}, found {}", e.len()),
            ));
        }
        if let Some(bad) = e.iter().find(|v| !v.is_finite() || **v < 0.0) {
            return Err(Error::InvalidEvidenceVector(x.to_string(), format!("entry {bad} is negative or non-finite")));
        }
        self.evidence.set_soft(x, e);
        self.state = EngineState::Stale;
        Ok(())
    }

    /// Clears every piece of evidence.
    pub fn clear_evidence(&mut self) {
        if !self.evidence.is_empty() {
            self.evidence.clear();
            self.state = EngineState::Stale;
        }
    }

    /// Removes any evidence set on `x`, leaving every other variable's
    /// evidence untouched (`spec.md` §4.G "eraseEvidence").
    pub fn erase_evidence(&mut self, x: NodeId) -> Result<()> {
        self.clique_of(x)?;
        if self.evidence.remove(x) {
            self.state = EngineState::Stale;
        }
        Ok(())
    }

    fn clique_of(&self, x: NodeId) -> Result<usize> {
        self.tree
            .clique_containing(&[x])
            .ok_or_else(|| Error::EvidenceOnUnknownVariable(x.to_string()))
    }

    /// Runs collect-to-root then distribute-from-root, recomputing every
    /// message this engine has not already computed against the current
    /// evidence. A fresh engine or one whose evidence just changed
    /// recomputes every message; calling `propagate` again while already
    /// `Propagated` is a no-op.
    pub fn propagate(&mut self) -> Result<()> {
        self.propagate_with_progress(|_, _, _| true)
    }

    /// Like [`Engine::propagate`], but invokes `on_progress` every
    /// `engine.cancellation-check-granularity` messages (`spec.md` §5
    /// "Cancellation & timeouts"), returning [`Error::Cancelled`] as soon as
    /// it returns `false`.
    pub fn propagate_with_progress(&mut self, mut on_progress: impl FnMut(Phase, usize, usize) -> bool) -> Result<()> {
        if self.state == EngineState::Propagated {
            return Ok(());
        }

        let working = self.working_potentials();
        self.messages.clear();

        let order = self.tree.topological_order();
        let collect_total = order.iter().filter(|(_, parent)| parent.is_some()).count();
        let granularity = self.config.cancellation_check_granularity.max(1);

        // Collect to root: process in reverse preorder so every child is
        // handled before its parent.
        let mut collected = 0usize;
        for &(i, parent) in order.iter().rev() {
            if let Some(p) = parent {
                let msg = self.compute_message(&working, i, p);
                trace!("collect message clique {i} -> clique {p}, scope {:?}", msg.scope());
                self.messages.insert((i, p), msg);
                collected += 1;
                if collected % granularity == 0 && !on_progress(Phase::Collect, collected, collect_total) {
                    return Err(Error::Cancelled("inference propagation (collect)".into()));
                }
            }
        }

        // Distribute from root: preorder, so a node's inbound parent
        // message is ready before it computes its own outgoing messages.
        // A tree has exactly as many remaining (non-collect) directed edges
        // as it has collect messages, so the two phases share a total.
        let mut distributed = 0usize;
        for &(i, parent) in &order {
            for j in self.tree.neighbors(i) {
                if Some(j) != parent && !self.messages.contains_key(&(i, j)) {
                    let msg = self.compute_message(&working, i, j);
                    trace!("distribute message clique {i} -> clique {j}, scope {:?}", msg.scope());
                    self.messages.insert((i, j), msg);
                    distributed += 1;
                    if distributed % granularity == 0 && !on_progress(Phase::Distribute, distributed, collect_total) {
                        return Err(Error::Cancelled("inference propagation (distribute)".into()));
                    }
                }
            }
        }

        self.state = EngineState::Propagated;
        debug!("propagation complete: {} message(s)", self.messages.len());
        Ok(())
    }

    fn working_potentials(&self) -> Vec<Factor> {
        let mut working = self.base.clone();
        for (&x, kind) in self.evidence.iter() {
            // Evidence may be folded into any clique carrying `x`; the
            // first one found is sufficient, since `combine` is
            // commutative and every message pass touches every clique.
            let i = self
                .tree
                .clique_containing(&[x])
                .expect("observe_* already validated this variable has a clique");
            working[i] = match kind {
                EvidenceKind::Hard(k) => working[i].clone().incorporate_hard_evidence(x, *k).expect("validated at observe_hard"),
                EvidenceKind::Soft(e) => working[i].clone().incorporate_soft_evidence(x, e).expect("validated at observe_soft"),
            };
        }
        working
    }

    fn compute_message(&self, working: &[Factor], from: usize, to: usize) -> Factor {
        let separator: Vec<NodeId> = self.tree.cliques()[from]
            .vars
            .iter()
            .copied()
            .filter(|x| self.tree.cliques()[to].vars.contains(x))
            .collect();

        let mut factors = vec![working[from].clone()];
        for k in self.tree.neighbors(from) {
            if k != to {
                if let Some(inbound) = self.messages.get(&(k, from)) {
                    factors.push(inbound.clone());
                }
            }
        }

        let acc = self.combine_all(factors);
        let remove: Vec<NodeId> = acc.scope().iter().copied().filter(|x| !separator.contains(x)).collect();
        acc.project(&remove)
    }

    fn belief(&self, working: &[Factor], i: usize) -> Factor {
        let mut factors = vec![working[i].clone()];
        for k in self.tree.neighbors(i) {
            if let Some(inbound) = self.messages.get(&(k, i)) {
                factors.push(inbound.clone());
            }
        }
        self.combine_all(factors)
    }

    /// Combines every factor in `factors` into one, using
    /// `engine.parallel-schedule` (via [`Schedule::execute_parallel`]) when
    /// there are enough independent pairs to make a worker pool worthwhile;
    /// otherwise folds them sequentially. Always equivalent to combining in
    /// any order, since `combine` is commutative and associative.
    fn combine_all(&self, mut factors: Vec<Factor>) -> Factor {
        assert!(!factors.is_empty(), "combine_all requires at least one factor");
        if factors.len() == 1 {
            return factors.pop().expect("checked non-empty above");
        }

        if self.config.parallel_schedule && factors.len() >= 4 {
            let mid = factors.len() / 2;
            let rhs = factors.split_off(mid);
            let groups: Vec<(Schedule, Vec<Factor>)> = [factors, rhs]
                .into_iter()
                .map(|group| {
                    let mut schedule = Schedule::new();
                    let mut slot = schedule.source(group[0].scope().to_vec());
                    for f in &group[1..] {
                        let next = schedule.source(f.scope().to_vec());
                        slot = schedule.combine(slot, next);
                    }
                    let _ = slot;
                    (schedule, group)
                })
                .collect();
            return Schedule::execute_parallel(&groups, self.config.max_threads);
        }

        let mut iter = factors.into_iter();
        let mut acc = iter.next().expect("checked non-empty above");
        for f in iter {
            acc = acc.combine(&f);
        }
        acc
    }

    /// Returns the posterior marginal over `vars`, normalized to sum to one.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotSubsetOfClique`] if no single clique carries all
    /// of `vars`, and [`Error::ZeroEvidenceMass`] if the current evidence has
    /// probability zero under the model.
    pub fn posterior(&mut self, vars: &[NodeId]) -> Result<Factor> {
        self.propagate()?;

        let i = self
            .tree
            .clique_containing(vars)
            .ok_or_else(|| Error::NotSubsetOfClique(vars.to_vec()))?;

        let working = self.working_potentials();
        let belief = self.belief(&working, i);
        let remove: Vec<NodeId> = belief.scope().iter().copied().filter(|x| !vars.contains(x)).collect();
        let marginal = belief.project(&remove);

        marginal.normalize().map_err(|_| Error::ZeroEvidenceMass)
    }

    /// Returns `P(evidence)`, the normalizing constant every clique's belief
    /// agrees on once propagation is consistent — `0.0` iff the evidence
    /// contradicts the model (`spec.md` §4.G). Unlike [`Engine::posterior`],
    /// this never errors on zero mass: the two operations are required to
    /// diverge here, since a zero return *is* the answer to "how likely is
    /// this evidence", not a failure to compute one.
    ///
    /// For a disconnected junction forest, independent components'
    /// evidence masses multiply, since their joint distribution factors.
    pub fn evidence_probability(&mut self) -> Result<f64> {
        self.propagate()?;
        let working = self.working_potentials();
        let mass = self
            .tree
            .roots()
            .iter()
            .map(|&root| self.belief(&working, root).total_mass())
            .product();
        Ok(mass)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::triangulation::Clique;

    fn id(i: u32) -> NodeId {
        NodeId(i)
    }

    fn chain_tree() -> JunctionTree {
        // Two overlapping cliques {A, B} - {B, C} for the chain A -> B -> C.
        JunctionTree::from_parts(
            vec![
                Clique { vars: [id(0), id(1)].into_iter().collect() },
                Clique { vars: [id(1), id(2)].into_iter().collect() },
            ],
            vec![[1].into_iter().collect(), [0].into_iter().collect()],
            0,
        )
    }

    #[test]
    fn chain_hard_evidence_matches_hand_computed_posterior() {
        // P(A) = [0.6, 0.4], P(B|A) = [[0.7,0.3],[0.2,0.8]], P(C|B) = [[0.9,0.1],[0.5,0.5]]
        let phi_ab = Factor::new(vec![id(0), id(1)], vec![2, 2], vec![0.42, 0.18, 0.08, 0.32]).unwrap();
        let phi_bc = Factor::new(vec![id(1), id(2)], vec![2, 2], vec![0.9, 0.1, 0.5, 0.5]).unwrap();

        let mut domain = FxMap::default();
        domain.insert(id(0), 2);
        domain.insert(id(1), 2);
        domain.insert(id(2), 2);

        let mut engine = Engine::new(chain_tree(), vec![phi_ab, phi_bc], domain, EngineConfig::default());
        engine.observe_hard(id(0), 0).unwrap();

        let post_b = engine.posterior(&[id(1)]).unwrap();
        // P(B | A=0) should match P(B|A=0) exactly since A has no other parents.
        assert!((post_b.values()[[0]] - 0.7).abs() < 1e-9);
        assert!((post_b.values()[[1]] - 0.3).abs() < 1e-9);
    }

    #[test]
    fn repeated_propagate_is_idempotent() {
        let phi_ab = Factor::new(vec![id(0), id(1)], vec![2, 2], vec![0.25, 0.25, 0.25, 0.25]).unwrap();
        let phi_bc = Factor::new(vec![id(1), id(2)], vec![2, 2], vec![0.25, 0.25, 0.25, 0.25]).unwrap();
        let mut domain = FxMap::default();
        domain.insert(id(0), 2);
        domain.insert(id(1), 2);
        domain.insert(id(2), 2);

        let mut engine = Engine::new(chain_tree(), vec![phi_ab, phi_bc], domain, EngineConfig::default());
        let first = engine.posterior(&[id(2)]).unwrap();
        let second = engine.posterior(&[id(2)]).unwrap();
        for (a, b) in first.values().iter().zip(second.values().iter()) {
            assert!((a - b).abs() < 1e-12);
        }
    }

    #[test]
    fn zero_mass_evidence_is_reported() {
        let phi_ab = Factor::new(vec![id(0), id(1)], vec![2, 2], vec![0.5, 0.0, 0.5, 0.0]).unwrap();
        let phi_bc = Factor::new(vec![id(1), id(2)], vec![2, 2], vec![1.0, 0.0, 1.0, 0.0]).unwrap();
        let mut domain = FxMap::default();
        domain.insert(id(0), 2);
        domain.insert(id(1), 2);
        domain.insert(id(2), 2);

        let mut engine = Engine::new(chain_tree(), vec![phi_ab, phi_bc], domain, EngineConfig::default());
        // B's second label has zero mass under the model already: asking
        // for it as hard evidence zeroes out everything.
        engine.observe_hard(id(1), 1).unwrap();
        assert_eq!(engine.posterior(&[id(0)]).unwrap_err(), Error::ZeroEvidenceMass);
    }

    #[test]
    fn evidence_probability_is_zero_not_an_error_on_contradiction() {
        let phi_ab = Factor::new(vec![id(0), id(1)], vec![2, 2], vec![0.5, 0.0, 0.5, 0.0]).unwrap();
        let phi_bc = Factor::new(vec![id(1), id(2)], vec![2, 2], vec![1.0, 0.0, 1.0, 0.0]).unwrap();
        let mut domain = FxMap::default();
        domain.insert(id(0), 2);
        domain.insert(id(1), 2);
        domain.insert(id(2), 2);

        let mut engine = Engine::new(chain_tree(), vec![phi_ab, phi_bc], domain, EngineConfig::default());
        engine.observe_hard(id(1), 1).unwrap();
        assert_eq!(engine.posterior(&[id(0)]).unwrap_err(), Error::ZeroEvidenceMass);
        assert_eq!(engine.evidence_probability().unwrap(), 0.0);
    }

    #[test]
    fn erase_evidence_reverts_to_prior() {
        let phi_ab = Factor::new(vec![id(0), id(1)], vec![2, 2], vec![0.42, 0.18, 0.08, 0.32]).unwrap();
        let phi_bc = Factor::new(vec![id(1), id(2)], vec![2, 2], vec![0.9, 0.1, 0.5, 0.5]).unwrap();
        let mut domain = FxMap::default();
        domain.insert(id(0), 2);
        domain.insert(id(1), 2);
        domain.insert(id(2), 2);

        let mut engine = Engine::new(chain_tree(), vec![phi_ab, phi_bc], domain, EngineConfig::default());
        let prior = engine.posterior(&[id(1)]).unwrap();

        engine.observe_hard(id(0), 0).unwrap();
        assert_eq!(engine.state(), EngineState::Stale);
        engine.posterior(&[id(1)]).unwrap();
        assert_eq!(engine.state(), EngineState::Propagated);

        engine.erase_evidence(id(0)).unwrap();
        assert_eq!(engine.state(), EngineState::Stale);
        let restored = engine.posterior(&[id(1)]).unwrap();
        for (a, b) in prior.values().iter().zip(restored.values().iter()) {
            assert!((a - b).abs() < 1e-12);
        }
    }

    #[test]
    fn propagate_with_progress_reports_cancelled_when_callback_returns_false() {
        let phi_ab = Factor::new(vec![id(0), id(1)], vec![2, 2], vec![0.25, 0.25, 0.25, 0.25]).unwrap();
        let phi_bc = Factor::new(vec![id(1), id(2)], vec![2, 2], vec![0.25, 0.25, 0.25, 0.25]).unwrap();
        let mut domain = FxMap::default();
        domain.insert(id(0), 2);
        domain.insert(id(1), 2);
        domain.insert(id(2), 2);

        let mut engine = Engine::new(chain_tree(), vec![phi_ab, phi_bc], domain, EngineConfig::default());
        let result = engine.propagate_with_progress(|_, _, _| false);
        assert_eq!(result.unwrap_err(), Error::Cancelled("inference propagation (collect)".into()));
    }
}
