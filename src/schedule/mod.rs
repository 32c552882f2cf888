use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::{factor::Factor, types::FxMap, NodeId};

/// A single step of a [`Schedule`]: every step consumes zero or more earlier
/// slots and produces exactly one new slot, identified by its position in
/// the owning schedule's step list.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Op {
    /// Materializes input factor `index` as a new slot.
    Source(usize),
    /// Combines two earlier slots (`spec.md` §4.C "combine").
    Combine(usize, usize),
    /// Projects an earlier slot onto `vars(slot) \ remove` (`spec.md` §4.C "project").
    Project(usize, Vec<NodeId>),
}

/// A symbolic plan of [`Factor`] combinations and projections (`spec.md`
/// §4.F, component F), built ahead of execution so its cost can be
/// estimated before any dense array is materialized.
///
/// Grounded in the teacher's `Cache` (`types/cache.rs`): a schedule is, in
/// effect, a memoized plan over a fixed set of operations — here the
/// memoization is static (every slot is computed at most once by
/// construction) rather than keyed at call time.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Schedule {
    steps: Vec<Op>,
    /// The ordered scope each step's output carries, cached at push-time so
    /// cost estimation never needs the live factors.
    scopes: Vec<Vec<NodeId>>,
}

impl Schedule {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a source step bound to `input[index]` when executed; returns
    /// the new slot.
    pub fn source(&mut self, scope: Vec<NodeId>) -> usize {
        self.push(Op::Source(self.steps.iter().filter(|s| matches!(s, Op::Source(_))).count()), scope)
    }

    /// Appends a combine step over slots `a` and `b`; returns the new slot.
    pub fn combine(&mut self, a: usize, b: usize) -> usize {
        let mut scope = self.scopes[a].clone();
        for &x in &self.scopes[b] {
            if !scope.contains(&x) {
                scope.push(x);
            }
        }
        self.push(Op::Combine(a, b), scope)
    }

    /// Appends a project step over slot `a`, summing out `remove`; returns the new slot.
    pub fn project(&mut self, a: usize, remove: Vec<NodeId>) -> usize {
        let scope: Vec<NodeId> = self.scopes[a].iter().copied().filter(|x| !remove.contains(x)).collect();
        self.push(Op::Project(a, remove), scope)
    }

    fn push(&mut self, op: Op, scope: Vec<NodeId>) -> usize {
        self.steps.push(op);
        self.scopes.push(scope);
        self.steps.len() - 1
    }

    /// Returns the number of steps in this schedule.
    #[inline]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Returns the output scope of slot `i`, without executing anything.
    pub fn scope_of(&self, i: usize) -> &[NodeId] {
        &self.scopes[i]
    }

    /// Estimates the number of multiplication/summation operations this
    /// schedule would perform, given each variable's domain size — the
    /// dominant cost of a combine is the size of its output table, and of a
    /// project the size of its input table.
    pub fn cost(&self, domain: &FxMap<NodeId, usize>) -> usize {
        self.steps
            .iter()
            .enumerate()
            .map(|(i, op)| {
                let table_size = |scope: &[NodeId]| -> usize { scope.iter().map(|x| domain[x]).product() };
                match op {
                    Op::Source(_) => 0,
                    Op::Combine(_, _) => table_size(&self.scopes[i]),
                    Op::Project(a, _) => table_size(&self.scopes[*a]),
                }
            })
            .sum()
    }

    /// Estimates this schedule's memory footprint as a `(peak, total)` pair
    /// (`spec.md` §4.F): `total` is the sum of every slot's table size as it
    /// is allocated, and `peak` is the maximum, over the simulated
    /// execution, of the combined size of every slot still live at that
    /// point — each slot is assumed dropped as soon as nothing downstream
    /// can still reference it, exactly as [`Schedule::execute`] does.
    pub fn memory_usage(&self, domain: &FxMap<NodeId, usize>) -> (usize, usize) {
        let n = self.steps.len();
        let table_size = |scope: &[NodeId]| -> usize { scope.iter().map(|x| domain[x]).product() };
        let sizes: Vec<usize> = self.scopes.iter().map(|scope| table_size(scope)).collect();

        let mut refcount = vec![0usize; n];
        for op in &self.steps {
            match op {
                Op::Source(_) => {}
                Op::Combine(a, b) => {
                    refcount[*a] += 1;
                    refcount[*b] += 1;
                }
                Op::Project(a, _) => refcount[*a] += 1,
            }
        }

        let mut live = 0usize;
        let mut peak = 0usize;
        let mut total = 0usize;
        let mut remaining = refcount.clone();
        for (i, op) in self.steps.iter().enumerate() {
            live += sizes[i];
            total += sizes[i];
            peak = peak.max(live);
            match op {
                Op::Source(_) => {}
                Op::Combine(a, b) => {
                    remaining[*a] -= 1;
                    remaining[*b] -= 1;
                    if remaining[*a] == 0 {
                        live -= sizes[*a];
                    }
                    if *b != *a && remaining[*b] == 0 {
                        live -= sizes[*b];
                    }
                }
                Op::Project(a, _) => {
                    remaining[*a] -= 1;
                    if remaining[*a] == 0 {
                        live -= sizes[*a];
                    }
                }
            }
        }
        (peak, total)
    }

    /// Executes this schedule over `inputs` (consumed in `Op::Source` order)
    /// and returns the final slot's factor.
    ///
    /// Intermediate slots are released (set to `None`) the moment their
    /// last consumer has run, bounding peak memory to `memory_usage()`
    /// rather than the sum of every slot ever produced.
    pub fn execute(&self, inputs: Vec<Factor>) -> Factor {
        let n = self.steps.len();
        let mut refcount = vec![0usize; n];
        for op in &self.steps {
            match op {
                Op::Source(_) => {}
                Op::Combine(a, b) => {
                    refcount[*a] += 1;
                    refcount[*b] += 1;
                }
                Op::Project(a, _) => refcount[*a] += 1,
            }
        }

        let mut inputs = inputs.into_iter();
        let mut slots: Vec<Option<Factor>> = vec![None; n];
        for (i, op) in self.steps.iter().enumerate() {
            let value = match op {
                Op::Source(_) => inputs.next().expect("schedule references more sources than were supplied"),
                Op::Combine(a, b) => {
                    let lhs = slots[*a].as_ref().expect("combine operand already released");
                    let rhs = slots[*b].as_ref().expect("combine operand already released");
                    let out = lhs.combine(rhs);
                    Self::release(&mut slots, &mut refcount, *a);
                    if *a != *b {
                        Self::release(&mut slots, &mut refcount, *b);
                    }
                    out
                }
                Op::Project(a, remove) => {
                    let out = slots[*a].as_ref().expect("project operand already released").project(remove);
                    Self::release(&mut slots, &mut refcount, *a);
                    out
                }
            };
            slots[i] = Some(value);
        }

        slots.pop().flatten().expect("a non-empty schedule always produces a final slot")
    }

    fn release(slots: &mut [Option<Factor>], refcount: &mut [usize], i: usize) {
        refcount[i] -= 1;
        if refcount[i] == 0 {
            slots[i] = None;
        }
    }

    /// Executes several independent schedules in parallel and combines their
    /// final factors, gated by the caller (the BayesNet-facade engine only
    /// calls this when `engine.parallel-schedule` is enabled).
    ///
    /// Each element of `groups` is a self-contained `(Schedule, inputs)`
    /// pair — e.g. one per junction-tree neighbor's incoming-message
    /// reduction — with no data dependency on any other group, matching
    /// `spec.md` §5: "independent nodes in the plan DAG may execute on a
    /// worker pool; dependent operations are serialized by data
    /// dependency." Every group runs to completion before the results are
    /// combined, so this call is itself a join point.
    ///
    /// `max_threads` bounds the worker pool size (`engine.max-threads`,
    /// §6); `0` means "let rayon pick", matching its own default.
    ///
    /// # Panics
    ///
    /// Panics if `groups` is empty.
    pub fn execute_parallel(groups: &[(Schedule, Vec<Factor>)], max_threads: usize) -> Factor {
        let run = || -> Vec<Factor> {
            groups
                .par_iter()
                .map(|(schedule, inputs)| schedule.execute(inputs.clone()))
                .collect()
        };

        let partial: Vec<Factor> = if max_threads > 0 {
            rayon::ThreadPoolBuilder::new()
                .num_threads(max_threads)
                .build()
                .expect("building a bounded rayon thread pool")
                .install(run)
        } else {
            run()
        };

        partial
            .into_iter()
            .reduce(|a, b| a.combine(&b))
            .expect("execute_parallel requires at least one group")
    }
}
