use crate::{types::FxMap, NodeId};

/// A mutable cursor over the Cartesian product of a variable sequence.
///
/// An `Instantiation` is bound to an ordered sequence of variables `S` (see
/// `spec.md` §4.B) and tracks one value index per variable plus the linear
/// offset that index maps to in a row-major, last-axis-fastest dense
/// layout — the same layout [`crate::factor::Factor`] uses for its storage,
/// so a cursor's `offset()` is always a valid index into a `Factor` over the
/// same scope.
///
/// Incrementing the last axis on every step and carrying leftward on
/// overflow keeps `offset()` up to date in amortized O(1): like a mixed-radix
/// counter, a given axis only carries once every `domain(axis)` steps.
#[derive(Clone, Debug)]
pub struct Instantiation {
    scope: Vec<NodeId>,
    domain: Vec<usize>,
    strides: Vec<usize>,
    values: Vec<usize>,
    offset: usize,
    done: bool,
}

impl Instantiation {
    /// Creates a cursor over `scope`, with `domain[i]` the domain size of
    /// `scope[i]`, positioned at the first instantiation (all indices zero).
    ///
    /// # Panics
    ///
    /// Panics if `scope` and `domain` have different lengths, or if any
    /// domain size is zero.
    pub fn new(scope: Vec<NodeId>, domain: Vec<usize>) -> Self {
        assert_eq!(
            scope.len(),
            domain.len(),
            "scope and domain must have the same length"
        );
        assert!(domain.iter().all(|&d| d > 0), "domain sizes must be positive");

        let n = scope.len();
        let mut strides = vec![1usize; n];
        for i in (0..n.saturating_sub(1)).rev() {
            strides[i] = strides[i + 1] * domain[i + 1];
        }

        Self {
            scope,
            domain,
            strides,
            values: vec![0; n],
            offset: 0,
            done: n == 0,
        }
    }

    /// Returns the variable sequence this cursor is bound to.
    #[inline]
    pub fn scope(&self) -> &[NodeId] {
        &self.scope
    }

    /// Returns the total number of instantiations of the bound scope.
    #[inline]
    pub fn size(&self) -> usize {
        self.domain.iter().product()
    }

    /// Resets the cursor to the first instantiation.
    pub fn set_first(&mut self) {
        self.values.iter_mut().for_each(|v| *v = 0);
        self.offset = 0;
        self.done = self.scope.is_empty();
    }

    /// Returns `true` once the cursor has advanced past the last instantiation.
    #[inline]
    pub const fn is_done(&self) -> bool {
        self.done
    }

    /// Returns the current linear offset into a row-major dense layout over `scope()`.
    #[inline]
    pub const fn offset(&self) -> usize {
        self.offset
    }

    /// Returns the current value index of `x`, or `None` if `x` is not in scope.
    pub fn get(&self, x: NodeId) -> Option<usize> {
        self.position(x).map(|i| self.values[i])
    }

    /// Changes the value index of a single axis.
    ///
    /// # Panics
    ///
    /// Panics if `x` is not in scope or `k` is out of bounds for its domain.
    pub fn chg_val(&mut self, x: NodeId, k: usize) {
        let i = self
            .position(x)
            .unwrap_or_else(|| panic!("variable {x} is not in this instantiation's scope"));
        assert!(k < self.domain[i], "label index {k} out of bounds for variable {x}");

        self.offset += self.strides[i] * k;
        self.offset -= self.strides[i] * self.values[i];
        self.values[i] = k;
        self.done = false;
    }

    /// Sets each axis from a `NodeId -> value` mapping; axes absent from the
    /// map are set to zero.
    pub fn set_from_map(&mut self, map: &FxMap<NodeId, usize>) {
        self.set_first();
        for (i, &x) in self.scope.clone().iter().enumerate() {
            if let Some(&k) = map.get(&x) {
                assert!(k < self.domain[i], "label index {k} out of bounds for variable {x}");
                self.offset += self.strides[i] * k;
                self.values[i] = k;
            }
        }
    }

    /// Advances to the next instantiation in row-major order (last axis
    /// fastest). Returns `false` once the cursor has wrapped past the end,
    /// at which point it is in the "end" state (`is_done()` returns `true`).
    pub fn inc(&mut self) -> bool {
        if self.done {
            return false;
        }

        for i in (0..self.scope.len()).rev() {
            if self.values[i] + 1 < self.domain[i] {
                self.values[i] += 1;
                self.offset += self.strides[i];
                return true;
            }
            // Carry: reset this axis and subtract its contribution back out.
            self.offset -= self.strides[i] * self.values[i];
            self.values[i] = 0;
        }

        self.done = true;
        false
    }

    fn position(&self, x: NodeId) -> Option<usize> {
        self.scope.iter().position(|&y| y == x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(n: u32) -> Vec<NodeId> {
        (0..n).map(NodeId).collect()
    }

    #[test]
    fn enumerates_row_major_last_axis_fastest() {
        let scope = ids(2);
        let mut it = Instantiation::new(scope.clone(), vec![2, 3]);
        let mut offsets = vec![it.offset()];
        while it.inc() {
            offsets.push(it.offset());
        }
        assert_eq!(offsets, vec![0, 1, 2, 3, 4, 5]);
        assert!(it.is_done());
    }

    #[test]
    fn terminates_after_exactly_product_of_domains() {
        let scope = ids(3);
        let mut it = Instantiation::new(scope, vec![2, 2, 2]);
        let mut count = 1; // set_first already counts as the first instantiation
        while it.inc() {
            count += 1;
        }
        assert_eq!(count, 8);
    }

    #[test]
    fn chg_val_updates_offset_consistently() {
        let scope = ids(2);
        let mut it = Instantiation::new(scope.clone(), vec![2, 3]);
        it.chg_val(scope[1], 2);
        assert_eq!(it.get(scope[1]), Some(2));
        assert_eq!(it.offset(), 2);
        it.chg_val(scope[0], 1);
        assert_eq!(it.offset(), 5);
    }

    #[test]
    fn set_from_map_defaults_missing_to_zero() {
        let scope = ids(2);
        let mut it = Instantiation::new(scope.clone(), vec![2, 3]);
        let mut map = FxMap::default();
        map.insert(scope[1], 2);
        it.set_from_map(&map);
        assert_eq!(it.get(scope[0]), Some(0));
        assert_eq!(it.get(scope[1]), Some(2));
        assert_eq!(it.offset(), 2);
    }
}
