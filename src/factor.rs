use std::ops::Mul;

use itertools::Itertools;
use ndarray::prelude::*;
use serde::{Deserialize, Serialize};

use crate::{
    types::{Error, Result},
    NodeId,
};

/// A dense table of nonnegative reals over an ordered sequence of discrete
/// variables (`spec.md` §3, component C).
///
/// `values()` is stored in row-major, last-axis-fastest order under
/// `scope()` — the same layout [`crate::instantiation::Instantiation`]
/// walks, so `values().as_slice()[instantiation.offset()]` is always the
/// entry that instantiation denotes.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Factor {
    scope: Vec<NodeId>,
    domain: Vec<usize>,
    values: ArrayD<f64>,
}

impl Factor {
    /// Builds a factor over `scope` (with `domain[i]` the domain size of
    /// `scope[i]`) from a flat, row-major value vector.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ShapeMismatch`] if `values.len()` does not equal the
    /// product of `domain`, and [`Error::NumericOverflow`] if any entry is
    /// negative or non-finite.
    pub fn new(scope: Vec<NodeId>, domain: Vec<usize>, values: Vec<f64>) -> Result<Self> {
        assert_eq!(scope.len(), domain.len(), "scope and domain must align");

        let expected: usize = domain.iter().product();
        if values.len() != expected {
            return Err(Error::ShapeMismatch(format!(
                "expected {expected} values for domain {domain:?}, found {}",
                values.len()
            )));
        }
        if let Some(bad) = values.iter().find(|v| !v.is_finite() || **v < 0.0) {
            return Err(Error::NumericOverflow(format!(
                "factor entry {bad} is negative or non-finite"
            )));
        }

        let values = Array::from_shape_vec(IxDyn(&domain), values)
            .map_err(|e| Error::ShapeMismatch(e.to_string()))?;

        Ok(Self {
            scope,
            domain,
            values,
        })
    }

    /// Builds a factor directly from an [`ArrayD`], inferring `domain` from its shape.
    pub fn from_array(scope: Vec<NodeId>, values: ArrayD<f64>) -> Result<Self> {
        let domain = values.shape().to_vec();
        assert_eq!(scope.len(), domain.len(), "scope and array rank must align");
        if let Some(bad) = values.iter().find(|v| !v.is_finite() || **v < 0.0) {
            return Err(Error::NumericOverflow(format!(
                "factor entry {bad} is negative or non-finite"
            )));
        }
        Ok(Self {
            scope,
            domain,
            values,
        })
    }

    /// Returns the ordered variable sequence this factor is indexed by.
    #[inline]
    pub fn scope(&self) -> &[NodeId] {
        &self.scope
    }

    /// Returns the domain size of each axis, aligned with `scope()`.
    #[inline]
    pub fn domain(&self) -> &[usize] {
        &self.domain
    }

    /// Returns the total number of entries, i.e. the product of the domain sizes.
    #[inline]
    pub fn dom_size(&self) -> usize {
        self.domain.iter().product()
    }

    /// Returns a reference to the underlying dense values.
    #[inline]
    pub fn values(&self) -> &ArrayD<f64> {
        &self.values
    }

    /// Returns `true` if `x` is one of this factor's variables.
    #[inline]
    pub fn in_scope(&self, x: NodeId) -> bool {
        self.scope.contains(&x)
    }

    fn position(&self, x: NodeId) -> Option<usize> {
        self.scope.iter().position(|&y| y == x)
    }

    /// Pointwise product of `self` and `rhs` over `vars(self) ∪ vars(rhs)`
    /// (`spec.md` §4.C "combine"). The output scope is the ordered union:
    /// `self`'s variables first, then the variables of `rhs` not already in
    /// `self`, each keeping their original relative order.
    ///
    /// Axes absent from one operand are broadcast, matching the teacher's
    /// `CategoricalFactor` product: each operand is reshaped to the union
    /// shape with a size-one axis standing in for every variable it doesn't
    /// carry, and ndarray's broadcasting multiplication does the rest.
    pub fn combine(&self, rhs: &Self) -> Self {
        let mut scope = self.scope.clone();
        let mut domain = self.domain.clone();
        for (i, &x) in rhs.scope.iter().enumerate() {
            if !scope.contains(&x) {
                scope.push(x);
                domain.push(rhs.domain[i]);
            }
        }

        let lhs_shape: Vec<usize> = scope
            .iter()
            .map(|x| self.position(*x).map_or(1, |i| self.domain[i]))
            .collect();
        let rhs_shape: Vec<usize> = scope
            .iter()
            .map(|x| rhs.position(*x).map_or(1, |i| rhs.domain[i]))
            .collect();

        let lhs = self
            .values
            .clone()
            .into_shape(lhs_shape)
            .expect("lhs reshape for combine must preserve element count");
        let rhs_values = rhs
            .values
            .clone()
            .into_shape(rhs_shape)
            .expect("rhs reshape for combine must preserve element count");

        let values = (&lhs * &rhs_values).into_dyn();

        Self {
            scope,
            domain,
            values,
        }
    }

    /// Marginalizes `self` by summing out the variables in `remove`
    /// (`spec.md` §4.C "project"). The output scope is `vars(self) \ remove`,
    /// preserving order.
    pub fn project<'a, I>(&self, remove: I) -> Self
    where
        I: IntoIterator<Item = &'a NodeId>,
    {
        let mut indices: Vec<usize> = remove
            .into_iter()
            .filter_map(|x| self.position(*x))
            .collect();
        // Sum axes in decreasing index order so earlier removals don't shift
        // the index of axes still to be removed.
        indices.sort_unstable();
        indices.dedup();

        let mut values = self.values.clone();
        let mut scope = self.scope.clone();
        let mut domain = self.domain.clone();

        for &i in indices.iter().sorted().rev() {
            values = values.sum_axis(Axis(i));
            scope.remove(i);
            domain.remove(i);
        }

        Self {
            scope,
            domain,
            values,
        }
    }

    /// Divides `self' by a sum of its own entries so that it sums to one.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ZeroMass`] if every entry is zero.
    pub fn normalize(mut self) -> Result<Self> {
        let total = self.values.sum();
        if total == 0.0 {
            return Err(Error::ZeroMass);
        }
        self.values /= total;
        Ok(self)
    }

    /// Returns the sum of all entries, without normalizing.
    #[inline]
    pub fn total_mass(&self) -> f64 {
        self.values.sum()
    }

    /// Incorporates hard evidence `x = k`: zeroes every entry where the
    /// value index of `x` differs from `k`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ShapeMismatch`] if `x` is not in this factor's scope,
    /// or [`Error::InvalidEvidenceVector`] if `k` is out of bounds.
    pub fn incorporate_hard_evidence(mut self, x: NodeId, k: usize) -> Result<Self> {
        let i = self
            .position(x)
            .ok_or_else(|| Error::ShapeMismatch(format!("variable {x} is not in scope")))?;
        if k >= self.domain[i] {
            return Err(Error::InvalidEvidenceVector(
                x.to_string(),
                format!("label index {k} out of bounds for domain size {}", self.domain[i]),
            ));
        }

        for (j, mut lane) in self.values.axis_iter_mut(Axis(i)).enumerate() {
            if j != k {
                lane.fill(0.0);
            }
        }

        Ok(self)
    }

    /// Incorporates soft evidence: multiplies every lane of axis `x` by the
    /// corresponding entry of `e`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ShapeMismatch`] if `x` is not in this factor's
    /// scope, or [`Error::InvalidEvidenceVector`] if `e` has the wrong
    /// length or contains a negative or non-finite entry.
    pub fn incorporate_soft_evidence(mut self, x: NodeId, e: &[f64]) -> Result<Self> {
        let i = self
            .position(x)
            .ok_or_else(|| Error::ShapeMismatch(format!("variable {x} is not in scope")))?;
        if e.len() != self.domain[i] {
            return Err(Error::InvalidEvidenceVector(
                x.to_string(),
                format!("expected length {}, found {}", self.domain[i], e.len()),
            ));
        }
        if let Some(bad) = e.iter().find(|v| !v.is_finite() || **v < 0.0) {
            return Err(Error::InvalidEvidenceVector(
                x.to_string(),
                format!("entry {bad} is negative or non-finite"),
            ));
        }

        for (j, mut lane) in self.values.axis_iter_mut(Axis(i)).enumerate() {
            lane.mapv_inplace(|v| v * e[j]);
        }

        Ok(self)
    }

    /// Returns a uniform (constant-one) factor over `scope`.
    pub fn ones(scope: Vec<NodeId>, domain: Vec<usize>) -> Self {
        let values = ArrayD::ones(IxDyn(&domain));
        Self {
            scope,
            domain,
            values,
        }
    }
}

impl Mul for &Factor {
    type Output = Factor;

    #[inline]
    fn mul(self, rhs: Self) -> Self::Output {
        self.combine(rhs)
    }
}

impl Mul for Factor {
    type Output = Factor;

    #[inline]
    fn mul(self, rhs: Self) -> Self::Output {
        self.combine(&rhs)
    }
}
