/// Default acceptance ratio for quasi-simplicial node selection during triangulation.
pub const QUASI_RATIO: f64 = 0.9;
/// Default log-weight excess tolerated when selecting an almost- or quasi-simplicial node.
pub const WEIGHT_THRESHOLD: f64 = 0.0;
/// Tolerance used when comparing floating-point probabilities.
pub const EPSILON: f64 = 1e-9;
