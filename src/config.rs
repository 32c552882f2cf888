use serde::{Deserialize, Serialize};

use crate::triangulation::TriangulationConfig;

/// Tuning knobs for the junction-tree inference engine (`spec.md` §6).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Whether message computation may use `rayon` across independent
    /// schedule branches.
    pub parallel_schedule: bool,
    /// Upper bound on the number of threads `rayon` may use for this
    /// engine; `0` defers to the global `rayon` thread pool size.
    pub max_threads: usize,
    /// How many elimination/message steps run between cancellation checks;
    /// `1` checks after every step.
    pub cancellation_check_granularity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            parallel_schedule: false,
            max_threads: 0,
            cancellation_check_granularity: 1,
        }
    }
}

/// Top-level configuration for a [`crate::model::BayesianNetwork`]
/// (`spec.md` §6): every enumerated option lives under either
/// `triangulation` or `engine`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    pub triangulation: TriangulationConfig,
    pub engine: EngineConfig,
}
