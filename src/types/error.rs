use thiserror::Error;

use crate::NodeId;

/// The error type for this crate.
///
/// Variants are grouped the way `spec.md` §7 groups them: input errors
/// (caller-visible, recoverable), model errors, runtime errors, and
/// programming errors. Programming-error variants still flow through
/// `Result` at the API boundary, but are never expected to be raised by
/// correct callers — they indicate an invariant of the library itself
/// was violated.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// A variable name was not found in the model.
    #[error("Unknown variable `{0}`")]
    UnknownVariable(String),
    /// A variable name was registered more than once.
    #[error("Variable `{0}` is already registered")]
    DuplicateVariable(String),
    /// A new variable name collides with an already-registered one.
    #[error("Variable name `{0}` is already in use")]
    DuplicateName(String),
    /// A label index or name does not belong to a variable's domain.
    #[error("Invalid label `{0}` for variable `{1}`")]
    InvalidLabel(String, String),
    /// An evidence vector has the wrong length, a negative entry, or a non-finite entry.
    #[error("Invalid evidence vector for variable `{0}`: {1}")]
    InvalidEvidenceVector(String, String),
    /// Evidence was set for a variable the engine does not know about.
    #[error("Evidence set on unknown variable `{0}`")]
    EvidenceOnUnknownVariable(String),
    /// A joint query is not contained in any clique of the junction tree.
    #[error("Queried variables {0:?} are not a subset of any clique")]
    NotSubsetOfClique(Vec<NodeId>),
    /// A conditional table's shape does not match its declared scope.
    #[error("CPT shape mismatch for variable `{0}`: {1}")]
    CPTShapeMismatch(String, String),
    /// A conditional table does not sum to one along its conditioned axis.
    #[error("CPT for variable `{0}` is not normalized (strict ingestion)")]
    CPTNotNormalized(String),
    /// A directed graph intended to be a DAG contains a cycle.
    #[error("Graph must be acyclic, found a cycle through node {0}")]
    CycleDetected(NodeId),
    /// Evidence contradicts the model: `P(e) == 0`.
    #[error("Evidence has zero probability; posteriors are undefined")]
    ZeroEvidenceMass,
    /// A factor entry became non-finite during a numeric operation.
    #[error("Numeric overflow while computing `{0}`")]
    NumericOverflow(String),
    /// A long-running operation was cancelled through its progress callback.
    #[error("Operation cancelled during phase `{0}`")]
    Cancelled(String),
    /// A `Factor`/`Instantiation` pair reference incompatible variable sequences.
    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),
    /// A variable was referenced that was never registered in the host model.
    #[error("Variable {0:?} is not registered in this model")]
    UnregisteredVariable(NodeId),
    /// A `normalize` was attempted on a factor whose values sum to zero.
    #[error("Cannot normalize a factor whose values sum to zero")]
    ZeroMass,
    /// An internal invariant of the library was violated; indicates a bug.
    #[error("Invariant violated: {0}")]
    InvariantViolated(String),
}

/// A specialized [`Result`] type for this crate.
pub type Result<T> = std::result::Result<T, Error>;
