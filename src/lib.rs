//! Exact inference over discrete Bayesian networks.
//!
//! A [`model::BayesianNetwork`] owns a set of [`Variable`]s, a [`graph::Dag`]
//! over them, and a conditional probability table per variable. Querying a
//! posterior triangulates the network's moral graph into a
//! [`triangulation::JunctionTree`] and answers the query by Shafer-Shenoy
//! message passing through an [`inference::Engine`].

pub mod config;
pub mod factor;
pub mod graph;
pub mod inference;
pub mod instantiation;
pub mod model;
pub mod schedule;
pub mod triangulation;
pub mod types;
mod variable;

pub use config::Config;
pub use factor::Factor;
pub use instantiation::Instantiation;
pub use model::BayesianNetwork;
pub use types::{Error, Result};
pub use variable::{NodeId, NodeIdCounter, Variable};
