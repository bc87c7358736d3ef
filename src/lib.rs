//! stratus - a deterministic multi-stage analytical query engine for
//! weather observations
//!
//! Pipelines are JSON arrays of stages (`$match`, `$group`,
//! `$setWindowFields`, `$bucket`, `$lookup`, `$graphLookup`, `$facet`, ...)
//! validated by the [`planner`] and run by the [`executor`] against any
//! [`store::DocumentStore`].

pub mod cli;
pub mod config;
pub mod executor;
pub mod expr;
pub mod observability;
pub mod planner;
pub mod stats;
pub mod store;
pub mod value;
