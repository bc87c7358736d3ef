//! Pipeline execution
//!
//! The [`Orchestrator`] takes a validated [`Pipeline`](crate::planner::Pipeline),
//! scans its source collection and threads the documents through the stage
//! chain.
//!
//! # Stage modes
//!
//! - Streaming (`$match`, `$project`, `$addFields`, `$unset`, `$unwind`,
//!   `$lookup`, `$graphLookup`, `$skip`, `$limit`) process one batch at a
//!   time.
//! - Blocking (`$group`, `$sort`, `$setWindowFields`, `$bucket`, `$facet`,
//!   `$count`, `$densify`, `$fill`, `$unionWith`) consume their whole input
//!   before emitting anything.
//!
//! # Guarantees
//!
//! - Same pipeline and same data give the same ordered result
//! - Any fatal error aborts the query; there is no partial result
//! - Facet branches and per-document lookups run on a bounded worker pool
//!   and share no mutable state

mod accumulator;
mod bucket;
mod context;
mod densify;
mod errors;
mod executor;
mod facet;
mod fill;
mod filters;
mod graph_lookup;
mod group;
mod lookup;
mod project;
mod result;
mod sorter;
mod window;

pub use context::ExecutionContext;
pub use errors::{ExecutorError, ExecutorErrorCode, ExecutorResult, Severity};
pub use executor::Orchestrator;
pub use filters::PredicateFilter;
pub use result::QueryOutput;
pub use sorter::ResultSorter;
