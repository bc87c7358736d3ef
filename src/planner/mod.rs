//! Pipeline planner
//!
//! Parses a JSON pipeline into typed stage specifications and rejects
//! anything malformed before a single document is read.
//!
//! # Validation Rules
//!
//! - Each stage is a single-key object naming a known stage
//! - Expressions parse with correct operator arity
//! - Bucket boundaries are strictly increasing
//! - `$graphLookup` has a bounded `maxDepth`
//! - `$facet` does not nest

mod ast;
mod errors;
mod explain;
mod planner;

pub use ast::{
    AccumulatorOp, AccumulatorSpec, Boundaries, BucketSpec, DensifyBounds, DensifySpec,
    FacetSpec, FillMethod, FillSpec, FilterOp, FrameBound, GraphLookupSpec, GroupSpec,
    LookupSpec, MatchExpr, Pipeline, ProjectField, ProjectMode, ProjectSpec, SortDirection,
    SortKey, SortSpec, Stage, StageMode, UnionWithSpec, UnwindSpec, WindowFrame, WindowFunction,
    WindowOutput, WindowSpec,
};
pub use errors::{PlannerError, PlannerErrorCode, PlannerResult};
pub use explain::{ExplainPlan, ExplainStage};
pub use planner::{QueryPlanner, DEFAULT_MAX_GRAPH_DEPTH};
