//! Pipeline structures
//!
//! A [`Pipeline`] is an ordered list of validated [`Stage`]s. Every stage
//! carries already-parsed expressions; nothing is re-parsed at execution.

use regex::Regex;

use crate::expr::{Expression, TimeUnit};
use crate::value::Value;

/// Whether a stage can emit output per input batch or must see all input first
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageMode {
    Streaming,
    Blocking,
}

impl StageMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageMode::Streaming => "streaming",
            StageMode::Blocking => "blocking",
        }
    }
}

/// Field predicate operators of `$match`
#[derive(Debug, Clone)]
pub enum FilterOp {
    Eq(Value),
    Ne(Value),
    Gt(Value),
    Gte(Value),
    Lt(Value),
    Lte(Value),
    In(Vec<Value>),
    Nin(Vec<Value>),
    Exists(bool),
    Regex(Regex),
    Size(usize),
    /// Negation of a group of operators on the same field
    Not(Vec<FilterOp>),
}

impl FilterOp {
    /// Returns the operation name for explain output
    pub fn op_name(&self) -> &'static str {
        match self {
            FilterOp::Eq(_) => "eq",
            FilterOp::Ne(_) => "ne",
            FilterOp::Gt(_) => "gt",
            FilterOp::Gte(_) => "gte",
            FilterOp::Lt(_) => "lt",
            FilterOp::Lte(_) => "lte",
            FilterOp::In(_) => "in",
            FilterOp::Nin(_) => "nin",
            FilterOp::Exists(_) => "exists",
            FilterOp::Regex(_) => "regex",
            FilterOp::Size(_) => "size",
            FilterOp::Not(_) => "not",
        }
    }
}

/// A `$match` filter tree
#[derive(Debug, Clone)]
pub enum MatchExpr {
    And(Vec<MatchExpr>),
    Or(Vec<MatchExpr>),
    Nor(Vec<MatchExpr>),
    /// All operators must hold for the field at `path`
    Field { path: String, ops: Vec<FilterOp> },
    /// `$expr`: an aggregation expression evaluated for truthiness
    Expr(Expression),
}

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SortKey {
    pub path: String,
    pub direction: SortDirection,
}

/// Multi-key sort specification, most significant key first
#[derive(Debug, Clone, PartialEq)]
pub struct SortSpec {
    pub keys: Vec<SortKey>,
}

/// One field of a `$project`
#[derive(Debug, Clone, PartialEq)]
pub enum ProjectField {
    Include,
    Exclude,
    Computed(Expression),
    Nested(Vec<(String, ProjectField)>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectMode {
    /// Only listed fields survive
    Inclusion,
    /// Listed fields are removed
    Exclusion,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProjectSpec {
    pub mode: ProjectMode,
    pub fields: Vec<(String, ProjectField)>,
    /// `_id` is kept unless explicitly excluded
    pub exclude_id: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UnwindSpec {
    pub path: String,
    pub include_array_index: Option<String>,
    pub preserve_null_and_empty: bool,
}

/// Accumulator operators shared by `$group` and `$bucket`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccumulatorOp {
    Sum,
    Count,
    Avg,
    Min,
    Max,
    StdDevPop,
    AddToSet,
    Push,
    First,
    Last,
}

impl AccumulatorOp {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "$sum" => Some(AccumulatorOp::Sum),
            "$count" => Some(AccumulatorOp::Count),
            "$avg" => Some(AccumulatorOp::Avg),
            "$min" => Some(AccumulatorOp::Min),
            "$max" => Some(AccumulatorOp::Max),
            "$stdDevPop" => Some(AccumulatorOp::StdDevPop),
            "$addToSet" => Some(AccumulatorOp::AddToSet),
            "$push" => Some(AccumulatorOp::Push),
            "$first" => Some(AccumulatorOp::First),
            "$last" => Some(AccumulatorOp::Last),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AccumulatorSpec {
    pub field: String,
    pub op: AccumulatorOp,
    pub input: Expression,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GroupSpec {
    /// Group key; an object expression yields a compound `_id`
    pub id: Expression,
    pub accumulators: Vec<AccumulatorSpec>,
}

/// One end of a window frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FrameBound {
    Unbounded,
    Current,
    Offset(f64),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WindowFrame {
    /// Position offsets within the sorted partition
    Documents { lower: FrameBound, upper: FrameBound },
    /// Distance on the single sort key, optionally in a time unit
    Range {
        lower: FrameBound,
        upper: FrameBound,
        unit: Option<TimeUnit>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum WindowFunction {
    Avg,
    Sum,
    Count,
    Min,
    Max,
    StdDevPop,
    Push,
    Derivative { unit: Option<TimeUnit> },
    Rank,
    DenseRank,
    DocumentNumber,
    Shift { by: i64, default: Value },
}

impl WindowFunction {
    pub fn name(&self) -> &'static str {
        match self {
            WindowFunction::Avg => "$avg",
            WindowFunction::Sum => "$sum",
            WindowFunction::Count => "$count",
            WindowFunction::Min => "$min",
            WindowFunction::Max => "$max",
            WindowFunction::StdDevPop => "$stdDevPop",
            WindowFunction::Push => "$push",
            WindowFunction::Derivative { .. } => "$derivative",
            WindowFunction::Rank => "$rank",
            WindowFunction::DenseRank => "$denseRank",
            WindowFunction::DocumentNumber => "$documentNumber",
            WindowFunction::Shift { .. } => "$shift",
        }
    }

    /// Functions evaluated over a frame rather than by position
    pub fn uses_frame(&self) -> bool {
        !matches!(
            self,
            WindowFunction::Rank
                | WindowFunction::DenseRank
                | WindowFunction::DocumentNumber
                | WindowFunction::Shift { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WindowOutput {
    pub field: String,
    pub function: WindowFunction,
    pub input: Option<Expression>,
    pub frame: WindowFrame,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WindowSpec {
    pub partition_by: Option<Expression>,
    pub sort_by: Option<SortSpec>,
    pub outputs: Vec<WindowOutput>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Boundaries {
    /// Strictly increasing numeric edges
    Numeric(Vec<f64>),
    /// Distinct labels matched exactly
    Categorical(Vec<String>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct BucketSpec {
    pub group_by: Expression,
    pub boundaries: Boundaries,
    pub default: Option<Value>,
    pub output: Vec<AccumulatorSpec>,
}

#[derive(Debug, Clone)]
pub struct LookupSpec {
    pub from: String,
    pub as_field: String,
    /// `localField` / `foreignField` equality
    pub equality: Option<(String, String)>,
    pub let_vars: Vec<(String, Expression)>,
    pub pipeline: Vec<Stage>,
}

#[derive(Debug, Clone)]
pub struct UnionWithSpec {
    pub coll: String,
    pub pipeline: Vec<Stage>,
}

#[derive(Debug, Clone)]
pub struct GraphLookupSpec {
    pub from: String,
    pub start_with: Expression,
    pub connect_from_field: String,
    pub connect_to_field: String,
    pub as_field: String,
    pub max_depth: u32,
    pub depth_field: Option<String>,
    pub restrict: Option<MatchExpr>,
}

#[derive(Debug, Clone)]
pub struct FacetSpec {
    /// Named sub-pipelines in declaration order
    pub facets: Vec<(String, Vec<Stage>)>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DensifyBounds {
    /// From the global minimum to the global maximum
    Full,
    /// From each partition's minimum to its maximum
    Partition,
    /// Explicit `[lower, upper)`
    Explicit(Value, Value),
}

#[derive(Debug, Clone, PartialEq)]
pub struct DensifySpec {
    pub field: String,
    pub partition_by_fields: Vec<String>,
    pub step: f64,
    pub unit: Option<TimeUnit>,
    pub bounds: DensifyBounds,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FillMethod {
    /// Last observation carried forward
    Locf,
    Linear,
    Value(Expression),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FillSpec {
    pub partition_by: Option<Expression>,
    pub sort_by: Option<SortSpec>,
    pub output: Vec<(String, FillMethod)>,
}

/// A validated pipeline stage
#[derive(Debug, Clone)]
pub enum Stage {
    Match(MatchExpr),
    Project(ProjectSpec),
    AddFields(Vec<(String, Expression)>),
    Unset(Vec<String>),
    Unwind(UnwindSpec),
    Group(GroupSpec),
    Window(WindowSpec),
    Bucket(BucketSpec),
    Lookup(LookupSpec),
    UnionWith(UnionWithSpec),
    GraphLookup(GraphLookupSpec),
    Sort(SortSpec),
    Limit(usize),
    Skip(usize),
    Count(String),
    Facet(FacetSpec),
    Densify(DensifySpec),
    Fill(FillSpec),
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Match(_) => "$match",
            Stage::Project(_) => "$project",
            Stage::AddFields(_) => "$addFields",
            Stage::Unset(_) => "$unset",
            Stage::Unwind(_) => "$unwind",
            Stage::Group(_) => "$group",
            Stage::Window(_) => "$setWindowFields",
            Stage::Bucket(_) => "$bucket",
            Stage::Lookup(_) => "$lookup",
            Stage::UnionWith(_) => "$unionWith",
            Stage::GraphLookup(_) => "$graphLookup",
            Stage::Sort(_) => "$sort",
            Stage::Limit(_) => "$limit",
            Stage::Skip(_) => "$skip",
            Stage::Count(_) => "$count",
            Stage::Facet(_) => "$facet",
            Stage::Densify(_) => "$densify",
            Stage::Fill(_) => "$fill",
        }
    }

    pub fn mode(&self) -> StageMode {
        match self {
            Stage::Match(_)
            | Stage::Project(_)
            | Stage::AddFields(_)
            | Stage::Unset(_)
            | Stage::Unwind(_)
            | Stage::Lookup(_)
            | Stage::GraphLookup(_)
            | Stage::Limit(_)
            | Stage::Skip(_) => StageMode::Streaming,
            Stage::Group(_)
            | Stage::Window(_)
            | Stage::Bucket(_)
            | Stage::UnionWith(_)
            | Stage::Sort(_)
            | Stage::Count(_)
            | Stage::Facet(_)
            | Stage::Densify(_)
            | Stage::Fill(_) => StageMode::Blocking,
        }
    }

    /// Collections this stage reads besides its input, including nested pipelines
    pub fn referenced_collections(&self) -> Vec<String> {
        let nested = |stages: &[Stage]| -> Vec<String> {
            stages.iter().flat_map(Stage::referenced_collections).collect()
        };
        match self {
            Stage::Lookup(spec) => {
                let mut out = vec![spec.from.clone()];
                out.extend(nested(&spec.pipeline));
                out
            }
            Stage::UnionWith(spec) => {
                let mut out = vec![spec.coll.clone()];
                out.extend(nested(&spec.pipeline));
                out
            }
            Stage::GraphLookup(spec) => vec![spec.from.clone()],
            Stage::Facet(spec) => spec.facets.iter().flat_map(|(_, s)| nested(s)).collect(),
            _ => Vec::new(),
        }
    }
}

/// An ordered, validated pipeline
#[derive(Debug, Clone)]
pub struct Pipeline {
    pub stages: Vec<Stage>,
}

impl Pipeline {
    pub fn new(stages: Vec<Stage>) -> Self {
        Self { stages }
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Every collection the pipeline reads besides its source, deduplicated
    pub fn referenced_collections(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for name in self.stages.iter().flat_map(Stage::referenced_collections) {
            if !out.contains(&name) {
                out.push(name);
            }
        }
        out
    }
}
