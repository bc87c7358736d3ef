//! Pipeline planner
//!
//! Turns a JSON pipeline into a validated [`Pipeline`]. Every stage is parsed
//! and checked here, before the orchestrator reads a single document:
//!
//! - stage names are recognized
//! - required parameters are present and well-typed
//! - expressions parse and operator arity holds
//! - bucket boundaries are strictly increasing
//! - graph traversals carry a bounded `maxDepth`
//! - `$facet` is not nested

use regex::RegexBuilder;
use serde_json::{Map, Value as Json};

use super::ast::{
    AccumulatorOp, AccumulatorSpec, Boundaries, BucketSpec, DensifyBounds, DensifySpec,
    FacetSpec, FillMethod, FillSpec, FilterOp, FrameBound, GraphLookupSpec, GroupSpec,
    LookupSpec, MatchExpr, Pipeline, ProjectField, ProjectMode, ProjectSpec, SortDirection,
    SortKey, SortSpec, Stage, UnionWithSpec, UnwindSpec, WindowFrame, WindowFunction,
    WindowOutput, WindowSpec,
};
use super::errors::{PlannerError, PlannerResult};
use crate::config::EngineConfig;
use crate::expr::dates::parse_date;
use crate::expr::{parse_expression, Expression, TimeUnit};
use crate::value::Value;

/// Default cap on `$graphLookup` `maxDepth`
pub const DEFAULT_MAX_GRAPH_DEPTH: u32 = 64;

/// Pipeline planner
///
/// Stateless apart from its limits; the same input always yields the same
/// pipeline or the same rejection.
#[derive(Debug, Clone)]
pub struct QueryPlanner {
    max_graph_depth: u32,
}

impl QueryPlanner {
    pub fn new() -> Self {
        Self {
            max_graph_depth: DEFAULT_MAX_GRAPH_DEPTH,
        }
    }

    /// Planner honoring the limits of `config`
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            max_graph_depth: config.max_graph_depth,
        }
    }

    pub fn max_graph_depth(&self) -> u32 {
        self.max_graph_depth
    }

    /// Parses and validates a pipeline.
    ///
    /// The pipeline must be a JSON array of single-key stage objects.
    pub fn plan(&self, pipeline: &Json) -> PlannerResult<Pipeline> {
        let stages = self.parse_stages(pipeline, false)?;
        Ok(Pipeline::new(stages))
    }

    /// Parses a pipeline given as JSON text
    pub fn plan_str(&self, pipeline: &str) -> PlannerResult<Pipeline> {
        let json: Json = serde_json::from_str(pipeline)
            .map_err(|e| PlannerError::query_invalid(format!("pipeline is not valid JSON: {}", e)))?;
        self.plan(&json)
    }

    fn parse_stages(&self, pipeline: &Json, in_facet: bool) -> PlannerResult<Vec<Stage>> {
        let items = pipeline
            .as_array()
            .ok_or_else(|| PlannerError::query_invalid("pipeline must be an array of stages"))?;

        items
            .iter()
            .enumerate()
            .map(|(i, item)| {
                let obj = item.as_object().ok_or_else(|| {
                    PlannerError::query_invalid(format!("stage {} must be an object", i))
                })?;
                if obj.len() != 1 {
                    return Err(PlannerError::query_invalid(format!(
                        "stage {} must have exactly one key, found {}",
                        i,
                        obj.len()
                    )));
                }
                let (name, body) = obj.iter().next().ok_or_else(|| {
                    PlannerError::query_invalid(format!("stage {} is empty", i))
                })?;
                self.parse_stage(name, body, in_facet)
            })
            .collect()
    }

    fn parse_stage(&self, name: &str, body: &Json, in_facet: bool) -> PlannerResult<Stage> {
        match name {
            "$match" => Ok(Stage::Match(parse_match(body)?)),
            "$project" => Ok(Stage::Project(parse_project(body)?)),
            "$addFields" | "$set" => Ok(Stage::AddFields(parse_add_fields(name, body)?)),
            "$unset" => Ok(Stage::Unset(parse_unset(body)?)),
            "$unwind" => Ok(Stage::Unwind(parse_unwind(body)?)),
            "$group" => Ok(Stage::Group(parse_group(body)?)),
            "$setWindowFields" => Ok(Stage::Window(parse_window(body)?)),
            "$bucket" => Ok(Stage::Bucket(parse_bucket(body)?)),
            "$lookup" => Ok(Stage::Lookup(self.parse_lookup(body, in_facet)?)),
            "$unionWith" => Ok(Stage::UnionWith(self.parse_union_with(body, in_facet)?)),
            "$graphLookup" => Ok(Stage::GraphLookup(self.parse_graph_lookup(body)?)),
            "$sort" => Ok(Stage::Sort(parse_sort(name, body)?)),
            "$limit" => {
                let n = non_negative_int(name, "limit", body)?;
                if n == 0 {
                    return Err(PlannerError::stage_config(name, "limit must be positive"));
                }
                Ok(Stage::Limit(n))
            }
            "$skip" => Ok(Stage::Skip(non_negative_int(name, "skip", body)?)),
            "$count" => Ok(Stage::Count(parse_count(body)?)),
            "$facet" => {
                if in_facet {
                    return Err(PlannerError::stage_config(
                        "$facet",
                        "$facet is not allowed inside a $facet sub-pipeline",
                    ));
                }
                Ok(Stage::Facet(self.parse_facet(body)?))
            }
            "$densify" => Ok(Stage::Densify(parse_densify(body)?)),
            "$fill" => Ok(Stage::Fill(parse_fill(body)?)),
            other if other.starts_with('$') => Err(PlannerError::unknown_stage(other)),
            other => Err(PlannerError::query_invalid(format!(
                "stage name '{}' must start with '$'",
                other
            ))),
        }
    }

    fn parse_lookup(&self, body: &Json, in_facet: bool) -> PlannerResult<LookupSpec> {
        const STAGE: &str = "$lookup";
        let map = stage_object(STAGE, body)?;
        let from = required_str(STAGE, map, "from")?;
        let as_field = required_str(STAGE, map, "as")?;

        let local = optional_str(STAGE, map, "localField")?;
        let foreign = optional_str(STAGE, map, "foreignField")?;
        let equality = match (local, foreign) {
            (Some(l), Some(f)) => Some((l, f)),
            (None, None) => None,
            _ => {
                return Err(PlannerError::stage_config(
                    STAGE,
                    "localField and foreignField must be given together",
                ))
            }
        };

        let let_vars = match map.get("let") {
            None => Vec::new(),
            Some(Json::Object(vars)) => vars
                .iter()
                .map(|(name, expr)| {
                    if name.is_empty() || name.starts_with('$') {
                        return Err(PlannerError::stage_config(
                            STAGE,
                            format!("invalid let variable name '{}'", name),
                        ));
                    }
                    Ok((name.clone(), expr_in(STAGE, expr)?))
                })
                .collect::<PlannerResult<_>>()?,
            Some(_) => return Err(PlannerError::stage_config(STAGE, "let must be an object")),
        };

        let pipeline = match map.get("pipeline") {
            Some(p) => self.parse_stages(p, in_facet)?,
            None => Vec::new(),
        };

        if equality.is_none() && !map.contains_key("pipeline") {
            return Err(PlannerError::stage_config(
                STAGE,
                "either localField/foreignField or pipeline is required",
            ));
        }

        Ok(LookupSpec {
            from,
            as_field,
            equality,
            let_vars,
            pipeline,
        })
    }

    fn parse_union_with(&self, body: &Json, in_facet: bool) -> PlannerResult<UnionWithSpec> {
        const STAGE: &str = "$unionWith";
        match body {
            Json::String(coll) if !coll.is_empty() => Ok(UnionWithSpec {
                coll: coll.clone(),
                pipeline: Vec::new(),
            }),
            Json::Object(map) => Ok(UnionWithSpec {
                coll: required_str(STAGE, map, "coll")?,
                pipeline: match map.get("pipeline") {
                    Some(p) => self.parse_stages(p, in_facet)?,
                    None => Vec::new(),
                },
            }),
            _ => Err(PlannerError::stage_config(
                STAGE,
                "expects a collection name or an object with 'coll'",
            )),
        }
    }

    fn parse_graph_lookup(&self, body: &Json) -> PlannerResult<GraphLookupSpec> {
        const STAGE: &str = "$graphLookup";
        let map = stage_object(STAGE, body)?;

        let start_with = map
            .get("startWith")
            .ok_or_else(|| PlannerError::stage_config(STAGE, "missing required field 'startWith'"))
            .and_then(|json| expr_in(STAGE, json))?;

        let max_depth = match map.get("maxDepth") {
            None => {
                return Err(PlannerError::stage_config(
                    STAGE,
                    "maxDepth is required to bound the traversal",
                ))
            }
            Some(json) => non_negative_int(STAGE, "maxDepth", json)?,
        };
        if max_depth as u64 > self.max_graph_depth as u64 {
            return Err(PlannerError::stage_config(
                STAGE,
                format!(
                    "maxDepth {} exceeds the configured limit of {}",
                    max_depth, self.max_graph_depth
                ),
            ));
        }

        let restrict = match map.get("restrictSearchWithMatch") {
            Some(json) => Some(parse_match(json).map_err(|e| {
                PlannerError::stage_config(STAGE, format!("restrictSearchWithMatch: {}", e.message()))
            })?),
            None => None,
        };

        Ok(GraphLookupSpec {
            from: required_str(STAGE, map, "from")?,
            start_with,
            connect_from_field: required_str(STAGE, map, "connectFromField")?,
            connect_to_field: required_str(STAGE, map, "connectToField")?,
            as_field: required_str(STAGE, map, "as")?,
            max_depth: max_depth as u32,
            depth_field: optional_str(STAGE, map, "depthField")?,
            restrict,
        })
    }

    fn parse_facet(&self, body: &Json) -> PlannerResult<FacetSpec> {
        const STAGE: &str = "$facet";
        let map = stage_object(STAGE, body)?;
        if map.is_empty() {
            return Err(PlannerError::stage_config(STAGE, "requires at least one facet"));
        }
        let facets = map
            .iter()
            .map(|(name, pipeline)| {
                if name.is_empty() || name.starts_with('$') || name.contains('.') {
                    return Err(PlannerError::stage_config(
                        STAGE,
                        format!("invalid facet name '{}'", name),
                    ));
                }
                Ok((name.clone(), self.parse_stages(pipeline, true)?))
            })
            .collect::<PlannerResult<_>>()?;
        Ok(FacetSpec { facets })
    }
}

impl Default for QueryPlanner {
    fn default() -> Self {
        Self::new()
    }
}

// ==================
// Shared helpers
// ==================

fn stage_object<'a>(stage: &str, body: &'a Json) -> PlannerResult<&'a Map<String, Json>> {
    body.as_object()
        .ok_or_else(|| PlannerError::stage_config(stage, "expects an object"))
}

fn required_str(stage: &str, map: &Map<String, Json>, key: &str) -> PlannerResult<String> {
    match map.get(key) {
        Some(Json::String(s)) if !s.is_empty() => Ok(s.clone()),
        Some(_) => Err(PlannerError::stage_config(
            stage,
            format!("'{}' must be a non-empty string", key),
        )),
        None => Err(PlannerError::stage_config(
            stage,
            format!("missing required field '{}'", key),
        )),
    }
}

fn optional_str(stage: &str, map: &Map<String, Json>, key: &str) -> PlannerResult<Option<String>> {
    match map.get(key) {
        None => Ok(None),
        Some(_) => required_str(stage, map, key).map(Some),
    }
}

fn expr_in(stage: &str, json: &Json) -> PlannerResult<Expression> {
    parse_expression(json).map_err(|e| PlannerError::expression(stage, e))
}

/// Accepts JSON integers and whole floats
fn as_integer(json: &Json) -> Option<i64> {
    if let Some(i) = json.as_i64() {
        return Some(i);
    }
    json.as_f64()
        .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
        .map(|f| f as i64)
}

fn non_negative_int(stage: &str, what: &str, json: &Json) -> PlannerResult<usize> {
    match as_integer(json) {
        Some(n) if n >= 0 => Ok(n as usize),
        _ => Err(PlannerError::stage_config(
            stage,
            format!("{} must be a non-negative integer", what),
        )),
    }
}

fn strip_field_path(stage: &str, path: &str) -> PlannerResult<String> {
    match path.strip_prefix('$') {
        Some(p) if !p.is_empty() && !p.starts_with('$') => Ok(p.to_string()),
        _ => Err(PlannerError::stage_config(
            stage,
            format!("'{}' must be a field path starting with '$'", path),
        )),
    }
}

fn check_field_name(stage: &str, name: &str) -> PlannerResult<()> {
    if name.is_empty() || name.starts_with('$') {
        return Err(PlannerError::stage_config(
            stage,
            format!("invalid output field name '{}'", name),
        ));
    }
    Ok(())
}

// ==================
// $match
// ==================

/// Parses a `$match` filter document
pub(crate) fn parse_match(body: &Json) -> PlannerResult<MatchExpr> {
    const STAGE: &str = "$match";
    let map = stage_object(STAGE, body)?;
    let clauses = map
        .iter()
        .map(|(key, value)| parse_match_clause(key, value))
        .collect::<PlannerResult<Vec<_>>>()?;
    Ok(MatchExpr::And(clauses))
}

fn parse_match_clause(key: &str, value: &Json) -> PlannerResult<MatchExpr> {
    const STAGE: &str = "$match";
    match key {
        "$and" | "$or" | "$nor" => {
            let items = value
                .as_array()
                .filter(|items| !items.is_empty())
                .ok_or_else(|| {
                    PlannerError::stage_config(STAGE, format!("{} expects a non-empty array", key))
                })?;
            let parsed = items.iter().map(parse_match).collect::<PlannerResult<Vec<_>>>()?;
            Ok(match key {
                "$and" => MatchExpr::And(parsed),
                "$or" => MatchExpr::Or(parsed),
                _ => MatchExpr::Nor(parsed),
            })
        }
        "$expr" => Ok(MatchExpr::Expr(expr_in(STAGE, value)?)),
        other if other.starts_with('$') => Err(PlannerError::stage_config(
            STAGE,
            format!("unknown top-level operator '{}'", other),
        )),
        path => Ok(MatchExpr::Field {
            path: path.to_string(),
            ops: parse_field_ops(value)?,
        }),
    }
}

fn is_operator_object(map: &Map<String, Json>) -> bool {
    !map.is_empty() && map.keys().all(|k| k.starts_with('$')) && !map.contains_key("$date")
}

fn parse_field_ops(value: &Json) -> PlannerResult<Vec<FilterOp>> {
    const STAGE: &str = "$match";
    let map = match value {
        Json::Object(map) if is_operator_object(map) => map,
        Json::Object(map) if map.keys().any(|k| k.starts_with('$') && k != "$date") => {
            return Err(PlannerError::stage_config(
                STAGE,
                "cannot mix operators and fields in one condition",
            ))
        }
        literal => return Ok(vec![FilterOp::Eq(Value::from(literal.clone()))]),
    };

    let options = match map.get("$options") {
        Some(Json::String(o)) => Some(o.as_str()),
        Some(_) => return Err(PlannerError::stage_config(STAGE, "$options must be a string")),
        None => None,
    };

    let mut ops = Vec::with_capacity(map.len());
    for (op, arg) in map {
        let parsed = match op.as_str() {
            "$eq" => FilterOp::Eq(Value::from(arg.clone())),
            "$ne" => FilterOp::Ne(Value::from(arg.clone())),
            "$gt" => FilterOp::Gt(Value::from(arg.clone())),
            "$gte" => FilterOp::Gte(Value::from(arg.clone())),
            "$lt" => FilterOp::Lt(Value::from(arg.clone())),
            "$lte" => FilterOp::Lte(Value::from(arg.clone())),
            "$in" | "$nin" => {
                let items = arg.as_array().ok_or_else(|| {
                    PlannerError::stage_config(STAGE, format!("{} expects an array", op))
                })?;
                let values = items.iter().cloned().map(Value::from).collect();
                if op == "$in" {
                    FilterOp::In(values)
                } else {
                    FilterOp::Nin(values)
                }
            }
            "$exists" => FilterOp::Exists(Value::from(arg.clone()).is_truthy()),
            "$regex" => FilterOp::Regex(build_regex(arg, options)?),
            "$options" => {
                if !map.contains_key("$regex") {
                    return Err(PlannerError::stage_config(STAGE, "$options requires $regex"));
                }
                continue;
            }
            "$size" => FilterOp::Size(non_negative_int(STAGE, "$size", arg)?),
            "$not" => match arg {
                Json::Object(inner) if is_operator_object(inner) => FilterOp::Not(parse_field_ops(arg)?),
                Json::String(_) => FilterOp::Not(vec![FilterOp::Regex(build_regex(arg, None)?)]),
                _ => {
                    return Err(PlannerError::stage_config(
                        STAGE,
                        "$not expects an operator object or a regex",
                    ))
                }
            },
            other => {
                return Err(PlannerError::stage_config(
                    STAGE,
                    format!("unknown query operator '{}'", other),
                ))
            }
        };
        ops.push(parsed);
    }
    Ok(ops)
}

fn build_regex(pattern: &Json, options: Option<&str>) -> PlannerResult<regex::Regex> {
    const STAGE: &str = "$match";
    let pattern = pattern
        .as_str()
        .ok_or_else(|| PlannerError::stage_config(STAGE, "$regex expects a string pattern"))?;
    let mut builder = RegexBuilder::new(pattern);
    for flag in options.unwrap_or("").chars() {
        match flag {
            'i' => builder.case_insensitive(true),
            'm' => builder.multi_line(true),
            's' => builder.dot_matches_new_line(true),
            'x' => builder.ignore_whitespace(true),
            other => {
                return Err(PlannerError::stage_config(
                    STAGE,
                    format!("unsupported regex option '{}'", other),
                ))
            }
        };
    }
    builder
        .build()
        .map_err(|e| PlannerError::stage_config(STAGE, format!("invalid regex: {}", e)))
}

// ==================
// $project / $addFields / $unset / $unwind
// ==================

fn parse_project(body: &Json) -> PlannerResult<ProjectSpec> {
    const STAGE: &str = "$project";
    let map = stage_object(STAGE, body)?;
    if map.is_empty() {
        return Err(PlannerError::stage_config(STAGE, "requires at least one field"));
    }

    let mut exclude_id = false;
    let mut fields = Vec::with_capacity(map.len());
    for (key, value) in map {
        if key == "_id" && matches!(parse_project_field(value)?, ProjectField::Exclude) {
            exclude_id = true;
            continue;
        }
        check_field_name(STAGE, key)?;
        fields.push((key.clone(), parse_project_field(value)?));
    }

    let (mut includes, mut excludes) = (false, false);
    for (_, field) in &fields {
        tally_project_mode(field, &mut includes, &mut excludes);
    }
    if includes && excludes {
        return Err(PlannerError::stage_config(
            STAGE,
            "cannot mix inclusion and exclusion in one projection",
        ));
    }

    let mode = if excludes || (!includes && exclude_id) {
        ProjectMode::Exclusion
    } else {
        ProjectMode::Inclusion
    };

    Ok(ProjectSpec {
        mode,
        fields,
        exclude_id,
    })
}

fn parse_project_field(value: &Json) -> PlannerResult<ProjectField> {
    const STAGE: &str = "$project";
    match value {
        Json::Bool(b) => Ok(if *b { ProjectField::Include } else { ProjectField::Exclude }),
        Json::Number(n) => Ok(if n.as_f64() == Some(0.0) {
            ProjectField::Exclude
        } else {
            ProjectField::Include
        }),
        Json::Object(map) if !map.is_empty() && !map.keys().any(|k| k.starts_with('$')) => {
            let nested = map
                .iter()
                .map(|(k, v)| {
                    check_field_name(STAGE, k)?;
                    Ok((k.clone(), parse_project_field(v)?))
                })
                .collect::<PlannerResult<_>>()?;
            Ok(ProjectField::Nested(nested))
        }
        other => Ok(ProjectField::Computed(expr_in(STAGE, other)?)),
    }
}

fn tally_project_mode(field: &ProjectField, includes: &mut bool, excludes: &mut bool) {
    match field {
        ProjectField::Include | ProjectField::Computed(_) => *includes = true,
        ProjectField::Exclude => *excludes = true,
        ProjectField::Nested(children) => {
            for (_, child) in children {
                tally_project_mode(child, includes, excludes);
            }
        }
    }
}

fn parse_add_fields(stage: &str, body: &Json) -> PlannerResult<Vec<(String, Expression)>> {
    let map = stage_object(stage, body)?;
    if map.is_empty() {
        return Err(PlannerError::stage_config(stage, "requires at least one field"));
    }
    map.iter()
        .map(|(key, value)| {
            check_field_name(stage, key)?;
            Ok((key.clone(), expr_in(stage, value)?))
        })
        .collect()
}

fn parse_unset(body: &Json) -> PlannerResult<Vec<String>> {
    const STAGE: &str = "$unset";
    let names: Vec<&Json> = match body {
        Json::String(_) => vec![body],
        Json::Array(items) if !items.is_empty() => items.iter().collect(),
        _ => {
            return Err(PlannerError::stage_config(
                STAGE,
                "expects a field name or a non-empty array of field names",
            ))
        }
    };
    names
        .into_iter()
        .map(|n| match n.as_str() {
            Some(s) if !s.is_empty() && !s.starts_with('$') => Ok(s.to_string()),
            _ => Err(PlannerError::stage_config(STAGE, "field names must be non-empty strings")),
        })
        .collect()
}

fn parse_unwind(body: &Json) -> PlannerResult<UnwindSpec> {
    const STAGE: &str = "$unwind";
    match body {
        Json::String(path) => Ok(UnwindSpec {
            path: strip_field_path(STAGE, path)?,
            include_array_index: None,
            preserve_null_and_empty: false,
        }),
        Json::Object(map) => {
            let path = required_str(STAGE, map, "path")?;
            let preserve = match map.get("preserveNullAndEmptyArrays") {
                None => false,
                Some(Json::Bool(b)) => *b,
                Some(_) => {
                    return Err(PlannerError::stage_config(
                        STAGE,
                        "preserveNullAndEmptyArrays must be a boolean",
                    ))
                }
            };
            Ok(UnwindSpec {
                path: strip_field_path(STAGE, &path)?,
                include_array_index: optional_str(STAGE, map, "includeArrayIndex")?,
                preserve_null_and_empty: preserve,
            })
        }
        _ => Err(PlannerError::stage_config(STAGE, "expects a field path or an object")),
    }
}

// ==================
// $group / $bucket accumulators
// ==================

fn parse_accumulators(
    stage: &str,
    map: &Map<String, Json>,
    skip: &[&str],
) -> PlannerResult<Vec<AccumulatorSpec>> {
    map.iter()
        .filter(|(key, _)| !skip.contains(&key.as_str()))
        .map(|(field, spec)| {
            check_field_name(stage, field)?;
            let obj = spec.as_object().filter(|o| o.len() == 1).ok_or_else(|| {
                PlannerError::stage_config(
                    stage,
                    format!("accumulator for '{}' must be an object with one operator", field),
                )
            })?;
            let (name, arg) = obj.iter().next().ok_or_else(|| {
                PlannerError::stage_config(stage, format!("empty accumulator for '{}'", field))
            })?;
            let op = AccumulatorOp::from_name(name).ok_or_else(|| {
                PlannerError::stage_config(stage, format!("unknown accumulator '{}'", name))
            })?;
            let input = match op {
                AccumulatorOp::Count => {
                    if !matches!(arg, Json::Object(o) if o.is_empty()) {
                        return Err(PlannerError::stage_config(stage, "$count takes no arguments"));
                    }
                    Expression::Literal(Value::Number(1.0))
                }
                _ => expr_in(stage, arg)?,
            };
            Ok(AccumulatorSpec {
                field: field.clone(),
                op,
                input,
            })
        })
        .collect()
}

fn parse_group(body: &Json) -> PlannerResult<GroupSpec> {
    const STAGE: &str = "$group";
    let map = stage_object(STAGE, body)?;
    let id = map
        .get("_id")
        .ok_or_else(|| PlannerError::stage_config(STAGE, "a group specification must include an _id"))
        .and_then(|json| expr_in(STAGE, json))?;
    Ok(GroupSpec {
        id,
        accumulators: parse_accumulators(STAGE, map, &["_id"])?,
    })
}

fn parse_bucket(body: &Json) -> PlannerResult<BucketSpec> {
    const STAGE: &str = "$bucket";
    let map = stage_object(STAGE, body)?;

    let group_by = match map.get("groupBy") {
        Some(json @ (Json::String(_) | Json::Object(_))) => expr_in(STAGE, json)?,
        Some(_) => {
            return Err(PlannerError::stage_config(
                STAGE,
                "groupBy must be a field path or an expression object",
            ))
        }
        None => return Err(PlannerError::stage_config(STAGE, "missing required field 'groupBy'")),
    };

    let raw = map
        .get("boundaries")
        .and_then(Json::as_array)
        .ok_or_else(|| PlannerError::stage_config(STAGE, "boundaries must be an array"))?;
    let boundaries = parse_boundaries(raw)?;

    let default = map.get("default").cloned().map(Value::from);
    if let (Some(d), Boundaries::Numeric(edges)) = (&default, &boundaries) {
        if let Some(n) = d.as_f64() {
            let lo = edges.first().copied().unwrap_or(f64::NAN);
            let hi = edges.last().copied().unwrap_or(f64::NAN);
            if n >= lo && n < hi {
                return Err(PlannerError::stage_config(
                    STAGE,
                    "default must lie outside the range of the boundaries",
                ));
            }
        }
    }

    let output = match map.get("output") {
        None => vec![AccumulatorSpec {
            field: "count".to_string(),
            op: AccumulatorOp::Sum,
            input: Expression::Literal(Value::Number(1.0)),
        }],
        Some(Json::Object(out)) => parse_accumulators(STAGE, out, &[])?,
        Some(_) => return Err(PlannerError::stage_config(STAGE, "output must be an object")),
    };

    Ok(BucketSpec {
        group_by,
        boundaries,
        default,
        output,
    })
}

fn parse_boundaries(raw: &[Json]) -> PlannerResult<Boundaries> {
    const STAGE: &str = "$bucket";
    if raw.iter().all(Json::is_number) {
        let edges: Vec<f64> = raw.iter().filter_map(Json::as_f64).collect();
        if edges.len() < 2 {
            return Err(PlannerError::stage_config(
                STAGE,
                "numeric boundaries need at least two values",
            ));
        }
        if edges.windows(2).any(|w| !(w[0] < w[1])) {
            return Err(PlannerError::stage_config(
                STAGE,
                "boundaries must be strictly increasing",
            ));
        }
        return Ok(Boundaries::Numeric(edges));
    }

    if raw.iter().all(Json::is_string) {
        let labels: Vec<String> = raw.iter().filter_map(|j| j.as_str().map(String::from)).collect();
        if labels.is_empty() {
            return Err(PlannerError::stage_config(STAGE, "boundaries must not be empty"));
        }
        for (i, label) in labels.iter().enumerate() {
            if labels[..i].contains(label) {
                return Err(PlannerError::stage_config(
                    STAGE,
                    format!("duplicate category label '{}'", label),
                ));
            }
        }
        return Ok(Boundaries::Categorical(labels));
    }

    Err(PlannerError::stage_config(
        STAGE,
        "boundaries must be all numbers or all strings",
    ))
}

// ==================
// $setWindowFields
// ==================

fn parse_window(body: &Json) -> PlannerResult<WindowSpec> {
    const STAGE: &str = "$setWindowFields";
    let map = stage_object(STAGE, body)?;

    let partition_by = map.get("partitionBy").map(|j| expr_in(STAGE, j)).transpose()?;
    let sort_by = map.get("sortBy").map(|j| parse_sort(STAGE, j)).transpose()?;

    let output_map = match map.get("output") {
        Some(Json::Object(o)) if !o.is_empty() => o,
        _ => {
            return Err(PlannerError::stage_config(
                STAGE,
                "output must be a non-empty object",
            ))
        }
    };

    let outputs = output_map
        .iter()
        .map(|(field, spec)| parse_window_output(field, spec, sort_by.as_ref()))
        .collect::<PlannerResult<_>>()?;

    Ok(WindowSpec {
        partition_by,
        sort_by,
        outputs,
    })
}

fn parse_window_output(
    field: &str,
    spec: &Json,
    sort_by: Option<&SortSpec>,
) -> PlannerResult<WindowOutput> {
    const STAGE: &str = "$setWindowFields";
    check_field_name(STAGE, field)?;
    let obj = stage_object(STAGE, spec)?;

    // `{ $fn: arg, window: {...} }` or `{ $fn: { input, window, unit } }`
    let mut func = None;
    let mut outer_window = None;
    for (key, value) in obj {
        match key.as_str() {
            "window" => outer_window = Some(value),
            name if name.starts_with('$') && func.is_none() => func = Some((name, value)),
            other => {
                return Err(PlannerError::stage_config(
                    STAGE,
                    format!("unexpected key '{}' in output '{}'", other, field),
                ))
            }
        }
    }
    let (name, arg) = func.ok_or_else(|| {
        PlannerError::stage_config(STAGE, format!("output '{}' names no window function", field))
    })?;

    let (input_json, inner_window, unit_json) = match arg {
        Json::Object(args) if args.contains_key("input") || args.contains_key("window") => {
            (args.get("input"), args.get("window"), args.get("unit"))
        }
        other => (Some(other), None, None),
    };
    let window_json = inner_window.or(outer_window);
    let unit = unit_json.map(|j| parse_time_unit(STAGE, j)).transpose()?;

    let needs_sort = |what: &str| -> PlannerResult<()> {
        if sort_by.is_none() {
            return Err(PlannerError::stage_config(
                STAGE,
                format!("{} requires sortBy", what),
            ));
        }
        Ok(())
    };

    let no_args = |json: &Json| matches!(json, Json::Object(o) if o.is_empty());

    let (function, input) = match name {
        "$avg" | "$sum" | "$min" | "$max" | "$stdDevPop" | "$push" => {
            let input = input_json
                .ok_or_else(|| PlannerError::stage_config(STAGE, format!("{} needs an input", name)))
                .and_then(|j| expr_in(STAGE, j))?;
            let function = match name {
                "$avg" => WindowFunction::Avg,
                "$sum" => WindowFunction::Sum,
                "$min" => WindowFunction::Min,
                "$max" => WindowFunction::Max,
                "$stdDevPop" => WindowFunction::StdDevPop,
                _ => WindowFunction::Push,
            };
            (function, Some(input))
        }
        "$count" => {
            if !no_args(arg) {
                return Err(PlannerError::stage_config(STAGE, "$count takes no arguments"));
            }
            (WindowFunction::Count, None)
        }
        "$derivative" => {
            needs_sort("$derivative")?;
            let input = input_json
                .filter(|_| matches!(arg, Json::Object(_)))
                .ok_or_else(|| PlannerError::stage_config(STAGE, "$derivative needs an input"))
                .and_then(|j| expr_in(STAGE, j))?;
            (WindowFunction::Derivative { unit }, Some(input))
        }
        "$rank" | "$denseRank" | "$documentNumber" => {
            needs_sort(name)?;
            if !no_args(arg) {
                return Err(PlannerError::stage_config(STAGE, format!("{} takes no arguments", name)));
            }
            let function = match name {
                "$rank" => WindowFunction::Rank,
                "$denseRank" => WindowFunction::DenseRank,
                _ => WindowFunction::DocumentNumber,
            };
            (function, None)
        }
        "$shift" => {
            needs_sort("$shift")?;
            let args = stage_object(STAGE, arg)?;
            let output = args
                .get("output")
                .ok_or_else(|| PlannerError::stage_config(STAGE, "$shift needs an output"))
                .and_then(|j| expr_in(STAGE, j))?;
            let by = args
                .get("by")
                .and_then(as_integer)
                .ok_or_else(|| PlannerError::stage_config(STAGE, "$shift 'by' must be an integer"))?;
            let default = args.get("default").cloned().map(Value::from).unwrap_or(Value::Null);
            (WindowFunction::Shift { by, default }, Some(output))
        }
        other => {
            return Err(PlannerError::stage_config(
                STAGE,
                format!("unknown window function '{}'", other),
            ))
        }
    };

    if !function.uses_frame() && window_json.is_some() {
        return Err(PlannerError::stage_config(
            STAGE,
            format!("{} does not accept a window", function.name()),
        ));
    }

    let frame = match window_json {
        Some(w) => parse_frame(w, sort_by)?,
        None if matches!(function, WindowFunction::Derivative { .. }) => WindowFrame::Documents {
            lower: FrameBound::Offset(-1.0),
            upper: FrameBound::Current,
        },
        None => WindowFrame::Documents {
            lower: FrameBound::Unbounded,
            upper: FrameBound::Unbounded,
        },
    };

    if matches!(function, WindowFunction::Derivative { .. }) || matches!(frame, WindowFrame::Range { .. }) {
        if sort_by.map(|s| s.keys.len()) != Some(1) {
            return Err(PlannerError::stage_config(
                STAGE,
                "range windows and $derivative require exactly one sortBy field",
            ));
        }
    }

    Ok(WindowOutput {
        field: field.to_string(),
        function,
        input,
        frame,
    })
}

fn parse_frame(window: &Json, sort_by: Option<&SortSpec>) -> PlannerResult<WindowFrame> {
    const STAGE: &str = "$setWindowFields";
    let map = stage_object(STAGE, window)?;

    let bounds = |key: &str, integral: bool| -> PlannerResult<(FrameBound, FrameBound)> {
        let pair = map
            .get(key)
            .and_then(Json::as_array)
            .filter(|a| a.len() == 2)
            .ok_or_else(|| {
                PlannerError::stage_config(STAGE, format!("window.{} must be a two-element array", key))
            })?;
        let lower = parse_frame_bound(&pair[0], integral)?;
        let upper = parse_frame_bound(&pair[1], integral)?;
        if frame_position(lower, true) > frame_position(upper, false) {
            return Err(PlannerError::stage_config(
                STAGE,
                "window lower bound must not exceed the upper bound",
            ));
        }
        Ok((lower, upper))
    };

    match (map.get("documents"), map.get("range")) {
        (Some(_), None) => {
            if map.contains_key("unit") {
                return Err(PlannerError::stage_config(STAGE, "unit applies only to range windows"));
            }
            let (lower, upper) = bounds("documents", true)?;
            if lower != FrameBound::Unbounded || upper != FrameBound::Unbounded {
                if sort_by.is_none() {
                    return Err(PlannerError::stage_config(
                        STAGE,
                        "bounded document windows require sortBy",
                    ));
                }
            }
            Ok(WindowFrame::Documents { lower, upper })
        }
        (None, Some(_)) => {
            let (lower, upper) = bounds("range", false)?;
            let unit = map.get("unit").map(|j| parse_time_unit(STAGE, j)).transpose()?;
            Ok(WindowFrame::Range { lower, upper, unit })
        }
        _ => Err(PlannerError::stage_config(
            STAGE,
            "window must contain exactly one of 'documents' or 'range'",
        )),
    }
}

fn parse_frame_bound(json: &Json, integral: bool) -> PlannerResult<FrameBound> {
    const STAGE: &str = "$setWindowFields";
    match json {
        Json::String(s) if s == "unbounded" => Ok(FrameBound::Unbounded),
        Json::String(s) if s == "current" => Ok(FrameBound::Current),
        Json::Number(_) if integral => as_integer(json)
            .map(|i| FrameBound::Offset(i as f64))
            .ok_or_else(|| PlannerError::stage_config(STAGE, "document window bounds must be integers")),
        Json::Number(n) => n
            .as_f64()
            .map(FrameBound::Offset)
            .ok_or_else(|| PlannerError::stage_config(STAGE, "invalid range bound")),
        _ => Err(PlannerError::stage_config(
            STAGE,
            "window bounds must be numbers, 'current' or 'unbounded'",
        )),
    }
}

/// Orders bounds for validation; `Unbounded` means minus or plus infinity
fn frame_position(bound: FrameBound, is_lower: bool) -> f64 {
    match bound {
        FrameBound::Unbounded if is_lower => f64::NEG_INFINITY,
        FrameBound::Unbounded => f64::INFINITY,
        FrameBound::Current => 0.0,
        FrameBound::Offset(n) => n,
    }
}

fn parse_time_unit(stage: &str, json: &Json) -> PlannerResult<TimeUnit> {
    json.as_str()
        .and_then(TimeUnit::parse)
        .ok_or_else(|| PlannerError::stage_config(stage, format!("invalid time unit {}", json)))
}

// ==================
// $sort / $count
// ==================

fn parse_sort(stage: &str, body: &Json) -> PlannerResult<SortSpec> {
    let map = match body {
        Json::Object(map) if !map.is_empty() => map,
        _ => {
            return Err(PlannerError::stage_config(
                stage,
                "sort specification must be a non-empty object",
            ))
        }
    };
    let keys = map
        .iter()
        .map(|(path, dir)| {
            let direction = match as_integer(dir) {
                Some(1) => SortDirection::Asc,
                Some(-1) => SortDirection::Desc,
                _ => {
                    return Err(PlannerError::stage_config(
                        stage,
                        format!("sort direction for '{}' must be 1 or -1", path),
                    ))
                }
            };
            Ok(SortKey {
                path: path.clone(),
                direction,
            })
        })
        .collect::<PlannerResult<_>>()?;
    Ok(SortSpec { keys })
}

fn parse_count(body: &Json) -> PlannerResult<String> {
    const STAGE: &str = "$count";
    match body.as_str() {
        Some(name) if !name.is_empty() && !name.starts_with('$') && !name.contains('.') => {
            Ok(name.to_string())
        }
        _ => Err(PlannerError::stage_config(
            STAGE,
            "expects a non-empty field name without '$' or '.'",
        )),
    }
}

// ==================
// $densify / $fill
// ==================

fn parse_densify(body: &Json) -> PlannerResult<DensifySpec> {
    const STAGE: &str = "$densify";
    let map = stage_object(STAGE, body)?;
    let field = required_str(STAGE, map, "field")?;

    let partition_by_fields = match map.get("partitionByFields") {
        None => Vec::new(),
        Some(Json::Array(items)) => items
            .iter()
            .map(|i| {
                i.as_str()
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .ok_or_else(|| {
                        PlannerError::stage_config(STAGE, "partitionByFields must hold field names")
                    })
            })
            .collect::<PlannerResult<_>>()?,
        Some(_) => {
            return Err(PlannerError::stage_config(STAGE, "partitionByFields must be an array"))
        }
    };

    let range = map
        .get("range")
        .and_then(Json::as_object)
        .ok_or_else(|| PlannerError::stage_config(STAGE, "range must be an object"))?;

    let step = range
        .get("step")
        .and_then(Json::as_f64)
        .filter(|s| *s > 0.0 && s.is_finite())
        .ok_or_else(|| PlannerError::stage_config(STAGE, "step must be a positive number"))?;
    let unit = range.get("unit").map(|j| parse_time_unit(STAGE, j)).transpose()?;
    if unit.is_some() && step.fract() != 0.0 {
        return Err(PlannerError::stage_config(
            STAGE,
            "step must be an integer when a unit is given",
        ));
    }

    let bounds = match range.get("bounds") {
        Some(Json::String(s)) if s == "full" => DensifyBounds::Full,
        Some(Json::String(s)) if s == "partition" => DensifyBounds::Partition,
        Some(Json::Array(pair)) if pair.len() == 2 => {
            let lower = densify_bound(&pair[0], unit.is_some())?;
            let upper = densify_bound(&pair[1], unit.is_some())?;
            let ordered = match unit {
                Some(_) => lower.as_axis() < upper.as_axis(),
                None => lower.as_f64() < upper.as_f64(),
            };
            if !ordered {
                return Err(PlannerError::stage_config(
                    STAGE,
                    "lower bound must be below the upper bound",
                ));
            }
            DensifyBounds::Explicit(lower, upper)
        }
        _ => {
            return Err(PlannerError::stage_config(
                STAGE,
                "bounds must be 'full', 'partition' or a [lower, upper] pair",
            ))
        }
    };

    if matches!(bounds, DensifyBounds::Partition) && partition_by_fields.is_empty() {
        return Err(PlannerError::stage_config(
            STAGE,
            "bounds 'partition' requires partitionByFields",
        ));
    }

    Ok(DensifySpec {
        field,
        partition_by_fields,
        step,
        unit,
        bounds,
    })
}

fn densify_bound(json: &Json, dates: bool) -> PlannerResult<Value> {
    const STAGE: &str = "$densify";
    let value = Value::from(json.clone());
    match (&value, dates) {
        (Value::Date(_), true) | (Value::Number(_), false) => Ok(value),
        (Value::String(s), true) => parse_date(s, None)
            .map(Value::Date)
            .ok_or_else(|| PlannerError::stage_config(STAGE, format!("invalid date bound '{}'", s))),
        (_, true) => Err(PlannerError::stage_config(STAGE, "date bounds require dates")),
        (_, false) => Err(PlannerError::stage_config(STAGE, "numeric bounds require numbers")),
    }
}

fn parse_fill(body: &Json) -> PlannerResult<FillSpec> {
    const STAGE: &str = "$fill";
    let map = stage_object(STAGE, body)?;

    let partition_by = match (map.get("partitionBy"), map.get("partitionByFields")) {
        (Some(_), Some(_)) => {
            return Err(PlannerError::stage_config(
                STAGE,
                "partitionBy and partitionByFields are mutually exclusive",
            ))
        }
        (Some(expr), None) => Some(expr_in(STAGE, expr)?),
        (None, Some(Json::Array(fields))) => {
            let parts = fields
                .iter()
                .map(|f| match f.as_str() {
                    Some(name) if !name.is_empty() => {
                        Ok((name.to_string(), Expression::Field(name.to_string())))
                    }
                    _ => Err(PlannerError::stage_config(
                        STAGE,
                        "partitionByFields must hold field names",
                    )),
                })
                .collect::<PlannerResult<_>>()?;
            Some(Expression::Object(parts))
        }
        (None, Some(_)) => {
            return Err(PlannerError::stage_config(STAGE, "partitionByFields must be an array"))
        }
        (None, None) => None,
    };

    let sort_by = map.get("sortBy").map(|j| parse_sort(STAGE, j)).transpose()?;

    let output_map = match map.get("output") {
        Some(Json::Object(o)) if !o.is_empty() => o,
        _ => return Err(PlannerError::stage_config(STAGE, "output must be a non-empty object")),
    };

    let output = output_map
        .iter()
        .map(|(field, spec)| {
            check_field_name(STAGE, field)?;
            let spec = stage_object(STAGE, spec)?;
            let method = match (spec.get("method"), spec.get("value")) {
                (Some(Json::String(m)), None) if m == "locf" => FillMethod::Locf,
                (Some(Json::String(m)), None) if m == "linear" => {
                    if sort_by.as_ref().map(|s| s.keys.len()) != Some(1) {
                        return Err(PlannerError::stage_config(
                            STAGE,
                            "linear fill requires exactly one sortBy field",
                        ));
                    }
                    FillMethod::Linear
                }
                (None, Some(expr)) => FillMethod::Value(expr_in(STAGE, expr)?),
                _ => {
                    return Err(PlannerError::stage_config(
                        STAGE,
                        format!(
                            "output '{}' needs either method 'locf'/'linear' or a value",
                            field
                        ),
                    ))
                }
            };
            Ok((field.clone(), method))
        })
        .collect::<PlannerResult<_>>()?;

    Ok(FillSpec {
        partition_by,
        sort_by,
        output,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::errors::PlannerErrorCode;
    use crate::planner::StageMode;
    use serde_json::json;

    fn plan(json: Json) -> PlannerResult<Pipeline> {
        QueryPlanner::new().plan(&json)
    }

    fn config_error(json: Json) -> PlannerError {
        let err = plan(json).unwrap_err();
        assert_eq!(err.code(), PlannerErrorCode::StratusStageConfig, "{}", err);
        err
    }

    #[test]
    fn test_plan_basic_pipeline() {
        let pipeline = plan(json!([
            {"$match": {"location": "Prague"}},
            {"$group": {"_id": "$location", "avg_temp": {"$avg": "$temperature_c"}, "count": {"$sum": 1}}},
            {"$sort": {"avg_temp": -1}},
            {"$limit": 5}
        ]))
        .unwrap();

        assert_eq!(pipeline.len(), 4);
        let names: Vec<_> = pipeline.stages.iter().map(Stage::name).collect();
        assert_eq!(names, vec!["$match", "$group", "$sort", "$limit"]);
        assert_eq!(pipeline.stages[0].mode(), StageMode::Streaming);
        assert_eq!(pipeline.stages[1].mode(), StageMode::Blocking);
    }

    #[test]
    fn test_pipeline_must_be_array() {
        let err = plan(json!({"$match": {}})).unwrap_err();
        assert_eq!(err.code(), PlannerErrorCode::StratusQueryInvalid);
    }

    #[test]
    fn test_stage_must_have_one_key() {
        let err = plan(json!([{"$match": {}, "$limit": 1}])).unwrap_err();
        assert_eq!(err.code(), PlannerErrorCode::StratusQueryInvalid);
    }

    #[test]
    fn test_unknown_stage() {
        let err = plan(json!([{"$teleport": {}}])).unwrap_err();
        assert_eq!(err.code(), PlannerErrorCode::StratusUnknownStage);
        assert_eq!(err.stage(), Some("$teleport"));
    }

    #[test]
    fn test_unknown_operator_rejected_at_plan_time() {
        let err = config_error(json!([{"$addFields": {"x": {"$frobnicate": [1, 2]}}}]));
        assert!(err.message().contains("$frobnicate"));
    }

    #[test]
    fn test_bad_arity_rejected() {
        config_error(json!([{"$project": {"x": {"$divide": [1]}}}]));
    }

    #[test]
    fn test_bucket_boundaries_must_increase() {
        let err = config_error(json!([{"$bucket": {
            "groupBy": "$temperature_c",
            "boundaries": [0, 10, 10, 20]
        }}]));
        assert!(err.message().contains("strictly increasing"));
    }

    #[test]
    fn test_bucket_mixed_boundaries_rejected() {
        config_error(json!([{"$bucket": {"groupBy": "$x", "boundaries": [0, "a"]}}]));
    }

    #[test]
    fn test_bucket_default_output_is_count() {
        let pipeline = plan(json!([{"$bucket": {
            "groupBy": "$temperature_c",
            "boundaries": [-10, 0, 10, 20, 30],
            "default": "Other"
        }}]))
        .unwrap();
        match &pipeline.stages[0] {
            Stage::Bucket(spec) => {
                assert_eq!(spec.output.len(), 1);
                assert_eq!(spec.output[0].field, "count");
                assert_eq!(spec.default, Some(Value::from("Other")));
            }
            other => panic!("unexpected stage {:?}", other),
        }
    }

    #[test]
    fn test_categorical_boundaries() {
        let pipeline = plan(json!([{"$bucket": {
            "groupBy": "$event_type",
            "boundaries": ["Freezing Precipitation", "Hot and Dry", "Stormy"],
            "default": "Other"
        }}]))
        .unwrap();
        match &pipeline.stages[0] {
            Stage::Bucket(spec) => assert!(matches!(spec.boundaries, Boundaries::Categorical(ref l) if l.len() == 3)),
            other => panic!("unexpected stage {:?}", other),
        }
    }

    #[test]
    fn test_graph_lookup_requires_max_depth() {
        let err = config_error(json!([{"$graphLookup": {
            "from": "weather",
            "startWith": "$location",
            "connectFromField": "location",
            "connectToField": "location",
            "as": "neighbors"
        }}]));
        assert!(err.message().contains("maxDepth"));
    }

    #[test]
    fn test_graph_lookup_depth_capped_by_config() {
        let config = EngineConfig {
            max_graph_depth: 3,
            ..EngineConfig::default()
        };
        let err = QueryPlanner::from_config(&config)
            .plan(&json!([{"$graphLookup": {
                "from": "weather",
                "startWith": "$location",
                "connectFromField": "location",
                "connectToField": "location",
                "as": "neighbors",
                "maxDepth": 10
            }}]))
            .unwrap_err();
        assert!(err.message().contains("exceeds"));
    }

    #[test]
    fn test_nested_facet_rejected() {
        let err = config_error(json!([{"$facet": {
            "outer": [{"$facet": {"inner": [{"$limit": 1}]}}]
        }}]));
        assert_eq!(err.stage(), Some("$facet"));
    }

    #[test]
    fn test_project_mixing_rejected() {
        config_error(json!([{"$project": {"a": 1, "b": 0}}]));
        // _id exclusion may accompany inclusion
        let pipeline = plan(json!([{"$project": {"_id": 0, "a": 1}}])).unwrap();
        match &pipeline.stages[0] {
            Stage::Project(spec) => {
                assert!(spec.exclude_id);
                assert_eq!(spec.mode, ProjectMode::Inclusion);
            }
            other => panic!("unexpected stage {:?}", other),
        }
    }

    #[test]
    fn test_match_operators() {
        let pipeline = plan(json!([{"$match": {
            "temperature_c": {"$gte": 0, "$lt": 30},
            "date": {"$regex": "^2021", "$options": "i"},
            "$or": [{"location": "Prague"}, {"location": {"$in": ["Brno", "Ostrava"]}}]
        }}]))
        .unwrap();
        match &pipeline.stages[0] {
            Stage::Match(MatchExpr::And(clauses)) => {
                assert_eq!(clauses.len(), 3);
                match &clauses[1] {
                    MatchExpr::Field { ops, .. } => {
                        assert_eq!(ops.len(), 1);
                        assert_eq!(ops[0].op_name(), "regex");
                    }
                    other => panic!("unexpected clause {:?}", other),
                }
            }
            other => panic!("unexpected stage {:?}", other),
        }
    }

    #[test]
    fn test_match_unknown_operator() {
        config_error(json!([{"$match": {"a": {"$near": 1}}}]));
    }

    #[test]
    fn test_window_both_argument_forms() {
        let pipeline = plan(json!([{"$setWindowFields": {
            "partitionBy": "$location",
            "sortBy": {"date_obj": 1},
            "output": {
                "avg_nested": {"$avg": {"input": "$t", "window": {"documents": [-2, 2]}}},
                "avg_flat": {"$avg": "$t", "window": {"documents": [-2, 2]}},
                "slope": {"$derivative": {"input": "$t", "unit": "day"}},
                "rank": {"$denseRank": {}}
            }
        }}]))
        .unwrap();
        match &pipeline.stages[0] {
            Stage::Window(spec) => {
                assert_eq!(spec.outputs.len(), 4);
                assert_eq!(spec.outputs[0].frame, spec.outputs[1].frame);
                assert_eq!(
                    spec.outputs[2].frame,
                    WindowFrame::Documents {
                        lower: FrameBound::Offset(-1.0),
                        upper: FrameBound::Current
                    }
                );
                assert_eq!(
                    spec.outputs[2].function,
                    WindowFunction::Derivative { unit: Some(TimeUnit::Day) }
                );
            }
            other => panic!("unexpected stage {:?}", other),
        }
    }

    #[test]
    fn test_rank_requires_sort() {
        config_error(json!([{"$setWindowFields": {"output": {"r": {"$rank": {}}}}}]));
    }

    #[test]
    fn test_window_bounds_ordered() {
        config_error(json!([{"$setWindowFields": {
            "sortBy": {"d": 1},
            "output": {"s": {"$sum": "$x", "window": {"documents": [2, -2]}}}
        }}]));
    }

    #[test]
    fn test_limit_and_skip() {
        config_error(json!([{"$limit": 0}]));
        config_error(json!([{"$skip": -1}]));
        assert!(plan(json!([{"$skip": 0}, {"$limit": 2.0}])).is_ok());
    }

    #[test]
    fn test_lookup_forms() {
        let pipeline = plan(json!([{"$lookup": {
            "from": "globalClimate",
            "let": {"event_date": "$date"},
            "pipeline": [{"$match": {"$expr": {"$eq": ["$date", "$$event_date"]}}}],
            "as": "related"
        }}]))
        .unwrap();
        assert_eq!(pipeline.referenced_collections(), vec!["globalClimate".to_string()]);

        config_error(json!([{"$lookup": {"from": "x", "localField": "a", "as": "y"}}]));
        config_error(json!([{"$lookup": {"from": "x", "as": "y"}}]));
    }

    #[test]
    fn test_densify_and_fill() {
        let pipeline = plan(json!([
            {"$densify": {"field": "date_obj", "range": {"step": 1, "unit": "month", "bounds": "full"}}},
            {"$fill": {"output": {"temperature_c": {"method": "locf"}, "location": {"value": "Ostrava"}}}}
        ]))
        .unwrap();
        assert_eq!(pipeline.len(), 2);

        config_error(json!([{"$densify": {"field": "d", "range": {"step": 0, "bounds": "full"}}}]));
        config_error(json!([{"$fill": {"output": {"t": {"method": "linear"}}}}]));
    }

    #[test]
    fn test_count_name_validated() {
        config_error(json!([{"$count": "$n"}]));
        assert!(plan(json!([{"$count": "total"}])).is_ok());
    }

    #[test]
    fn test_plan_str_rejects_bad_json() {
        let err = QueryPlanner::new().plan_str("[{").unwrap_err();
        assert_eq!(err.code(), PlannerErrorCode::StratusQueryInvalid);
    }
}
