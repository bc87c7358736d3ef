//! JSON expression grammar
//!
//! - `"$a.b"` is a field path, `"$$name.path"` a variable reference
//! - `{"$op": [args]}` or `{"$op": arg}` applies an operator
//! - objects without `$` keys are object literals
//! - anything else is a literal
//!
//! Operator arity is checked here, so malformed expressions are rejected
//! before any document is read.

use serde_json::{Map, Value as Json};

use super::ast::{Expression, Operator};
use super::dates::TimeUnit;
use super::errors::{ExprResult, ExpressionError};
use crate::stats::DEFAULT_K;
use crate::value::Value;

/// Parses a JSON expression
pub fn parse_expression(json: &Json) -> ExprResult<Expression> {
    match json {
        Json::String(s) => Ok(parse_string(s)),
        Json::Array(items) => Ok(Expression::Array(
            items.iter().map(parse_expression).collect::<ExprResult<_>>()?,
        )),
        Json::Object(map) => parse_object(map),
        other => Ok(Expression::Literal(Value::from(other.clone()))),
    }
}

fn parse_string(s: &str) -> Expression {
    if let Some(var) = s.strip_prefix("$$") {
        let (name, path) = match var.split_once('.') {
            Some((n, p)) => (n.to_string(), Some(p.to_string())),
            None => (var.to_string(), None),
        };
        Expression::Variable { name, path }
    } else if let Some(path) = s.strip_prefix('$') {
        Expression::Field(path.to_string())
    } else {
        Expression::Literal(Value::String(s.to_string()))
    }
}

fn parse_object(map: &Map<String, Json>) -> ExprResult<Expression> {
    let operator_keys = map.keys().filter(|k| k.starts_with('$')).count();

    if operator_keys == 0 {
        let fields = map
            .iter()
            .map(|(k, v)| Ok((k.clone(), parse_expression(v)?)))
            .collect::<ExprResult<_>>()?;
        return Ok(Expression::Object(fields));
    }

    if map.len() != 1 {
        return Err(ExpressionError::syntax(format!(
            "an operator object must have exactly one key, found {:?}",
            map.keys().collect::<Vec<_>>()
        )));
    }

    // exactly one entry, checked above
    let Some((name, arg)) = map.iter().next() else {
        return Err(ExpressionError::syntax("empty operator object"));
    };
    parse_operator(name, arg)
}

fn parse_operator(name: &str, arg: &Json) -> ExprResult<Expression> {
    match name {
        "$literal" => Ok(Expression::Literal(Value::from(arg.clone()))),
        "$cond" => parse_cond(arg),
        "$switch" => parse_switch(arg),
        "$let" => parse_let(arg),
        "$filter" => parse_filter(arg),
        "$map" => parse_map(arg),
        "$reduce" => parse_reduce(arg),
        "$dateFromString" => parse_date_from_string(arg),
        "$dateToString" => parse_date_to_string(arg),
        "$dateAdd" => parse_date_add(name, arg, false),
        "$dateSubtract" => parse_date_add(name, arg, true),
        "$dateDiff" => parse_date_diff(arg),
        "$expSmoothing" => parse_smoothing(arg),
        "$isAnomaly" => parse_anomaly(arg),
        _ => {
            let op = Operator::from_name(name)
                .ok_or_else(|| ExpressionError::UnknownOperator(name.to_string()))?;
            let args = parse_args(op, arg)?;
            let arity = op.arity();
            if !arity.accepts(args.len()) {
                return Err(ExpressionError::InvalidArity {
                    op: name.to_string(),
                    expected: arity.to_string(),
                    found: args.len(),
                });
            }
            Ok(Expression::Op { op, args })
        }
    }
}

fn parse_args(op: Operator, arg: &Json) -> ExprResult<Vec<Expression>> {
    match (op, arg) {
        (_, Json::Array(items)) => items.iter().map(parse_expression).collect(),
        // `{"$year": {"date": "$d"}}` is the long form of `{"$year": "$d"}`
        (Operator::DatePart(_), Json::Object(map)) if map.contains_key("date") => {
            Ok(vec![parse_expression(&map["date"])?])
        }
        (_, single) => Ok(vec![parse_expression(single)?]),
    }
}

fn named<'a>(op: &str, arg: &'a Json) -> ExprResult<&'a Map<String, Json>> {
    arg.as_object()
        .ok_or_else(|| ExpressionError::syntax(format!("{} expects an object argument", op)))
}

fn required(op: &str, map: &Map<String, Json>, key: &str) -> ExprResult<Box<Expression>> {
    let raw = map
        .get(key)
        .ok_or_else(|| ExpressionError::syntax(format!("{} requires '{}'", op, key)))?;
    Ok(Box::new(parse_expression(raw)?))
}

fn optional(map: &Map<String, Json>, key: &str) -> ExprResult<Option<Box<Expression>>> {
    map.get(key)
        .map(|raw| parse_expression(raw).map(Box::new))
        .transpose()
}

fn alias(map: &Map<String, Json>) -> ExprResult<String> {
    match map.get("as") {
        None => Ok("this".to_string()),
        Some(Json::String(s)) => Ok(s.clone()),
        Some(_) => Err(ExpressionError::syntax("'as' must be a string")),
    }
}

fn parse_cond(arg: &Json) -> ExprResult<Expression> {
    let (cond, then, otherwise) = match arg {
        Json::Array(items) if items.len() == 3 => (
            parse_expression(&items[0])?,
            parse_expression(&items[1])?,
            parse_expression(&items[2])?,
        ),
        Json::Array(items) => {
            return Err(ExpressionError::InvalidArity {
                op: "$cond".into(),
                expected: "3".into(),
                found: items.len(),
            })
        }
        Json::Object(map) => (
            *required("$cond", map, "if")?,
            *required("$cond", map, "then")?,
            *required("$cond", map, "else")?,
        ),
        _ => return Err(ExpressionError::syntax("$cond expects an array or object")),
    };
    Ok(Expression::Switch {
        branches: vec![(cond, then)],
        default: Some(Box::new(otherwise)),
    })
}

fn parse_switch(arg: &Json) -> ExprResult<Expression> {
    let map = named("$switch", arg)?;
    let raw_branches = map
        .get("branches")
        .and_then(Json::as_array)
        .ok_or_else(|| ExpressionError::syntax("$switch requires a 'branches' array"))?;

    let branches = raw_branches
        .iter()
        .map(|b| {
            let b = named("$switch branch", b)?;
            Ok((*required("$switch", b, "case")?, *required("$switch", b, "then")?))
        })
        .collect::<ExprResult<Vec<_>>>()?;

    if branches.is_empty() {
        return Err(ExpressionError::syntax("$switch requires at least one branch"));
    }

    Ok(Expression::Switch {
        branches,
        default: optional(map, "default")?,
    })
}

fn parse_let(arg: &Json) -> ExprResult<Expression> {
    let map = named("$let", arg)?;
    let vars = map
        .get("vars")
        .and_then(Json::as_object)
        .ok_or_else(|| ExpressionError::syntax("$let requires a 'vars' object"))?
        .iter()
        .map(|(k, v)| Ok((k.clone(), parse_expression(v)?)))
        .collect::<ExprResult<_>>()?;
    Ok(Expression::Let {
        vars,
        body: required("$let", map, "in")?,
    })
}

fn parse_filter(arg: &Json) -> ExprResult<Expression> {
    let map = named("$filter", arg)?;
    Ok(Expression::Filter {
        input: required("$filter", map, "input")?,
        alias: alias(map)?,
        cond: required("$filter", map, "cond")?,
        limit: optional(map, "limit")?,
    })
}

fn parse_map(arg: &Json) -> ExprResult<Expression> {
    let map = named("$map", arg)?;
    Ok(Expression::Map {
        input: required("$map", map, "input")?,
        alias: alias(map)?,
        body: required("$map", map, "in")?,
    })
}

fn parse_reduce(arg: &Json) -> ExprResult<Expression> {
    let map = named("$reduce", arg)?;
    Ok(Expression::Reduce {
        input: required("$reduce", map, "input")?,
        initial: required("$reduce", map, "initialValue")?,
        body: required("$reduce", map, "in")?,
    })
}

fn parse_date_from_string(arg: &Json) -> ExprResult<Expression> {
    let map = named("$dateFromString", arg)?;
    Ok(Expression::DateFromString {
        input: required("$dateFromString", map, "dateString")?,
        format: optional(map, "format")?,
        on_error: optional(map, "onError")?,
        on_null: optional(map, "onNull")?,
    })
}

fn parse_date_to_string(arg: &Json) -> ExprResult<Expression> {
    let map = named("$dateToString", arg)?;
    Ok(Expression::DateToString {
        date: required("$dateToString", map, "date")?,
        format: optional(map, "format")?,
        on_null: optional(map, "onNull")?,
    })
}

fn parse_unit(op: &str, map: &Map<String, Json>) -> ExprResult<TimeUnit> {
    let raw = map
        .get("unit")
        .and_then(Json::as_str)
        .ok_or_else(|| ExpressionError::syntax(format!("{} requires a string 'unit'", op)))?;
    TimeUnit::parse(raw)
        .ok_or_else(|| ExpressionError::syntax(format!("{}: unknown unit '{}'", op, raw)))
}

fn parse_date_add(op: &str, arg: &Json, negate: bool) -> ExprResult<Expression> {
    let map = named(op, arg)?;
    Ok(Expression::DateAdd {
        start: required(op, map, "startDate")?,
        unit: parse_unit(op, map)?,
        amount: required(op, map, "amount")?,
        negate,
    })
}

fn parse_date_diff(arg: &Json) -> ExprResult<Expression> {
    let map = named("$dateDiff", arg)?;
    Ok(Expression::DateDiff {
        start: required("$dateDiff", map, "startDate")?,
        end: required("$dateDiff", map, "endDate")?,
        unit: parse_unit("$dateDiff", map)?,
    })
}

fn parse_smoothing(arg: &Json) -> ExprResult<Expression> {
    let map = named("$expSmoothing", arg)?;
    let alpha = map
        .get("alpha")
        .and_then(Json::as_f64)
        .ok_or_else(|| ExpressionError::syntax("$expSmoothing requires a numeric 'alpha'"))?;
    if !(alpha > 0.0 && alpha <= 1.0) {
        return Err(ExpressionError::syntax(format!(
            "$expSmoothing: alpha must be in (0, 1], got {}",
            alpha
        )));
    }
    Ok(Expression::Smoothing {
        input: required("$expSmoothing", map, "input")?,
        alpha,
    })
}

fn parse_anomaly(arg: &Json) -> ExprResult<Expression> {
    let map = named("$isAnomaly", arg)?;
    let k = match map.get("k") {
        None => DEFAULT_K,
        Some(raw) => raw
            .as_f64()
            .filter(|k| *k >= 0.0)
            .ok_or_else(|| ExpressionError::syntax("$isAnomaly: 'k' must be a non-negative number"))?,
    };
    Ok(Expression::Anomaly {
        value: required("$isAnomaly", map, "value")?,
        mean: required("$isAnomaly", map, "mean")?,
        stddev: required("$isAnomaly", map, "stddev")?,
        k,
    })
}
