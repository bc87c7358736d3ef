//! Expression evaluation
//!
//! One recursive visitor over [`Expression`]. Coercion rules:
//!
//! - a missing field evaluates to Null
//! - arithmetic with a Null operand, or division by zero, yields Null
//! - any other operand type the operator cannot use is an
//!   [`ExpressionError::TypeMismatch`]

use std::cmp::Ordering;

use indexmap::IndexSet;

use super::ast::{Expression, Operator};
use super::dates::{self, DEFAULT_FORMAT};
use super::errors::{ExprResult, ExpressionError};
use super::variables::Variables;
use crate::stats::{classify_anomaly, exponential_smoothing, pearson_correlation, RunningStats};
use crate::value::{compare_values, get_value_path, Document, Value};

impl Expression {
    /// Evaluates this expression against `doc` with the given variables in scope
    pub fn evaluate(&self, doc: &Document, vars: &Variables<'_>) -> ExprResult<Value> {
        evaluate(self, doc, vars)
    }
}

pub fn evaluate(expr: &Expression, doc: &Document, vars: &Variables<'_>) -> ExprResult<Value> {
    match expr {
        Expression::Literal(v) => Ok(v.clone()),
        Expression::Field(path) => Ok(doc.lookup(path)),
        Expression::Variable { name, path } => resolve_variable(name, path.as_deref(), doc, vars),
        Expression::Object(fields) => {
            let mut out = Document::with_capacity(fields.len());
            for (key, e) in fields {
                out.insert(key.clone(), evaluate(e, doc, vars)?);
            }
            Ok(Value::Object(out))
        }
        Expression::Array(items) => Ok(Value::Array(
            items
                .iter()
                .map(|e| evaluate(e, doc, vars))
                .collect::<ExprResult<_>>()?,
        )),
        Expression::Op { op, args } => apply(*op, args, doc, vars),
        Expression::Switch { branches, default } => {
            for (case, then) in branches {
                if evaluate(case, doc, vars)?.is_truthy() {
                    return evaluate(then, doc, vars);
                }
            }
            match default {
                Some(d) => evaluate(d, doc, vars),
                None => Err(ExpressionError::NoMatchingBranch),
            }
        }
        Expression::Let { vars: bindings, body } => {
            let values = bindings
                .iter()
                .map(|(name, e)| Ok((name.clone(), evaluate(e, doc, vars)?)))
                .collect::<ExprResult<Vec<_>>>()?;
            let scope = vars.child(values);
            evaluate(body, doc, &scope)
        }
        Expression::Filter { input, alias, cond, limit } => {
            let Some(items) = array_input("$filter", evaluate(input, doc, vars)?)? else {
                return Ok(Value::Null);
            };
            let limit = match limit {
                Some(l) => match evaluate(l, doc, vars)? {
                    Value::Number(n) if n >= 1.0 => Some(n as usize),
                    Value::Null => None,
                    other => {
                        return Err(mismatch("$filter", "limit must be a positive number", &[&other]))
                    }
                },
                None => None,
            };
            let mut out = Vec::new();
            for item in items {
                let scope = vars.bind(alias.as_str(), item.clone());
                if evaluate(cond, doc, &scope)?.is_truthy() {
                    out.push(item);
                    if limit.is_some_and(|l| out.len() >= l) {
                        break;
                    }
                }
            }
            Ok(Value::Array(out))
        }
        Expression::Map { input, alias, body } => {
            let Some(items) = array_input("$map", evaluate(input, doc, vars)?)? else {
                return Ok(Value::Null);
            };
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                let scope = vars.bind(alias.as_str(), item);
                out.push(evaluate(body, doc, &scope)?);
            }
            Ok(Value::Array(out))
        }
        Expression::Reduce { input, initial, body } => {
            let Some(items) = array_input("$reduce", evaluate(input, doc, vars)?)? else {
                return Ok(Value::Null);
            };
            let mut acc = evaluate(initial, doc, vars)?;
            for item in items {
                // fresh scope per element; nothing is shared between iterations
                let scope = vars.child(vec![("value".to_string(), acc), ("this".to_string(), item)]);
                acc = evaluate(body, doc, &scope)?;
            }
            Ok(acc)
        }
        Expression::DateFromString { input, format, on_error, on_null } => {
            let raw = evaluate(input, doc, vars)?;
            let text = match raw {
                Value::Null => {
                    return match on_null {
                        Some(e) => evaluate(e, doc, vars),
                        None => Ok(Value::Null),
                    }
                }
                Value::String(s) => s,
                other => {
                    return match on_error {
                        Some(e) => evaluate(e, doc, vars),
                        None => Err(mismatch("$dateFromString", "dateString must be a string", &[&other])),
                    }
                }
            };
            let fmt = match format {
                Some(f) => Some(string_arg("$dateFromString", evaluate(f, doc, vars)?)?),
                None => None,
            };
            match dates::parse_date(&text, fmt.as_deref()) {
                Some(d) => Ok(Value::Date(d)),
                None => match on_error {
                    Some(e) => evaluate(e, doc, vars),
                    None => Err(ExpressionError::InvalidDate(text)),
                },
            }
        }
        Expression::DateToString { date, format, on_null } => {
            let d = match evaluate(date, doc, vars)? {
                Value::Null => {
                    return match on_null {
                        Some(e) => evaluate(e, doc, vars),
                        None => Ok(Value::Null),
                    }
                }
                Value::Date(d) => d,
                other => return Err(mismatch("$dateToString", "date must be a date", &[&other])),
            };
            let fmt = match format {
                Some(f) => string_arg("$dateToString", evaluate(f, doc, vars)?)?,
                None => DEFAULT_FORMAT.to_string(),
            };
            Ok(Value::String(dates::format_date(d, &fmt)))
        }
        Expression::DateAdd { start, unit, amount, negate } => {
            let op = if *negate { "$dateSubtract" } else { "$dateAdd" };
            let start = evaluate(start, doc, vars)?;
            let amount = evaluate(amount, doc, vars)?;
            match (start, amount) {
                (Value::Null, _) | (_, Value::Null) => Ok(Value::Null),
                (Value::Date(d), Value::Number(n)) if n.fract() == 0.0 => {
                    let n = if *negate { -(n as i64) } else { n as i64 };
                    dates::add_units(d, *unit, n)
                        .map(Value::Date)
                        .ok_or_else(|| ExpressionError::InvalidDate(format!("{} overflowed", op)))
                }
                (a, b) => Err(mismatch(op, "expects a date and an integral amount", &[&a, &b])),
            }
        }
        Expression::DateDiff { start, end, unit } => {
            match (evaluate(start, doc, vars)?, evaluate(end, doc, vars)?) {
                (Value::Null, _) | (_, Value::Null) => Ok(Value::Null),
                (Value::Date(a), Value::Date(b)) => {
                    Ok(Value::Number(dates::date_diff(a, b, *unit) as f64))
                }
                (a, b) => Err(mismatch("$dateDiff", "expects two dates", &[&a, &b])),
            }
        }
        Expression::Smoothing { input, alpha } => {
            let Some(items) = array_input("$expSmoothing", evaluate(input, doc, vars)?)? else {
                return Ok(Value::Null);
            };
            let series: Vec<f64> = items.iter().filter_map(Value::as_f64).collect();
            Ok(match exponential_smoothing(&series, *alpha) {
                Some(s) => {
                    let mut out = Document::with_capacity(3);
                    out.insert("smoothed", Value::from(s.smoothed));
                    out.insert("forecast", s.forecast_next);
                    out.insert("mse", s.mse);
                    Value::Object(out)
                }
                None => Value::Null,
            })
        }
        Expression::Anomaly { value, mean, stddev, k } => {
            let v = evaluate(value, doc, vars)?;
            let m = evaluate(mean, doc, vars)?;
            let s = evaluate(stddev, doc, vars)?;
            match (&v, &m, &s) {
                (Value::Number(v), Value::Number(m), Value::Number(s)) => {
                    Ok(Value::Bool(classify_anomaly(*v, *m, *s, *k)))
                }
                _ if v.is_null() || m.is_null() || s.is_null() => Ok(Value::Null),
                _ => Err(mismatch("$isAnomaly", "expects numbers", &[&v, &m, &s])),
            }
        }
    }
}

fn resolve_variable(
    name: &str,
    path: Option<&str>,
    doc: &Document,
    vars: &Variables<'_>,
) -> ExprResult<Value> {
    let base = match name {
        "ROOT" | "CURRENT" => {
            return Ok(match path {
                Some(p) => doc.lookup(p),
                None => Value::Object(doc.clone()),
            })
        }
        _ => vars
            .get(name)
            .ok_or_else(|| ExpressionError::UndefinedVariable(name.to_string()))?,
    };
    Ok(match path {
        Some(p) => get_value_path(base, p).unwrap_or(Value::Null),
        None => base.clone(),
    })
}

fn mismatch(op: &str, what: &str, values: &[&Value]) -> ExpressionError {
    let types: Vec<&str> = values.iter().map(|v| v.type_name()).collect();
    ExpressionError::type_mismatch(op, format!("{} (got {})", what, types.join(", ")))
}

/// Unwraps an array operand; Null passes through as `None`
fn array_input(op: &str, value: Value) -> ExprResult<Option<Vec<Value>>> {
    match value {
        Value::Array(items) => Ok(Some(items)),
        Value::Null => Ok(None),
        other => Err(mismatch(op, "expects an array", &[&other])),
    }
}

fn string_arg(op: &str, value: Value) -> ExprResult<String> {
    match value {
        Value::String(s) => Ok(s),
        other => Err(mismatch(op, "expects a string", &[&other])),
    }
}

fn integer_arg(op: &str, value: &Value) -> ExprResult<i64> {
    match value {
        Value::Number(n) if n.fract() == 0.0 => Ok(*n as i64),
        other => Err(mismatch(op, "expects an integer", &[other])),
    }
}

fn apply(op: Operator, args: &[Expression], doc: &Document, vars: &Variables<'_>) -> ExprResult<Value> {
    // Short-circuiting operators evaluate their arguments lazily.
    match op {
        Operator::And => {
            for a in args {
                if !evaluate(a, doc, vars)?.is_truthy() {
                    return Ok(Value::Bool(false));
                }
            }
            return Ok(Value::Bool(true));
        }
        Operator::Or => {
            for a in args {
                if evaluate(a, doc, vars)?.is_truthy() {
                    return Ok(Value::Bool(true));
                }
            }
            return Ok(Value::Bool(false));
        }
        Operator::IfNull => {
            let (last, rest) = args
                .split_last()
                .ok_or_else(|| ExpressionError::syntax("$ifNull requires arguments"))?;
            for a in rest {
                let v = evaluate(a, doc, vars)?;
                if !v.is_null() {
                    return Ok(v);
                }
            }
            return evaluate(last, doc, vars);
        }
        _ => {}
    }

    let values = args
        .iter()
        .map(|a| evaluate(a, doc, vars))
        .collect::<ExprResult<Vec<_>>>()?;
    apply_values(op, values)
}

fn apply_values(op: Operator, mut v: Vec<Value>) -> ExprResult<Value> {
    let name = op.name();
    match op {
        Operator::Add => add(v),
        Operator::Subtract => subtract(&v[0], &v[1]),
        Operator::Multiply => {
            let mut product = 1.0;
            for x in &v {
                match x {
                    Value::Null => return Ok(Value::Null),
                    Value::Number(n) => product *= n,
                    other => return Err(mismatch(name, "expects numbers", &[other])),
                }
            }
            Ok(Value::Number(product))
        }
        Operator::Divide | Operator::Mod | Operator::Pow => match (&v[0], &v[1]) {
            (Value::Null, _) | (_, Value::Null) => Ok(Value::Null),
            (Value::Number(a), Value::Number(b)) => Ok(match op {
                Operator::Divide if *b == 0.0 => Value::Null,
                Operator::Divide => Value::Number(a / b),
                Operator::Mod if *b == 0.0 => Value::Null,
                Operator::Mod => Value::Number(a % b),
                _ => Value::Number(a.powf(*b)),
            }),
            (a, b) => Err(mismatch(name, "expects numbers", &[a, b])),
        },
        Operator::Abs | Operator::Ceil | Operator::Floor | Operator::Sqrt | Operator::Ln | Operator::Log10 => {
            match &v[0] {
                Value::Null => Ok(Value::Null),
                Value::Number(n) => unary_math(op, *n),
                other => Err(mismatch(name, "expects a number", &[other])),
            }
        }
        Operator::Round | Operator::Trunc => {
            let places = match v.get(1) {
                Some(p) => integer_arg(name, p)?,
                None => 0,
            };
            match &v[0] {
                Value::Null => Ok(Value::Null),
                Value::Number(n) => {
                    let factor = 10f64.powi(places as i32);
                    let scaled = n * factor;
                    let rounded = if op == Operator::Round {
                        scaled.round_ties_even()
                    } else {
                        scaled.trunc()
                    };
                    Ok(Value::Number(rounded / factor))
                }
                other => Err(mismatch(name, "expects a number", &[other])),
            }
        }

        Operator::Eq => Ok(Value::Bool(v[0] == v[1])),
        Operator::Ne => Ok(Value::Bool(v[0] != v[1])),
        Operator::Gt | Operator::Gte | Operator::Lt | Operator::Lte => {
            let ord = compare_values(&v[0], &v[1]);
            Ok(Value::Bool(match op {
                Operator::Gt => ord == Ordering::Greater,
                Operator::Gte => ord != Ordering::Less,
                Operator::Lt => ord == Ordering::Less,
                _ => ord != Ordering::Greater,
            }))
        }
        Operator::Cmp => Ok(Value::Number(match compare_values(&v[0], &v[1]) {
            Ordering::Less => -1.0,
            Ordering::Equal => 0.0,
            Ordering::Greater => 1.0,
        })),
        Operator::Not => Ok(Value::Bool(!v[0].is_truthy())),
        // evaluated lazily in `apply`
        Operator::And | Operator::Or | Operator::IfNull => Ok(Value::Null),

        Operator::Concat => {
            let mut out = String::new();
            for x in &v {
                match x {
                    Value::Null => return Ok(Value::Null),
                    Value::String(s) => out.push_str(s),
                    other => return Err(mismatch(name, "expects strings", &[other])),
                }
            }
            Ok(Value::String(out))
        }
        Operator::Substr => {
            let text = match &v[0] {
                Value::Null => String::new(),
                Value::String(s) => s.clone(),
                Value::Number(n) => Value::format_number(*n),
                Value::Date(d) => dates::format_date(*d, DEFAULT_FORMAT),
                other => return Err(mismatch(name, "expects a string", &[other])),
            };
            let start = integer_arg(name, &v[1])?.max(0) as usize;
            let len = integer_arg(name, &v[2])?;
            let chars = text.chars().skip(start);
            Ok(Value::String(if len < 0 {
                chars.collect()
            } else {
                chars.take(len as usize).collect()
            }))
        }
        Operator::ToString => Ok(match &v[0] {
            Value::Null => Value::Null,
            Value::String(s) => Value::String(s.clone()),
            Value::Number(n) => Value::String(Value::format_number(*n)),
            Value::Bool(b) => Value::String(b.to_string()),
            Value::Date(d) => Value::String(dates::format_date(*d, DEFAULT_FORMAT)),
            other => return Err(mismatch(name, "cannot convert to string", &[other])),
        }),
        Operator::ToUpper | Operator::ToLower => match &v[0] {
            Value::Null => Ok(Value::String(String::new())),
            Value::String(s) if op == Operator::ToUpper => Ok(Value::String(s.to_uppercase())),
            Value::String(s) => Ok(Value::String(s.to_lowercase())),
            other => Err(mismatch(name, "expects a string", &[other])),
        },

        Operator::Type => Ok(Value::from(v[0].type_name())),
        Operator::ToDouble => match &v[0] {
            Value::Null => Ok(Value::Null),
            Value::Number(n) => Ok(Value::Number(*n)),
            Value::Bool(b) => Ok(Value::Number(if *b { 1.0 } else { 0.0 })),
            Value::Date(d) => Ok(Value::Number(d.timestamp_millis() as f64)),
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .map(Value::Number)
                .map_err(|_| mismatch(name, "unparseable string", &[&v[0]])),
            other => Err(mismatch(name, "cannot convert to double", &[other])),
        },
        Operator::IsArray => Ok(Value::Bool(matches!(v[0], Value::Array(_)))),
        Operator::IsNumber => Ok(Value::Bool(matches!(v[0], Value::Number(_)))),

        Operator::Size => match array_input(name, v.swap_remove(0))? {
            Some(items) => Ok(Value::Number(items.len() as f64)),
            None => Ok(Value::Null),
        },
        Operator::ArrayElemAt => {
            let index = match &v[1] {
                Value::Null => return Ok(Value::Null),
                other => integer_arg(name, other)?,
            };
            let Some(items) = array_input(name, v.swap_remove(0))? else {
                return Ok(Value::Null);
            };
            let len = items.len() as i64;
            let idx = if index < 0 { len + index } else { index };
            Ok(if idx >= 0 && idx < len {
                items[idx as usize].clone()
            } else {
                Value::Null
            })
        }
        Operator::Slice => {
            let rest: Vec<i64> = v[1..]
                .iter()
                .map(|x| integer_arg(name, x))
                .collect::<ExprResult<_>>()?;
            let Some(items) = array_input(name, v.swap_remove(0))? else {
                return Ok(Value::Null);
            };
            Ok(Value::Array(slice(items, &rest, name)?))
        }
        Operator::In => match &v[1] {
            Value::Array(items) => Ok(Value::Bool(items.contains(&v[0]))),
            other => Err(mismatch(name, "second argument must be an array", &[other])),
        },
        Operator::ConcatArrays => {
            let mut out = Vec::new();
            for x in v {
                match array_input(name, x)? {
                    Some(items) => out.extend(items),
                    None => return Ok(Value::Null),
                }
            }
            Ok(Value::Array(out))
        }
        Operator::Range => {
            let start = integer_arg(name, &v[0])?;
            let end = integer_arg(name, &v[1])?;
            let step = match v.get(2) {
                Some(s) => integer_arg(name, s)?,
                None => 1,
            };
            if step == 0 {
                return Err(ExpressionError::type_mismatch(name, "step must not be zero"));
            }
            let mut out = Vec::new();
            let mut i = start;
            while (step > 0 && i < end) || (step < 0 && i > end) {
                out.push(Value::Number(i as f64));
                i += step;
            }
            Ok(Value::Array(out))
        }
        Operator::First | Operator::Last => {
            let Some(mut items) = array_input(name, v.swap_remove(0))? else {
                return Ok(Value::Null);
            };
            let picked = if op == Operator::First {
                (!items.is_empty()).then(|| items.swap_remove(0))
            } else {
                items.pop()
            };
            Ok(picked.unwrap_or(Value::Null))
        }
        Operator::ReverseArray => match array_input(name, v.swap_remove(0))? {
            Some(mut items) => {
                items.reverse();
                Ok(Value::Array(items))
            }
            None => Ok(Value::Null),
        },

        Operator::SetUnion | Operator::SetIntersection | Operator::SetDifference | Operator::SetIsSubset => {
            let mut sets = Vec::with_capacity(v.len());
            for x in v {
                match array_input(name, x)? {
                    Some(items) => sets.push(items.into_iter().collect::<IndexSet<Value>>()),
                    None => return Ok(Value::Null),
                }
            }
            set_operation(op, sets)
        }

        Operator::Sum | Operator::Avg | Operator::Min | Operator::Max | Operator::StdDevPop => {
            let inputs = if v.len() == 1 {
                match v.swap_remove(0) {
                    Value::Array(items) => items,
                    single => vec![single],
                }
            } else {
                v
            };
            Ok(reduce_values(op, inputs))
        }

        Operator::Pearson => {
            let (Some(xs), Some(ys)) = (
                array_input(name, v.swap_remove(0))?,
                array_input(name, v.swap_remove(0))?,
            ) else {
                return Ok(Value::Null);
            };
            let (xs, ys): (Vec<f64>, Vec<f64>) = xs
                .iter()
                .zip(ys.iter())
                .filter_map(|(x, y)| Some((x.as_f64()?, y.as_f64()?)))
                .unzip();
            Ok(pearson_correlation(&xs, &ys).into())
        }

        Operator::DatePart(part) => match &v[0] {
            Value::Null => Ok(Value::Null),
            Value::Date(d) => Ok(Value::Number(part.extract(*d) as f64)),
            other => Err(mismatch(name, "expects a date", &[other])),
        },
    }
}

fn add(values: Vec<Value>) -> ExprResult<Value> {
    let mut total = 0.0;
    let mut date = None;
    for x in &values {
        match x {
            Value::Null => return Ok(Value::Null),
            Value::Number(n) => total += n,
            Value::Date(d) if date.is_none() => date = Some(*d),
            other => return Err(mismatch("$add", "expects numbers and at most one date", &[other])),
        }
    }
    match date {
        Some(d) => Value::date_from_millis(d.timestamp_millis() + total as i64)
            .ok_or_else(|| ExpressionError::InvalidDate("$add overflowed".into())),
        None => Ok(Value::Number(total)),
    }
}

fn subtract(a: &Value, b: &Value) -> ExprResult<Value> {
    match (a, b) {
        (Value::Null, _) | (_, Value::Null) => Ok(Value::Null),
        (Value::Number(x), Value::Number(y)) => Ok(Value::Number(x - y)),
        (Value::Date(x), Value::Date(y)) => {
            Ok(Value::Number((x.timestamp_millis() - y.timestamp_millis()) as f64))
        }
        (Value::Date(x), Value::Number(ms)) => Value::date_from_millis(x.timestamp_millis() - *ms as i64)
            .ok_or_else(|| ExpressionError::InvalidDate("$subtract overflowed".into())),
        (a, b) => Err(mismatch("$subtract", "unsupported operands", &[a, b])),
    }
}

fn unary_math(op: Operator, n: f64) -> ExprResult<Value> {
    let out = match op {
        Operator::Abs => n.abs(),
        Operator::Ceil => n.ceil(),
        Operator::Floor => n.floor(),
        Operator::Sqrt if n < 0.0 => {
            return Err(ExpressionError::type_mismatch("$sqrt", "argument must be >= 0"))
        }
        Operator::Sqrt => n.sqrt(),
        Operator::Ln | Operator::Log10 if n <= 0.0 => {
            return Err(ExpressionError::type_mismatch(op.name(), "argument must be > 0"))
        }
        Operator::Ln => n.ln(),
        _ => n.log10(),
    };
    Ok(Value::Number(out))
}

fn slice(items: Vec<Value>, args: &[i64], name: &str) -> ExprResult<Vec<Value>> {
    let len = items.len() as i64;
    let (start, count) = match *args {
        [n] if n >= 0 => (0, n),
        [n] => ((len + n).max(0), -n),
        [pos, n] => {
            if n <= 0 {
                return Err(ExpressionError::type_mismatch(name, "count must be positive"));
            }
            let start = if pos < 0 { (len + pos).max(0) } else { pos.min(len) };
            (start, n)
        }
        _ => (0, len),
    };
    Ok(items
        .into_iter()
        .skip(start as usize)
        .take(count as usize)
        .collect())
}

fn set_operation(op: Operator, mut sets: Vec<IndexSet<Value>>) -> ExprResult<Value> {
    let to_array = |s: IndexSet<Value>| Value::Array(s.into_iter().collect());
    Ok(match op {
        Operator::SetUnion => {
            let mut out = IndexSet::new();
            for s in sets {
                out.extend(s);
            }
            to_array(out)
        }
        Operator::SetIntersection => {
            let first = sets.remove(0);
            to_array(
                first
                    .into_iter()
                    .filter(|x| sets.iter().all(|s| s.contains(x)))
                    .collect(),
            )
        }
        Operator::SetDifference => {
            let other = sets.pop().unwrap_or_default();
            let first = sets.pop().unwrap_or_default();
            to_array(first.into_iter().filter(|x| !other.contains(x)).collect())
        }
        _ => {
            let superset = sets.pop().unwrap_or_default();
            let subset = sets.pop().unwrap_or_default();
            Value::Bool(subset.iter().all(|x| superset.contains(x)))
        }
    })
}

/// Array reductions shared by `$sum`, `$avg`, `$min`, `$max` and `$stdDevPop`
fn reduce_values(op: Operator, inputs: Vec<Value>) -> Value {
    match op {
        Operator::Sum => Value::Number(inputs.iter().filter_map(Value::as_f64).sum()),
        Operator::Avg | Operator::StdDevPop => {
            let stats: RunningStats = inputs.iter().filter_map(Value::as_f64).collect();
            let out = if op == Operator::Avg {
                stats.mean()
            } else {
                stats.stddev_pop()
            };
            out.into()
        }
        _ => {
            let wanted = if op == Operator::Min {
                Ordering::Less
            } else {
                Ordering::Greater
            };
            inputs
                .into_iter()
                .filter(|x| !x.is_null())
                .reduce(|best, x| {
                    if compare_values(&x, &best) == wanted {
                        x
                    } else {
                        best
                    }
                })
                .unwrap_or(Value::Null)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::parse_expression;
    use serde_json::json;

    fn eval_in(expr: serde_json::Value, doc: serde_json::Value) -> ExprResult<Value> {
        let expr = parse_expression(&expr)?;
        let doc = Document::from_json(doc).unwrap();
        expr.evaluate(&doc, &Variables::new())
    }

    fn eval(expr: serde_json::Value) -> Value {
        eval_in(expr, json!({})).unwrap()
    }

    #[test]
    fn test_missing_field_is_null() {
        assert_eq!(eval(json!("$nope")), Value::Null);
        assert_eq!(eval(json!({"$add": ["$nope", 1]})), Value::Null);
    }

    #[test]
    fn test_divide_by_zero_is_null() {
        assert_eq!(eval(json!({"$divide": [10, 0]})), Value::Null);
        assert_eq!(eval(json!({"$mod": [10, 0]})), Value::Null);
        assert_eq!(eval(json!({"$divide": [10, 4]})), Value::Number(2.5));
    }

    #[test]
    fn test_type_mismatch_is_error() {
        let err = eval_in(json!({"$add": ["abc", [1]]}), json!({})).unwrap_err();
        assert!(matches!(err, ExpressionError::TypeMismatch { .. }));
    }

    #[test]
    fn test_switch_first_true_branch_wins() {
        let expr = json!({"$switch": {
            "branches": [
                {"case": {"$gte": ["$t", 25]}, "then": "hot"},
                {"case": {"$gte": ["$t", 10]}, "then": "mild"},
                {"case": {"$gte": ["$t", 20]}, "then": "never"}
            ],
            "default": "cold"
        }});
        assert_eq!(eval_in(expr.clone(), json!({"t": 22})).unwrap(), Value::from("mild"));
        assert_eq!(eval_in(expr.clone(), json!({"t": 30})).unwrap(), Value::from("hot"));
        assert_eq!(eval_in(expr, json!({"t": -3})).unwrap(), Value::from("cold"));
    }

    #[test]
    fn test_switch_without_default_errors() {
        let expr = json!({"$switch": {"branches": [{"case": false, "then": 1}]}});
        assert_eq!(eval_in(expr, json!({})).unwrap_err(), ExpressionError::NoMatchingBranch);
    }

    #[test]
    fn test_reduce_binds_value_and_this() {
        let expr = json!({"$reduce": {
            "input": [1, 2, 3, 4],
            "initialValue": {"sum": 0, "count": 0},
            "in": {
                "sum": {"$add": ["$$value.sum", "$$this"]},
                "count": {"$add": ["$$value.count", 1]}
            }
        }});
        assert_eq!(eval(expr), Value::from(json!({"sum": 10, "count": 4})));
    }

    #[test]
    fn test_filter_and_map() {
        let doc = json!({"temps": [5, 12, 18, 3]});
        let filtered = eval_in(
            json!({"$filter": {"input": "$temps", "as": "t", "cond": {"$gt": ["$$t", 10]}}}),
            doc.clone(),
        )
        .unwrap();
        assert_eq!(filtered, Value::from(json!([12, 18])));

        let mapped = eval_in(
            json!({"$map": {"input": "$temps", "as": "t", "in": {"$multiply": ["$$t", 2]}}}),
            doc,
        )
        .unwrap();
        assert_eq!(mapped, Value::from(json!([10, 24, 36, 6])));
    }

    #[test]
    fn test_let_scope_does_not_leak() {
        let expr = json!({"$let": {"vars": {"x": 2}, "in": {"$multiply": ["$$x", 3]}}});
        assert_eq!(eval(expr), Value::Number(6.0));
        let err = eval_in(json!("$$x"), json!({})).unwrap_err();
        assert_eq!(err, ExpressionError::UndefinedVariable("x".into()));
    }

    #[test]
    fn test_round_half_to_even() {
        assert_eq!(eval(json!({"$round": [2.5, 0]})), Value::Number(2.0));
        assert_eq!(eval(json!({"$round": [3.5]})), Value::Number(4.0));
        assert_eq!(eval(json!({"$round": [14.123, 1]})), Value::Number(14.1));
    }

    #[test]
    fn test_slice_positive_and_negative() {
        assert_eq!(eval(json!({"$slice": [[1, 2, 3, 4], 2]})), Value::from(json!([1, 2])));
        assert_eq!(eval(json!({"$slice": [[1, 2, 3, 4], -2]})), Value::from(json!([3, 4])));
        assert_eq!(eval(json!({"$slice": [[1, 2, 3, 4], 1, 2]})), Value::from(json!([2, 3])));
    }

    #[test]
    fn test_set_operations() {
        assert_eq!(
            eval(json!({"$setUnion": [["a", "b"], ["b", "c"]]})),
            Value::from(json!(["a", "b", "c"]))
        );
        assert_eq!(
            eval(json!({"$setIntersection": [["a", "b", "c"], ["c", "a"]]})),
            Value::from(json!(["a", "c"]))
        );
        assert_eq!(
            eval(json!({"$setDifference": [["a", "b", "c"], ["b"]]})),
            Value::from(json!(["a", "c"]))
        );
        assert_eq!(eval(json!({"$setIsSubset": [["a"], ["a", "b"]]})), Value::Bool(true));
    }

    #[test]
    fn test_dates_round_trip() {
        let doc = json!({"date": "2021-03-15"});
        let expr = json!({"$dateToString": {
            "format": "%Y-%m",
            "date": {"$dateFromString": {"dateString": "$date", "format": "%Y-%m-%d"}}
        }});
        assert_eq!(eval_in(expr, doc).unwrap(), Value::from("2021-03"));
    }

    #[test]
    fn test_date_subtraction_in_millis() {
        let expr = json!({"$subtract": [
            {"$dateFromString": {"dateString": "2021-01-02"}},
            {"$dateFromString": {"dateString": "2021-01-01"}}
        ]});
        assert_eq!(eval(expr), Value::Number(86_400_000.0));
    }

    #[test]
    fn test_unparseable_date_uses_on_error() {
        let expr = json!({"$dateFromString": {"dateString": "garbage", "onError": null}});
        assert_eq!(eval(expr), Value::Null);
        let strict = json!({"$dateFromString": {"dateString": "garbage"}});
        assert!(matches!(
            eval_in(strict, json!({})).unwrap_err(),
            ExpressionError::InvalidDate(_)
        ));
    }

    #[test]
    fn test_array_reductions() {
        assert_eq!(eval(json!({"$avg": [[10, 15, 20]]})), Value::Number(15.0));
        assert_eq!(eval(json!({"$max": [3, 9, 4]})), Value::Number(9.0));
        assert_eq!(eval(json!({"$min": [[null, 7, 2]]})), Value::Number(2.0));
        let sd = eval(json!({"$stdDevPop": [[1, 2, 3, 4, 5]]})).as_f64().unwrap();
        assert!((sd - 2f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_statistics_operators() {
        let r = eval(json!({"$pearson": [[1, 2, 3], [2, 4, 6]]})).as_f64().unwrap();
        assert!((r - 1.0).abs() < 1e-12);
        assert_eq!(eval(json!({"$pearson": [[5, 5, 5], [1, 2, 3]]})), Value::Null);

        let s = eval(json!({"$expSmoothing": {"input": [10, 20], "alpha": 0.3}}));
        let s = s.as_object().unwrap();
        assert_eq!(s.get("forecast"), Some(&Value::Number(13.0)));

        assert_eq!(
            eval(json!({"$isAnomaly": {"value": 40, "mean": 15, "stddev": 5}})),
            Value::Bool(true)
        );
    }

    #[test]
    fn test_to_string_renders_whole_numbers() {
        assert_eq!(eval(json!({"$toString": 10.0})), Value::from("10"));
        assert_eq!(eval(json!({"$concat": ["T=", {"$toString": 12.5}]})), Value::from("T=12.5"));
    }

    #[test]
    fn test_root_variable() {
        let out = eval_in(json!("$$ROOT.location"), json!({"location": "Prague"})).unwrap();
        assert_eq!(out, Value::from("Prague"));
    }
}
