//! `$fill`
//!
//! Replaces null or missing field values within each partition, walking
//! the partition in `sortBy` order when one is given and in input order
//! otherwise.

use indexmap::IndexMap;

use super::context::{eval, ExecutionContext};
use super::errors::{ExecutorError, ExecutorResult};
use super::sorter::ResultSorter;
use crate::expr::Variables;
use crate::planner::{FillMethod, FillSpec};
use crate::value::{Document, Value};

const STAGE: &str = "$fill";

pub fn run_fill(
    spec: &FillSpec,
    input: Vec<Document>,
    ctx: &ExecutionContext<'_>,
    vars: &Variables<'_>,
) -> ExecutorResult<Vec<Document>> {
    let mut partitions: IndexMap<Value, Vec<Document>> = IndexMap::new();
    for doc in input {
        let key = match &spec.partition_by {
            Some(expr) => eval(STAGE, expr, &doc, vars)?,
            None => Value::Null,
        };
        partitions.entry(key).or_default().push(doc);
    }

    let mut out = Vec::new();
    for (_, mut docs) in partitions {
        ctx.check_deadline()?;
        if let Some(sort) = &spec.sort_by {
            ResultSorter::sort(&mut docs, sort);
        }
        for (field, method) in &spec.output {
            match method {
                FillMethod::Value(expr) => {
                    for doc in docs.iter_mut() {
                        if is_gap(doc, field) {
                            let value = eval(STAGE, expr, doc, vars)?;
                            doc.set_path(field, value);
                        }
                    }
                }
                FillMethod::Locf => carry_forward(&mut docs, field),
                FillMethod::Linear => {
                    let axis = spec
                        .sort_by
                        .as_ref()
                        .and_then(|s| s.keys.first())
                        .map(|k| k.path.as_str())
                        .ok_or_else(|| {
                            ExecutorError::stage_config(Some(STAGE), "linear fill requires sortBy")
                        })?;
                    interpolate(&mut docs, field, axis)?;
                }
            }
        }
        out.extend(docs);
    }
    Ok(out)
}

fn is_gap(doc: &Document, field: &str) -> bool {
    matches!(doc.get_path(field), None | Some(Value::Null))
}

/// Last observation carried forward; leading gaps stay as they are
fn carry_forward(docs: &mut [Document], field: &str) {
    let mut last: Option<Value> = None;
    for doc in docs.iter_mut() {
        match doc.get_path(field) {
            Some(value) if !value.is_null() => last = Some(value),
            _ => {
                if let Some(value) = &last {
                    doc.set_path(field, value.clone());
                }
            }
        }
    }
}

/// Linear interpolation between the nearest known neighbours on the sort
/// axis. Gaps before the first or after the last known value stay as they are.
fn interpolate(docs: &mut [Document], field: &str, axis: &str) -> ExecutorResult<()> {
    let mut points: Vec<(Option<f64>, Option<f64>)> = Vec::with_capacity(docs.len());
    for doc in docs.iter() {
        let x = doc.get_path(axis).and_then(|v| v.as_axis());
        let y = match doc.get_path(field) {
            None | Some(Value::Null) => None,
            Some(Value::Number(n)) => Some(n),
            Some(other) => {
                return Err(ExecutorError::execution_failed(
                    STAGE,
                    format!("linear fill of '{}' found a {} value", field, other.type_name()),
                ))
            }
        };
        points.push((x, y));
    }

    let mut previous: Option<(f64, f64)> = None;
    for i in 0..docs.len() {
        let (x, y) = points[i];
        if let Some(y) = y {
            previous = x.map(|x| (x, y));
            continue;
        }
        let (Some(x), Some((x0, y0))) = (x, previous) else {
            continue;
        };
        let next = points[i + 1..]
            .iter()
            .find_map(|(nx, ny)| ny.and_then(|ny| nx.map(|nx| (nx, ny))));
        let Some((x1, y1)) = next else {
            break;
        };
        let value = if x1 == x0 {
            y0
        } else {
            y0 + (y1 - y0) * (x - x0) / (x1 - x0)
        };
        docs[i].set_path(field, Value::Number(value));
    }
    Ok(())
}
