//! `$densify`
//!
//! Inserts documents so that the field takes every value of the sequence
//! `lower, lower + step, ...` inside the bounds. Existing documents are
//! kept as they are, including those off the step grid or outside the
//! bounds. Documents without a value for the field pass through untouched.

use indexmap::IndexMap;

use super::context::ExecutionContext;
use super::errors::{ExecutorError, ExecutorResult};
use crate::expr::dates::add_units;
use crate::planner::{DensifyBounds, DensifySpec};
use crate::value::{Document, Value};

const STAGE: &str = "$densify";

/// Upper bound on generated documents per stage
const MAX_GENERATED: usize = 1_000_000;

struct Partition {
    key: Vec<Value>,
    /// (axis, document), sorted by axis before generation
    rows: Vec<(f64, Document)>,
}

pub fn run_densify(
    spec: &DensifySpec,
    input: Vec<Document>,
    ctx: &ExecutionContext<'_>,
) -> ExecutorResult<Vec<Document>> {
    let mut passthrough = Vec::new();
    let mut partitions: IndexMap<Vec<Value>, Partition> = IndexMap::new();

    for doc in input {
        let Some(axis) = axis_of(spec, doc.get_path(&spec.field))? else {
            passthrough.push(doc);
            continue;
        };
        let key: Vec<Value> = spec
            .partition_by_fields
            .iter()
            .map(|f| doc.get_path(f).unwrap_or(Value::Null))
            .collect();
        partitions
            .entry(key.clone())
            .or_insert_with(|| Partition { key, rows: Vec::new() })
            .rows
            .push((axis, doc));
    }

    let global = partitions
        .values()
        .flat_map(|p| p.rows.iter().map(|(axis, _)| *axis))
        .fold(None, |range: Option<(f64, f64)>, x| match range {
            None => Some((x, x)),
            Some((lo, hi)) => Some((lo.min(x), hi.max(x))),
        });

    let mut out = passthrough;
    let mut generated = 0usize;
    for (_, mut partition) in partitions {
        ctx.check_deadline()?;
        partition.rows.sort_by(|a, b| a.0.total_cmp(&b.0));

        // (lower, upper, upper is inclusive)
        let range = match &spec.bounds {
            DensifyBounds::Full => global.map(|(lo, hi)| (lo, hi, true)),
            DensifyBounds::Partition => {
                let lo = partition.rows.first().map(|(axis, _)| *axis);
                let hi = partition.rows.last().map(|(axis, _)| *axis);
                lo.zip(hi).map(|(lo, hi)| (lo, hi, true))
            }
            DensifyBounds::Explicit(lo, hi) => {
                let lo = axis_of(spec, Some(lo.clone()))?;
                let hi = axis_of(spec, Some(hi.clone()))?;
                lo.zip(hi).map(|(lo, hi)| (lo, hi, false))
            }
        };

        let mut rows = partition.rows.into_iter().peekable();
        if let Some((lower, upper, inclusive)) = range {
            for k in 0.. {
                let point = step_point(spec, lower, k)?;
                if point > upper || (!inclusive && point == upper) {
                    break;
                }
                while let Some((_, doc)) = rows.next_if(|(axis, _)| *axis < point) {
                    out.push(doc);
                }
                if rows.peek().map_or(false, |(axis, _)| *axis == point) {
                    continue;
                }
                generated += 1;
                if generated > MAX_GENERATED {
                    return Err(ExecutorError::execution_failed(
                        STAGE,
                        format!("would generate more than {} documents", MAX_GENERATED),
                    ));
                }
                if generated % ctx.batch_size() == 0 {
                    ctx.check_deadline()?;
                }
                out.push(filler(spec, &partition.key, point)?);
            }
        }
        out.extend(rows.map(|(_, doc)| doc));
    }
    Ok(out)
}

/// Axis position of a field value. Numbers densify by plain step, dates by
/// a calendar unit; anything else is an error.
fn axis_of(spec: &DensifySpec, value: Option<Value>) -> ExecutorResult<Option<f64>> {
    match (value, spec.unit) {
        (None, _) | (Some(Value::Null), _) => Ok(None),
        (Some(Value::Number(n)), None) => Ok(Some(n)),
        (Some(Value::Date(d)), Some(_)) => Ok(Some(d.timestamp_millis() as f64)),
        (Some(other), unit) => Err(ExecutorError::execution_failed(
            STAGE,
            format!(
                "field '{}' holds a {} value but the range needs {}",
                spec.field,
                other.type_name(),
                if unit.is_some() { "dates" } else { "numbers" }
            ),
        )),
    }
}

/// The `k`-th point of the sequence starting at `lower`
fn step_point(spec: &DensifySpec, lower: f64, k: i64) -> ExecutorResult<f64> {
    match spec.unit {
        None => Ok(lower + k as f64 * spec.step),
        Some(unit) => Value::date_from_millis(lower as i64)
            .and_then(|v| v.as_date())
            .and_then(|start| add_units(start, unit, k * spec.step as i64))
            .map(|d| d.timestamp_millis() as f64)
            .ok_or_else(|| ExecutorError::execution_failed(STAGE, "date sequence left the supported range")),
    }
}

fn filler(spec: &DensifySpec, key: &[Value], point: f64) -> ExecutorResult<Document> {
    let mut doc = Document::with_capacity(key.len() + 1);
    for (field, value) in spec.partition_by_fields.iter().zip(key) {
        if !value.is_null() {
            doc.set_path(field, value.clone());
        }
    }
    let value = match spec.unit {
        None => Value::Number(point),
        Some(_) => Value::date_from_millis(point as i64)
            .ok_or_else(|| ExecutorError::execution_failed(STAGE, "date sequence left the supported range"))?,
    };
    doc.set_path(&spec.field, value);
    Ok(doc)
}
