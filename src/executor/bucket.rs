//! `$bucket`
//!
//! Numeric mode: a value `v` lands in bucket `i` iff
//! `boundaries[i] <= v < boundaries[i + 1]`. Anything else goes to the
//! default bucket. Categorical mode: a value lands in the bucket whose label
//! it equals exactly.
//!
//! Only non-empty buckets are emitted, in boundary order, with the default
//! bucket last.

use super::accumulator::AccumulatorRow;
use super::context::{eval, ExecutionContext};
use super::errors::{ExecutorError, ExecutorResult};
use crate::expr::Variables;
use crate::planner::{Boundaries, BucketSpec};
use crate::value::{Document, Value};

const STAGE: &str = "$bucket";

/// Index of the bucket holding `value`, `None` if it needs the default
fn bucket_index(boundaries: &Boundaries, value: &Value) -> Option<usize> {
    match boundaries {
        Boundaries::Numeric(edges) => {
            let v = match value {
                Value::Number(n) if !n.is_nan() => *n,
                _ => return None,
            };
            // First edge strictly above v; the bucket is the one before it
            let above = edges.partition_point(|edge| *edge <= v);
            (above > 0 && above < edges.len()).then(|| above - 1)
        }
        Boundaries::Categorical(labels) => {
            let label = value.as_str()?;
            labels.iter().position(|l| l == label)
        }
    }
}

fn bucket_id(boundaries: &Boundaries, index: usize) -> Value {
    match boundaries {
        Boundaries::Numeric(edges) => Value::Number(edges[index]),
        Boundaries::Categorical(labels) => Value::String(labels[index].clone()),
    }
}

pub fn run_bucket(
    spec: &BucketSpec,
    input: Vec<Document>,
    ctx: &ExecutionContext<'_>,
    vars: &Variables<'_>,
) -> ExecutorResult<Vec<Document>> {
    let slots = match &spec.boundaries {
        Boundaries::Numeric(edges) => edges.len() - 1,
        Boundaries::Categorical(labels) => labels.len(),
    };
    let mut rows: Vec<Option<AccumulatorRow>> = vec![None; slots];
    let mut default_row: Option<AccumulatorRow> = None;

    for (i, doc) in input.iter().enumerate() {
        if i % ctx.batch_size() == 0 {
            ctx.check_deadline()?;
        }
        let value = eval(STAGE, &spec.group_by, doc, vars)?;
        let row = match bucket_index(&spec.boundaries, &value) {
            Some(index) => &mut rows[index],
            None if spec.default.is_some() => &mut default_row,
            None => {
                return Err(ExecutorError::execution_failed(
                    STAGE,
                    format!("value {} falls outside every bucket and no default is set", value),
                ))
            }
        };
        row.get_or_insert_with(|| AccumulatorRow::new(&spec.output))
            .update(STAGE, &spec.output, doc, vars)?;
    }

    let build = |id: Value, row: AccumulatorRow| {
        let mut out = Document::with_capacity(spec.output.len() + 1);
        out.insert("_id", id);
        row.finish_into(&spec.output, &mut out);
        out
    };

    let mut out: Vec<Document> = rows
        .into_iter()
        .enumerate()
        .filter_map(|(index, row)| row.map(|r| build(bucket_id(&spec.boundaries, index), r)))
        .collect();
    if let (Some(row), Some(default)) = (default_row, &spec.default) {
        out.push(build(default.clone(), row));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::context::with_test_context;
    use crate::planner::{QueryPlanner, Stage};
    use crate::store::MemoryStore;
    use serde_json::json;

    fn bucket(json: serde_json::Value, docs: serde_json::Value) -> ExecutorResult<Vec<Document>> {
        let spec = match QueryPlanner::new().plan(&json!([{"$bucket": json}])).unwrap().stages.remove(0) {
            Stage::Bucket(spec) => spec,
            other => panic!("expected bucket, got {:?}", other),
        };
        let input = docs
            .as_array()
            .unwrap()
            .iter()
            .map(|d| Document::from_json(d.clone()).unwrap())
            .collect();
        let store = MemoryStore::new();
        with_test_context(&store, |ctx| run_bucket(&spec, input, ctx, &Variables::new()))
    }

    #[test]
    fn test_lower_inclusive_upper_exclusive() {
        let numeric = Boundaries::Numeric(vec![-10.0, 0.0, 10.0, 20.0, 30.0]);
        assert_eq!(bucket_index(&numeric, &Value::from(-10.0)), Some(0));
        assert_eq!(bucket_index(&numeric, &Value::from(-0.5)), Some(0));
        assert_eq!(bucket_index(&numeric, &Value::from(0.0)), Some(1));
        assert_eq!(bucket_index(&numeric, &Value::from(29.99)), Some(3));
        assert_eq!(bucket_index(&numeric, &Value::from(30.0)), None);
        assert_eq!(bucket_index(&numeric, &Value::from(-11.0)), None);
        assert_eq!(bucket_index(&numeric, &Value::from("5")), None);
        assert_eq!(bucket_index(&numeric, &Value::Null), None);
    }

    #[test]
    fn test_numeric_buckets_with_default() {
        let out = bucket(
            json!({
                "groupBy": "$temperature_c",
                "boundaries": [-10, 0, 10, 20, 30],
                "default": "Other",
                "output": {"count": {"$sum": 1}, "avg": {"$avg": "$temperature_c"}}
            }),
            json!([
                {"temperature_c": -10}, {"temperature_c": 12}, {"temperature_c": 30},
                {"temperature_c": 18}, {"temperature_c": null}
            ]),
        )
        .unwrap();

        let ids: Vec<Value> = out.iter().map(|d| d.lookup("_id")).collect();
        assert_eq!(ids, vec![Value::from(-10.0), Value::from(10.0), Value::from("Other")]);
        assert_eq!(out[1].lookup("count"), Value::from(2.0));
        assert_eq!(out[1].lookup("avg"), Value::from(15.0));
        assert_eq!(out[2].lookup("count"), Value::from(2.0));
    }

    #[test]
    fn test_categorical_exact_labels() {
        let out = bucket(
            json!({
                "groupBy": "$event_type",
                "boundaries": ["Freezing Precipitation", "Hot and Dry", "Hot and Humid", "Normal", "Stormy"],
                "default": "Other"
            }),
            json!([
                {"event_type": "Stormy"}, {"event_type": "Normal"}, {"event_type": "Foggy"},
                {"event_type": "Stormy"}
            ]),
        )
        .unwrap();

        let ids: Vec<Value> = out.iter().map(|d| d.lookup("_id")).collect();
        assert_eq!(ids, vec![Value::from("Normal"), Value::from("Stormy"), Value::from("Other")]);
        assert_eq!(out[1].lookup("count"), Value::from(2.0));
    }

    #[test]
    fn test_missing_default_is_fatal() {
        let err = bucket(
            json!({"groupBy": "$t", "boundaries": [0, 10]}),
            json!([{"t": 5}, {"t": 50}]),
        )
        .unwrap_err();
        assert_eq!(err.code().code(), "STRATUS_EXECUTION_FAILED");
    }
}
