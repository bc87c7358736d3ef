//! `$setWindowFields`
//!
//! Partitions the input by key equality, stable-sorts each partition, and
//! computes every output over a frame relative to each position.
//!
//! Sum, average and count slide a running total across the partition:
//! entering documents are added and exiting ones removed, so a partition
//! costs O(n) when frames move forward. Other functions are derived per
//! position from their frame.

use std::cmp::Ordering;

use indexmap::IndexMap;

use super::context::{eval, ExecutionContext};
use super::errors::{ExecutorError, ExecutorResult};
use super::sorter::ResultSorter;
use crate::expr::dates::add_units;
use crate::expr::{TimeUnit, Variables};
use crate::planner::{FrameBound, SortDirection, SortSpec, WindowFrame, WindowFunction, WindowOutput, WindowSpec};
use crate::stats::RunningStats;
use crate::value::{compare_values, Document, Value};

const STAGE: &str = "$setWindowFields";

/// Half-open index range `[lo, hi)` within a sorted partition
type Frame = (usize, usize);

pub fn run_window(
    spec: &WindowSpec,
    input: Vec<Document>,
    ctx: &ExecutionContext<'_>,
    vars: &Variables<'_>,
) -> ExecutorResult<Vec<Document>> {
    let total = input.len();
    let mut partitions: IndexMap<Value, Vec<Document>> = IndexMap::new();
    for doc in input {
        let key = match &spec.partition_by {
            Some(expr) => eval(STAGE, expr, &doc, vars)?,
            None => Value::Null,
        };
        partitions.entry(key).or_default().push(doc);
    }

    let mut out = Vec::with_capacity(total);
    for (_, mut docs) in partitions {
        ctx.check_deadline()?;
        if let Some(sort) = &spec.sort_by {
            ResultSorter::sort(&mut docs, sort);
        }

        // Every output reads the partition as it was before any output is written
        let mut columns = spec
            .outputs
            .iter()
            .map(|output| compute_output(output, &docs, spec.sort_by.as_ref(), vars).map(Vec::into_iter))
            .collect::<ExecutorResult<Vec<_>>>()?;

        for mut doc in docs {
            for (output, column) in spec.outputs.iter().zip(columns.iter_mut()) {
                doc.set_path(&output.field, column.next().unwrap_or(Value::Null));
            }
            out.push(doc);
        }
    }
    Ok(out)
}

fn compute_output(
    output: &WindowOutput,
    docs: &[Document],
    sort_by: Option<&SortSpec>,
    vars: &Variables<'_>,
) -> ExecutorResult<Vec<Value>> {
    let inputs: Vec<Value> = match &output.input {
        Some(expr) => docs
            .iter()
            .map(|d| eval(STAGE, expr, d, vars))
            .collect::<ExecutorResult<_>>()?,
        None => vec![Value::Null; docs.len()],
    };

    match &output.function {
        WindowFunction::Rank | WindowFunction::DenseRank | WindowFunction::DocumentNumber => {
            let sort = sort_by.ok_or_else(|| {
                ExecutorError::execution_failed(STAGE, format!("{} requires sortBy", output.function.name()))
            })?;
            return Ok(ranks(&output.function, docs, sort));
        }
        WindowFunction::Shift { by, default } => {
            return Ok((0..inputs.len())
                .map(|i| {
                    let j = i as i64 + by;
                    if j >= 0 && (j as usize) < inputs.len() {
                        inputs[j as usize].clone()
                    } else {
                        default.clone()
                    }
                })
                .collect());
        }
        _ => {}
    }

    let frames = resolve_frames(&output.frame, docs, sort_by)?;

    match &output.function {
        WindowFunction::Sum | WindowFunction::Avg | WindowFunction::Count => {
            let mut window = SlidingWindow::default();
            Ok(frames
                .iter()
                .map(|&(lo, hi)| {
                    window.advance(lo, hi, &inputs);
                    window.result(&output.function)
                })
                .collect())
        }
        WindowFunction::Derivative { unit } => {
            let axis = sort_axis(docs, sort_by)?;
            let scale = derivative_scale(*unit)?;
            Ok(frames
                .iter()
                .map(|&(lo, hi)| derivative(&inputs, &axis, lo, hi, scale))
                .collect())
        }
        function => Ok(frames
            .iter()
            .map(|&(lo, hi)| aggregate(function, &inputs[lo..hi]))
            .collect()),
    }
}

// ==================
// Frames
// ==================

fn resolve_frames(frame: &WindowFrame, docs: &[Document], sort_by: Option<&SortSpec>) -> ExecutorResult<Vec<Frame>> {
    let n = docs.len();
    match *frame {
        WindowFrame::Documents { lower, upper } => Ok((0..n)
            .map(|i| {
                let position = |bound: FrameBound, is_lower: bool| -> i64 {
                    match bound {
                        FrameBound::Unbounded if is_lower => 0,
                        FrameBound::Unbounded => n as i64 - 1,
                        FrameBound::Current => i as i64,
                        FrameBound::Offset(o) => (i as i64).saturating_add(o as i64),
                    }
                };
                // Clip to the partition: [-2, 2] at the first position becomes [0, 2]
                let lo = position(lower, true).max(0);
                let hi = position(upper, false).min(n as i64 - 1);
                if lo > hi {
                    (0, 0)
                } else {
                    (lo as usize, hi as usize + 1)
                }
            })
            .collect()),
        WindowFrame::Range { lower, upper, unit } => {
            let sort = sort_by.ok_or_else(|| {
                ExecutorError::execution_failed(STAGE, "range windows require sortBy")
            })?;
            let sign = match sort.keys.first().map(|k| k.direction) {
                Some(SortDirection::Desc) => -1.0,
                _ => 1.0,
            };
            let axis = sort_axis(docs, sort_by)?;
            // Positions are ascending in `keys` whatever the sort direction
            let keys: Vec<f64> = axis.iter().map(|a| a * sign).collect();

            let mut frames = Vec::with_capacity(n);
            for i in 0..n {
                let edge = |bound: FrameBound, is_lower: bool| -> ExecutorResult<f64> {
                    match bound {
                        FrameBound::Unbounded if is_lower => Ok(f64::NEG_INFINITY),
                        FrameBound::Unbounded => Ok(f64::INFINITY),
                        FrameBound::Current => Ok(keys[i]),
                        FrameBound::Offset(o) => Ok(sign * shift_axis(axis[i], sign * o, unit)?),
                    }
                };
                let lo_key = edge(lower, true)?;
                let hi_key = edge(upper, false)?;
                let lo = keys.partition_point(|k| *k < lo_key);
                let hi = keys.partition_point(|k| *k <= hi_key);
                frames.push(if lo < hi { (lo, hi) } else { (0, 0) });
            }
            Ok(frames)
        }
    }
}

/// Numeric position of every document on the single sort key
fn sort_axis(docs: &[Document], sort_by: Option<&SortSpec>) -> ExecutorResult<Vec<f64>> {
    let path = sort_by
        .and_then(|s| s.keys.first())
        .map(|k| k.path.as_str())
        .ok_or_else(|| ExecutorError::execution_failed(STAGE, "a single sortBy field is required"))?;

    let mut kind: Option<&'static str> = None;
    docs.iter()
        .map(|doc| {
            let value = doc.lookup(path);
            let axis = value.as_axis().ok_or_else(|| {
                ExecutorError::execution_failed(
                    STAGE,
                    format!("sortBy field '{}' must hold numbers or dates, found {}", path, value.type_name()),
                )
            })?;
            match kind {
                Some(k) if k != value.type_name() => Err(ExecutorError::execution_failed(
                    STAGE,
                    format!("sortBy field '{}' mixes numbers and dates", path),
                )),
                _ => {
                    kind = Some(value.type_name());
                    Ok(axis)
                }
            }
        })
        .collect()
}

fn shift_axis(axis: f64, delta: f64, unit: Option<TimeUnit>) -> ExecutorResult<f64> {
    let unit = match unit {
        None => return Ok(axis + delta),
        Some(u) => u,
    };
    if let Some(ms) = unit.fixed_millis() {
        return Ok(axis + delta * ms as f64);
    }
    if delta.fract() != 0.0 {
        return Err(ExecutorError::execution_failed(
            STAGE,
            format!("range offsets in {}s must be whole numbers", unit.as_str()),
        ));
    }
    Value::date_from_millis(axis as i64)
        .and_then(|v| v.as_date())
        .and_then(|date| add_units(date, unit, delta as i64))
        .map(|shifted| shifted.timestamp_millis() as f64)
        .ok_or_else(|| ExecutorError::execution_failed(STAGE, "date range bound out of range"))
}

// ==================
// Functions
// ==================

/// Running sum over a frame that usually only moves forward.
///
/// The sum is compensated (Neumaier), so removing a large value that left
/// the frame does not wipe out the small ones still inside it.
#[derive(Debug, Default)]
struct SlidingWindow {
    lo: usize,
    hi: usize,
    sum: f64,
    compensation: f64,
    numeric: usize,
}

impl SlidingWindow {
    fn accumulate(&mut self, x: f64) {
        let t = self.sum + x;
        if self.sum.abs() >= x.abs() {
            self.compensation += (self.sum - t) + x;
        } else {
            self.compensation += (x - t) + self.sum;
        }
        self.sum = t;
    }

    fn reset(&mut self) {
        self.sum = 0.0;
        self.compensation = 0.0;
        self.numeric = 0;
    }

    fn total(&self) -> f64 {
        self.sum + self.compensation
    }

    fn add(&mut self, value: &Value) {
        if let Value::Number(n) = value {
            self.accumulate(*n);
            self.numeric += 1;
        }
    }

    fn remove(&mut self, value: &Value) {
        if let Value::Number(n) = value {
            self.accumulate(-n);
            self.numeric -= 1;
            if self.numeric == 0 {
                self.reset();
            }
        }
    }

    fn advance(&mut self, lo: usize, hi: usize, values: &[Value]) {
        if lo < self.lo || hi < self.hi || lo >= self.hi {
            // Frame moved backwards or jumped: rebuild
            self.reset();
            for v in &values[lo..hi] {
                self.add(v);
            }
        } else {
            for v in &values[self.hi..hi] {
                self.add(v);
            }
            for v in &values[self.lo..lo] {
                self.remove(v);
            }
        }
        self.lo = lo;
        self.hi = hi;
    }

    fn result(&self, function: &WindowFunction) -> Value {
        match function {
            WindowFunction::Sum => Value::Number(self.total()),
            WindowFunction::Count => Value::Number((self.hi - self.lo) as f64),
            _ if self.numeric == 0 => Value::Null,
            _ => Value::Number(self.total() / self.numeric as f64),
        }
    }
}

fn aggregate(function: &WindowFunction, frame: &[Value]) -> Value {
    match function {
        WindowFunction::Min | WindowFunction::Max => {
            let wanted = if matches!(function, WindowFunction::Min) {
                Ordering::Less
            } else {
                Ordering::Greater
            };
            frame
                .iter()
                .filter(|v| !v.is_null())
                .fold(None::<&Value>, |best, v| match best {
                    Some(b) if compare_values(v, b) != wanted => Some(b),
                    _ => Some(v),
                })
                .cloned()
                .unwrap_or(Value::Null)
        }
        WindowFunction::StdDevPop => frame
            .iter()
            .filter_map(|v| match v {
                Value::Number(n) => Some(*n),
                _ => None,
            })
            .collect::<RunningStats>()
            .stddev_pop()
            .map_or(Value::Null, Value::Number),
        WindowFunction::Push => Value::Array(frame.to_vec()),
        _ => Value::Null,
    }
}

fn derivative_scale(unit: Option<TimeUnit>) -> ExecutorResult<f64> {
    match unit {
        None => Ok(1.0),
        Some(u) => u.fixed_millis().map(|ms| ms as f64).ok_or_else(|| {
            ExecutorError::execution_failed(
                STAGE,
                format!("$derivative unit must be week or smaller, got {}", u.as_str()),
            )
        }),
    }
}

/// Change between the frame's endpoint values per unit of sort-key distance
fn derivative(inputs: &[Value], axis: &[f64], lo: usize, hi: usize, scale: f64) -> Value {
    if hi < lo + 2 {
        return Value::Null;
    }
    let last = hi - 1;
    let (y0, y1) = match (inputs[lo].as_f64(), inputs[last].as_f64()) {
        (Some(a), Some(b)) => (a, b),
        _ => return Value::Null,
    };
    let dx = (axis[last] - axis[lo]) / scale;
    if dx == 0.0 {
        return Value::Null;
    }
    Value::Number((y1 - y0) / dx)
}

fn ranks(function: &WindowFunction, docs: &[Document], sort: &SortSpec) -> Vec<Value> {
    let keys: Vec<Vec<Value>> = docs.iter().map(|d| ResultSorter::sort_keys(d, sort)).collect();
    let mut out = Vec::with_capacity(docs.len());
    let (mut rank, mut dense) = (1usize, 1usize);
    for i in 0..docs.len() {
        if i > 0 && ResultSorter::compare_keys(&keys[i - 1], &keys[i], sort) != Ordering::Equal {
            rank = i + 1;
            dense += 1;
        }
        let value = match function {
            WindowFunction::Rank => rank,
            WindowFunction::DenseRank => dense,
            _ => i + 1,
        };
        out.push(Value::Number(value as f64));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::context::with_test_context;
    use crate::planner::{QueryPlanner, Stage};
    use crate::store::MemoryStore;
    use serde_json::json;

    fn window(json: serde_json::Value, docs: serde_json::Value) -> Vec<Document> {
        let spec = match QueryPlanner::new()
            .plan(&json!([{"$setWindowFields": json}]))
            .unwrap()
            .stages
            .remove(0)
        {
            Stage::Window(spec) => spec,
            other => panic!("expected window, got {:?}", other),
        };
        let input = docs
            .as_array()
            .unwrap()
            .iter()
            .map(|d| Document::from_json(d.clone()).unwrap())
            .collect();
        let store = MemoryStore::new();
        with_test_context(&store, |ctx| run_window(&spec, input, ctx, &Variables::new())).unwrap()
    }

    fn column(docs: &[Document], field: &str) -> Vec<Value> {
        docs.iter().map(|d| d.lookup(field)).collect()
    }

    fn nums(values: &[f64]) -> Vec<Value> {
        values.iter().map(|n| Value::Number(*n)).collect()
    }

    #[test]
    fn test_moving_average_clips_at_edges() {
        let out = window(
            json!({
                "sortBy": {"day": 1},
                "output": {"avg": {"$avg": {"input": "$t", "window": {"documents": [-2, 2]}}}}
            }),
            json!([
                {"day": 3, "t": 14}, {"day": 1, "t": 10}, {"day": 5, "t": 18},
                {"day": 2, "t": 12}, {"day": 4, "t": 16}
            ]),
        );
        assert_eq!(column(&out, "day"), nums(&[1.0, 2.0, 3.0, 4.0, 5.0]));
        assert_eq!(column(&out, "avg"), nums(&[12.0, 13.0, 14.0, 15.0, 16.0]));
    }

    #[test]
    fn test_running_sum_per_partition() {
        let out = window(
            json!({
                "partitionBy": "$loc",
                "sortBy": {"day": 1},
                "output": {"total": {"$sum": "$p", "window": {"documents": ["unbounded", "current"]}}}
            }),
            json!([
                {"loc": "A", "day": 1, "p": 1},
                {"loc": "B", "day": 1, "p": 10},
                {"loc": "A", "day": 2, "p": 2},
                {"loc": "A", "day": 3, "p": 3},
                {"loc": "B", "day": 2, "p": 20}
            ]),
        );
        // partitions in first-seen order, each in sort order
        assert_eq!(
            column(&out, "loc"),
            vec![Value::from("A"), Value::from("A"), Value::from("A"), Value::from("B"), Value::from("B")]
        );
        assert_eq!(column(&out, "total"), nums(&[1.0, 3.0, 6.0, 10.0, 30.0]));
    }

    #[test]
    fn test_dense_rank_and_rank() {
        let out = window(
            json!({
                "sortBy": {"score": -1},
                "output": {"dense": {"$denseRank": {}}, "rank": {"$rank": {}}, "n": {"$documentNumber": {}}}
            }),
            json!([{"score": 9}, {"score": 7}, {"score": 9}, {"score": 5}]),
        );
        assert_eq!(column(&out, "dense"), nums(&[1.0, 1.0, 2.0, 3.0]));
        assert_eq!(column(&out, "rank"), nums(&[1.0, 1.0, 3.0, 4.0]));
        assert_eq!(column(&out, "n"), nums(&[1.0, 2.0, 3.0, 4.0]));
    }

    #[test]
    fn test_derivative_per_day() {
        let out = window(
            json!({
                "sortBy": {"d": 1},
                "output": {"slope": {"$derivative": {"input": "$t", "unit": "day"}}}
            }),
            json!([
                {"d": {"$date": "2021-01-01T00:00:00Z"}, "t": 10},
                {"d": {"$date": "2021-01-02T00:00:00Z"}, "t": 13},
                {"d": {"$date": "2021-01-04T00:00:00Z"}, "t": 9}
            ]),
        );
        assert_eq!(column(&out, "slope"), vec![Value::Null, Value::from(3.0), Value::from(-2.0)]);
    }

    #[test]
    fn test_range_window_in_days() {
        let out = window(
            json!({
                "sortBy": {"d": 1},
                "output": {"week_sum": {"$sum": "$p", "window": {"range": [-6, 0], "unit": "day"}}}
            }),
            json!([
                {"d": {"$date": "2021-01-01T00:00:00Z"}, "p": 1},
                {"d": {"$date": "2021-01-05T00:00:00Z"}, "p": 2},
                {"d": {"$date": "2021-01-07T00:00:00Z"}, "p": 4},
                {"d": {"$date": "2021-01-08T00:00:00Z"}, "p": 8}
            ]),
        );
        assert_eq!(column(&out, "week_sum"), nums(&[1.0, 3.0, 7.0, 14.0]));
    }

    #[test]
    fn test_range_window_rejects_strings() {
        let spec = match QueryPlanner::new()
            .plan(&json!([{"$setWindowFields": {
                "sortBy": {"d": 1},
                "output": {"s": {"$sum": "$p", "window": {"range": [-1, 0]}}}
            }}]))
            .unwrap()
            .stages
            .remove(0)
        {
            Stage::Window(spec) => spec,
            other => panic!("expected window, got {:?}", other),
        };
        let input = vec![Document::from_json(json!({"d": "2021-01-01", "p": 1})).unwrap()];
        let store = MemoryStore::new();
        let err = with_test_context(&store, |ctx| run_window(&spec, input, ctx, &Variables::new())).unwrap_err();
        assert_eq!(err.code().code(), "STRATUS_EXECUTION_FAILED");
    }

    #[test]
    fn test_shift_and_min_max() {
        let out = window(
            json!({
                "sortBy": {"i": 1},
                "output": {
                    "prev": {"$shift": {"output": "$t", "by": -1, "default": "none"}},
                    "lo": {"$min": "$t", "window": {"documents": [-1, 1]}},
                    "hi": {"$max": "$t", "window": {"documents": [-1, 1]}}
                }
            }),
            json!([{"i": 1, "t": 5}, {"i": 2, "t": 3}, {"i": 3, "t": 8}]),
        );
        assert_eq!(column(&out, "prev"), vec![Value::from("none"), Value::from(5.0), Value::from(3.0)]);
        assert_eq!(column(&out, "lo"), nums(&[3.0, 3.0, 3.0]));
        assert_eq!(column(&out, "hi"), nums(&[5.0, 8.0, 8.0]));
    }

    #[test]
    fn test_moving_average_after_large_value_leaves_frame() {
        let out = window(
            json!({
                "sortBy": {"i": 1},
                "output": {"avg": {"$avg": "$t", "window": {"documents": [-1, 1]}}}
            }),
            json!([
                {"i": 1, "t": 1e16}, {"i": 2, "t": 1}, {"i": 3, "t": 1}, {"i": 4, "t": 1}, {"i": 5, "t": 1}
            ]),
        );
        assert_eq!(column(&out, "avg")[2..], nums(&[1.0, 1.0, 1.0])[..]);
    }

    #[test]
    fn test_fractional_sums_with_mixed_magnitudes() {
        let out = window(
            json!({
                "sortBy": {"i": 1},
                "output": {"s": {"$sum": "$t", "window": {"documents": [-1, "current"]}}}
            }),
            json!([
                {"i": 1, "t": 0.5}, {"i": 2, "t": 0.25}, {"i": 3, "t": 1e16}, {"i": 4, "t": 0.125}, {"i": 5, "t": 0.75}
            ]),
        );
        let sums = column(&out, "s");
        assert_eq!(sums[1], Value::Number(0.75));
        assert_eq!(sums[4], Value::Number(0.875));
    }

    #[test]
    fn test_huge_document_offset_clips_to_partition() {
        let out = window(
            json!({
                "sortBy": {"i": 1},
                "output": {"rest": {"$sum": "$t", "window": {"documents": [-1, 9223372036854775807i64]}}}
            }),
            json!([{"i": 1, "t": 1}, {"i": 2, "t": 2}, {"i": 3, "t": 3}]),
        );
        assert_eq!(column(&out, "rest"), nums(&[6.0, 6.0, 5.0]));
    }

    #[test]
    fn test_sliding_window_matches_recompute() {
        let values: Vec<Value> = (0..40).map(|i| Value::Number(((i * 7) % 11) as f64)).collect();
        let mut window = SlidingWindow::default();
        for i in 0..values.len() {
            let lo = i.saturating_sub(3);
            let hi = (i + 2).min(values.len());
            window.advance(lo, hi, &values);
            let expected: f64 = values[lo..hi].iter().filter_map(Value::as_f64).sum();
            assert_eq!(window.result(&WindowFunction::Sum), Value::Number(expected));
        }
    }
}
