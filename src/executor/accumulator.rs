//! Group and bucket accumulators
//!
//! Each accumulator folds values one at a time in a single pass.
//! `$avg` and `$stdDevPop` use Welford updates, never a sum/count division.

use indexmap::IndexSet;

use super::context::eval;
use super::errors::ExecutorResult;
use crate::expr::Variables;
use crate::planner::{AccumulatorOp, AccumulatorSpec};
use crate::stats::RunningStats;
use crate::value::{compare_values, Document, Value};

#[derive(Debug, Clone)]
pub enum Accumulator {
    Sum(f64),
    Count(u64),
    Avg(RunningStats),
    Min(Option<Value>),
    Max(Option<Value>),
    StdDevPop(RunningStats),
    AddToSet(IndexSet<Value>),
    Push(Vec<Value>),
    First(Option<Value>),
    Last(Value),
}

impl Accumulator {
    pub fn new(op: AccumulatorOp) -> Self {
        match op {
            AccumulatorOp::Sum => Accumulator::Sum(0.0),
            AccumulatorOp::Count => Accumulator::Count(0),
            AccumulatorOp::Avg => Accumulator::Avg(RunningStats::new()),
            AccumulatorOp::Min => Accumulator::Min(None),
            AccumulatorOp::Max => Accumulator::Max(None),
            AccumulatorOp::StdDevPop => Accumulator::StdDevPop(RunningStats::new()),
            AccumulatorOp::AddToSet => Accumulator::AddToSet(IndexSet::new()),
            AccumulatorOp::Push => Accumulator::Push(Vec::new()),
            AccumulatorOp::First => Accumulator::First(None),
            AccumulatorOp::Last => Accumulator::Last(Value::Null),
        }
    }

    /// Folds one value in; non-numeric values are ignored by numeric accumulators
    pub fn push(&mut self, value: Value) {
        match self {
            Accumulator::Sum(total) => {
                if let Value::Number(n) = value {
                    *total += n;
                }
            }
            Accumulator::Count(n) => *n += 1,
            Accumulator::Avg(stats) | Accumulator::StdDevPop(stats) => {
                if let Value::Number(n) = value {
                    stats.push(n);
                }
            }
            Accumulator::Min(current) => {
                if !value.is_null() {
                    let replace = current
                        .as_ref()
                        .map_or(true, |c| compare_values(&value, c).is_lt());
                    if replace {
                        *current = Some(value);
                    }
                }
            }
            Accumulator::Max(current) => {
                if !value.is_null() {
                    let replace = current
                        .as_ref()
                        .map_or(true, |c| compare_values(&value, c).is_gt());
                    if replace {
                        *current = Some(value);
                    }
                }
            }
            Accumulator::AddToSet(set) => {
                set.insert(value);
            }
            Accumulator::Push(items) => items.push(value),
            Accumulator::First(first) => {
                if first.is_none() {
                    *first = Some(value);
                }
            }
            Accumulator::Last(last) => *last = value,
        }
    }

    pub fn finish(self) -> Value {
        match self {
            Accumulator::Sum(total) => Value::Number(total),
            Accumulator::Count(n) => Value::Number(n as f64),
            Accumulator::Avg(stats) => stats.mean().map_or(Value::Null, Value::Number),
            Accumulator::StdDevPop(stats) => stats.stddev_pop().map_or(Value::Null, Value::Number),
            Accumulator::Min(v) | Accumulator::Max(v) | Accumulator::First(v) => {
                v.unwrap_or(Value::Null)
            }
            Accumulator::AddToSet(set) => Value::Array(set.into_iter().collect()),
            Accumulator::Push(items) => Value::Array(items),
            Accumulator::Last(v) => v,
        }
    }
}

/// A row of accumulators, one per output field
#[derive(Debug, Clone)]
pub struct AccumulatorRow {
    accumulators: Vec<Accumulator>,
}

impl AccumulatorRow {
    pub fn new(specs: &[AccumulatorSpec]) -> Self {
        Self {
            accumulators: specs.iter().map(|s| Accumulator::new(s.op)).collect(),
        }
    }

    /// Evaluates every spec's input against `doc` and folds the results
    pub fn update(
        &mut self,
        stage: &str,
        specs: &[AccumulatorSpec],
        doc: &Document,
        vars: &Variables<'_>,
    ) -> ExecutorResult<()> {
        for (acc, spec) in self.accumulators.iter_mut().zip(specs) {
            let value = match spec.op {
                AccumulatorOp::Count => Value::Null,
                _ => eval(stage, &spec.input, doc, vars)?,
            };
            acc.push(value);
        }
        Ok(())
    }

    /// Writes final values into `out` under each spec's field name
    pub fn finish_into(self, specs: &[AccumulatorSpec], out: &mut Document) {
        for (acc, spec) in self.accumulators.into_iter().zip(specs) {
            out.insert(spec.field.clone(), acc.finish());
        }
    }
}
