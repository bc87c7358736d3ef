//! `$group`
//!
//! Single pass, no pre-sort required. Groups come out in the order their
//! key was first seen.

use indexmap::IndexMap;

use super::accumulator::AccumulatorRow;
use super::context::{eval, ExecutionContext};
use super::errors::ExecutorResult;
use crate::expr::Variables;
use crate::planner::GroupSpec;
use crate::value::{Document, Value};

const STAGE: &str = "$group";

pub fn run_group(
    spec: &GroupSpec,
    input: Vec<Document>,
    ctx: &ExecutionContext<'_>,
    vars: &Variables<'_>,
) -> ExecutorResult<Vec<Document>> {
    let mut groups: IndexMap<Value, AccumulatorRow> = IndexMap::new();

    for (i, doc) in input.iter().enumerate() {
        if i % ctx.batch_size() == 0 {
            ctx.check_deadline()?;
        }
        let key = eval(STAGE, &spec.id, doc, vars)?;
        groups
            .entry(key)
            .or_insert_with(|| AccumulatorRow::new(&spec.accumulators))
            .update(STAGE, &spec.accumulators, doc, vars)?;
    }

    Ok(groups
        .into_iter()
        .map(|(key, row)| {
            let mut out = Document::with_capacity(spec.accumulators.len() + 1);
            out.insert("_id", key);
            row.finish_into(&spec.accumulators, &mut out);
            out
        })
        .collect())
}
