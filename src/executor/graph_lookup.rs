//! `$graphLookup`
//!
//! Breadth-first traversal over a foreign collection. The restricted
//! foreign snapshot is indexed by `connectToField` once per stage, then
//! every outer document walks it independently:
//!
//! 1. Hop 0 looks up the `startWith` values.
//! 2. Each reached document contributes its `connectFromField` values to
//!    the next hop.
//! 3. Traversal stops after `maxDepth` hops or when no unseen value is left.
//!
//! Connecting values already followed are never followed again, which
//! bounds the walk on cyclic data. The originating document never appears
//! in its own result.

use std::collections::{HashMap, HashSet};

use indexmap::IndexMap;
use rayon::prelude::*;

use super::context::{eval, ExecutionContext};
use super::errors::ExecutorResult;
use super::filters::PredicateFilter;
use crate::expr::Variables;
use crate::planner::GraphLookupSpec;
use crate::value::{Document, Value};

const STAGE: &str = "$graphLookup";

/// A graph lookup stage with its foreign snapshot indexed
pub struct PreparedGraphLookup<'s> {
    spec: &'s GraphLookupSpec,
    foreign: Vec<Document>,
    /// connectToField value -> positions in `foreign`
    index: HashMap<Value, Vec<usize>>,
}

impl<'s> PreparedGraphLookup<'s> {
    pub fn prepare(
        spec: &'s GraphLookupSpec,
        ctx: &ExecutionContext<'_>,
        vars: &Variables<'_>,
    ) -> ExecutorResult<Self> {
        let mut foreign = ctx.scan(&spec.from)?;
        if let Some(restrict) = &spec.restrict {
            let mut kept = Vec::with_capacity(foreign.len());
            for doc in foreign {
                if PredicateFilter::matches(&doc, restrict, vars)? {
                    kept.push(doc);
                }
            }
            foreign = kept;
        }

        let mut index: HashMap<Value, Vec<usize>> = HashMap::new();
        for (position, doc) in foreign.iter().enumerate() {
            for key in connect_values(doc.get_path(&spec.connect_to_field)) {
                index.entry(key).or_default().push(position);
            }
        }

        Ok(Self {
            spec,
            foreign,
            index,
        })
    }

    /// Traverses from each document of a batch, preserving their order
    pub fn apply(
        &self,
        batch: Vec<Document>,
        ctx: &ExecutionContext<'_>,
        vars: &Variables<'_>,
    ) -> ExecutorResult<Vec<Document>> {
        ctx.pool.install(|| {
            batch
                .into_par_iter()
                .map(|doc| self.traverse(doc, ctx, vars))
                .collect()
        })
    }

    fn traverse(
        &self,
        mut doc: Document,
        ctx: &ExecutionContext<'_>,
        vars: &Variables<'_>,
    ) -> ExecutorResult<Document> {
        ctx.check_deadline()?;
        ctx.metrics.increment_graph_traversals();

        let start = eval(STAGE, &self.spec.start_with, &doc, vars)?;
        let mut followed: HashSet<Value> = HashSet::new();
        let mut frontier: Vec<Value> = connect_values(Some(start))
            .into_iter()
            .filter(|v| followed.insert(v.clone()))
            .collect();
        // Reached positions in discovery order, with the hop they were reached at
        let mut reached: IndexMap<usize, u32> = IndexMap::new();

        let mut depth = 0u32;
        while !frontier.is_empty() && depth <= self.spec.max_depth {
            let mut next = Vec::new();
            for value in &frontier {
                let Some(positions) = self.index.get(value) else {
                    continue;
                };
                for &position in positions {
                    if reached.contains_key(&position) || self.is_origin(&doc, position) {
                        continue;
                    }
                    reached.insert(position, depth);
                    let from = self.foreign[position].get_path(&self.spec.connect_from_field);
                    next.extend(
                        connect_values(from)
                            .into_iter()
                            .filter(|v| followed.insert(v.clone())),
                    );
                }
            }
            frontier = next;
            depth += 1;
        }

        let found: Vec<Value> = reached
            .into_iter()
            .map(|(position, hop)| {
                let mut found = self.foreign[position].clone();
                if let Some(field) = &self.spec.depth_field {
                    found.set_path(field, Value::Number(f64::from(hop)));
                }
                Value::Object(found)
            })
            .collect();
        doc.set_path(&self.spec.as_field, Value::Array(found));
        Ok(doc)
    }

    /// True if the foreign document at `position` is `origin` itself
    fn is_origin(&self, origin: &Document, position: usize) -> bool {
        let candidate = &self.foreign[position];
        match origin.get("_id") {
            Some(id) => candidate.get("_id") == Some(id),
            None => candidate == origin,
        }
    }
}

/// Values to follow: arrays fan out, null and missing lead nowhere
fn connect_values(value: Option<Value>) -> Vec<Value> {
    match value {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items.into_iter().filter(|v| !v.is_null()).collect(),
        Some(other) => vec![other],
    }
}
