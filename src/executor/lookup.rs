//! `$lookup` and `$unionWith`
//!
//! Lookup is a nested loop: every outer document binds its own `let`
//! variables and runs the sub-pipeline independently. The foreign
//! collection is scanned once per stage into an immutable snapshot that
//! every outer document reads, so the cost is O(outer x foreign) with a
//! single scan. Outer documents run on the worker pool; output order equals
//! input order.

use rayon::prelude::*;

use super::context::{eval, ExecutionContext};
use super::errors::ExecutorResult;
use super::executor::run_stages;
use crate::expr::Variables;
use crate::planner::{LookupSpec, UnionWithSpec};
use crate::value::{Document, Value};

const STAGE: &str = "$lookup";

/// A lookup stage with its foreign snapshot loaded
pub struct PreparedLookup<'s> {
    spec: &'s LookupSpec,
    foreign: Vec<Document>,
}

impl<'s> PreparedLookup<'s> {
    /// Scans the foreign collection once for the whole stage
    pub fn prepare(spec: &'s LookupSpec, ctx: &ExecutionContext<'_>) -> ExecutorResult<Self> {
        Ok(Self {
            spec,
            foreign: ctx.scan(&spec.from)?,
        })
    }

    /// Joins a batch of outer documents, preserving their order
    pub fn apply(
        &self,
        batch: Vec<Document>,
        ctx: &ExecutionContext<'_>,
        vars: &Variables<'_>,
    ) -> ExecutorResult<Vec<Document>> {
        ctx.pool.install(|| {
            batch
                .into_par_iter()
                .map(|doc| self.join_one(doc, ctx, vars))
                .collect()
        })
    }

    fn join_one(
        &self,
        mut doc: Document,
        ctx: &ExecutionContext<'_>,
        vars: &Variables<'_>,
    ) -> ExecutorResult<Document> {
        ctx.check_deadline()?;

        let bindings = self
            .spec
            .let_vars
            .iter()
            .map(|(name, expr)| Ok((name.clone(), eval(STAGE, expr, &doc, vars)?)))
            .collect::<ExecutorResult<Vec<_>>>()?;
        // Bindings live only in this scope and die with it
        let scope = vars.child(bindings);

        let candidates: Vec<Document> = match &self.spec.equality {
            Some((local, foreign)) => {
                let local_values = match_values(doc.get_path(local));
                self.foreign
                    .iter()
                    .filter(|f| {
                        match_values(f.get_path(foreign))
                            .iter()
                            .any(|v| local_values.contains(v))
                    })
                    .cloned()
                    .collect()
            }
            None => self.foreign.clone(),
        };

        let joined = if self.spec.pipeline.is_empty() {
            candidates
        } else {
            ctx.metrics.increment_subpipelines();
            run_stages(&self.spec.pipeline, candidates, ctx, &scope)?
        };

        doc.set_path(
            &self.spec.as_field,
            Value::Array(joined.into_iter().map(Value::Object).collect()),
        );
        Ok(doc)
    }
}

/// Values an equality join compares: array elements fan out, missing reads as null
fn match_values(value: Option<Value>) -> Vec<Value> {
    match value {
        None => vec![Value::Null],
        Some(Value::Array(items)) if !items.is_empty() => items,
        Some(other) => vec![other],
    }
}

/// Appends the result of a pipeline over another collection
pub fn run_union_with(
    spec: &UnionWithSpec,
    mut input: Vec<Document>,
    ctx: &ExecutionContext<'_>,
    vars: &Variables<'_>,
) -> ExecutorResult<Vec<Document>> {
    let other = ctx.scan(&spec.coll)?;
    let appended = if spec.pipeline.is_empty() {
        other
    } else {
        ctx.metrics.increment_subpipelines();
        run_stages(&spec.pipeline, other, ctx, vars)?
    };
    input.extend(appended);
    Ok(input)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::context::with_test_context;
    use crate::planner::{QueryPlanner, Stage};
    use crate::store::MemoryStore;
    use serde_json::json;

    fn store() -> MemoryStore {
        let store = MemoryStore::new();
        store
            .insert_json(
                "globalClimate",
                json!([
                    {"_id": "g1", "location": "Vienna", "date": "2021-03-02", "event_type": "Stormy"},
                    {"_id": "g2", "location": "Brno", "date": "2021-03-03", "event_type": "Stormy"},
                    {"_id": "g3", "location": "Graz", "date": "2021-03-20", "event_type": "Stormy"},
                    {"_id": "g4", "location": "Linz", "date": "2021-03-04", "event_type": "Normal"}
                ]),
            )
            .unwrap();
        store
    }

    fn lookup_spec(json: serde_json::Value) -> LookupSpec {
        match QueryPlanner::new().plan(&json!([{"$lookup": json}])).unwrap().stages.remove(0) {
            Stage::Lookup(spec) => spec,
            other => panic!("expected lookup, got {:?}", other),
        }
    }

    fn outer(json: serde_json::Value) -> Vec<Document> {
        json.as_array()
            .unwrap()
            .iter()
            .map(|d| Document::from_json(d.clone()).unwrap())
            .collect()
    }

    fn joined_ids(doc: &Document, field: &str) -> Vec<Value> {
        doc.lookup(field)
            .as_array()
            .unwrap()
            .iter()
            .map(|d| d.as_object().unwrap().lookup("_id"))
            .collect()
    }

    #[test]
    fn test_correlated_pipeline_lookup() {
        let spec = lookup_spec(json!({
            "from": "globalClimate",
            "let": {"event_type": "$event_type"},
            "pipeline": [
                {"$match": {"$expr": {"$and": [
                    {"$ne": ["$location", "Brno"]},
                    {"$eq": ["$event_type", "$$event_type"]}
                ]}}}
            ],
            "as": "related"
        }));
        let store = store();
        let out = with_test_context(&store, |ctx| {
            let prepared = PreparedLookup::prepare(&spec, ctx)?;
            prepared.apply(
                outer(json!([
                    {"date": "2021-03-01", "event_type": "Stormy"},
                    {"date": "2021-03-01", "event_type": "Normal"},
                    {"date": "2021-03-01", "event_type": "Foggy"}
                ])),
                ctx,
                &Variables::new(),
            )
        })
        .unwrap();

        assert_eq!(out.len(), 3);
        assert_eq!(joined_ids(&out[0], "related"), vec![Value::from("g1"), Value::from("g3")]);
        assert_eq!(joined_ids(&out[1], "related"), vec![Value::from("g4")]);
        assert!(joined_ids(&out[2], "related").is_empty());
    }

    #[test]
    fn test_let_variables_do_not_escape() {
        let spec = lookup_spec(json!({
            "from": "globalClimate",
            "let": {"t": "$event_type"},
            "pipeline": [{"$limit": 1}],
            "as": "rel"
        }));
        let store = store();
        let base = Variables::new();
        with_test_context(&store, |ctx| {
            let prepared = PreparedLookup::prepare(&spec, ctx).unwrap();
            prepared
                .apply(outer(json!([{"event_type": "Stormy"}])), ctx, &base)
                .unwrap();
        });
        assert!(base.get("t").is_none());
    }

    #[test]
    fn test_equality_lookup_preserves_order() {
        let spec = lookup_spec(json!({
            "from": "globalClimate",
            "localField": "type",
            "foreignField": "event_type",
            "as": "same_type"
        }));
        let store = store();
        let docs: Vec<serde_json::Value> = (0..20)
            .map(|i| json!({"n": i, "type": if i % 2 == 0 { "Stormy" } else { "Normal" }}))
            .collect();
        let out = with_test_context(&store, |ctx| {
            PreparedLookup::prepare(&spec, ctx)?.apply(outer(serde_json::Value::Array(docs)), ctx, &Variables::new())
        })
        .unwrap();

        for (i, doc) in out.iter().enumerate() {
            assert_eq!(doc.lookup("n"), Value::from(i as f64));
            let expected = if i % 2 == 0 { 3 } else { 1 };
            assert_eq!(joined_ids(doc, "same_type").len(), expected);
        }
    }

    #[test]
    fn test_unknown_foreign_collection() {
        let spec = lookup_spec(json!({"from": "missing", "localField": "a", "foreignField": "b", "as": "c"}));
        let store = store();
        let err = with_test_context(&store, |ctx| PreparedLookup::prepare(&spec, ctx).map(|_| ())).unwrap_err();
        assert_eq!(err.code().code(), "STRATUS_DATA_SOURCE");
    }

    #[test]
    fn test_union_with_appends() {
        let spec = match QueryPlanner::new()
            .plan(&json!([{"$unionWith": {"coll": "globalClimate", "pipeline": [{"$match": {"event_type": "Normal"}}]}}]))
            .unwrap()
            .stages
            .remove(0)
        {
            Stage::UnionWith(spec) => spec,
            other => panic!("expected unionWith, got {:?}", other),
        };
        let store = store();
        let out = with_test_context(&store, |ctx| {
            run_union_with(&spec, outer(json!([{"_id": "local"}])), ctx, &Variables::new())
        })
        .unwrap();
        let ids: Vec<Value> = out.iter().map(|d| d.lookup("_id")).collect();
        assert_eq!(ids, vec![Value::from("local"), Value::from("g4")]);
    }
}
