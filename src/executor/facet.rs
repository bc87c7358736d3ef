//! `$facet`
//!
//! Every branch reads the same immutable input snapshot and runs on the
//! worker pool. Results are merged into a single document only after all
//! branches finish; the first failing branch fails the stage.

use rayon::prelude::*;

use super::context::ExecutionContext;
use super::errors::ExecutorResult;
use super::executor::run_stages;
use crate::expr::Variables;
use crate::planner::FacetSpec;
use crate::value::{Document, Value};

pub fn run_facet(
    spec: &FacetSpec,
    input: Vec<Document>,
    ctx: &ExecutionContext<'_>,
    vars: &Variables<'_>,
) -> ExecutorResult<Vec<Document>> {
    let snapshot = &input;
    let branches: Vec<(&String, Vec<Document>)> = ctx.pool.install(|| {
        spec.facets
            .par_iter()
            .map(|(name, stages)| {
                ctx.metrics.increment_subpipelines();
                let docs = run_stages(stages, snapshot.clone(), ctx, vars)?;
                Ok((name, docs))
            })
            .collect::<ExecutorResult<Vec<_>>>()
    })?;

    let mut merged = Document::with_capacity(branches.len());
    for (name, docs) in branches {
        merged.insert(name.clone(), Value::Array(docs.into_iter().map(Value::Object).collect()));
    }
    Ok(vec![merged])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::context::with_test_context;
    use crate::planner::{QueryPlanner, Stage};
    use crate::store::MemoryStore;
    use serde_json::json;

    fn facet(json: serde_json::Value) -> FacetSpec {
        match QueryPlanner::new().plan(&json!([{"$facet": json}])).unwrap().stages.remove(0) {
            Stage::Facet(spec) => spec,
            other => panic!("expected facet, got {:?}", other),
        }
    }

    fn input() -> Vec<Document> {
        [
            json!({"location": "Prague", "temperature_c": 10, "event_type": "Normal"}),
            json!({"location": "Brno", "temperature_c": 31, "event_type": "Hot and Dry"}),
            json!({"location": "Prague", "temperature_c": 15, "event_type": "Stormy"}),
            json!({"location": "Linz", "temperature_c": -3, "event_type": "Normal"}),
        ]
        .into_iter()
        .map(|d| Document::from_json(d).unwrap())
        .collect()
    }

    #[test]
    fn test_branches_share_input() {
        let spec = facet(json!({
            "by_location": [
                {"$group": {"_id": "$location", "n": {"$sum": 1}}},
                {"$sort": {"n": -1, "_id": 1}}
            ],
            "hottest": [{"$sort": {"temperature_c": -1}}, {"$limit": 1}],
            "total": [{"$count": "n"}]
        }));
        let store = MemoryStore::new();
        let out = with_test_context(&store, |ctx| run_facet(&spec, input(), ctx, &Variables::new())).unwrap();

        assert_eq!(out.len(), 1);
        let merged = &out[0];
        let keys: Vec<&String> = merged.keys().collect();
        assert_eq!(keys, vec!["by_location", "hottest", "total"]);
        assert_eq!(merged.lookup("by_location").as_array().unwrap().len(), 3);
        assert_eq!(
            merged.lookup("by_location._id"),
            Value::from(json!(["Prague", "Brno", "Linz"]))
        );
        assert_eq!(merged.lookup("hottest").as_array().unwrap()[0].as_object().unwrap().lookup("location"), Value::from("Brno"));
        assert_eq!(merged.lookup("total").as_array().unwrap()[0].as_object().unwrap().lookup("n"), Value::from(4.0));
    }

    #[test]
    fn test_empty_branch_result() {
        let spec = facet(json!({"none": [{"$match": {"location": "Oslo"}}]}));
        let store = MemoryStore::new();
        let out = with_test_context(&store, |ctx| run_facet(&spec, input(), ctx, &Variables::new())).unwrap();
        assert_eq!(out[0].lookup("none"), Value::Array(vec![]));
    }

    #[test]
    fn test_failing_branch_fails_stage() {
        let spec = facet(json!({
            "ok": [{"$limit": 1}],
            "bad": [{"$lookup": {"from": "missing", "localField": "a", "foreignField": "b", "as": "c"}}]
        }));
        let store = MemoryStore::new();
        let err = with_test_context(&store, |ctx| run_facet(&spec, input(), ctx, &Variables::new())).unwrap_err();
        assert_eq!(err.code().code(), "STRATUS_DATA_SOURCE");
    }
}
