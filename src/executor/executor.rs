//! Pipeline orchestrator
//!
//! Composes validated stages into a chain and pushes documents through it.
//!
//! Execution flow:
//! 1. Scan the source collection from the document store
//! 2. Split the stage chain into runs of streaming stages and single
//!    blocking stages
//! 3. Push each streaming run through batch by batch; a blocking stage
//!    consumes its whole input before emitting anything
//! 4. Return the full ordered result, or the first fatal error
//!
//! The deadline is checked once per batch and inside every blocking loop.
//! A query that runs out of time reports a timeout and nothing else.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rayon::ThreadPool;
use serde_json::Value as Json;

use crate::config::EngineConfig;
use crate::expr::Variables;
use crate::observability::{Event, MetricsRegistry, Timer};
use crate::planner::{
    MatchExpr, Pipeline, ProjectSpec, QueryPlanner, Stage, StageMode, UnwindSpec,
};
use crate::store::DocumentStore;
use crate::value::{Document, Value};

use super::bucket::run_bucket;
use super::context::ExecutionContext;
use super::densify::run_densify;
use super::errors::{ExecutorError, ExecutorResult};
use super::facet::run_facet;
use super::fill::run_fill;
use super::filters::PredicateFilter;
use super::graph_lookup::PreparedGraphLookup;
use super::group::run_group;
use super::lookup::{run_union_with, PreparedLookup};
use super::project::{add_fields, project, unset, unwind};
use super::result::QueryOutput;
use super::sorter::ResultSorter;
use super::window::run_window;

/// Runs pipelines against a document store.
///
/// Cheap to clone: the store, worker pool and metrics are shared.
#[derive(Clone)]
pub struct Orchestrator {
    store: Arc<dyn DocumentStore>,
    config: EngineConfig,
    planner: QueryPlanner,
    pool: Arc<ThreadPool>,
    metrics: Arc<MetricsRegistry>,
}

impl Orchestrator {
    /// Creates an orchestrator with a worker pool of `config.worker_threads`
    pub fn new(store: Arc<dyn DocumentStore>, config: EngineConfig) -> ExecutorResult<Self> {
        config
            .validate()
            .map_err(|e| ExecutorError::stage_config(None, e.to_string()))?;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.worker_threads)
            .thread_name(|i| format!("stratus-worker-{}", i))
            .build()
            .map_err(|e| {
                ExecutorError::execution_failed("orchestrator", format!("cannot start worker pool: {}", e))
            })?;

        Ok(Self {
            store,
            planner: QueryPlanner::from_config(&config),
            config,
            pool: Arc::new(pool),
            metrics: Arc::new(MetricsRegistry::new()),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn planner(&self) -> &QueryPlanner {
        &self.planner
    }

    pub fn metrics(&self) -> &MetricsRegistry {
        &self.metrics
    }

    /// Validates a JSON pipeline and runs it.
    ///
    /// An invalid pipeline is rejected before the store is touched.
    pub fn execute_json(&self, collection: &str, pipeline: &Json) -> ExecutorResult<QueryOutput> {
        let pipeline = self.plan(pipeline)?;
        self.execute(collection, &pipeline)
    }

    /// Runs a validated pipeline over `collection`
    pub fn execute(&self, collection: &str, pipeline: &Pipeline) -> ExecutorResult<QueryOutput> {
        self.run(collection, pipeline, None)
    }

    /// Runs a validated pipeline on tokio's blocking pool under the query
    /// timeout. When the timeout fires, the running query is cancelled at
    /// its next deadline check and a timeout error is returned.
    pub async fn execute_async(&self, collection: &str, pipeline: Pipeline) -> ExecutorResult<QueryOutput> {
        let cancelled = Arc::new(AtomicBool::new(false));
        let this = self.clone();
        let flag = Arc::clone(&cancelled);
        let collection_name = collection.to_string();
        let handle = tokio::task::spawn_blocking(move || this.run(&collection_name, &pipeline, Some(flag.as_ref())));

        let joined = match self.config.query_timeout() {
            Some(limit) => match tokio::time::timeout(limit, handle).await {
                Ok(joined) => joined,
                Err(_) => {
                    cancelled.store(true, Ordering::Relaxed);
                    return Err(ExecutorError::query_timeout(self.config.query_timeout_ms));
                }
            },
            None => handle.await,
        };
        joined.map_err(|e| ExecutorError::execution_failed("orchestrator", format!("query task failed: {}", e)))?
    }

    fn plan(&self, pipeline: &Json) -> ExecutorResult<Pipeline> {
        match self.planner.plan(pipeline) {
            Ok(plan) => {
                Event::PlanValidated.emit(&[("stages", &plan.len().to_string())]);
                Ok(plan)
            }
            Err(err) => {
                Event::PlanRejected.emit(&[("code", err.code().code()), ("reason", err.message())]);
                Err(err.into())
            }
        }
    }

    fn run(&self, collection: &str, pipeline: &Pipeline, cancel: Option<&AtomicBool>) -> ExecutorResult<QueryOutput> {
        let ctx = ExecutionContext::new(self.store.as_ref(), &self.pool, &self.config, &self.metrics);
        let ctx = match cancel {
            Some(flag) => ctx.with_cancel_flag(flag),
            None => ctx,
        };
        let query_id = ctx.query_id.to_string();
        let timer = Timer::new();
        Event::QueryReceived.emit(&[
            ("collection", collection),
            ("query_id", &query_id),
            ("stages", &pipeline.len().to_string()),
        ]);

        let result = ctx
            .require_collections(&pipeline.referenced_collections())
            .and_then(|_| ctx.scan(collection))
            .and_then(|input| run_stages(&pipeline.stages, input, &ctx, &Variables::new()));

        match result {
            Ok(documents) => {
                self.metrics.increment_queries_executed();
                self.metrics.add_documents_returned(documents.len() as u64);
                Event::QueryExecuted.emit(&[
                    ("count", &documents.len().to_string()),
                    ("elapsed_ms", &timer.elapsed_ms()),
                    ("query_id", &query_id),
                ]);
                Ok(QueryOutput::new(ctx.query_id, documents))
            }
            Err(err) => {
                let event = if err.is_timeout() {
                    self.metrics.increment_queries_timed_out();
                    Event::QueryTimedOut
                } else {
                    self.metrics.increment_queries_failed();
                    Event::QueryFailed
                };
                event.emit(&[
                    ("code", err.code().code()),
                    ("elapsed_ms", &timer.elapsed_ms()),
                    ("query_id", &query_id),
                    ("reason", err.message()),
                ]);
                Err(err)
            }
        }
    }
}

// ==================
// Stage chain
// ==================

/// Runs a stage chain over `input`.
///
/// Used for the top-level pipeline and for every sub-pipeline (lookup,
/// union, facet), which see their own input and variable scope.
pub(crate) fn run_stages(
    stages: &[Stage],
    input: Vec<Document>,
    ctx: &ExecutionContext<'_>,
    vars: &Variables<'_>,
) -> ExecutorResult<Vec<Document>> {
    let mut docs = input;
    let mut i = 0;
    while i < stages.len() {
        if stages[i].mode() == StageMode::Streaming {
            let end = stages[i..]
                .iter()
                .position(|s| s.mode() == StageMode::Blocking)
                .map_or(stages.len(), |offset| i + offset);
            docs = run_segment(&stages[i..end], docs, ctx, vars)?;
            i = end;
        } else {
            docs = run_blocking(&stages[i], docs, ctx, vars)?;
            i += 1;
        }
    }
    Ok(docs)
}

fn stage_complete(stage: &Stage, count: usize, ctx: &ExecutionContext<'_>) {
    ctx.metrics.increment_stages_executed();
    Event::StageComplete.emit(&[
        ("count", &count.to_string()),
        ("query_id", &ctx.query_id.to_string()),
        ("stage", stage.name()),
    ]);
}

fn run_blocking(
    stage: &Stage,
    input: Vec<Document>,
    ctx: &ExecutionContext<'_>,
    vars: &Variables<'_>,
) -> ExecutorResult<Vec<Document>> {
    ctx.check_deadline()?;
    let out = match stage {
        Stage::Group(spec) => run_group(spec, input, ctx, vars)?,
        Stage::Window(spec) => run_window(spec, input, ctx, vars)?,
        Stage::Bucket(spec) => run_bucket(spec, input, ctx, vars)?,
        Stage::Facet(spec) => run_facet(spec, input, ctx, vars)?,
        Stage::UnionWith(spec) => run_union_with(spec, input, ctx, vars)?,
        Stage::Densify(spec) => run_densify(spec, input, ctx)?,
        Stage::Fill(spec) => run_fill(spec, input, ctx, vars)?,
        Stage::Sort(spec) => {
            let mut docs = input;
            ResultSorter::sort(&mut docs, spec);
            docs
        }
        Stage::Count(field) => {
            if input.is_empty() {
                Vec::new()
            } else {
                let mut doc = Document::with_capacity(1);
                doc.insert(field.clone(), Value::Number(input.len() as f64));
                vec![doc]
            }
        }
        streaming => return run_segment(std::slice::from_ref(streaming), input, ctx, vars),
    };
    stage_complete(stage, out.len(), ctx);
    Ok(out)
}

/// One streaming stage, prepared for batch processing
enum Operator<'s> {
    Match(&'s MatchExpr),
    Project(&'s ProjectSpec),
    AddFields(&'s [(String, crate::expr::Expression)]),
    Unset(&'s [String]),
    Unwind(&'s UnwindSpec),
    Lookup(PreparedLookup<'s>),
    GraphLookup(PreparedGraphLookup<'s>),
    Skip(usize),
    Limit(usize),
}

impl<'s> Operator<'s> {
    fn prepare(stage: &'s Stage, ctx: &ExecutionContext<'_>, vars: &Variables<'_>) -> ExecutorResult<Self> {
        Ok(match stage {
            Stage::Match(expr) => Operator::Match(expr),
            Stage::Project(spec) => Operator::Project(spec),
            Stage::AddFields(fields) => Operator::AddFields(fields),
            Stage::Unset(fields) => Operator::Unset(fields),
            Stage::Unwind(spec) => Operator::Unwind(spec),
            Stage::Lookup(spec) => Operator::Lookup(PreparedLookup::prepare(spec, ctx)?),
            Stage::GraphLookup(spec) => Operator::GraphLookup(PreparedGraphLookup::prepare(spec, ctx, vars)?),
            Stage::Skip(n) => Operator::Skip(*n),
            Stage::Limit(n) => Operator::Limit(*n),
            blocking => {
                return Err(ExecutorError::execution_failed(
                    blocking.name(),
                    "blocking stage scheduled in a streaming run",
                ))
            }
        })
    }

    fn apply(
        &mut self,
        stage: &Stage,
        batch: Vec<Document>,
        ctx: &ExecutionContext<'_>,
        vars: &Variables<'_>,
    ) -> ExecutorResult<Vec<Document>> {
        match self {
            Operator::Match(expr) => {
                let mut kept = Vec::with_capacity(batch.len());
                for doc in batch {
                    if PredicateFilter::matches(&doc, expr, vars)? {
                        kept.push(doc);
                    }
                }
                Ok(kept)
            }
            Operator::Project(spec) => batch.iter().map(|doc| project(spec, doc, vars)).collect(),
            Operator::AddFields(fields) => batch
                .into_iter()
                .map(|doc| add_fields(stage.name(), fields, doc, vars))
                .collect(),
            Operator::Unset(fields) => Ok(batch.into_iter().map(|doc| unset(fields, doc)).collect()),
            Operator::Unwind(spec) => {
                let mut out = Vec::with_capacity(batch.len());
                for doc in batch {
                    unwind(spec, doc, &mut out);
                }
                Ok(out)
            }
            Operator::Lookup(prepared) => prepared.apply(batch, ctx, vars),
            Operator::GraphLookup(prepared) => prepared.apply(batch, ctx, vars),
            Operator::Skip(remaining) => {
                let mut batch = batch;
                let skipped = (*remaining).min(batch.len());
                *remaining -= skipped;
                Ok(batch.split_off(skipped))
            }
            Operator::Limit(remaining) => {
                let mut batch = batch;
                batch.truncate(*remaining);
                *remaining -= batch.len();
                Ok(batch)
            }
        }
    }

    /// True once nothing more can pass this operator
    fn exhausted(&self) -> bool {
        matches!(self, Operator::Limit(0))
    }
}

/// Pushes `input` through a run of streaming stages in batches.
///
/// Stops reading input as soon as a `$limit` in the run is used up.
fn run_segment(
    stages: &[Stage],
    input: Vec<Document>,
    ctx: &ExecutionContext<'_>,
    vars: &Variables<'_>,
) -> ExecutorResult<Vec<Document>> {
    let mut operators = stages
        .iter()
        .map(|stage| Operator::prepare(stage, ctx, vars))
        .collect::<ExecutorResult<Vec<_>>>()?;
    let mut counts = vec![0usize; stages.len()];
    let mut out = Vec::new();
    let mut source = input.into_iter();

    while !operators.iter().any(Operator::exhausted) {
        let batch: Vec<Document> = source.by_ref().take(ctx.batch_size()).collect();
        if batch.is_empty() {
            break;
        }
        ctx.check_deadline()?;

        let mut current = batch;
        for ((operator, stage), count) in operators.iter_mut().zip(stages).zip(counts.iter_mut()) {
            current = operator.apply(stage, current, ctx, vars)?;
            *count += current.len();
            if current.is_empty() {
                break;
            }
        }
        out.extend(current);
    }

    for (stage, count) in stages.iter().zip(counts) {
        stage_complete(stage, count, ctx);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json;
    use std::time::Duration;

    fn weather_store() -> Arc<MemoryStore> {
        let store = MemoryStore::new();
        store
            .insert_json(
                "weather",
                json!([
                    {"location": "Prague", "temperature_c": 10, "date": {"$date": "2021-03-01T00:00:00Z"}},
                    {"location": "Brno", "temperature_c": 4, "date": {"$date": "2021-03-01T00:00:00Z"}},
                    {"location": "Prague", "temperature_c": 15, "date": {"$date": "2021-03-02T00:00:00Z"}},
                    {"location": "Prague", "temperature_c": 20, "date": {"$date": "2021-03-03T00:00:00Z"}}
                ]),
            )
            .unwrap();
        Arc::new(store)
    }

    fn orchestrator(config: EngineConfig) -> Orchestrator {
        Orchestrator::new(weather_store(), config).unwrap()
    }

    fn config() -> EngineConfig {
        EngineConfig::default().with_worker_threads(2)
    }

    #[test]
    fn test_group_end_to_end() {
        let out = orchestrator(config())
            .execute_json(
                "weather",
                &json!([
                    {"$match": {"location": "Prague"}},
                    {"$group": {"_id": "$location", "avg_temp": {"$avg": "$temperature_c"}, "count": {"$sum": 1}}},
                    {"$project": {"_id": 0, "location": "$_id", "avg_temp": 1, "count": 1}}
                ]),
            )
            .unwrap();
        assert_eq!(out.count, 1);
        assert_eq!(out.documents[0].to_json(), json!({"location": "Prague", "avg_temp": 15, "count": 3}));
    }

    #[test]
    fn test_streaming_run_with_small_batches() {
        let orchestrator = orchestrator(config().with_batch_size(1));
        let out = orchestrator
            .execute_json(
                "weather",
                &json!([
                    {"$addFields": {"temp_k": {"$add": ["$temperature_c", 273]}}},
                    {"$skip": 1},
                    {"$limit": 2},
                    {"$project": {"_id": 0, "temp_k": 1}}
                ]),
            )
            .unwrap();
        let temps: Vec<Value> = out.documents.iter().map(|d| d.lookup("temp_k")).collect();
        assert_eq!(temps, vec![Value::from(277.0), Value::from(288.0)]);
    }

    #[test]
    fn test_limit_stops_early() {
        let orchestrator = orchestrator(config().with_batch_size(1));
        let out = orchestrator
            .execute_json("weather", &json!([{"$limit": 1}, {"$count": "n"}]))
            .unwrap();
        assert_eq!(out.documents[0].lookup("n"), Value::from(1.0));
        assert_eq!(orchestrator.metrics().snapshot().documents_scanned, 4);
    }

    #[test]
    fn test_count_on_empty_input_emits_nothing() {
        let out = orchestrator(config())
            .execute_json("weather", &json!([{"$match": {"location": "Oslo"}}, {"$count": "n"}]))
            .unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_invalid_pipeline_fails_before_scan() {
        let orchestrator = orchestrator(config());
        let err = orchestrator
            .execute_json("weather", &json!([{"$bucket": {"groupBy": "$t", "boundaries": [10, 0]}}]))
            .unwrap_err();
        assert_eq!(err.code().code(), "STRATUS_STAGE_CONFIG");
        assert_eq!(orchestrator.metrics().snapshot().documents_scanned, 0);
    }

    #[test]
    fn test_unknown_collection() {
        let orchestrator = orchestrator(config());
        let err = orchestrator.execute_json("nowhere", &json!([])).unwrap_err();
        assert_eq!(err.code().code(), "STRATUS_DATA_SOURCE");
        assert_eq!(orchestrator.metrics().snapshot().queries_failed, 1);
    }

    #[test]
    fn test_missing_joined_collection_fails_before_scan() {
        let orchestrator = orchestrator(config());
        let err = orchestrator
            .execute_json(
                "weather",
                &json!([{"$facet": {"near": [{"$lookup": {
                    "from": "stations", "localField": "location", "foreignField": "city", "as": "s"
                }}]}}]),
            )
            .unwrap_err();
        assert_eq!(err.code().code(), "STRATUS_DATA_SOURCE");
        assert!(err.message().contains("stations"));
        assert_eq!(orchestrator.metrics().snapshot().documents_scanned, 0);
    }

    #[test]
    fn test_expression_failure_aborts_query() {
        let err = orchestrator(config())
            .execute_json(
                "weather",
                &json!([{"$addFields": {"bad": {"$concat": ["$location", "$temperature_c"]}}}]),
            )
            .unwrap_err();
        assert_eq!(err.code().code(), "STRATUS_EXPRESSION_FAILED");
        assert_eq!(err.stage(), Some("$addFields"));
    }

    #[test]
    fn test_metrics_after_success() {
        let orchestrator = orchestrator(config());
        orchestrator.execute_json("weather", &json!([{"$sort": {"temperature_c": -1}}])).unwrap();
        let snapshot = orchestrator.metrics().snapshot();
        assert_eq!(snapshot.queries_executed, 1);
        assert_eq!(snapshot.documents_returned, 4);
        assert_eq!(snapshot.stages_executed, 1);
    }

    #[test]
    fn test_cancelled_query_times_out() {
        let orchestrator = orchestrator(config());
        let pipeline = orchestrator.planner().plan(&json!([{"$sort": {"date": 1}}])).unwrap();
        let flag = AtomicBool::new(true);
        let err = orchestrator.run("weather", &pipeline, Some(&flag)).unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(orchestrator.metrics().snapshot().queries_timed_out, 1);
    }

    #[tokio::test]
    async fn test_execute_async() {
        let orchestrator = orchestrator(config().with_query_timeout(Duration::from_secs(10)));
        let pipeline = orchestrator
            .planner()
            .plan(&json!([{"$group": {"_id": null, "n": {"$sum": 1}}}]))
            .unwrap();
        let out = orchestrator.execute_async("weather", pipeline).await.unwrap();
        assert_eq!(out.documents[0].lookup("n"), Value::from(4.0));
    }
}
