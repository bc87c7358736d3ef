//! Per-query execution context
//!
//! Borrowed by every stage of one query, including sub-pipelines running on
//! the worker pool. Holds nothing mutable except through atomics.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use rayon::ThreadPool;
use uuid::Uuid;

use super::errors::{ExecutorError, ExecutorResult};
use crate::config::EngineConfig;
use crate::expr::{Expression, Variables};
use crate::observability::{Event, MetricsRegistry};
use crate::store::{DocumentStore, StoreError};
use crate::value::{Document, Value};

pub struct ExecutionContext<'a> {
    pub query_id: Uuid,
    pub store: &'a dyn DocumentStore,
    pub pool: &'a ThreadPool,
    pub config: &'a EngineConfig,
    pub metrics: &'a MetricsRegistry,
    deadline: Option<Instant>,
    /// Set by the async entry point once its timeout fires
    cancelled: Option<&'a AtomicBool>,
}

impl<'a> ExecutionContext<'a> {
    pub fn new(
        store: &'a dyn DocumentStore,
        pool: &'a ThreadPool,
        config: &'a EngineConfig,
        metrics: &'a MetricsRegistry,
    ) -> Self {
        Self {
            query_id: Uuid::new_v4(),
            store,
            pool,
            config,
            metrics,
            deadline: config.query_timeout().map(|t| Instant::now() + t),
            cancelled: None,
        }
    }

    pub fn with_cancel_flag(mut self, flag: &'a AtomicBool) -> Self {
        self.cancelled = Some(flag);
        self
    }

    /// Documents processed between deadline checks
    pub fn batch_size(&self) -> usize {
        self.config.batch_size.max(1)
    }

    /// Fails with a timeout once the deadline has passed or the query was cancelled
    pub fn check_deadline(&self) -> ExecutorResult<()> {
        let expired = self.deadline.map_or(false, |d| Instant::now() >= d);
        let cancelled = self.cancelled.map_or(false, |c| c.load(Ordering::Relaxed));
        if expired || cancelled {
            return Err(ExecutorError::query_timeout(self.config.query_timeout_ms));
        }
        Ok(())
    }

    /// Reads a whole collection from the store
    /// Fails fast when a joined collection is missing, before any scan
    pub fn require_collections(&self, collections: &[String]) -> ExecutorResult<()> {
        match collections.iter().find(|name| !self.store.contains(name)) {
            Some(missing) => Err(StoreError::CollectionNotFound(missing.clone()).into()),
            None => Ok(()),
        }
    }

    pub fn scan(&self, collection: &str) -> ExecutorResult<Vec<Document>> {
        self.check_deadline()?;
        let documents = self.store.scan(collection)?;
        self.metrics.add_documents_scanned(documents.len() as u64);
        Event::CollectionScanned.emit(&[
            ("collection", collection),
            ("count", &documents.len().to_string()),
            ("query_id", &self.query_id.to_string()),
        ]);
        Ok(documents)
    }
}

/// Evaluates `expr` for a stage, tagging failures with the stage name and expression text
pub fn eval(stage: &str, expr: &Expression, doc: &Document, vars: &Variables<'_>) -> ExecutorResult<Value> {
    expr.evaluate(doc, vars)
        .map_err(|e| ExecutorError::expression_failed(stage, expr, e))
}

/// Runs `f` with a context over `store` on a two-thread pool
#[cfg(test)]
pub(crate) fn with_test_context<R>(
    store: &dyn DocumentStore,
    f: impl FnOnce(&ExecutionContext<'_>) -> R,
) -> R {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(2)
        .build()
        .expect("test pool");
    let config = EngineConfig::default();
    let metrics = MetricsRegistry::new();
    f(&ExecutionContext::new(store, &pool, &config, &metrics))
}
