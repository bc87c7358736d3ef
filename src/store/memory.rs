//! In-memory document store

use std::collections::HashMap;
use std::sync::RwLock;

use uuid::Uuid;

use super::errors::{StoreError, StoreResult};
use super::{DocumentStore, WriteMode};
use crate::value::{Document, Value};

/// Collections held in memory behind a read-write lock.
///
/// Documents without an `_id` get a random UUID on insert.
#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<String, Vec<Document>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends documents to `collection`, creating it on first use
    pub fn insert_many(&self, collection: &str, documents: Vec<Document>) -> StoreResult<usize> {
        self.write(collection, documents, WriteMode::Insert)
    }

    /// Appends a JSON array of objects to `collection`
    pub fn insert_json(&self, collection: &str, json: serde_json::Value) -> StoreResult<usize> {
        let invalid = |reason: &str| StoreError::InvalidDocument {
            collection: collection.to_string(),
            reason: reason.to_string(),
        };
        let items = match json {
            serde_json::Value::Array(items) => items,
            _ => return Err(invalid("expected a JSON array of documents")),
        };
        let documents = items
            .into_iter()
            .map(|item| Document::from_json(item).ok_or_else(|| invalid("document is not an object")))
            .collect::<StoreResult<Vec<_>>>()?;
        self.insert_many(collection, documents)
    }
}

fn with_id(mut doc: Document) -> Document {
    if !doc.contains_key("_id") {
        // _id leads the document
        let mut out = Document::with_capacity(doc.len() + 1);
        out.insert("_id", Value::String(Uuid::new_v4().to_string()));
        for (k, v) in std::mem::take(&mut doc) {
            out.insert(k, v);
        }
        return out;
    }
    doc
}

impl DocumentStore for MemoryStore {
    fn scan(&self, collection: &str) -> StoreResult<Vec<Document>> {
        let guard = self.collections.read().map_err(|_| StoreError::LockPoisoned)?;
        guard
            .get(collection)
            .cloned()
            .ok_or_else(|| StoreError::CollectionNotFound(collection.to_string()))
    }

    fn contains(&self, collection: &str) -> bool {
        self.collections
            .read()
            .map(|guard| guard.contains_key(collection))
            .unwrap_or(false)
    }

    fn write(&self, collection: &str, documents: Vec<Document>, mode: WriteMode) -> StoreResult<usize> {
        // One guard for clear and insert: readers never see the emptied collection
        let mut guard = self.collections.write().map_err(|_| StoreError::LockPoisoned)?;
        let target = guard.entry(collection.to_string()).or_default();
        if mode == WriteMode::Replace {
            target.clear();
        }
        let count = documents.len();
        target.extend(documents.into_iter().map(with_id));
        Ok(count)
    }
}
