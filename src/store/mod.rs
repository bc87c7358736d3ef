//! Document store collaborator
//!
//! The engine never owns data. It reads collections through the
//! [`DocumentStore`] trait, which the caller implements over whatever
//! storage it has. Two implementations ship with the crate:
//!
//! - [`MemoryStore`] for embedding and tests
//! - [`JsonDirStore`] reading `<dir>/<collection>.json` for the CLI

mod errors;
mod json_dir;
mod memory;

pub use errors::{StoreError, StoreResult};
pub use json_dir::JsonDirStore;
pub use memory::MemoryStore;

use crate::value::Document;

/// How [`DocumentStore::write`] treats existing documents
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Append to the collection
    Insert,
    /// Replace the whole collection
    Replace,
}

/// Read access to named collections.
///
/// Implementations must be shareable across the worker pool: facet
/// branches and lookup sub-queries scan concurrently.
pub trait DocumentStore: Send + Sync {
    /// Returns every document of `collection` in insertion order
    fn scan(&self, collection: &str) -> StoreResult<Vec<Document>>;

    /// Returns true if the collection exists
    fn contains(&self, collection: &str) -> bool;

    /// Writes documents back for an external merge stage.
    ///
    /// The query engine never calls this. Stores that cannot write keep
    /// the default.
    fn write(&self, collection: &str, _documents: Vec<Document>, _mode: WriteMode) -> StoreResult<usize> {
        Err(StoreError::Unsupported(collection.to_string()))
    }
}
