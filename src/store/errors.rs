//! Document store errors

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    #[error("Collection not found: {0}")]
    CollectionNotFound(String),

    #[error("Invalid document in {collection}: {reason}")]
    InvalidDocument { collection: String, reason: String },

    #[error("Store I/O error: {0}")]
    Io(String),

    #[error("Write not supported by this store: {0}")]
    Unsupported(String),

    #[error("Store lock poisoned")]
    LockPoisoned,
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Io(e.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
