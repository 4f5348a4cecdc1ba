// quillbase-core/src/error.rs
// Error taxonomy shared by every QuillBase component

use thiserror::Error;

#[derive(Debug, Error)]
pub enum QuillError {
    /// Lookup of a missing document, index, collection or hint target
    #[error("Not found: {0}")]
    NotFound(String),

    /// An index with the same field list already exists
    #[error("Duplicate index: {0}")]
    DuplicateIndex(String),

    /// Index definition that cannot be created or dropped
    #[error("Invalid index: {0}")]
    InvalidIndex(String),

    /// Malformed predicate tree (unknown operator, unknown field, bad shape)
    #[error("Invalid filter: {0}")]
    InvalidFilter(String),

    /// Malformed aggregation pipeline or stage
    #[error("Invalid pipeline: {0}")]
    InvalidPipeline(String),

    /// Backend I/O or scan exceeded its deadline
    #[error("Operation timed out after {0} ms")]
    Timeout(u128),

    /// Backend unreachable or client already closed
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<serde_json::Error> for QuillError {
    fn from(err: serde_json::Error) -> Self {
        QuillError::Serialization(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, QuillError>;
