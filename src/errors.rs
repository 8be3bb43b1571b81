// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types for the retrieval core.
//!
//! Every fallible library operation returns [`RagError`]. Callers can tell
//! caller-contract violations (`DuplicateChunk`, `NotFound`) apart from
//! transient faults (`Timeout`, I/O) through [`RagError::is_retryable`].
//! An empty index is never an error: retrieval returns an empty result.

use std::time::Duration;
use thiserror::Error;

/// Result type alias for lexrag operations
pub type Result<T> = std::result::Result<T, RagError>;

/// Errors raised by the chunker, embedder, vector index, retriever and
/// citation binder.
#[derive(Error, Debug)]
pub enum RagError {
    /// Invalid settings; fatal at startup
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Vector dimension does not match the index or embedder dimension
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// A chunk with this id is already indexed
    #[error("duplicate chunk: {0}")]
    DuplicateChunk(String),

    /// Chunk or document id is unknown
    #[error("not found: {0}")]
    NotFound(String),

    /// An embedding call or persistence operation exceeded its deadline
    #[error("{operation} timed out after {}ms", timeout.as_millis())]
    Timeout {
        operation: String,
        timeout: Duration,
    },

    /// Query text is empty after normalization
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// Document input violates an ingestion precondition
    #[error("invalid document: {0}")]
    InvalidDocument(String),

    /// Embedding provider failed
    #[error("embedding error: {0}")]
    Embedding(String),

    /// SQLite persistence failed
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// Filesystem I/O failed
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding or decoding failed
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A thread panicked while holding a lock on shared state
    #[error("lock poisoned: {0}")]
    LockPoisoned(&'static str),
}

impl RagError {
    /// Returns true for transient faults a caller may retry with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RagError::Timeout { .. }
                | RagError::Io(_)
                | RagError::Storage(_)
                | RagError::Embedding(_)
        )
    }

    pub(crate) fn timeout(operation: impl Into<String>, timeout: Duration) -> Self {
        RagError::Timeout {
            operation: operation.into(),
            timeout,
        }
    }
}
