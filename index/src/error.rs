//! Error types for the indexing core.

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, IndexErr>;

/// Errors surfaced by the indexing core.
///
/// Precondition violations (`AlreadyIndexed`, `NotIndexed`, `InvalidPath`,
/// `ConfigError`) are caller bugs and propagate. Transient failures are
/// retried by the worker pool and, if exhausted, recorded in run stats
/// rather than thrown from the top-level operations.
#[derive(Debug, Error)]
pub enum IndexErr {
    #[error("path is not indexable: {path}: {cause}")]
    InvalidPath { path: String, cause: String },

    #[error("collection {collection} already exists; use reindex or force")]
    AlreadyIndexed { collection: String },

    #[error("collection {collection} is not indexed")]
    NotIndexed { collection: String },

    #[error("configuration error in {field}: {cause}")]
    ConfigError { field: String, cause: String },

    #[error("embedding request failed: {cause}")]
    EmbeddingFailed { cause: String },

    #[error("vector store {operation} failed: {cause}")]
    StoreFailed { operation: String, cause: String },

    #[error("git {command} failed: {cause}")]
    GitFailed { command: String, cause: String },

    #[error("git {command} timed out after {timeout_ms} ms")]
    GitTimeout { command: String, timeout_ms: u64 },

    #[error("snapshot io failed at {path}: {cause}")]
    SnapshotIo { path: String, cause: String },

    #[error("snapshot record corrupted in {path}: {cause}")]
    SnapshotCorrupt { path: String, cause: String },

    #[error("pipeline is shut down")]
    PipelineClosed,

    #[error("batch handler failed: {cause}")]
    BatchFailed { cause: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serde(#[from] serde_json::Error),
}

impl IndexErr {
    /// Shorthand for vector-store failures.
    pub fn store(operation: impl Into<String>, cause: impl std::fmt::Display) -> Self {
        Self::StoreFailed {
            operation: operation.into(),
            cause: cause.to_string(),
        }
    }

    /// Shorthand for git subprocess failures.
    pub fn git(command: impl Into<String>, cause: impl std::fmt::Display) -> Self {
        Self::GitFailed {
            command: command.into(),
            cause: cause.to_string(),
        }
    }
}
