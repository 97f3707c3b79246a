//! Error types for the chunk → store → index → retrieval pipeline.
//!
//! Each stage owns a typed error. Per-file and per-entry failures are
//! isolated by the caller; [`RagError`] is the umbrella that whole-pipeline
//! failures propagate as.

use std::path::PathBuf;

/// A file could not be turned into chunks. The walker skips the file.
#[derive(Debug, thiserror::Error)]
pub enum ExtractionError {
    #[error("unsupported file type: {0}")]
    Unsupported(String),

    #[error("malformed file {path}: {reason}")]
    Malformed { path: String, reason: String },

    #[error("parse failed: {0}")]
    Parse(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Chunk store failure. Surfaced to the caller; aborts the operation.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("invalid chunk: {0}")]
    InvalidChunk(String),

    #[error("vector id {0} is already assigned")]
    Conflict(i64),

    #[error("batch size must be >= 1")]
    InvalidBatchSize,

    #[error("corrupt record: {0}")]
    Corrupt(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Vector index failure.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("vector/id count mismatch: {vectors} vectors, {ids} ids")]
    LabelMismatch { vectors: usize, ids: usize },

    #[error("k = {k} exceeds the maximum of {max}")]
    KTooLarge { k: usize, max: usize },

    #[error("failed to load index snapshot {path}: {reason}")]
    IndexLoad { path: PathBuf, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("snapshot encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Embedding model failure. Aborts the current build or query.
#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    #[error("embedding provider error: {0}")]
    Provider(String),

    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    Dimension { expected: usize, actual: usize },

    #[error("embedding count mismatch: sent {sent} texts, received {received} vectors")]
    Count { sent: usize, received: usize },

    #[error("embedding provider is disabled")]
    Disabled,
}

/// The index and the chunk store disagree on the id ↔ position mapping.
#[derive(Debug, thiserror::Error)]
pub enum DriftError {
    #[error("chunk store yielded vector id {got} after {previous}; ids must be strictly ascending")]
    OutOfOrder { previous: i64, got: i64 },

    #[error("chunk without vector id in file {0}")]
    MissingId(String),
}

/// Umbrella error for orchestrator and service operations.
#[derive(Debug, thiserror::Error)]
pub enum RagError {
    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    #[error(transparent)]
    Drift(#[from] DriftError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

pub type Result<T, E = RagError> = std::result::Result<T, E>;
