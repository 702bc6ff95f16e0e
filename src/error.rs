//! Error types for the IL2CPP ingestion pipeline.

use thiserror::Error;

use crate::models::ProcessingState;
use crate::utils::retry::Retryable;

/// Errors related to embedding operations.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("failed to connect to embedding server: {0}")]
    ConnectionError(String),

    #[error("embedding server error: {0}")]
    ServerError(String),

    #[error("embedding request failed: {0}")]
    RequestError(#[from] reqwest::Error),

    #[error("invalid embedding response: {0}")]
    InvalidResponse(String),

    #[error("embedding timeout")]
    Timeout,
}

impl Retryable for EmbeddingError {
    fn is_retryable(&self) -> bool {
        match self {
            EmbeddingError::ConnectionError(_) | EmbeddingError::Timeout => true,
            // 5xx gateway errors and rate limiting are transient
            EmbeddingError::ServerError(msg) => {
                msg.contains("503")
                    || msg.contains("502")
                    || msg.contains("504")
                    || msg.contains("429")
                    || msg.to_lowercase().contains("unavailable")
                    || msg.to_lowercase().contains("too many requests")
            }
            EmbeddingError::RequestError(e) => e.is_timeout() || e.is_connect(),
            EmbeddingError::InvalidResponse(_) => false,
        }
    }
}

/// Errors related to vector store operations.
#[derive(Debug, Error)]
pub enum VectorStoreError {
    #[error("failed to connect to vector store: {0}")]
    ConnectionError(String),

    #[error("collection error: {0}")]
    CollectionError(String),

    #[error("upsert error: {0}")]
    UpsertError(String),

    #[error("invalid record: {0}")]
    InvalidRecord(String),

    #[error("vector store client error: {0}")]
    ClientError(String),
}

impl Retryable for VectorStoreError {
    fn is_retryable(&self) -> bool {
        match self {
            VectorStoreError::ConnectionError(_) => true,
            VectorStoreError::InvalidRecord(_) => false,
            VectorStoreError::CollectionError(msg)
            | VectorStoreError::UpsertError(msg)
            | VectorStoreError::ClientError(msg) => {
                let msg_lower = msg.to_lowercase();
                msg_lower.contains("timeout")
                    || msg_lower.contains("connection")
                    || msg_lower.contains("unavailable")
                    || msg_lower.contains("too many")
            }
        }
    }
}

/// Errors raised by the connection pool.
#[derive(Debug, Clone, Error)]
pub enum PoolError {
    #[error("connection pool exhausted: no slot available after {attempts} attempt(s) of {timeout_ms}ms")]
    AcquireTimeout { attempts: u32, timeout_ms: u64 },

    #[error("connection pool is closed")]
    Closed,
}

impl Retryable for PoolError {
    fn is_retryable(&self) -> bool {
        matches!(self, PoolError::AcquireTimeout { .. })
    }
}

/// Failure of a single embed + upsert round trip for one batch.
#[derive(Debug, Error)]
pub enum BatchAttemptError {
    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error("embedding failed: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("upsert failed: {0}")]
    Store(#[from] VectorStoreError),

    #[error("batch round trip timed out after {0}ms")]
    Timeout(u64),

    #[error("embedding count mismatch: expected {expected}, got {actual}")]
    VectorCountMismatch { expected: usize, actual: usize },
}

impl Retryable for BatchAttemptError {
    fn is_retryable(&self) -> bool {
        match self {
            BatchAttemptError::Pool(e) => e.is_retryable(),
            BatchAttemptError::Embedding(e) => e.is_retryable(),
            BatchAttemptError::Store(e) => e.is_retryable(),
            BatchAttemptError::Timeout(_) => true,
            BatchAttemptError::VectorCountMismatch { .. } => false,
        }
    }
}

/// Errors that abort a whole `batch_insert` call.
#[derive(Debug, Error)]
pub enum BatchInsertError {
    #[error("record {index} rejected: {reason}")]
    InvalidRecord { index: usize, reason: String },

    #[error(
        "batch {batch_index} ({records} records) failed after {attempts} attempt(s): {message}"
    )]
    BatchFailed {
        batch_index: usize,
        records: usize,
        attempts: u32,
        message: String,
        /// Records upserted by every batch that completed, including batches
        /// drained after the failure; they are not rolled back.
        inserted_before_failure: usize,
    },

    #[error("invalid batch insert options: {0}")]
    InvalidOptions(String),
}

/// Errors raised by the chunked processor.
#[derive(Debug, Error)]
pub enum ProcessingError {
    #[error("chunk {chunk_id} failed: {message}")]
    ChunkFailed { chunk_id: usize, message: String },

    #[error("cannot {operation} while processing is {state}")]
    InvalidState {
        operation: &'static str,
        state: ProcessingState,
    },

    #[error("invalid processing snapshot: {0}")]
    InvalidSnapshot(String),

    #[error("invalid processing options: {0}")]
    InvalidOptions(String),
}

/// Errors related to configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlParseError(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),

    #[error("path error: {0}")]
    PathError(String),

    #[error("validation error: {0}")]
    ValidationError(String),
}

/// Application-level errors that wrap domain errors.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("processing error: {0}")]
    Processing(#[from] ProcessingError),

    #[error("batch insert error: {0}")]
    BatchInsert(#[from] BatchInsertError),

    #[error("vector store error: {0}")]
    VectorStore(#[from] VectorStoreError),

    #[error("embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("infrastructure not running: {0}")]
    InfrastructureError(String),
}
