mod batch;
mod config;
mod format;
mod processing;
mod record;

pub use batch::{
    BatchFailure, BatchInsertMetrics, BatchInsertOptions, BatchInsertResult, BatchProgress,
    BatchProgressCallback, BatchingStrategy, ConnectionPoolHealth,
};
pub use config::{
    AdaptiveBatchingConfig, BatchingConfig, ChunkingConfig, Config, ConnectionPoolConfig,
    DEFAULT_COLLECTION, DEFAULT_EMBEDDING_DIMENSION, DEFAULT_EMBEDDING_URL,
    DEFAULT_METRICS_RETENTION_DAYS, DEFAULT_QDRANT_URL, EmbeddingConfig, MetricsConfig,
    VectorStoreConfig,
};
pub use format::OutputFormat;
pub use processing::{
    Chunk, ChunkInput, ChunkOutput, ChunkProcessingOptions, ChunkSizeStats, ProcessingMetrics,
    ProcessingProgress, ProcessingResult, ProcessingSnapshot, ProcessingState, ProgressCallback,
};
pub use record::{ContentRecord, Metadata, VectorRecord};
