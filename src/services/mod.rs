pub mod batch_store;
pub mod batching;
pub mod chunker;
pub mod embedding;
pub mod metrics;
pub mod pool;
pub mod processor;
pub mod vector_store;

pub use batch_store::BatchVectorStore;
pub use batching::{AdaptiveBatchSizer, BatchPlanner};
pub use chunker::ContentChunker;
pub use embedding::{Embedder, EmbeddingClient, HealthResponse};
pub use metrics::{MetricsStore, PerformanceMetricsCollector, PerformanceReport, RunSummary};
pub use pool::{ConnectionPool, PooledSlot};
pub use processor::ChunkedProcessor;
pub use vector_store::{
    CollectionInfo, QdrantBackend, VectorStore, create_backend,
    create_backend_with_embedding_config,
};
