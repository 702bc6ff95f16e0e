//! Vector store abstraction layer.
//!
//! The batching engine only needs collection bootstrap and bulk upsert, so the
//! trait is kept to those operations plus health reporting.

mod qdrant;

pub use qdrant::QdrantBackend;

use async_trait::async_trait;

use crate::error::VectorStoreError;
use crate::models::{DEFAULT_EMBEDDING_DIMENSION, EmbeddingConfig, VectorRecord, VectorStoreConfig};

/// Collection information
#[derive(Debug, Clone)]
pub struct CollectionInfo {
    pub points_count: u64,
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Check if the vector store is healthy and accessible.
    async fn health_check(&self) -> Result<bool, VectorStoreError>;

    /// Returns None if the collection doesn't exist.
    async fn get_collection_info(&self) -> Result<Option<CollectionInfo>, VectorStoreError>;

    /// Create the collection if it doesn't exist.
    async fn create_collection(&self) -> Result<(), VectorStoreError>;

    /// Insert or overwrite records keyed by their id.
    async fn upsert_records(&self, records: Vec<VectorRecord>) -> Result<(), VectorStoreError>;

    fn collection(&self) -> &str;
}

/// Create the configured backend with the given vector dimension.
pub fn create_backend(
    config: &VectorStoreConfig,
    embedding_dim: u64,
) -> Result<Box<dyn VectorStore>, VectorStoreError> {
    Ok(Box::new(QdrantBackend::new(config, embedding_dim)?))
}

/// Create a backend sized from the embedding configuration.
pub fn create_backend_with_embedding_config(
    vector_config: &VectorStoreConfig,
    embedding_config: &EmbeddingConfig,
) -> Result<Box<dyn VectorStore>, VectorStoreError> {
    let dimension = if embedding_config.dimension == 0 {
        DEFAULT_EMBEDDING_DIMENSION
    } else {
        embedding_config.dimension
    };
    create_backend(vector_config, u64::from(dimension))
}
