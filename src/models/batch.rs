//! Models for the batched insertion engine.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::config::{AdaptiveBatchingConfig, BatchingConfig};
use crate::error::BatchInsertError;
use crate::utils::{Backoff, RetryConfig};

/// How records are grouped into batches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BatchingStrategy {
    /// Consecutive groups of exactly `fixed_batch_size` records.
    FixedSize,
    /// Groups bounded by `max_batch_size_bytes`.
    ContentAware,
    /// Size tuned after every batch from observed latency and failures.
    #[default]
    Adaptive,
}

impl std::str::FromStr for BatchingStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('_', "-").as_str() {
            "fixed" | "fixed-size" => Ok(BatchingStrategy::FixedSize),
            "content" | "content-aware" => Ok(BatchingStrategy::ContentAware),
            "adaptive" => Ok(BatchingStrategy::Adaptive),
            _ => Err(format!("unknown batching strategy: {}", s)),
        }
    }
}

impl std::fmt::Display for BatchingStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BatchingStrategy::FixedSize => write!(f, "fixed-size"),
            BatchingStrategy::ContentAware => write!(f, "content-aware"),
            BatchingStrategy::Adaptive => write!(f, "adaptive"),
        }
    }
}

/// Snapshot emitted after every finished batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchProgress {
    pub batches_completed: usize,
    pub documents_processed: usize,
    pub total_documents: usize,
    pub successful_inserts: usize,
    pub failed_inserts: usize,
    pub percentage: f64,
}

pub type BatchProgressCallback = Arc<dyn Fn(BatchProgress) + Send + Sync>;

/// Options for a single `batch_insert` call.
#[derive(Clone)]
pub struct BatchInsertOptions {
    pub strategy: BatchingStrategy,
    pub fixed_batch_size: usize,
    pub max_batch_size_bytes: usize,
    /// Concurrent batch round trips; excess requests queue on the pool.
    pub max_concurrency: usize,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub max_retry_delay_ms: u64,
    pub backoff: Backoff,
    pub timeout_ms: u64,
    pub continue_on_error: bool,
    pub adaptive: AdaptiveBatchingConfig,
    pub progress_callback: Option<BatchProgressCallback>,
}

impl std::fmt::Debug for BatchInsertOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchInsertOptions")
            .field("strategy", &self.strategy)
            .field("fixed_batch_size", &self.fixed_batch_size)
            .field("max_batch_size_bytes", &self.max_batch_size_bytes)
            .field("max_concurrency", &self.max_concurrency)
            .field("max_retries", &self.max_retries)
            .field("retry_delay_ms", &self.retry_delay_ms)
            .field("backoff", &self.backoff)
            .field("timeout_ms", &self.timeout_ms)
            .field("continue_on_error", &self.continue_on_error)
            .field("progress_callback", &self.progress_callback.is_some())
            .finish()
    }
}

impl Default for BatchInsertOptions {
    fn default() -> Self {
        Self::from_config(&BatchingConfig::default())
    }
}

impl BatchInsertOptions {
    pub fn from_config(config: &BatchingConfig) -> Self {
        Self {
            strategy: config.strategy,
            fixed_batch_size: config.fixed_batch_size,
            max_batch_size_bytes: config.max_batch_size_bytes,
            max_concurrency: config.max_concurrency,
            max_retries: config.max_retries,
            retry_delay_ms: config.retry_delay_ms,
            max_retry_delay_ms: config.max_retry_delay_ms,
            backoff: config.backoff,
            timeout_ms: config.timeout_ms,
            continue_on_error: config.continue_on_error,
            adaptive: config.adaptive.clone(),
            progress_callback: None,
        }
    }

    #[must_use]
    pub fn with_strategy(mut self, strategy: BatchingStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    #[must_use]
    pub fn with_progress(mut self, callback: BatchProgressCallback) -> Self {
        self.progress_callback = Some(callback);
        self
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig::new(self.max_retries)
            .with_initial_delay(Duration::from_millis(self.retry_delay_ms))
            .with_max_delay(Duration::from_millis(
                self.max_retry_delay_ms.max(self.retry_delay_ms),
            ))
            .with_backoff(self.backoff)
    }

    pub fn validate(&self) -> Result<(), BatchInsertError> {
        if self.fixed_batch_size == 0 {
            return Err(BatchInsertError::InvalidOptions(
                "fixed_batch_size must be at least 1".to_string(),
            ));
        }
        if self.max_batch_size_bytes == 0 {
            return Err(BatchInsertError::InvalidOptions(
                "max_batch_size_bytes must be at least 1".to_string(),
            ));
        }
        if self.max_concurrency == 0 {
            return Err(BatchInsertError::InvalidOptions(
                "max_concurrency must be at least 1".to_string(),
            ));
        }
        if self.retry_delay_ms == 0 {
            return Err(BatchInsertError::InvalidOptions(
                "retry_delay_ms must be non-zero".to_string(),
            ));
        }
        if self.timeout_ms == 0 {
            return Err(BatchInsertError::InvalidOptions(
                "timeout_ms must be non-zero".to_string(),
            ));
        }
        self.adaptive
            .validate()
            .map_err(|e| BatchInsertError::InvalidOptions(e.to_string()))
    }
}

/// A failed batch or rejected record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchFailure {
    /// `None` for records rejected before batching.
    pub batch_index: Option<usize>,
    pub record_count: usize,
    pub attempts: u32,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchInsertMetrics {
    pub total_processing_time_ms: u64,
    pub embedding_generation_time_ms: u64,
    pub database_insertion_time_ms: u64,
    pub batches_processed: usize,
    pub average_batch_size_used: f64,
    /// Busy slot time over available slot time, 0-100.
    pub connection_pool_efficiency: f64,
    pub throughput_docs_per_second: f64,
    pub retries_performed: u32,
    pub adaptive_batching_used: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchInsertResult {
    pub total_documents: usize,
    pub successful_inserts: usize,
    pub failed_inserts: usize,
    pub errors: Vec<BatchFailure>,
    pub metrics: BatchInsertMetrics,
}

impl BatchInsertResult {
    /// Every input record is accounted for exactly once.
    pub fn is_reconciled(&self) -> bool {
        self.successful_inserts + self.failed_inserts == self.total_documents
    }
}

/// Point-in-time view of the connection pool.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionPoolHealth {
    pub active_connections: usize,
    pub idle_connections: usize,
    pub total_connections: usize,
    pub max_connections: usize,
    pub total_acquisitions: u64,
    pub acquire_timeouts: u64,
    /// 0-100, lowered by saturation and acquisition timeouts.
    pub health_score: f64,
}
