use serde::{Deserialize, Serialize};

use super::batch::BatchingStrategy;
use crate::error::ConfigError;
use crate::utils::Backoff;

pub const DEFAULT_EMBEDDING_URL: &str = "http://localhost:11411";
pub const DEFAULT_QDRANT_URL: &str = "http://localhost:6334";
pub const DEFAULT_COLLECTION: &str = "il2cpp_dump";
pub const DEFAULT_EMBEDDING_DIMENSION: u32 = 1024;
pub const DEFAULT_METRICS_RETENTION_DAYS: u32 = 30;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    #[serde(default)]
    pub vector_store: VectorStoreConfig,

    #[serde(default)]
    pub chunking: ChunkingConfig,

    #[serde(default)]
    pub batching: BatchingConfig,

    #[serde(default)]
    pub pool: ConnectionPoolConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl Config {
    pub fn config_dir() -> Option<std::path::PathBuf> {
        dirs::config_dir().map(|p| p.join("il2cpp-ingest"))
    }

    pub fn config_path() -> Option<std::path::PathBuf> {
        Self::config_dir().map(|p| p.join("config.toml"))
    }

    pub fn metrics_db_path() -> Option<std::path::PathBuf> {
        dirs::data_dir().map(|p| p.join("il2cpp-ingest").join("metrics.db"))
    }

    pub fn load() -> Result<Self, ConfigError> {
        match Self::config_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    pub fn load_from(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self) -> Result<std::path::PathBuf, ConfigError> {
        let path = Self::config_path().ok_or_else(|| {
            ConfigError::PathError("could not determine config directory".to_string())
        })?;
        self.save_to(&path)?;
        Ok(path)
    }

    pub fn save_to(&self, path: &std::path::Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Reject settings that would only fail later, at call time.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.embedding.batch_size == 0 {
            return Err(ConfigError::ValidationError(
                "embedding.batch_size must be at least 1".to_string(),
            ));
        }
        if self.chunking.chunk_size == 0 {
            return Err(ConfigError::ValidationError(
                "chunking.chunk_size must be at least 1".to_string(),
            ));
        }
        if self.chunking.record_size == 0 {
            return Err(ConfigError::ValidationError(
                "chunking.record_size must be at least 1".to_string(),
            ));
        }
        if self.chunking.max_concurrency == 0 {
            return Err(ConfigError::ValidationError(
                "chunking.max_concurrency must be at least 1".to_string(),
            ));
        }
        self.batching.validate()?;
        self.pool.validate()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_url")]
    pub url: String,

    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Texts per HTTP request to the embedding server.
    #[serde(default = "default_embedding_batch_size")]
    pub batch_size: u32,

    #[serde(default = "default_dimension")]
    pub dimension: u32,
}

fn default_embedding_url() -> String {
    DEFAULT_EMBEDDING_URL.to_string()
}

fn default_timeout() -> u64 {
    120
}

fn default_embedding_batch_size() -> u32 {
    32
}

fn default_dimension() -> u32 {
    DEFAULT_EMBEDDING_DIMENSION
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            url: default_embedding_url(),
            timeout_secs: default_timeout(),
            batch_size: default_embedding_batch_size(),
            dimension: default_dimension(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorStoreConfig {
    #[serde(default = "default_qdrant_url")]
    pub url: String,

    #[serde(default = "default_collection")]
    pub collection: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

fn default_qdrant_url() -> String {
    DEFAULT_QDRANT_URL.to_string()
}

fn default_collection() -> String {
    DEFAULT_COLLECTION.to_string()
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            url: default_qdrant_url(),
            collection: default_collection(),
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    /// Target size in bytes of one unit of work (pause/resume granularity).
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Target size in bytes of one stored record within a chunk.
    #[serde(default = "default_record_size")]
    pub record_size: usize,

    #[serde(default = "default_concurrency")]
    pub max_concurrency: usize,

    #[serde(default = "default_true")]
    pub continue_on_error: bool,

    #[serde(default = "default_true")]
    pub enable_eta: bool,

    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
}

fn default_chunk_size() -> usize {
    256 * 1024
}

fn default_record_size() -> usize {
    4000
}

fn default_concurrency() -> usize {
    4
}

fn default_true() -> bool {
    true
}

fn default_max_file_size() -> u64 {
    1024 * 1024 * 1024
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            record_size: default_record_size(),
            max_concurrency: default_concurrency(),
            continue_on_error: true,
            enable_eta: true,
            max_file_size: default_max_file_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchingConfig {
    #[serde(default)]
    pub strategy: BatchingStrategy,

    #[serde(default = "default_fixed_batch_size")]
    pub fixed_batch_size: usize,

    #[serde(default = "default_max_batch_size_bytes")]
    pub max_batch_size_bytes: usize,

    #[serde(default = "default_concurrency")]
    pub max_concurrency: usize,

    #[serde(default = "default_batch_retries")]
    pub max_retries: u32,

    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    #[serde(default = "default_max_retry_delay_ms")]
    pub max_retry_delay_ms: u64,

    #[serde(default)]
    pub backoff: Backoff,

    /// Upper bound on one embed + upsert round trip.
    #[serde(default = "default_batch_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default = "default_true")]
    pub continue_on_error: bool,

    #[serde(default)]
    pub adaptive: AdaptiveBatchingConfig,
}

fn default_fixed_batch_size() -> usize {
    50
}

fn default_max_batch_size_bytes() -> usize {
    256 * 1024
}

fn default_batch_retries() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    500
}

fn default_max_retry_delay_ms() -> u64 {
    10_000
}

fn default_batch_timeout_ms() -> u64 {
    120_000
}

impl Default for BatchingConfig {
    fn default() -> Self {
        Self {
            strategy: BatchingStrategy::default(),
            fixed_batch_size: default_fixed_batch_size(),
            max_batch_size_bytes: default_max_batch_size_bytes(),
            max_concurrency: default_concurrency(),
            max_retries: default_batch_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            max_retry_delay_ms: default_max_retry_delay_ms(),
            backoff: Backoff::default(),
            timeout_ms: default_batch_timeout_ms(),
            continue_on_error: true,
            adaptive: AdaptiveBatchingConfig::default(),
        }
    }
}

impl BatchingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.fixed_batch_size == 0 {
            return Err(ConfigError::ValidationError(
                "batching.fixed_batch_size must be at least 1".to_string(),
            ));
        }
        if self.max_batch_size_bytes == 0 {
            return Err(ConfigError::ValidationError(
                "batching.max_batch_size_bytes must be at least 1".to_string(),
            ));
        }
        if self.max_concurrency == 0 {
            return Err(ConfigError::ValidationError(
                "batching.max_concurrency must be at least 1".to_string(),
            ));
        }
        if self.retry_delay_ms == 0 {
            return Err(ConfigError::ValidationError(
                "batching.retry_delay_ms must be non-zero".to_string(),
            ));
        }
        self.adaptive.validate()
    }
}

/// Tunables for the adaptive batching strategy.
///
/// After every batch the next size is multiplied by `shrink_factor` when the
/// batch failed, took longer than `target_latency_ms`, or the failure rate over
/// the last `failure_window` batches exceeds `max_failure_rate`. It is
/// multiplied by `growth_factor` when latency stayed below
/// `target_latency_ms * comfort_ratio`. Sizes are clamped to
/// `[min_batch_size, max_batch_size]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdaptiveBatchingConfig {
    #[serde(default = "default_adaptive_initial")]
    pub initial_batch_size: usize,

    #[serde(default = "default_adaptive_min")]
    pub min_batch_size: usize,

    #[serde(default = "default_adaptive_max")]
    pub max_batch_size: usize,

    #[serde(default = "default_target_latency_ms")]
    pub target_latency_ms: u64,

    #[serde(default = "default_comfort_ratio")]
    pub comfort_ratio: f64,

    #[serde(default = "default_max_failure_rate")]
    pub max_failure_rate: f64,

    #[serde(default = "default_growth_factor")]
    pub growth_factor: f64,

    #[serde(default = "default_shrink_factor")]
    pub shrink_factor: f64,

    #[serde(default = "default_failure_window")]
    pub failure_window: usize,
}

fn default_adaptive_initial() -> usize {
    32
}

fn default_adaptive_min() -> usize {
    1
}

fn default_adaptive_max() -> usize {
    256
}

fn default_target_latency_ms() -> u64 {
    2_000
}

fn default_comfort_ratio() -> f64 {
    0.5
}

fn default_max_failure_rate() -> f64 {
    0.2
}

fn default_growth_factor() -> f64 {
    1.5
}

fn default_shrink_factor() -> f64 {
    0.5
}

fn default_failure_window() -> usize {
    5
}

impl Default for AdaptiveBatchingConfig {
    fn default() -> Self {
        Self {
            initial_batch_size: default_adaptive_initial(),
            min_batch_size: default_adaptive_min(),
            max_batch_size: default_adaptive_max(),
            target_latency_ms: default_target_latency_ms(),
            comfort_ratio: default_comfort_ratio(),
            max_failure_rate: default_max_failure_rate(),
            growth_factor: default_growth_factor(),
            shrink_factor: default_shrink_factor(),
            failure_window: default_failure_window(),
        }
    }
}

impl AdaptiveBatchingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_batch_size == 0 || self.min_batch_size > self.max_batch_size {
            return Err(ConfigError::ValidationError(format!(
                "adaptive batch bounds invalid: min {} max {}",
                self.min_batch_size, self.max_batch_size
            )));
        }
        if self.growth_factor < 1.0 {
            return Err(ConfigError::ValidationError(
                "adaptive.growth_factor must be >= 1.0".to_string(),
            ));
        }
        if !(self.shrink_factor > 0.0 && self.shrink_factor <= 1.0) {
            return Err(ConfigError::ValidationError(
                "adaptive.shrink_factor must be in (0, 1]".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.comfort_ratio)
            || !(0.0..=1.0).contains(&self.max_failure_rate)
        {
            return Err(ConfigError::ValidationError(
                "adaptive ratios must be within [0, 1]".to_string(),
            ));
        }
        Ok(())
    }
}

/// Limits for the upsert connection pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionPoolConfig {
    /// Upper bound on concurrent upsert round trips.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Slots kept warm regardless of idleness.
    #[serde(default = "default_min_connections")]
    pub min_connections: usize,

    #[serde(default = "default_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,

    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,

    /// Extra acquisition attempts after the first times out.
    #[serde(default = "default_pool_retries")]
    pub max_retries: u32,
}

fn default_max_connections() -> usize {
    4
}

fn default_min_connections() -> usize {
    1
}

fn default_acquire_timeout_ms() -> u64 {
    30_000
}

fn default_idle_timeout_ms() -> u64 {
    60_000
}

fn default_pool_retries() -> u32 {
    2
}

impl Default for ConnectionPoolConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            acquire_timeout_ms: default_acquire_timeout_ms(),
            idle_timeout_ms: default_idle_timeout_ms(),
            max_retries: default_pool_retries(),
        }
    }
}

impl ConnectionPoolConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_connections == 0 {
            return Err(ConfigError::ValidationError(
                "pool.max_connections must be at least 1".to_string(),
            ));
        }
        if self.min_connections > self.max_connections {
            return Err(ConfigError::ValidationError(format!(
                "pool.min_connections ({}) exceeds max_connections ({})",
                self.min_connections, self.max_connections
            )));
        }
        if self.acquire_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "pool.acquire_timeout_ms must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

fn default_retention_days() -> u32 {
    DEFAULT_METRICS_RETENTION_DAYS
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            retention_days: default_retention_days(),
        }
    }
}
