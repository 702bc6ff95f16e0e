//! Models for the chunked processor.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::config::ChunkingConfig;

/// A bounded slice of the input content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// Index in split order; never reused within a run.
    pub id: usize,
    /// Byte offset of `content` in the original input.
    pub offset: usize,
    pub content: String,
    pub size_bytes: usize,
    pub processed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Chunk {
    pub fn new(id: usize, offset: usize, content: String) -> Self {
        Self {
            id,
            offset,
            size_bytes: content.len(),
            content,
            processed: false,
            error: None,
        }
    }

    /// Processed, or failed and tolerated.
    pub fn is_settled(&self) -> bool {
        self.processed || self.error.is_some()
    }
}

/// What the processing function receives for one chunk.
#[derive(Debug, Clone)]
pub struct ChunkInput {
    pub id: usize,
    pub offset: usize,
    pub content: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingState {
    #[default]
    Pending,
    Running,
    Paused,
    Cancelled,
    Error,
    Completed,
}

impl ProcessingState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ProcessingState::Completed | ProcessingState::Cancelled | ProcessingState::Error
        )
    }
}

impl std::fmt::Display for ProcessingState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ProcessingState::Pending => "pending",
            ProcessingState::Running => "running",
            ProcessingState::Paused => "paused",
            ProcessingState::Cancelled => "cancelled",
            ProcessingState::Error => "error",
            ProcessingState::Completed => "completed",
        };
        f.write_str(s)
    }
}

/// Immutable progress snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessingProgress {
    pub processed_chunks: usize,
    pub total_chunks: usize,
    pub percentage: f64,
    pub state: ProcessingState,
    pub estimated_time_remaining_ms: Option<u64>,
}

pub type ProgressCallback = Arc<dyn Fn(ProcessingProgress) + Send + Sync>;

#[derive(Clone)]
pub struct ChunkProcessingOptions {
    pub chunk_size: usize,
    pub max_concurrency: usize,
    pub progress_callback: Option<ProgressCallback>,
    pub enable_eta: bool,
    /// Pause requests are ignored unless set.
    pub enable_resumable: bool,
    pub cancellation_token: Option<CancellationToken>,
    pub continue_on_error: bool,
    pub collect_metrics: bool,
}

impl std::fmt::Debug for ChunkProcessingOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkProcessingOptions")
            .field("chunk_size", &self.chunk_size)
            .field("max_concurrency", &self.max_concurrency)
            .field("progress_callback", &self.progress_callback.is_some())
            .field("enable_eta", &self.enable_eta)
            .field("enable_resumable", &self.enable_resumable)
            .field("cancellation_token", &self.cancellation_token.is_some())
            .field("continue_on_error", &self.continue_on_error)
            .field("collect_metrics", &self.collect_metrics)
            .finish()
    }
}

impl Default for ChunkProcessingOptions {
    fn default() -> Self {
        Self::from_config(&ChunkingConfig::default())
    }
}

impl ChunkProcessingOptions {
    pub fn from_config(config: &ChunkingConfig) -> Self {
        Self {
            chunk_size: config.chunk_size,
            max_concurrency: config.max_concurrency,
            progress_callback: None,
            enable_eta: config.enable_eta,
            enable_resumable: true,
            cancellation_token: None,
            continue_on_error: config.continue_on_error,
            collect_metrics: true,
        }
    }

    #[must_use]
    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress_callback = Some(callback);
        self
    }

    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation_token = Some(token);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkSizeStats {
    pub average_chunk_size: f64,
    pub min_chunk_size: usize,
    pub max_chunk_size: usize,
    /// Equals the input length.
    pub total_content_size: usize,
}

impl ChunkSizeStats {
    pub fn from_chunks(chunks: &[Chunk]) -> Self {
        if chunks.is_empty() {
            return Self::default();
        }
        let total: usize = chunks.iter().map(|c| c.size_bytes).sum();
        Self {
            average_chunk_size: total as f64 / chunks.len() as f64,
            min_chunk_size: chunks.iter().map(|c| c.size_bytes).min().unwrap_or(0),
            max_chunk_size: chunks.iter().map(|c| c.size_bytes).max().unwrap_or(0),
            total_content_size: total,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessingMetrics {
    pub total_processing_time_ms: u64,
    pub average_chunk_processing_time_ms: f64,
    pub chunks_per_second: f64,
    /// Ideal parallel time over observed wall time, capped at 100.
    pub parallel_efficiency_score: f64,
    pub chunk_sizes: ChunkSizeStats,
}

/// Output of one chunk that was processed in this call.
#[derive(Debug, Clone)]
pub struct ChunkOutput<T> {
    pub chunk_id: usize,
    pub output: T,
}

#[derive(Debug, Clone)]
pub struct ProcessingResult<T> {
    pub state: ProcessingState,
    pub progress: ProcessingProgress,
    /// Outputs produced during this call, in completion order.
    pub outputs: Vec<ChunkOutput<T>>,
    /// `(chunk_id, message)` for chunks that failed during this call.
    pub failed_chunks: Vec<(usize, String)>,
    pub metrics: Option<ProcessingMetrics>,
}

/// Serializable run state; holds no live handles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingSnapshot {
    pub chunk_size: usize,
    pub state: ProcessingState,
    pub chunks: Vec<Chunk>,
    pub total_chunks: usize,
    pub processed_chunks: usize,
    pub failed_chunks: usize,
    pub started_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}
