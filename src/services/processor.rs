//! Chunked processing engine with bounded parallelism, pause/resume and
//! cooperative cancellation.
//!
//! A run splits the input once, then dispatches unprocessed chunks to at most
//! `max_concurrency` in-flight futures. Pause and cancellation are observed
//! only between dispatches: in-flight chunks always run to completion, after
//! which the run settles into `Paused`, `Cancelled`, `Error` or `Completed`.
//!
//! A cancelled run resolves normally with `ProcessingState::Cancelled`; only a
//! chunk failure with `continue_on_error = false` is reported as an error.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::stream::{FuturesUnordered, StreamExt};

use crate::error::ProcessingError;
use crate::models::{
    Chunk, ChunkInput, ChunkOutput, ChunkProcessingOptions, ChunkSizeStats, ProcessingMetrics,
    ProcessingProgress, ProcessingResult, ProcessingSnapshot, ProcessingState,
};
use crate::services::chunker::ContentChunker;
use crate::services::metrics::PerformanceMetricsCollector;

/// Smoothing factor for the completion-interval moving average.
const ETA_SMOOTHING: f64 = 0.3;

/// Handle to a chunked processing run. Clones share the same run.
#[derive(Clone)]
pub struct ChunkedProcessor {
    shared: Arc<Shared>,
}

struct Shared {
    run: Mutex<RunState>,
    pause_requested: AtomicBool,
    resumable: AtomicBool,
    metrics: Option<Arc<PerformanceMetricsCollector>>,
}

struct RunState {
    state: ProcessingState,
    chunk_size: usize,
    chunks: Vec<Chunk>,
    started_at: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
    /// Set once a run has been split or restored.
    initialized: bool,
}

impl RunState {
    fn settled_count(&self) -> usize {
        self.chunks.iter().filter(|c| c.is_settled()).count()
    }

    fn failed_count(&self) -> usize {
        self.chunks
            .iter()
            .filter(|c| !c.processed && c.error.is_some())
            .count()
    }

    fn progress(&self, estimated_time_remaining_ms: Option<u64>) -> ProcessingProgress {
        let total = self.chunks.len();
        let processed = self.settled_count();
        let percentage = if processed >= total {
            100.0
        } else {
            processed as f64 / total as f64 * 100.0
        };
        ProcessingProgress {
            processed_chunks: processed,
            total_chunks: total,
            percentage,
            state: self.state,
            estimated_time_remaining_ms,
        }
    }

    fn snapshot(&self) -> ProcessingSnapshot {
        ProcessingSnapshot {
            chunk_size: self.chunk_size,
            state: self.state,
            chunks: self.chunks.clone(),
            total_chunks: self.chunks.len(),
            processed_chunks: self.chunks.iter().filter(|c| c.processed).count(),
            failed_chunks: self.failed_count(),
            started_at: self.started_at,
            updated_at: self.updated_at,
        }
    }

    fn transition(&mut self, state: ProcessingState) {
        self.state = state;
        self.updated_at = Utc::now();
    }
}

/// Why dispatching stopped before the queue drained.
#[derive(Debug)]
enum StopReason {
    Paused,
    Cancelled,
    Failed { chunk_id: usize, message: String },
}

/// Moving-average estimate of time left, based on the wall-clock gap between
/// consecutive chunk completions.
struct EtaEstimator {
    last_completion: Instant,
    average_interval_ms: Option<f64>,
}

impl EtaEstimator {
    fn new() -> Self {
        Self {
            last_completion: Instant::now(),
            average_interval_ms: None,
        }
    }

    fn observe(&mut self) {
        let now = Instant::now();
        let interval = now.duration_since(self.last_completion).as_secs_f64() * 1000.0;
        self.last_completion = now;
        self.average_interval_ms = Some(match self.average_interval_ms {
            Some(avg) => ETA_SMOOTHING * interval + (1.0 - ETA_SMOOTHING) * avg,
            None => interval,
        });
    }

    fn estimate(&self, remaining: usize) -> Option<u64> {
        self.average_interval_ms
            .map(|avg| (avg * remaining as f64).round() as u64)
    }
}

impl Default for ChunkedProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl ChunkedProcessor {
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Report every run's metrics to `collector`.
    pub fn with_metrics_collector(collector: Arc<PerformanceMetricsCollector>) -> Self {
        Self::build(Some(collector))
    }

    fn build(metrics: Option<Arc<PerformanceMetricsCollector>>) -> Self {
        Self {
            shared: Arc::new(Shared {
                run: Mutex::new(RunState {
                    state: ProcessingState::Pending,
                    chunk_size: 0,
                    chunks: Vec::new(),
                    started_at: None,
                    updated_at: Utc::now(),
                    initialized: false,
                }),
                pause_requested: AtomicBool::new(false),
                resumable: AtomicBool::new(false),
                metrics,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RunState> {
        self.shared.run.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> ProcessingState {
        self.lock().state
    }

    /// Split `content` and drive every chunk through `handler`.
    pub async fn process_content<T, F, Fut>(
        &self,
        content: &str,
        handler: F,
        options: ChunkProcessingOptions,
    ) -> Result<ProcessingResult<T>, ProcessingError>
    where
        F: Fn(ChunkInput) -> Fut + Send + Sync,
        Fut: Future<Output = anyhow::Result<T>> + Send,
        T: Send,
    {
        validate_options(&options)?;

        {
            let mut run = self.lock();
            if run.state == ProcessingState::Running {
                return Err(ProcessingError::InvalidState {
                    operation: "start processing",
                    state: run.state,
                });
            }

            let chunks = ContentChunker::new(options.chunk_size).split(content);
            tracing::debug!(
                chunks = chunks.len(),
                chunk_size = options.chunk_size,
                bytes = content.len(),
                "content split"
            );

            *run = RunState {
                state: ProcessingState::Pending,
                chunk_size: options.chunk_size,
                chunks,
                started_at: None,
                updated_at: Utc::now(),
                initialized: true,
            };
        }

        self.run(handler, options).await
    }

    /// Continue a paused run from the first unprocessed chunk.
    pub async fn resume_processing<T, F, Fut>(
        &self,
        handler: F,
        options: ChunkProcessingOptions,
    ) -> Result<ProcessingResult<T>, ProcessingError>
    where
        F: Fn(ChunkInput) -> Fut + Send + Sync,
        Fut: Future<Output = anyhow::Result<T>> + Send,
        T: Send,
    {
        if options.max_concurrency == 0 {
            return Err(ProcessingError::InvalidOptions(
                "max_concurrency must be at least 1".to_string(),
            ));
        }

        {
            let run = self.lock();
            if run.state != ProcessingState::Paused {
                return Err(ProcessingError::InvalidState {
                    operation: "resume",
                    state: run.state,
                });
            }
        }

        self.run(handler, options).await
    }

    /// Ask a running run to stop dispatching and settle into `Paused`.
    ///
    /// Returns false when nothing is running or the run is not resumable.
    pub fn pause_processing(&self) -> bool {
        let run = self.lock();
        if run.state != ProcessingState::Running || !self.shared.resumable.load(Ordering::SeqCst)
        {
            return false;
        }
        self.shared.pause_requested.store(true, Ordering::SeqCst);
        tracing::debug!("pause requested");
        true
    }

    /// Serializable state of the current run, if one was started or restored.
    pub fn get_processing_state(&self) -> Option<ProcessingSnapshot> {
        let run = self.lock();
        run.initialized.then(|| run.snapshot())
    }

    /// Adopt a snapshot taken from this or another processor.
    pub fn restore_processing_state(
        &self,
        snapshot: ProcessingSnapshot,
    ) -> Result<(), ProcessingError> {
        validate_snapshot(&snapshot)?;

        let mut run = self.lock();
        if run.state == ProcessingState::Running {
            return Err(ProcessingError::InvalidState {
                operation: "restore state",
                state: run.state,
            });
        }

        *run = RunState {
            state: snapshot.state,
            chunk_size: snapshot.chunk_size,
            chunks: snapshot.chunks,
            started_at: snapshot.started_at,
            updated_at: Utc::now(),
            initialized: true,
        };
        tracing::info!(
            total = run.chunks.len(),
            settled = run.settled_count(),
            state = %run.state,
            "processing state restored"
        );
        Ok(())
    }

    async fn run<T, F, Fut>(
        &self,
        handler: F,
        options: ChunkProcessingOptions,
    ) -> Result<ProcessingResult<T>, ProcessingError>
    where
        F: Fn(ChunkInput) -> Fut + Send + Sync,
        Fut: Future<Output = anyhow::Result<T>> + Send,
        T: Send,
    {
        let run_started = Instant::now();
        let max_concurrency = options.max_concurrency.max(1);

        let (mut pending, start_progress) = {
            let mut run = self.lock();
            run.transition(ProcessingState::Running);
            run.started_at.get_or_insert_with(Utc::now);
            self.shared.pause_requested.store(false, Ordering::SeqCst);
            self.shared
                .resumable
                .store(options.enable_resumable, Ordering::SeqCst);

            let pending: VecDeque<usize> = run
                .chunks
                .iter()
                .filter(|c| !c.processed)
                .map(|c| c.id)
                .collect();
            (pending, run.progress(None))
        };

        tracing::info!(
            pending = pending.len(),
            total = start_progress.total_chunks,
            concurrency = max_concurrency,
            "chunk processing started"
        );
        emit(&options, start_progress);

        let mut in_flight = FuturesUnordered::new();
        let mut eta = EtaEstimator::new();
        let mut outputs = Vec::new();
        let mut failed_chunks = Vec::new();
        let mut durations: Vec<Duration> = Vec::new();
        let mut stop: Option<StopReason> = None;

        loop {
            while stop.is_none() && in_flight.len() < max_concurrency {
                if options
                    .cancellation_token
                    .as_ref()
                    .is_some_and(|t| t.is_cancelled())
                {
                    stop = Some(StopReason::Cancelled);
                    break;
                }
                if self.shared.pause_requested.load(Ordering::SeqCst) {
                    stop = Some(StopReason::Paused);
                    break;
                }
                let Some(id) = pending.pop_front() else {
                    break;
                };

                // A retried chunk keeps its earlier error until it settles again
                let input = {
                    let run = self.lock();
                    let chunk = &run.chunks[id];
                    ChunkInput {
                        id: chunk.id,
                        offset: chunk.offset,
                        content: chunk.content.clone(),
                    }
                };

                let work = handler(input);
                in_flight.push(async move {
                    let started = Instant::now();
                    let result = work.await;
                    (id, started.elapsed(), result)
                });
            }

            let Some((id, elapsed, result)) = in_flight.next().await else {
                break;
            };
            durations.push(elapsed);
            eta.observe();

            let progress = {
                let mut run = self.lock();
                let chunk = &mut run.chunks[id];
                match result {
                    Ok(output) => {
                        chunk.processed = true;
                        chunk.error = None;
                        outputs.push(ChunkOutput {
                            chunk_id: id,
                            output,
                        });
                    }
                    Err(e) => {
                        let message = format!("{e:#}");
                        tracing::warn!(chunk_id = id, error = %message, "chunk processing failed");
                        chunk.error = Some(message.clone());
                        failed_chunks.push((id, message.clone()));
                        if !options.continue_on_error
                            && !matches!(stop, Some(StopReason::Failed { .. }))
                        {
                            stop = Some(StopReason::Failed {
                                chunk_id: id,
                                message,
                            });
                        }
                    }
                }
                run.updated_at = Utc::now();
                let remaining = run.chunks.len() - run.settled_count();
                let estimate = options.enable_eta.then(|| eta.estimate(remaining)).flatten();
                run.progress(estimate)
            };
            emit(&options, progress);
        }

        let final_state = {
            let run = self.lock();
            let all_settled = run.chunks.iter().all(Chunk::is_settled);
            match &stop {
                Some(StopReason::Failed { .. }) => ProcessingState::Error,
                _ if all_settled => ProcessingState::Completed,
                Some(StopReason::Cancelled) => ProcessingState::Cancelled,
                Some(StopReason::Paused) => ProcessingState::Paused,
                // Queue drained without a stop request, so every chunk settled
                None => ProcessingState::Completed,
            }
        };

        let (progress, metrics) = {
            let mut run = self.lock();
            run.transition(final_state);
            let remaining = run.chunks.len() - run.settled_count();
            let estimate = (options.enable_eta && final_state == ProcessingState::Paused)
                .then(|| eta.estimate(remaining))
                .flatten();
            let metrics = options.collect_metrics.then(|| {
                compute_metrics(
                    run_started.elapsed(),
                    &durations,
                    max_concurrency,
                    &run.chunks,
                )
            });
            (run.progress(estimate), metrics)
        };
        self.shared.pause_requested.store(false, Ordering::SeqCst);
        emit(&options, progress.clone());

        if let (Some(collector), Some(metrics)) = (&self.shared.metrics, &metrics) {
            collector.record_processing(metrics);
        }

        tracing::info!(
            state = %final_state,
            processed = progress.processed_chunks,
            total = progress.total_chunks,
            failed = failed_chunks.len(),
            elapsed_ms = run_started.elapsed().as_millis() as u64,
            "chunk processing finished"
        );

        if let Some(StopReason::Failed { chunk_id, message }) = stop {
            return Err(ProcessingError::ChunkFailed { chunk_id, message });
        }

        Ok(ProcessingResult {
            state: final_state,
            progress,
            outputs,
            failed_chunks,
            metrics,
        })
    }
}

fn emit(options: &ChunkProcessingOptions, progress: ProcessingProgress) {
    if let Some(callback) = &options.progress_callback {
        callback(progress);
    }
}

fn validate_options(options: &ChunkProcessingOptions) -> Result<(), ProcessingError> {
    if options.chunk_size == 0 {
        return Err(ProcessingError::InvalidOptions(
            "chunk_size must be at least 1".to_string(),
        ));
    }
    if options.max_concurrency == 0 {
        return Err(ProcessingError::InvalidOptions(
            "max_concurrency must be at least 1".to_string(),
        ));
    }
    Ok(())
}

fn validate_snapshot(snapshot: &ProcessingSnapshot) -> Result<(), ProcessingError> {
    if snapshot.state == ProcessingState::Running {
        return Err(ProcessingError::InvalidSnapshot(
            "snapshot was taken while running".to_string(),
        ));
    }
    if snapshot.total_chunks != snapshot.chunks.len() {
        return Err(ProcessingError::InvalidSnapshot(format!(
            "total_chunks {} does not match {} chunks",
            snapshot.total_chunks,
            snapshot.chunks.len()
        )));
    }
    let mut offset = 0;
    for (index, chunk) in snapshot.chunks.iter().enumerate() {
        if chunk.id != index {
            return Err(ProcessingError::InvalidSnapshot(format!(
                "chunk at position {index} has id {}",
                chunk.id
            )));
        }
        if chunk.offset != offset || chunk.size_bytes != chunk.content.len() {
            return Err(ProcessingError::InvalidSnapshot(format!(
                "chunk {index} does not line up with its predecessors"
            )));
        }
        offset += chunk.size_bytes;
    }
    Ok(())
}

fn compute_metrics(
    wall: Duration,
    durations: &[Duration],
    max_concurrency: usize,
    chunks: &[Chunk],
) -> ProcessingMetrics {
    let wall_ms = wall.as_secs_f64() * 1000.0;
    let busy_ms: f64 = durations.iter().map(|d| d.as_secs_f64() * 1000.0).sum();
    let average_chunk_processing_time_ms = if durations.is_empty() {
        0.0
    } else {
        busy_ms / durations.len() as f64
    };
    let chunks_per_second = if wall_ms > 0.0 {
        durations.len() as f64 / (wall_ms / 1000.0)
    } else {
        0.0
    };
    let parallel_efficiency_score = if wall_ms > 0.0 && !durations.is_empty() {
        let ideal_ms = busy_ms / max_concurrency as f64;
        (ideal_ms / wall_ms * 100.0).min(100.0)
    } else {
        0.0
    };

    ProcessingMetrics {
        total_processing_time_ms: wall.as_millis() as u64,
        average_chunk_processing_time_ms,
        chunks_per_second,
        parallel_efficiency_score,
        chunk_sizes: ChunkSizeStats::from_chunks(chunks),
    }
}
