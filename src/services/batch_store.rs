//! Batched embedding + upsert through a bounded connection pool.
//!
//! Records are validated, grouped by a [`BatchPlanner`] and dispatched with at
//! most `max_concurrency` batches in flight. Every attempt of a batch holds one
//! pool slot for the whole embed + upsert round trip and is bounded by
//! `timeout_ms`; transient failures are retried with backoff.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use futures::stream::{FuturesUnordered, StreamExt};

use crate::error::{BatchAttemptError, BatchInsertError, ConfigError};
use crate::models::{
    BatchFailure, BatchInsertMetrics, BatchInsertOptions, BatchInsertResult, BatchProgress,
    ConnectionPoolConfig, ConnectionPoolHealth, ContentRecord, VectorRecord,
};
use crate::services::batching::BatchPlanner;
use crate::services::embedding::Embedder;
use crate::services::metrics::PerformanceMetricsCollector;
use crate::services::pool::ConnectionPool;
use crate::services::vector_store::VectorStore;
use crate::utils::{RetryConfig, RetryResult, with_retry};

/// Bulk writer from content records to a vector store.
pub struct BatchVectorStore {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
    pool: Mutex<ConnectionPool>,
    metrics: Option<Arc<PerformanceMetricsCollector>>,
}

impl BatchVectorStore {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn VectorStore>,
        pool_config: ConnectionPoolConfig,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            embedder,
            store,
            pool: Mutex::new(ConnectionPool::new(pool_config)?),
            metrics: None,
        })
    }

    #[must_use]
    pub fn with_metrics_collector(mut self, collector: Arc<PerformanceMetricsCollector>) -> Self {
        self.metrics = Some(collector);
        self
    }

    pub fn vector_store(&self) -> &Arc<dyn VectorStore> {
        &self.store
    }

    fn pool(&self) -> ConnectionPool {
        self.pool
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the pool. Calls already running keep the pool they started with.
    pub fn configure_connection_pool(&self, config: ConnectionPoolConfig) -> Result<(), ConfigError> {
        let pool = ConnectionPool::new(config)?;
        let previous = std::mem::replace(
            &mut *self.pool.lock().unwrap_or_else(PoisonError::into_inner),
            pool,
        );
        tracing::debug!(
            previous_max = previous.config().max_connections,
            "connection pool reconfigured"
        );
        Ok(())
    }

    pub fn get_connection_pool_config(&self) -> ConnectionPoolConfig {
        self.pool().config().clone()
    }

    pub fn get_connection_pool_health(&self) -> ConnectionPoolHealth {
        self.pool().health()
    }

    /// Embed and upsert every record.
    ///
    /// With `continue_on_error` a batch that exhausts its retries is counted in
    /// `failed_inserts`; without it no further batches are dispatched, batches
    /// already in flight are drained, and the call returns the first batch
    /// failure. Batches already written stay written.
    pub async fn batch_insert(
        &self,
        records: Vec<ContentRecord>,
        options: &BatchInsertOptions,
    ) -> Result<BatchInsertResult, BatchInsertError> {
        options.validate()?;

        let total = records.len();
        if total == 0 {
            return Ok(BatchInsertResult::default());
        }

        let started = Instant::now();
        let pool = self.pool();
        let busy_before = pool.busy_time();

        let mut result = BatchInsertResult {
            total_documents: total,
            ..Default::default()
        };

        let mut valid = Vec::with_capacity(total);
        for (index, record) in records.into_iter().enumerate() {
            match record.validation_error() {
                None => valid.push(record),
                Some(reason) if !options.continue_on_error => {
                    return Err(BatchInsertError::InvalidRecord { index, reason });
                }
                Some(reason) => {
                    tracing::warn!(index, id = %record.id, %reason, "record rejected");
                    result.failed_inserts += 1;
                    result.errors.push(BatchFailure {
                        batch_index: None,
                        record_count: 1,
                        attempts: 0,
                        message: format!("record {} ({}): {}", index, record.id, reason),
                    });
                }
            }
        }

        let runner = BatchRunner {
            embedder: Arc::clone(&self.embedder),
            store: Arc::clone(&self.store),
            pool: pool.clone(),
            retry: options.retry_config(),
            timeout: Duration::from_millis(options.timeout_ms),
        };
        let mut planner = BatchPlanner::new(valid, options);

        tracing::info!(
            records = total,
            strategy = %options.strategy,
            concurrency = options.max_concurrency,
            "starting batch insert"
        );

        let mut in_flight = FuturesUnordered::new();
        let mut next_index = 0usize;
        let mut dispatched_records = 0usize;
        let mut embedding_time = Duration::ZERO;
        let mut insertion_time = Duration::ZERO;
        let mut retries = 0u32;
        let mut abort: Option<BatchInsertError> = None;

        loop {
            while abort.is_none() && in_flight.len() < options.max_concurrency {
                let Some(batch) = planner.next_batch() else {
                    break;
                };
                dispatched_records += batch.len();
                in_flight.push(runner.clone().run(next_index, batch));
                next_index += 1;
            }

            let Some(outcome) = in_flight.next().await else {
                break;
            };

            embedding_time += outcome.embedding_time;
            insertion_time += outcome.insertion_time;
            retries += outcome.attempts.saturating_sub(1);
            result.metrics.batches_processed += 1;
            planner.observe(outcome.latency, outcome.error.is_none());

            match outcome.error {
                None => result.successful_inserts += outcome.records,
                Some(message) if !options.continue_on_error && abort.is_none() => {
                    tracing::warn!(
                        batch = outcome.index,
                        attempts = outcome.attempts,
                        in_flight = in_flight.len(),
                        error = %message,
                        "batch failed, draining in-flight batches before aborting"
                    );
                    result.failed_inserts += outcome.records;
                    abort = Some(BatchInsertError::BatchFailed {
                        batch_index: outcome.index,
                        records: outcome.records,
                        attempts: outcome.attempts,
                        message,
                        inserted_before_failure: 0,
                    });
                }
                Some(message) => {
                    tracing::warn!(
                        batch = outcome.index,
                        records = outcome.records,
                        attempts = outcome.attempts,
                        error = %message,
                        "batch failed"
                    );
                    result.failed_inserts += outcome.records;
                    result.errors.push(BatchFailure {
                        batch_index: Some(outcome.index),
                        record_count: outcome.records,
                        attempts: outcome.attempts,
                        message,
                    });
                }
            }

            if let Some(callback) = &options.progress_callback {
                let processed = result.successful_inserts + result.failed_inserts;
                callback(BatchProgress {
                    batches_completed: result.metrics.batches_processed,
                    documents_processed: processed,
                    total_documents: total,
                    successful_inserts: result.successful_inserts,
                    failed_inserts: result.failed_inserts,
                    percentage: processed as f64 / total as f64 * 100.0,
                });
            }
        }

        let elapsed = started.elapsed();
        let metrics = &mut result.metrics;
        metrics.total_processing_time_ms = elapsed.as_millis() as u64;
        metrics.embedding_generation_time_ms = embedding_time.as_millis() as u64;
        metrics.database_insertion_time_ms = insertion_time.as_millis() as u64;
        metrics.retries_performed = retries;
        metrics.adaptive_batching_used = planner.is_adaptive();
        if metrics.batches_processed > 0 {
            metrics.average_batch_size_used =
                dispatched_records as f64 / metrics.batches_processed as f64;
        }
        metrics.connection_pool_efficiency = pool_efficiency(
            pool.busy_time().saturating_sub(busy_before),
            elapsed,
            pool.config().max_connections,
        );
        if elapsed.as_secs_f64() > 0.0 {
            metrics.throughput_docs_per_second = total as f64 / elapsed.as_secs_f64();
        }

        tracing::info!(
            successful = result.successful_inserts,
            failed = result.failed_inserts,
            batches = result.metrics.batches_processed,
            elapsed_ms = result.metrics.total_processing_time_ms,
            reclaimed_slots = pool.reap_idle(),
            "batch insert finished"
        );

        if let Some(collector) = &self.metrics {
            collector.record_batch_insert(&result);
        }

        if let Some(mut err) = abort {
            if let BatchInsertError::BatchFailed {
                inserted_before_failure,
                ..
            } = &mut err
            {
                *inserted_before_failure = result.successful_inserts;
            }
            return Err(err);
        }

        Ok(result)
    }
}

/// Busy slot time over available slot time, as a percentage.
fn pool_efficiency(busy: Duration, wall: Duration, capacity: usize) -> f64 {
    let available = wall.as_secs_f64() * capacity as f64;
    if available <= 0.0 {
        return 0.0;
    }
    (busy.as_secs_f64() / available * 100.0).clamp(0.0, 100.0)
}

struct BatchOutcome {
    index: usize,
    records: usize,
    attempts: u32,
    latency: Duration,
    embedding_time: Duration,
    insertion_time: Duration,
    error: Option<String>,
}

/// Everything one batch needs, cloned into each in-flight future.
#[derive(Clone)]
struct BatchRunner {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
    pool: ConnectionPool,
    retry: RetryConfig,
    timeout: Duration,
}

impl BatchRunner {
    async fn run(self, index: usize, batch: Vec<ContentRecord>) -> BatchOutcome {
        let started = Instant::now();
        let records = batch.len();
        let batch = Arc::new(batch);
        let embed_micros = Arc::new(AtomicU64::new(0));
        let insert_micros = Arc::new(AtomicU64::new(0));

        let result = with_retry(&self.retry, |attempt| {
            let runner = self.clone();
            let batch = Arc::clone(&batch);
            let embed_micros = Arc::clone(&embed_micros);
            let insert_micros = Arc::clone(&insert_micros);
            async move {
                let round_trip = runner.round_trip(&batch, &embed_micros, &insert_micros);
                match tokio::time::timeout(runner.timeout, round_trip).await {
                    Ok(result) => result,
                    Err(_) => {
                        tracing::debug!(batch = index, attempt, "batch round trip timed out");
                        Err(BatchAttemptError::Timeout(runner.timeout.as_millis() as u64))
                    }
                }
            }
        })
        .await;

        let attempts = result.attempts();
        let error = match result {
            RetryResult::Success { .. } => None,
            RetryResult::Failed { last_error, .. } => Some(last_error.to_string()),
        };

        BatchOutcome {
            index,
            records,
            attempts,
            latency: started.elapsed(),
            embedding_time: Duration::from_micros(embed_micros.load(Ordering::Relaxed)),
            insertion_time: Duration::from_micros(insert_micros.load(Ordering::Relaxed)),
            error,
        }
    }

    /// One attempt: hold a slot while embedding and upserting the batch.
    async fn round_trip(
        &self,
        batch: &[ContentRecord],
        embed_micros: &AtomicU64,
        insert_micros: &AtomicU64,
    ) -> Result<(), BatchAttemptError> {
        let _slot = self.pool.acquire().await?;

        let texts = batch.iter().map(|r| r.content.clone()).collect();
        let embed_started = Instant::now();
        let vectors = self.embedder.embed_batch(texts).await;
        embed_micros.fetch_add(embed_started.elapsed().as_micros() as u64, Ordering::Relaxed);
        let vectors = vectors?;

        if vectors.len() != batch.len() {
            return Err(BatchAttemptError::VectorCountMismatch {
                expected: batch.len(),
                actual: vectors.len(),
            });
        }

        let records = batch
            .iter()
            .cloned()
            .zip(vectors)
            .map(|(record, vector)| VectorRecord::from_record(record, vector))
            .collect();

        let insert_started = Instant::now();
        let stored = self.store.upsert_records(records).await;
        insert_micros.fetch_add(insert_started.elapsed().as_micros() as u64, Ordering::Relaxed);
        stored?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{EmbeddingError, VectorStoreError};
    use crate::models::{BatchingStrategy, Metadata};
    use crate::services::vector_store::CollectionInfo;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    struct MockEmbedder {
        calls: AtomicUsize,
        delay: Duration,
    }

    impl MockEmbedder {
        fn new() -> Arc<Self> {
            Self::with_delay(Duration::ZERO)
        }

        fn with_delay(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                delay,
            })
        }
    }

    #[async_trait]
    impl Embedder for MockEmbedder {
        async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            Ok(texts.iter().map(|t| vec![t.len() as f32, 1.0]).collect())
        }
    }

    #[derive(Clone, Copy)]
    enum Failure {
        Never,
        Always,
        /// Reject any batch carrying a record tagged `poison`.
        Poisoned,
        /// Fail the first `n` calls with a transient error.
        FirstCalls(usize),
    }

    struct MockStore {
        failure: Failure,
        calls: AtomicUsize,
        stored: Mutex<Vec<VectorRecord>>,
    }

    impl MockStore {
        fn new(failure: Failure) -> Arc<Self> {
            Arc::new(Self {
                failure,
                calls: AtomicUsize::new(0),
                stored: Mutex::new(Vec::new()),
            })
        }

        fn stored(&self) -> usize {
            self.stored.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl VectorStore for MockStore {
        async fn health_check(&self) -> Result<bool, VectorStoreError> {
            Ok(true)
        }

        async fn get_collection_info(&self) -> Result<Option<CollectionInfo>, VectorStoreError> {
            Ok(Some(CollectionInfo {
                points_count: self.stored() as u64,
            }))
        }

        async fn create_collection(&self) -> Result<(), VectorStoreError> {
            Ok(())
        }

        async fn upsert_records(&self, records: Vec<VectorRecord>) -> Result<(), VectorStoreError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            match self.failure {
                Failure::Always => {
                    return Err(VectorStoreError::ConnectionError("refused".to_string()));
                }
                Failure::Poisoned if records.iter().any(|r| r.metadata.contains_key("poison")) => {
                    return Err(VectorStoreError::UpsertError("bad payload".to_string()));
                }
                Failure::FirstCalls(n) if call < n => {
                    return Err(VectorStoreError::UpsertError("request timeout".to_string()));
                }
                _ => {}
            }
            self.stored.lock().unwrap().extend(records);
            Ok(())
        }

        fn collection(&self) -> &str {
            "test"
        }
    }

    fn pool_config() -> ConnectionPoolConfig {
        ConnectionPoolConfig {
            max_connections: 4,
            min_connections: 1,
            acquire_timeout_ms: 1_000,
            idle_timeout_ms: 60_000,
            max_retries: 0,
        }
    }

    fn engine(embedder: Arc<MockEmbedder>, store: Arc<MockStore>) -> BatchVectorStore {
        BatchVectorStore::new(embedder, store, pool_config()).unwrap()
    }

    fn records(count: usize) -> Vec<ContentRecord> {
        (0..count)
            .map(|i| {
                ContentRecord::with_id(
                    format!("r{i}"),
                    format!("public class Type{i} {{ }}"),
                    Metadata::new(),
                )
            })
            .collect()
    }

    fn options(strategy: BatchingStrategy) -> BatchInsertOptions {
        BatchInsertOptions {
            fixed_batch_size: 10,
            max_retries: 2,
            retry_delay_ms: 1,
            max_retry_delay_ms: 5,
            ..BatchInsertOptions::default().with_strategy(strategy)
        }
    }

    #[tokio::test]
    async fn test_counts_reconcile_for_every_strategy() {
        for strategy in [
            BatchingStrategy::FixedSize,
            BatchingStrategy::ContentAware,
            BatchingStrategy::Adaptive,
        ] {
            let store = MockStore::new(Failure::Never);
            let engine = engine(MockEmbedder::new(), Arc::clone(&store));
            let result = engine.batch_insert(records(137), &options(strategy)).await.unwrap();

            assert!(result.is_reconciled(), "{strategy}");
            assert_eq!(result.successful_inserts, 137);
            assert_eq!(store.stored(), 137);
            assert_eq!(
                result.metrics.adaptive_batching_used,
                strategy == BatchingStrategy::Adaptive
            );
            assert!(result.metrics.average_batch_size_used > 0.0);
        }
    }

    #[tokio::test]
    async fn test_fixed_size_batch_count() {
        let engine = engine(MockEmbedder::new(), MockStore::new(Failure::Never));
        let opts = BatchInsertOptions {
            fixed_batch_size: 25,
            ..options(BatchingStrategy::FixedSize)
        };
        let result = engine.batch_insert(records(200), &opts).await.unwrap();
        assert_eq!(result.metrics.batches_processed, 8);
        assert!((result.metrics.average_batch_size_used - 25.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_empty_input_skips_pool() {
        let embedder = MockEmbedder::new();
        let engine = engine(Arc::clone(&embedder), MockStore::new(Failure::Never));
        let result = engine
            .batch_insert(Vec::new(), &options(BatchingStrategy::Adaptive))
            .await
            .unwrap();

        assert_eq!(result.total_documents, 0);
        assert_eq!(result.successful_inserts, 0);
        assert_eq!(result.failed_inserts, 0);
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
        assert_eq!(engine.get_connection_pool_health().total_acquisitions, 0);
    }

    #[tokio::test]
    async fn test_always_failing_store_without_continue_is_error() {
        let engine = engine(MockEmbedder::new(), MockStore::new(Failure::Always));
        let opts = BatchInsertOptions {
            continue_on_error: false,
            ..options(BatchingStrategy::FixedSize)
        };
        let err = engine.batch_insert(records(30), &opts).await.unwrap_err();
        match err {
            BatchInsertError::BatchFailed { attempts, .. } => assert_eq!(attempts, 3),
            other => panic!("unexpected error: {other}"),
        }
        // Every slot was given back
        assert_eq!(engine.get_connection_pool_health().active_connections, 0);
    }

    #[tokio::test]
    async fn test_abort_drains_in_flight_batches() {
        let store = MockStore::new(Failure::Poisoned);
        let collector = Arc::new(PerformanceMetricsCollector::new());
        let engine = engine(
            MockEmbedder::with_delay(Duration::from_millis(20)),
            Arc::clone(&store),
        )
        .with_metrics_collector(Arc::clone(&collector));
        let mut input = records(80);
        input[0]
            .metadata
            .insert("poison".to_string(), "1".to_string());
        let opts = BatchInsertOptions {
            continue_on_error: false,
            max_concurrency: 4,
            max_retries: 0,
            ..options(BatchingStrategy::FixedSize)
        };

        let err = engine.batch_insert(input, &opts).await.unwrap_err();
        match err {
            BatchInsertError::BatchFailed {
                batch_index,
                inserted_before_failure,
                ..
            } => {
                assert_eq!(batch_index, 0);
                // Batches dispatched alongside the failed one still landed
                assert_eq!(inserted_before_failure, store.stored());
                assert!(inserted_before_failure >= 30);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(collector.report().insert_runs, 1);
        assert_eq!(engine.get_connection_pool_health().active_connections, 0);
    }

    #[tokio::test]
    async fn test_every_second_batch_failing_is_partial_success() {
        let store = MockStore::new(Failure::Poisoned);
        let engine = engine(MockEmbedder::new(), Arc::clone(&store));
        let input: Vec<ContentRecord> = records(100)
            .into_iter()
            .enumerate()
            .map(|(i, mut record)| {
                if (i / 10) % 2 == 1 {
                    record.metadata.insert("poison".to_string(), "1".to_string());
                }
                record
            })
            .collect();

        let result = engine
            .batch_insert(input, &options(BatchingStrategy::FixedSize))
            .await
            .unwrap();

        assert!(result.is_reconciled());
        assert_eq!(result.successful_inserts, 50);
        assert_eq!(result.failed_inserts, 50);
        assert_eq!(result.errors.len(), 5);
        // Permanent errors are not retried
        assert!(result.errors.iter().all(|e| e.attempts == 1));
        assert_eq!(store.stored(), 50);
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let store = MockStore::new(Failure::FirstCalls(2));
        let engine = engine(MockEmbedder::new(), Arc::clone(&store));
        let opts = BatchInsertOptions {
            max_concurrency: 1,
            ..options(BatchingStrategy::FixedSize)
        };
        let result = engine.batch_insert(records(10), &opts).await.unwrap();

        assert_eq!(result.successful_inserts, 10);
        assert_eq!(result.metrics.retries_performed, 2);
        assert_eq!(store.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_oversized_record_gets_own_batch() {
        let engine = engine(MockEmbedder::new(), MockStore::new(Failure::Never));
        let opts = BatchInsertOptions {
            max_batch_size_bytes: 100,
            ..options(BatchingStrategy::ContentAware)
        };
        let big = ContentRecord::with_id("big", "x".repeat(10_000), Metadata::new());
        let result = engine.batch_insert(vec![big], &opts).await.unwrap();

        assert_eq!(result.successful_inserts, 1);
        assert_eq!(result.metrics.batches_processed, 1);
        assert!((result.metrics.average_batch_size_used - 1.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_invalid_records_fail_without_retry() {
        let embedder = MockEmbedder::new();
        let engine = engine(Arc::clone(&embedder), MockStore::new(Failure::Never));
        let mut input = records(5);
        input.push(ContentRecord::with_id("blank", "   ", Metadata::new()));

        let result = engine
            .batch_insert(input.clone(), &options(BatchingStrategy::FixedSize))
            .await
            .unwrap();
        assert!(result.is_reconciled());
        assert_eq!(result.failed_inserts, 1);
        assert_eq!(result.errors[0].batch_index, None);
        assert_eq!(result.errors[0].attempts, 0);

        let opts = BatchInsertOptions {
            continue_on_error: false,
            ..options(BatchingStrategy::FixedSize)
        };
        let err = engine.batch_insert(input, &opts).await.unwrap_err();
        assert!(matches!(err, BatchInsertError::InvalidRecord { index: 5, .. }));
    }

    #[tokio::test]
    async fn test_pool_exhaustion_is_reported() {
        let engine = BatchVectorStore::new(
            MockEmbedder::with_delay(Duration::from_millis(100)),
            MockStore::new(Failure::Never),
            ConnectionPoolConfig {
                max_connections: 1,
                min_connections: 0,
                acquire_timeout_ms: 10,
                ..pool_config()
            },
        )
        .unwrap();
        let opts = BatchInsertOptions {
            max_concurrency: 2,
            max_retries: 0,
            ..options(BatchingStrategy::FixedSize)
        };

        let result = engine.batch_insert(records(20), &opts).await.unwrap();
        assert!(result.is_reconciled());
        assert_eq!(result.failed_inserts, 10);
        assert!(result.errors[0].message.contains("exhausted"));
        assert!(engine.get_connection_pool_health().acquire_timeouts >= 1);
    }

    #[tokio::test]
    async fn test_round_trip_timeout() {
        let engine = engine(
            MockEmbedder::with_delay(Duration::from_millis(200)),
            MockStore::new(Failure::Never),
        );
        let opts = BatchInsertOptions {
            timeout_ms: 20,
            max_retries: 1,
            ..options(BatchingStrategy::FixedSize)
        };
        let result = engine.batch_insert(records(10), &opts).await.unwrap();

        assert_eq!(result.failed_inserts, 10);
        assert_eq!(result.errors[0].attempts, 2);
        assert!(result.errors[0].message.contains("timed out"));
        assert_eq!(engine.get_connection_pool_health().active_connections, 0);
    }

    #[tokio::test]
    async fn test_progress_and_metrics_collection() {
        let collector = Arc::new(PerformanceMetricsCollector::new());
        let engine = engine(MockEmbedder::new(), MockStore::new(Failure::Never))
            .with_metrics_collector(Arc::clone(&collector));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let opts = options(BatchingStrategy::FixedSize)
            .with_progress(Arc::new(move |p: BatchProgress| sink.lock().unwrap().push(p)));

        let result = engine.batch_insert(records(40), &opts).await.unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 4);
        assert!(seen.windows(2).all(|w| w[0].documents_processed <= w[1].documents_processed));
        assert!((seen[3].percentage - 100.0).abs() < f64::EPSILON);
        assert!(result.metrics.connection_pool_efficiency <= 100.0);

        let report = collector.report();
        assert_eq!(report.insert_runs, 1);
        assert_eq!(report.documents_inserted, 40);
    }

    #[tokio::test]
    async fn test_configure_connection_pool() {
        let engine = engine(MockEmbedder::new(), MockStore::new(Failure::Never));
        let config = ConnectionPoolConfig {
            max_connections: 8,
            ..pool_config()
        };
        engine.configure_connection_pool(config.clone()).unwrap();
        assert_eq!(engine.get_connection_pool_config(), config);
        assert_eq!(engine.get_connection_pool_health().max_connections, 8);

        let bad = ConnectionPoolConfig {
            max_connections: 0,
            ..pool_config()
        };
        assert!(engine.configure_connection_pool(bad).is_err());
        assert_eq!(engine.get_connection_pool_config(), config);
    }
}
