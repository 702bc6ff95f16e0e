//! Performance metrics: an in-memory collector fed by both engines, and a
//! SQLite-backed history of ingestion runs.

use std::path::Path;
use std::sync::{Mutex, PoisonError};

use rusqlite::{Connection, params};
use serde::{Deserialize, Serialize};

use crate::models::{BatchInsertMetrics, BatchInsertResult, ProcessingMetrics};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS ingest_runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp TEXT NOT NULL,
    source TEXT NOT NULL,
    total_documents INTEGER NOT NULL,
    successful_inserts INTEGER NOT NULL,
    failed_inserts INTEGER NOT NULL,
    duration_ms INTEGER NOT NULL,
    throughput REAL NOT NULL,
    batches INTEGER NOT NULL DEFAULT 0,
    embedding_ms INTEGER NOT NULL DEFAULT 0,
    insertion_ms INTEGER NOT NULL DEFAULT 0,
    retries INTEGER NOT NULL DEFAULT 0,
    pool_efficiency REAL NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_ingest_runs_timestamp ON ingest_runs(timestamp);
"#;

/// Aggregate over everything a collector has seen.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceReport {
    pub processing_runs: usize,
    pub chunks_processed: f64,
    pub total_processing_time_ms: u64,
    pub average_parallel_efficiency: f64,
    pub insert_runs: usize,
    pub documents_inserted: usize,
    pub documents_failed: usize,
    pub batches_processed: usize,
    pub embedding_time_ms: u64,
    pub insertion_time_ms: u64,
    pub total_insert_time_ms: u64,
    pub retries_performed: u32,
    pub average_pool_efficiency: f64,
    /// Documents per second across all insert runs.
    pub overall_throughput: f64,
}

#[derive(Default)]
struct CollectorState {
    processing: Vec<ProcessingMetrics>,
    inserts: Vec<(usize, usize, BatchInsertMetrics)>,
}

/// Shared accumulator for timing and throughput data.
#[derive(Default)]
pub struct PerformanceMetricsCollector {
    state: Mutex<CollectorState>,
}

impl PerformanceMetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_processing(&self, metrics: &ProcessingMetrics) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.processing.push(metrics.clone());
    }

    pub fn record_batch_insert(&self, result: &BatchInsertResult) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.inserts.push((
            result.successful_inserts,
            result.failed_inserts,
            result.metrics.clone(),
        ));
    }

    pub fn report(&self) -> PerformanceReport {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let mut report = PerformanceReport {
            processing_runs: state.processing.len(),
            insert_runs: state.inserts.len(),
            ..Default::default()
        };

        for m in &state.processing {
            report.total_processing_time_ms += m.total_processing_time_ms;
            report.chunks_processed += m.chunks_per_second * m.total_processing_time_ms as f64 / 1000.0;
            report.average_parallel_efficiency += m.parallel_efficiency_score;
        }
        if !state.processing.is_empty() {
            report.average_parallel_efficiency /= state.processing.len() as f64;
        }

        for (successful, failed, m) in &state.inserts {
            report.documents_inserted += successful;
            report.documents_failed += failed;
            report.batches_processed += m.batches_processed;
            report.embedding_time_ms += m.embedding_generation_time_ms;
            report.insertion_time_ms += m.database_insertion_time_ms;
            report.total_insert_time_ms += m.total_processing_time_ms;
            report.retries_performed += m.retries_performed;
            report.average_pool_efficiency += m.connection_pool_efficiency;
        }
        if !state.inserts.is_empty() {
            report.average_pool_efficiency /= state.inserts.len() as f64;
        }
        if report.total_insert_time_ms > 0 {
            let documents = report.documents_inserted + report.documents_failed;
            report.overall_throughput =
                documents as f64 / report.total_insert_time_ms as f64 * 1000.0;
        }

        report
    }

    pub fn reset(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        *state = CollectorState::default();
    }
}

/// Persistent history of ingestion runs.
pub struct MetricsStore {
    conn: Connection,
}

impl MetricsStore {
    pub fn open(path: &Path) -> Result<Self, rusqlite::Error> {
        if let Some(parent) = path.parent()
            && let Err(e) = std::fs::create_dir_all(parent)
        {
            tracing::warn!(error = %e, path = %parent.display(), "failed to create metrics directory");
        }
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "auto_vacuum", "INCREMENTAL")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    pub fn record_run(&self, source: &str, result: &BatchInsertResult) -> Result<(), rusqlite::Error> {
        self.conn.execute(
            "INSERT INTO ingest_runs (timestamp, source, total_documents, successful_inserts,
                                      failed_inserts, duration_ms, throughput, batches,
                                      embedding_ms, insertion_ms, retries, pool_efficiency)
             VALUES (datetime('now'), ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                source,
                result.total_documents as i64,
                result.successful_inserts as i64,
                result.failed_inserts as i64,
                result.metrics.total_processing_time_ms as i64,
                result.metrics.throughput_docs_per_second,
                result.metrics.batches_processed as i64,
                result.metrics.embedding_generation_time_ms as i64,
                result.metrics.database_insertion_time_ms as i64,
                result.metrics.retries_performed as i64,
                result.metrics.connection_pool_efficiency,
            ],
        )?;
        Ok(())
    }

    pub fn get_summary(&self, retention_days: u32) -> RunSummary {
        let query = format!(
            r#"
            SELECT
                COUNT(*),
                COALESCE(SUM(total_documents), 0),
                COALESCE(SUM(failed_inserts), 0),
                COALESCE(AVG(throughput), 0),
                COALESCE(SUM(batches), 0),
                COALESCE(SUM(retries), 0)
            FROM ingest_runs
            WHERE timestamp >= datetime('now', '-{} days')
            "#,
            retention_days
        );

        self.conn
            .query_row(&query, [], |row| {
                Ok(RunSummary {
                    total_runs: row.get::<_, i64>(0)? as u64,
                    total_documents: row.get::<_, i64>(1)? as u64,
                    failed_documents: row.get::<_, i64>(2)? as u64,
                    avg_throughput: row.get::<_, f64>(3)?,
                    total_batches: row.get::<_, i64>(4)? as u64,
                    total_retries: row.get::<_, i64>(5)? as u64,
                })
            })
            .unwrap_or_default()
    }

    /// Drop runs older than the retention window; returns how many were removed.
    pub fn cleanup(&self, retention_days: u32) -> Result<usize, rusqlite::Error> {
        let query = format!(
            "DELETE FROM ingest_runs WHERE timestamp < datetime('now', '-{} days')",
            retention_days
        );
        self.conn.execute(&query, [])
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunSummary {
    pub total_runs: u64,
    pub total_documents: u64,
    pub failed_documents: u64,
    pub avg_throughput: f64,
    pub total_batches: u64,
    pub total_retries: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChunkSizeStats;

    fn insert_result(successful: usize, failed: usize, ms: u64) -> BatchInsertResult {
        BatchInsertResult {
            total_documents: successful + failed,
            successful_inserts: successful,
            failed_inserts: failed,
            errors: Vec::new(),
            metrics: BatchInsertMetrics {
                total_processing_time_ms: ms,
                batches_processed: 2,
                connection_pool_efficiency: 50.0,
                retries_performed: 1,
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_collector_aggregates_both_engines() {
        let collector = PerformanceMetricsCollector::new();
        collector.record_processing(&ProcessingMetrics {
            total_processing_time_ms: 2000,
            average_chunk_processing_time_ms: 10.0,
            chunks_per_second: 5.0,
            parallel_efficiency_score: 80.0,
            chunk_sizes: ChunkSizeStats::default(),
        });
        collector.record_batch_insert(&insert_result(90, 10, 1000));
        collector.record_batch_insert(&insert_result(100, 0, 1000));

        let report = collector.report();
        assert_eq!(report.processing_runs, 1);
        assert!((report.chunks_processed - 10.0).abs() < 1e-9);
        assert_eq!(report.insert_runs, 2);
        assert_eq!(report.documents_inserted, 190);
        assert_eq!(report.documents_failed, 10);
        assert_eq!(report.batches_processed, 4);
        assert_eq!(report.retries_performed, 2);
        assert!((report.overall_throughput - 100.0).abs() < 1e-9);
        assert!((report.average_pool_efficiency - 50.0).abs() < 1e-9);

        collector.reset();
        assert_eq!(collector.report(), PerformanceReport::default());
    }

    #[test]
    fn test_metrics_store_summary() {
        let dir = tempfile::tempdir().unwrap();
        let store = MetricsStore::open(&dir.path().join("metrics.db")).unwrap();
        store.record_run("dump.cs", &insert_result(8, 2, 500)).unwrap();
        store.record_run("dump.cs", &insert_result(10, 0, 500)).unwrap();

        let summary = store.get_summary(30);
        assert_eq!(summary.total_runs, 2);
        assert_eq!(summary.total_documents, 20);
        assert_eq!(summary.failed_documents, 2);
        assert_eq!(summary.total_batches, 4);
        assert_eq!(summary.total_retries, 2);

        assert_eq!(store.cleanup(30).unwrap(), 0);
        assert_eq!(store.get_summary(30).total_runs, 2);
    }
}
