//! Ingest command implementation.

use anyhow::{Context, Result};
use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::signal;
use tokio_util::sync::CancellationToken;

use crate::cli::output::{IngestReport, get_formatter};
use crate::models::{
    BatchInsertMetrics, BatchInsertOptions, BatchInsertResult, BatchingStrategy, ChunkInput,
    ChunkProcessingOptions, Config, ContentRecord, OutputFormat, ProcessingProgress,
    ProcessingSnapshot, ProcessingState,
};
use crate::services::{
    BatchVectorStore, ChunkedProcessor, ContentChunker, EmbeddingClient, MetricsStore,
    PerformanceMetricsCollector, create_backend_with_embedding_config,
};
use crate::utils::{chunk_to_record, read_dump_file, write_atomically};

/// Arguments for the ingest command.
#[derive(Debug, Args)]
pub struct IngestArgs {
    /// Path to the IL2CPP dump (dump.cs)
    #[arg()]
    pub path: PathBuf,

    /// Bytes per unit of work; pause and resume happen between units
    #[arg(long)]
    pub chunk_size: Option<usize>,

    /// Bytes per stored record
    #[arg(long)]
    pub record_size: Option<usize>,

    /// Units of work processed concurrently
    #[arg(long, short = 'c')]
    pub concurrency: Option<usize>,

    /// Batching strategy: fixed, content-aware or adaptive
    #[arg(long, short = 's')]
    pub strategy: Option<BatchingStrategy>,

    /// Where to save state when interrupted (default: next to the dump)
    #[arg(long)]
    pub state_file: Option<PathBuf>,

    /// Continue from the saved state file
    #[arg(long)]
    pub resume: bool,

    /// Chunk and extract records without contacting any server
    #[arg(long)]
    pub dry_run: bool,
}

/// Output of one unit of work.
#[derive(Debug)]
struct ChunkIngest {
    records: usize,
    insert: Option<BatchInsertResult>,
}

/// `dump.cs` -> `dump.cs.ingest-state.json` in the same directory.
pub fn default_state_file(dump: &Path) -> PathBuf {
    let name = dump
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "dump".to_string());
    dump.with_file_name(format!("{}.ingest-state.json", name))
}

pub async fn handle_ingest(args: IngestArgs, format: OutputFormat, verbose: bool) -> Result<()> {
    let config = Config::load()?;
    let formatter = get_formatter(format);

    let pb = if format == OutputFormat::Text {
        let pb = ProgressBar::new(0);
        pb.set_style(
            ProgressStyle::default_bar()
                .template(
                    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} chunks ({msg})",
                )
                .unwrap()
                .progress_chars("#>-"),
        );
        pb
    } else {
        ProgressBar::hidden()
    };

    let report = run_ingest(&args, &config, &pb, verbose).await;
    pb.finish_and_clear();
    let report = report?;

    print!("{}", formatter.format_ingest_report(&report));
    if report.state == ProcessingState::Error || report.state == ProcessingState::Cancelled {
        anyhow::bail!("ingestion ended in state {}", report.state);
    }
    Ok(())
}

async fn run_ingest(
    args: &IngestArgs,
    config: &Config,
    pb: &ProgressBar,
    verbose: bool,
) -> Result<IngestReport> {
    let started = Instant::now();
    let source = args.path.display().to_string();
    let state_file = args
        .state_file
        .clone()
        .unwrap_or_else(|| default_state_file(&args.path));

    let collector = Arc::new(PerformanceMetricsCollector::new());
    let processor = ChunkedProcessor::with_metrics_collector(Arc::clone(&collector));

    let content = if args.resume {
        let snapshot = load_snapshot(&state_file)?;
        if verbose {
            pb.println(format!(
                "Resuming {}/{} chunks from {}",
                snapshot.processed_chunks,
                snapshot.total_chunks,
                state_file.display()
            ));
        }
        processor.restore_processing_state(snapshot)?;
        None
    } else {
        let content = read_dump_file(&args.path, config.chunking.max_file_size)
            .with_context(|| format!("failed to read dump: {}", args.path.display()))?;
        Some(content)
    };

    let batch_store = if args.dry_run {
        None
    } else {
        let embedder = EmbeddingClient::new(&config.embedding)?;
        let store = create_backend_with_embedding_config(&config.vector_store, &config.embedding)?;
        store
            .create_collection()
            .await
            .context("failed to prepare collection")?;
        let batch_store = BatchVectorStore::new(Arc::new(embedder), Arc::from(store), config.pool.clone())?
            .with_metrics_collector(Arc::clone(&collector));
        Some(batch_store)
    };

    let mut insert_options = BatchInsertOptions::from_config(&config.batching);
    if let Some(strategy) = args.strategy {
        insert_options.strategy = strategy;
    }

    let cancel = CancellationToken::new();
    let bar = pb.clone();
    let mut chunk_options = ChunkProcessingOptions::from_config(&config.chunking)
        .with_cancellation(cancel.clone())
        .with_progress(Arc::new(move |p: ProcessingProgress| {
            bar.set_length(p.total_chunks as u64);
            bar.set_position(p.processed_chunks as u64);
            let eta = p
                .estimated_time_remaining_ms
                .map_or_else(|| "--".to_string(), |ms| format!("eta {}s", ms / 1000));
            bar.set_message(eta);
        }));
    if let Some(size) = args.chunk_size {
        chunk_options.chunk_size = size;
    }
    if let Some(concurrency) = args.concurrency {
        chunk_options.max_concurrency = concurrency;
    }

    let record_chunker = ContentChunker::new(args.record_size.unwrap_or(config.chunking.record_size));
    let handler = |chunk: ChunkInput| {
        let records = split_records(&record_chunker, &source, &chunk);
        let store = batch_store.as_ref();
        let options = &insert_options;
        async move {
            let count = records.len();
            let insert = match store {
                Some(store) => Some(store.batch_insert(records, options).await?),
                None => None,
            };
            Ok::<_, anyhow::Error>(ChunkIngest {
                records: count,
                insert,
            })
        }
    };

    let interrupts = tokio::spawn(watch_interrupts(processor.clone(), cancel, pb.clone()));
    let result = match content {
        Some(content) => processor.process_content(&content, handler, chunk_options).await,
        None => processor.resume_processing(handler, chunk_options).await,
    };
    interrupts.abort();
    let result = result?;

    let saved_state = match result.state {
        ProcessingState::Paused => {
            let snapshot = processor
                .get_processing_state()
                .context("paused run has no state")?;
            write_atomically(&state_file, &serde_json::to_vec(&snapshot)?)
                .with_context(|| format!("failed to save state: {}", state_file.display()))?;
            tracing::info!(path = %state_file.display(), "processing state saved");
            Some(state_file.clone())
        }
        ProcessingState::Completed => {
            if state_file.exists()
                && let Err(e) = std::fs::remove_file(&state_file)
            {
                tracing::warn!(error = %e, path = %state_file.display(), "failed to remove state file");
            }
            None
        }
        _ => None,
    };

    let mut report = IngestReport {
        source: source.clone(),
        dry_run: args.dry_run,
        state: result.state,
        total_chunks: result.progress.total_chunks,
        processed_chunks: result.progress.processed_chunks,
        failed_chunks: result.failed_chunks,
        processing: result.metrics,
        state_file: saved_state,
        ..Default::default()
    };
    for output in result.outputs {
        report.total_records += output.output.records;
        if let Some(insert) = output.output.insert {
            report.successful_inserts += insert.successful_inserts;
            report.failed_inserts += insert.failed_inserts;
            report.batch_failures.extend(insert.errors);
        }
    }
    report.performance = collector.report();
    report.duration_ms = started.elapsed().as_millis() as u64;

    if !args.dry_run && config.metrics.enabled {
        record_run(config, &report);
    }

    Ok(report)
}

/// Split one unit of work into records, keeping offsets relative to the dump.
fn split_records(chunker: &ContentChunker, source: &str, chunk: &ChunkInput) -> Vec<ContentRecord> {
    chunker
        .split(&chunk.content)
        .into_iter()
        .map(|piece| {
            let piece = ChunkInput {
                id: chunk.id,
                offset: chunk.offset + piece.offset,
                content: piece.content,
            };
            chunk_to_record(source, &piece)
        })
        .collect()
}

fn load_snapshot(path: &Path) -> Result<ProcessingSnapshot> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("no saved state at {}", path.display()))?;
    serde_json::from_slice(&bytes).with_context(|| format!("corrupt state file: {}", path.display()))
}

/// First Ctrl-C pauses after in-flight chunks; a second one cancels.
async fn watch_interrupts(processor: ChunkedProcessor, cancel: CancellationToken, pb: ProgressBar) {
    if signal::ctrl_c().await.is_err() {
        return;
    }
    if !processor.pause_processing() {
        cancel.cancel();
        return;
    }
    pb.println("Pausing after in-flight chunks finish (Ctrl-C again to cancel)...");

    if signal::ctrl_c().await.is_ok() {
        pb.println("Cancelling...");
        cancel.cancel();
    }
}

/// Fold a whole ingest into one run row.
fn run_result(report: &IngestReport) -> BatchInsertResult {
    let perf = &report.performance;
    let documents = report.successful_inserts + report.failed_inserts;
    BatchInsertResult {
        total_documents: documents,
        successful_inserts: report.successful_inserts,
        failed_inserts: report.failed_inserts,
        errors: Vec::new(),
        metrics: BatchInsertMetrics {
            total_processing_time_ms: report.duration_ms,
            embedding_generation_time_ms: perf.embedding_time_ms,
            database_insertion_time_ms: perf.insertion_time_ms,
            batches_processed: perf.batches_processed,
            average_batch_size_used: if perf.batches_processed > 0 {
                documents as f64 / perf.batches_processed as f64
            } else {
                0.0
            },
            connection_pool_efficiency: perf.average_pool_efficiency,
            throughput_docs_per_second: perf.overall_throughput,
            retries_performed: perf.retries_performed,
            ..Default::default()
        },
    }
}

fn record_run(config: &Config, report: &IngestReport) {
    let Some(path) = Config::metrics_db_path() else {
        return;
    };

    match MetricsStore::open(&path) {
        Ok(store) => {
            if let Err(e) = store.record_run(&report.source, &run_result(report)) {
                tracing::warn!(error = %e, "failed to record ingestion run");
            }
            if let Err(e) = store.cleanup(config.metrics.retention_days) {
                tracing::warn!(error = %e, "failed to prune old ingestion runs");
            }
        }
        Err(e) => tracing::warn!(error = %e, path = %path.display(), "metrics store unavailable"),
    }
}
