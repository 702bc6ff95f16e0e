use std::fmt::Write as FmtWrite;
use std::path::PathBuf;

use serde::Serialize;

use crate::models::{BatchFailure, OutputFormat, ProcessingMetrics, ProcessingState};
use crate::services::{PerformanceReport, RunSummary};

/// How many batch failures the text report lists before summarising.
const MAX_LISTED_FAILURES: usize = 10;

pub trait Formatter {
    fn format_ingest_report(&self, report: &IngestReport) -> String;
    fn format_status(&self, status: &StatusInfo) -> String;
    fn format_message(&self, message: &str) -> String;
    fn format_error(&self, error: &str) -> String;
}

/// Outcome of one `ingest` invocation.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestReport {
    pub source: String,
    pub dry_run: bool,
    pub state: ProcessingState,
    pub total_chunks: usize,
    pub processed_chunks: usize,
    pub failed_chunks: Vec<(usize, String)>,
    pub total_records: usize,
    pub successful_inserts: usize,
    pub failed_inserts: usize,
    pub batch_failures: Vec<BatchFailure>,
    pub processing: Option<ProcessingMetrics>,
    pub performance: PerformanceReport,
    pub state_file: Option<PathBuf>,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusInfo {
    pub embedding_url: String,
    pub embedding_healthy: bool,
    pub embedding_model: Option<String>,
    pub vector_store_url: String,
    pub vector_store_connected: bool,
    pub collection: String,
    pub vector_store_points: Option<u64>,
    pub recent_runs: Option<RunSummary>,
    pub retention_days: u32,
}

pub struct TextFormatter;

impl Formatter for TextFormatter {
    fn format_ingest_report(&self, report: &IngestReport) -> String {
        let mut output = String::new();
        let title = if report.dry_run {
            "Ingest (dry run)"
        } else {
            "Ingest"
        };
        writeln!(output, "{}: {}", title, report.source).unwrap();
        writeln!(output, "{}", "-".repeat(title.len() + 2 + report.source.len())).unwrap();
        writeln!(output, "State:          {}", report.state).unwrap();
        writeln!(
            output,
            "Chunks:         {}/{} ({} failed)",
            report.processed_chunks,
            report.total_chunks,
            report.failed_chunks.len()
        )
        .unwrap();
        writeln!(output, "Records:        {}", report.total_records).unwrap();
        if !report.dry_run {
            writeln!(output, "Inserted:       {}", report.successful_inserts).unwrap();
            writeln!(output, "Failed:         {}", report.failed_inserts).unwrap();
        }
        writeln!(output, "Duration:       {}ms", report.duration_ms).unwrap();

        if let Some(ref m) = report.processing {
            writeln!(output).unwrap();
            writeln!(output, "Chunks/sec:     {:.2}", m.chunks_per_second).unwrap();
            writeln!(output, "Parallelism:    {:.1}%", m.parallel_efficiency_score).unwrap();
            writeln!(
                output,
                "Chunk sizes:    avg {:.0} B, min {} B, max {} B",
                m.chunk_sizes.average_chunk_size,
                m.chunk_sizes.min_chunk_size,
                m.chunk_sizes.max_chunk_size
            )
            .unwrap();
        }

        let perf = &report.performance;
        if perf.insert_runs > 0 {
            writeln!(output, "Batches:        {}", perf.batches_processed).unwrap();
            writeln!(output, "Embedding:      {}ms", perf.embedding_time_ms).unwrap();
            writeln!(output, "Upsert:         {}ms", perf.insertion_time_ms).unwrap();
            writeln!(output, "Retries:        {}", perf.retries_performed).unwrap();
            writeln!(output, "Pool usage:     {:.1}%", perf.average_pool_efficiency).unwrap();
            writeln!(output, "Throughput:     {:.1} docs/s", perf.overall_throughput).unwrap();
        }

        if !report.failed_chunks.is_empty() || !report.batch_failures.is_empty() {
            writeln!(output).unwrap();
            writeln!(output, "Failures").unwrap();
            for (id, message) in report.failed_chunks.iter().take(MAX_LISTED_FAILURES) {
                writeln!(output, "  chunk {}: {}", id, message).unwrap();
            }
            for failure in report.batch_failures.iter().take(MAX_LISTED_FAILURES) {
                writeln!(
                    output,
                    "  {} record(s), {} attempt(s): {}",
                    failure.record_count, failure.attempts, failure.message
                )
                .unwrap();
            }
            let listed = report.failed_chunks.len().min(MAX_LISTED_FAILURES)
                + report.batch_failures.len().min(MAX_LISTED_FAILURES);
            let total = report.failed_chunks.len() + report.batch_failures.len();
            if total > listed {
                writeln!(output, "  ... and {} more", total - listed).unwrap();
            }
        }

        if let Some(ref path) = report.state_file {
            writeln!(output).unwrap();
            writeln!(output, "Saved state to: {}", path.display()).unwrap();
            writeln!(output, "Resume with:    il2cpp-ingest ingest {} --resume", report.source)
                .unwrap();
        }

        output
    }

    fn format_status(&self, status: &StatusInfo) -> String {
        let mut output = String::new();
        writeln!(output, "Status").unwrap();
        writeln!(output, "------").unwrap();

        let embedding_status = if status.embedding_healthy {
            "[RUNNING]"
        } else {
            "[STOPPED]"
        };
        writeln!(output, "Embedding:     {}", embedding_status).unwrap();
        writeln!(output, "  URL:         {}", status.embedding_url).unwrap();
        if let Some(ref model) = status.embedding_model {
            writeln!(output, "  Model:       {}", model).unwrap();
        }
        writeln!(output).unwrap();

        let vector_status = if status.vector_store_connected {
            "[CONNECTED]"
        } else {
            "[DISCONNECTED]"
        };
        writeln!(output, "Vector Store:  qdrant ({})", vector_status).unwrap();
        writeln!(output, "  URL:         {}", status.vector_store_url).unwrap();
        writeln!(output, "  Collection:  {}", status.collection).unwrap();
        match status.vector_store_points {
            Some(points) => writeln!(output, "  Points:      {}", points).unwrap(),
            None if status.vector_store_connected => {
                writeln!(output, "  Points:      (collection not created)").unwrap()
            }
            None => {}
        }

        if let Some(ref runs) = status.recent_runs {
            writeln!(output).unwrap();
            writeln!(output, "Runs (last {} days)", status.retention_days).unwrap();
            writeln!(output, "  Runs:        {}", runs.total_runs).unwrap();
            writeln!(output, "  Documents:   {}", runs.total_documents).unwrap();
            writeln!(output, "  Failed:      {}", runs.failed_documents).unwrap();
            writeln!(output, "  Throughput:  {:.1} docs/s", runs.avg_throughput).unwrap();
            writeln!(output, "  Batches:     {}", runs.total_batches).unwrap();
            writeln!(output, "  Retries:     {}", runs.total_retries).unwrap();
        }

        output
    }

    fn format_message(&self, message: &str) -> String {
        format!("{}\n", message)
    }

    fn format_error(&self, error: &str) -> String {
        format!("Error: {}\n", error)
    }
}

pub struct JsonFormatter {
    pub pretty: bool,
}

impl JsonFormatter {
    pub fn new(pretty: bool) -> Self {
        Self { pretty }
    }

    fn render<T: Serialize>(&self, value: &T) -> String {
        let rendered = if self.pretty {
            serde_json::to_string_pretty(value)
        } else {
            serde_json::to_string(value)
        };
        rendered.unwrap_or_else(|e| serde_json::json!({ "error": e.to_string() }).to_string())
    }
}

impl Formatter for JsonFormatter {
    fn format_ingest_report(&self, report: &IngestReport) -> String {
        self.render(report)
    }

    fn format_status(&self, status: &StatusInfo) -> String {
        let json = serde_json::json!({
            "embedding": {
                "url": status.embedding_url,
                "healthy": status.embedding_healthy,
                "model": status.embedding_model,
            },
            "vector_store": {
                "url": status.vector_store_url,
                "connected": status.vector_store_connected,
                "collection": status.collection,
                "points": status.vector_store_points,
            },
            "runs": status.recent_runs,
            "retention_days": status.retention_days,
        });
        self.render(&json)
    }

    fn format_message(&self, message: &str) -> String {
        serde_json::json!({"message": message}).to_string()
    }

    fn format_error(&self, error: &str) -> String {
        serde_json::json!({"error": error}).to_string()
    }
}

pub fn get_formatter(format: OutputFormat) -> Box<dyn Formatter> {
    match format {
        OutputFormat::Text => Box::new(TextFormatter),
        OutputFormat::Json => Box::new(JsonFormatter::new(true)),
    }
}
