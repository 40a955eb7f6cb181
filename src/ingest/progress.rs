//! Per-run progress ledger
//!
//! Tracks which chunks completed, failed or were skipped, plus row and page
//! totals, and renders the `[PROGRESS]` lines emitted after each chunk. The ledger
//! lives for one run only and is returned inside the run report.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use std::time::{Duration, Instant};

/// A chunk that did not complete
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedChunk {
    /// Failed chunk
    pub chunk_number: u32,
    /// "start to end"
    pub date_range: String,
    /// Failure message
    pub error: String,
    /// Time spent on the chunk, in seconds
    pub duration_secs: f64,
}

/// Progress ledger for one run
#[derive(Debug, Clone, Serialize)]
pub struct ProgressTracker {
    /// Run identifier
    pub run_id: String,
    /// Chunks in the plan
    pub total_chunks: usize,
    /// Chunks selected for walking
    pub selected_chunks: usize,
    /// Completed chunk numbers, in completion order
    pub completed_chunks: Vec<u32>,
    /// Chunks that failed
    pub failed_chunks: Vec<FailedChunk>,
    /// Skipped chunk numbers
    pub skipped_chunks: Vec<u32>,
    /// Forced chunk numbers
    pub forced_chunks: Vec<u32>,
    /// Wall-clock start of the run
    pub processing_start: DateTime<Utc>,
    /// Rows gathered so far (before deduplication)
    pub total_rows: usize,
    /// Pages fetched so far
    pub total_pages: u32,
    #[serde(skip)]
    started: Instant,
}

impl ProgressTracker {
    /// Fresh ledger
    pub fn new(run_id: impl Into<String>, total_chunks: usize, selected_chunks: usize) -> Self {
        Self {
            run_id: run_id.into(),
            total_chunks,
            selected_chunks,
            completed_chunks: Vec::new(),
            failed_chunks: Vec::new(),
            skipped_chunks: Vec::new(),
            forced_chunks: Vec::new(),
            processing_start: Utc::now(),
            total_rows: 0,
            total_pages: 0,
            started: Instant::now(),
        }
    }

    /// `{start}_{end}_{chunk_days}d_{ingest date}`
    pub fn run_id(
        start: NaiveDate,
        end: NaiveDate,
        chunk_days: u32,
        ingested_at: DateTime<Utc>,
    ) -> String {
        format!(
            "{}_{}_{}d_{}",
            start.format("%Y-%m-%d"),
            end.format("%Y-%m-%d"),
            chunk_days,
            ingested_at.format("%Y-%m-%d")
        )
    }

    /// Record a chunk excluded by selection
    pub fn record_skipped(&mut self, chunk_number: u32) {
        self.skipped_chunks.push(chunk_number);
    }

    /// Record a chunk walked because it was forced
    pub fn record_forced(&mut self, chunk_number: u32) {
        self.forced_chunks.push(chunk_number);
    }

    /// Record a completed chunk; a previous failure of the same chunk is cleared
    pub fn record_completed(&mut self, chunk_number: u32, pages: u32, rows: usize) {
        self.failed_chunks.retain(|f| f.chunk_number != chunk_number);
        if !self.completed_chunks.contains(&chunk_number) {
            self.completed_chunks.push(chunk_number);
        }
        self.total_pages += pages;
        self.total_rows += rows;
    }

    /// Record a failed chunk, replacing any earlier failure entry for it
    pub fn record_failed(
        &mut self,
        chunk_number: u32,
        date_range: impl Into<String>,
        error: impl Into<String>,
        duration: Duration,
        partial_rows: usize,
    ) {
        self.failed_chunks.retain(|f| f.chunk_number != chunk_number);
        self.failed_chunks.push(FailedChunk {
            chunk_number,
            date_range: date_range.into(),
            error: error.into(),
            duration_secs: duration.as_secs_f64(),
        });
        self.total_rows += partial_rows;
    }

    /// Chunk numbers currently failed
    pub fn failed_numbers(&self) -> Vec<u32> {
        self.failed_chunks.iter().map(|f| f.chunk_number).collect()
    }

    /// Chunks that finished either way
    pub fn processed(&self) -> usize {
        self.completed_chunks.len() + self.failed_chunks.len()
    }

    /// Percentage of selected chunks finished (0-100)
    pub fn percentage(&self) -> f64 {
        if self.selected_chunks == 0 {
            return 100.0;
        }
        (self.processed() as f64 / self.selected_chunks as f64 * 100.0).min(100.0)
    }

    /// Rows gathered per second since the run started
    pub fn rows_per_sec(&self) -> f64 {
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            self.total_rows as f64 / elapsed
        } else {
            0.0
        }
    }

    /// Time since the run started
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Estimate remaining time from the average chunk duration
    pub fn estimate_remaining(&self) -> Option<Duration> {
        let processed = self.processed();
        let remaining = self.selected_chunks.saturating_sub(processed);
        if processed == 0 || remaining == 0 {
            return None;
        }
        let per_chunk = self.elapsed().as_secs_f64() / processed as f64;
        Some(Duration::from_secs_f64(per_chunk * remaining as f64))
    }

    /// Whether every selected chunk completed
    pub fn is_complete_success(&self) -> bool {
        self.failed_chunks.is_empty() && self.completed_chunks.len() >= self.selected_chunks
    }

    /// Human-readable progress string for logging.
    pub fn format_progress(&self) -> String {
        let mut parts = vec![format!(
            "[PROGRESS] {}/{} chunks ({:.1}%) - {} rows in {} pages",
            self.processed(),
            self.selected_chunks,
            self.percentage(),
            self.total_rows,
            self.total_pages
        )];

        if !self.failed_chunks.is_empty() {
            parts.push(format!("- {} failed", self.failed_chunks.len()));
        }

        let rate = self.rows_per_sec();
        if rate > 0.0 {
            parts.push(format!("at {rate:.0} rows/sec"));
        }

        if let Some(remaining) = self.estimate_remaining() {
            parts.push(format!("- ~{} remaining", format_duration(remaining)));
        }

        parts.join(" ")
    }
}

/// Compact duration for log lines ("42s", "7m", "1.5h")
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{secs}s")
    } else if secs < 3600 {
        format!("{}m", secs / 60)
    } else {
        format!("{:.1}h", secs as f64 / 3600.0)
    }
}
