//! Ingestion executor
//!
//! Plans the run, walks every selected chunk in order, records outcomes, optionally
//! retries failed chunks once, and deduplicates the accumulated rows (first
//! occurrence wins). Chunks and pages run sequentially; a chunk failure is isolated
//! unless `fail_fast` is set, in which case the run stops walking and still reports
//! what it gathered.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, info_span, warn, Instrument};

use super::params::IngestParams;
use super::plan::{Chunk, ChunkPlanner, Selection};
use super::progress::{format_duration, ProgressTracker};
use super::{IngestError, IngestResult};
use crate::auth::TokenRefresher;
use crate::fetcher::pagination::PaginationWalker;
use crate::Row;

/// Outcome of a run
#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    /// Run identifier
    pub run_id: String,
    /// Whether this was a dry run
    pub verify_only: bool,
    /// Full plan
    pub plan: Vec<Chunk>,
    /// Selection applied to the plan
    pub selection: Selection,
    /// Rows gathered before deduplication
    pub raw_rows: usize,
    /// Rows dropped as duplicates
    pub duplicates_removed: usize,
    /// Failed chunk that stopped the run when `fail_fast` was set
    pub aborted_at_chunk: Option<u32>,
    /// Per-chunk ledger
    pub progress: ProgressTracker,
    /// Deduplicated rows, ready for export
    #[serde(skip)]
    pub rows: Vec<Row>,
}

impl IngestReport {
    /// Rows after deduplication
    pub fn unique_rows(&self) -> usize {
        self.rows.len()
    }

    /// Whether any selected chunk failed or was never walked
    pub fn has_failures(&self) -> bool {
        !self.progress.is_complete_success()
    }
}

/// Runs a chunked ingestion
pub struct IngestExecutor {
    walker: PaginationWalker,
    tokens: Option<Arc<dyn TokenRefresher>>,
}

impl IngestExecutor {
    /// Executor walking chunks with `walker`
    pub fn new(walker: PaginationWalker) -> Self {
        Self {
            walker,
            tokens: None,
        }
    }

    /// Refresh the access token through `tokens` before the first chunk
    pub fn with_token_refresher(mut self, tokens: Arc<dyn TokenRefresher>) -> Self {
        self.tokens = Some(tokens);
        self
    }

    /// Run with the current time as ingestion timestamp
    pub async fn run(&self, params: &IngestParams) -> IngestResult<IngestReport> {
        self.run_at(params, Utc::now()).await
    }

    /// Run, stamping every row with `ingested_at`
    ///
    /// # Errors
    /// Returns [`IngestError::InvalidArgument`] or [`IngestError::PlanError`] before any
    /// request. Chunk failures are reported in the returned [`IngestReport`]; with
    /// `fail_fast` the run stops after the first one and sets
    /// [`IngestReport::aborted_at_chunk`].
    pub async fn run_at(
        &self,
        params: &IngestParams,
        ingested_at: DateTime<Utc>,
    ) -> IngestResult<IngestReport> {
        let (start, end) = params.validate()?;
        if self.walker.api().page_size == 0 {
            return Err(IngestError::InvalidArgument(
                "page_size must be at least 1".to_string(),
            ));
        }
        let plan = ChunkPlanner::plan(start, end, params.chunk_days)?;
        let selection = ChunkPlanner::select(&plan, &params.selection());
        let run_id = ProgressTracker::run_id(start, end, params.chunk_days, ingested_at);

        let span = info_span!("ingest_run", run_id = %run_id);
        self.execute(params, plan, selection, run_id, ingested_at)
            .instrument(span)
            .await
    }

    async fn execute(
        &self,
        params: &IngestParams,
        plan: Vec<Chunk>,
        selection: Selection,
        run_id: String,
        ingested_at: DateTime<Utc>,
    ) -> IngestResult<IngestReport> {
        let mut progress =
            ProgressTracker::new(run_id.clone(), plan.len(), selection.to_process.len());
        for &chunk_number in &selection.skipped {
            progress.record_skipped(chunk_number);
        }
        for &chunk_number in &selection.forced {
            progress.record_forced(chunk_number);
        }

        info!(
            total_chunks = plan.len(),
            selected = selection.eligible.len(),
            skipped = ?selection.skipped,
            forced = ?selection.forced,
            chunk_days = params.chunk_days,
            entity = %self.walker.api().entity,
            resume_mode = params.resume_mode,
            verify_only = params.verify_only,
            retry_failed_chunks = params.retry_failed_chunks,
            fail_fast = params.fail_fast,
            "Starting ingestion run"
        );

        if params.resume_mode {
            for chunk in &plan {
                let state = if selection.skipped.contains(&chunk.chunk_number) {
                    "skip"
                } else if selection.forced.contains(&chunk.chunk_number) {
                    "force"
                } else {
                    "process"
                };
                info!(chunk_number = chunk.chunk_number, range = %chunk.date_range(), state, "[RESUME] Chunk plan");
            }
        }

        if selection.verify_only {
            for chunk in plan.iter().filter(|c| selection.eligible.contains(&c.chunk_number)) {
                info!(
                    chunk_number = chunk.chunk_number,
                    range = %chunk.date_range(),
                    days = chunk.days(),
                    "[VERIFY] Would process chunk"
                );
            }
            info!(
                would_process = selection.eligible.len(),
                total_chunks = plan.len(),
                "[VERIFY] Dry run complete, no requests made"
            );
            return Ok(IngestReport {
                run_id,
                verify_only: true,
                plan,
                selection,
                raw_rows: 0,
                duplicates_removed: 0,
                aborted_at_chunk: None,
                progress,
                rows: Vec::new(),
            });
        }

        if let Some(tokens) = &self.tokens {
            if tokens.refresh().await.is_none() {
                warn!("Initial token refresh failed, continuing with the configured access token");
            }
        }

        let mut rows: Vec<Row> = Vec::new();
        let mut aborted_at_chunk = None;

        for chunk in &selection.to_process {
            self.process_chunk(chunk, ingested_at, &mut progress, &mut rows)
                .await;

            if params.fail_fast && progress.failed_numbers().contains(&chunk.chunk_number) {
                error!(
                    chunk_number = chunk.chunk_number,
                    remaining = selection.to_process.len().saturating_sub(progress.processed()),
                    "Aborting run on first chunk failure (fail_fast)"
                );
                aborted_at_chunk = Some(chunk.chunk_number);
                break;
            }
        }

        if aborted_at_chunk.is_none()
            && params.retry_failed_chunks
            && !progress.failed_chunks.is_empty()
        {
            let retry: Vec<Chunk> = selection
                .to_process
                .iter()
                .filter(|c| progress.failed_numbers().contains(&c.chunk_number))
                .copied()
                .collect();

            info!(chunks = ?progress.failed_numbers(), "Retrying failed chunks");
            for chunk in &retry {
                self.process_chunk(chunk, ingested_at, &mut progress, &mut rows)
                    .await;
            }
        }

        let raw_rows = rows.len();
        let (rows, duplicates_removed) = dedupe_first_wins(rows);

        info!(
            completed = progress.completed_chunks.len(),
            failed = progress.failed_chunks.len(),
            skipped = progress.skipped_chunks.len(),
            pages = progress.total_pages,
            raw_rows,
            unique_rows = rows.len(),
            duplicates_removed,
            aborted_at_chunk = ?aborted_at_chunk,
            elapsed = %format_duration(progress.elapsed()),
            "Ingestion run finished"
        );

        for failed in &progress.failed_chunks {
            error!(
                chunk_number = failed.chunk_number,
                range = %failed.date_range,
                error = %failed.error,
                "Chunk failed"
            );
        }

        Ok(IngestReport {
            run_id,
            verify_only: false,
            plan,
            selection,
            raw_rows,
            duplicates_removed,
            aborted_at_chunk,
            progress,
            rows,
        })
    }

    async fn process_chunk(
        &self,
        chunk: &Chunk,
        ingested_at: DateTime<Utc>,
        progress: &mut ProgressTracker,
        rows: &mut Vec<Row>,
    ) {
        let span = info_span!(
            "chunk",
            chunk_number = chunk.chunk_number,
            range = %chunk.date_range()
        );

        async {
            info!(days = chunk.days(), "Processing chunk");
            let started = Instant::now();

            match self.walker.walk(chunk, ingested_at).await {
                Ok(walk) => {
                    let duration = started.elapsed();
                    let secs = duration.as_secs_f64();
                    info!(
                        pages = walk.pages,
                        records = walk.records,
                        rows = walk.rows.len(),
                        truncated = walk.truncated,
                        duration_secs = secs,
                        avg_page_secs = if walk.pages > 0 { secs / f64::from(walk.pages) } else { 0.0 },
                        rows_per_sec = if secs > 0.0 { walk.rows.len() as f64 / secs } else { 0.0 },
                        "Chunk completed"
                    );
                    progress.record_completed(chunk.chunk_number, walk.pages, walk.rows.len());
                    rows.extend(walk.rows);
                }
                Err(err) => {
                    let duration = started.elapsed();
                    warn!(
                        pages = err.pages,
                        partial_rows = err.partial.len(),
                        duration_secs = duration.as_secs_f64(),
                        error = %err.source,
                        "Chunk failed"
                    );
                    progress.record_failed(
                        chunk.chunk_number,
                        chunk.date_range(),
                        err.source.to_string(),
                        duration,
                        err.partial.len(),
                    );
                    rows.extend(err.partial);
                }
            }

            info!("{}", progress.format_progress());
        }
        .instrument(span)
        .await
    }
}

/// Drop rows whose id was already seen, keeping the first occurrence
///
/// Returns the unique rows in their original order and the number removed.
pub fn dedupe_first_wins(rows: Vec<Row>) -> (Vec<Row>, usize) {
    let before = rows.len();
    let mut seen = HashSet::with_capacity(before);
    let unique: Vec<Row> = rows
        .into_iter()
        .filter(|row| seen.insert(row.id.clone()))
        .collect();
    let removed = before - unique.len();

    if removed > 0 {
        debug!(removed, "Removed duplicate rows");
    }

    (unique, removed)
}
