//! Date-range chunk planning and selection

use chrono::{DateTime, Days, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;

use super::{IngestError, IngestResult};

/// Contiguous block of whole days inside the ingestion range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Chunk {
    /// 1-based position in the plan
    pub chunk_number: u32,
    /// First day (inclusive)
    pub start_date: NaiveDate,
    /// Last day (inclusive)
    pub end_date: NaiveDate,
}

impl Chunk {
    /// `YYYY-MM-DD` start date
    pub fn start_date_str(&self) -> String {
        self.start_date.format("%Y-%m-%d").to_string()
    }

    /// `YYYY-MM-DD` end date
    pub fn end_date_str(&self) -> String {
        self.end_date.format("%Y-%m-%d").to_string()
    }

    /// Start of the extract window, 00:00:00 UTC on the first day
    pub fn window_start_utc(&self) -> DateTime<Utc> {
        Utc.from_utc_datetime(&self.start_date.and_time(NaiveTime::MIN))
    }

    /// End of the extract window, 23:59:59 UTC on the last day
    pub fn window_end_utc(&self) -> DateTime<Utc> {
        let end_of_day = NaiveTime::from_hms_opt(23, 59, 59).unwrap_or(NaiveTime::MIN);
        Utc.from_utc_datetime(&self.end_date.and_time(end_of_day))
    }

    /// Days covered, inclusive
    pub fn days(&self) -> i64 {
        (self.end_date - self.start_date).num_days() + 1
    }

    /// "start to end"
    pub fn date_range(&self) -> String {
        format!("{} to {}", self.start_date_str(), self.end_date_str())
    }
}

impl fmt::Display for Chunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "chunk {} ({})", self.chunk_number, self.date_range())
    }
}

/// Operator controls applied to a plan
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunkSelection {
    /// Chunk numbers never processed
    pub skip_chunks: Vec<u32>,
    /// Chunk numbers processed regardless of other controls
    pub force_chunks: Vec<u32>,
    /// Verbose logging for resumed runs
    pub resume_mode: bool,
    /// Plan and report only
    pub verify_only: bool,
}

/// Outcome of applying a [`ChunkSelection`] to a plan
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Selection {
    /// Chunks to walk, in plan order (empty in verify-only mode)
    pub to_process: Vec<Chunk>,
    /// Chunks a real run would walk
    pub eligible: Vec<u32>,
    /// Chunks excluded by `skip_chunks`
    pub skipped: Vec<u32>,
    /// Chunks named in `force_chunks` that will be walked
    pub forced: Vec<u32>,
    /// Whether this is a dry run
    pub verify_only: bool,
}

/// Partitions a date range and applies selection controls
pub struct ChunkPlanner;

impl ChunkPlanner {
    /// Partition `[start, end]` into chunks of `chunk_days` days
    ///
    /// The final chunk may be shorter. Chunks are contiguous and non-overlapping.
    ///
    /// # Errors
    /// Returns [`IngestError::PlanError`] when `start > end` or `chunk_days < 1`
    pub fn plan(start: NaiveDate, end: NaiveDate, chunk_days: u32) -> IngestResult<Vec<Chunk>> {
        if chunk_days < 1 {
            return Err(IngestError::PlanError(
                "chunk_days must be at least 1".to_string(),
            ));
        }

        if start > end {
            return Err(IngestError::PlanError(format!(
                "start date {start} is after end date {end}"
            )));
        }

        let span = Days::new(u64::from(chunk_days) - 1);
        let mut chunks = Vec::new();
        let mut current = start;

        loop {
            let chunk_end = current
                .checked_add_days(span)
                .map_or(end, |candidate| candidate.min(end));

            let chunk_number = u32::try_from(chunks.len() + 1)
                .map_err(|_| IngestError::PlanError("too many chunks".to_string()))?;
            chunks.push(Chunk {
                chunk_number,
                start_date: current,
                end_date: chunk_end,
            });

            if chunk_end >= end {
                break;
            }
            match chunk_end.succ_opt() {
                Some(next) => current = next,
                None => break,
            }
        }

        Ok(chunks)
    }

    /// Apply skip / force / verify-only controls to a plan
    ///
    /// A chunk in both `skip_chunks` and `force_chunks` is skipped.
    pub fn select(chunks: &[Chunk], selection: &ChunkSelection) -> Selection {
        let skip: HashSet<u32> = selection.skip_chunks.iter().copied().collect();
        let force: HashSet<u32> = selection.force_chunks.iter().copied().collect();

        let mut result = Selection {
            verify_only: selection.verify_only,
            ..Selection::default()
        };

        for chunk in chunks {
            if skip.contains(&chunk.chunk_number) {
                result.skipped.push(chunk.chunk_number);
                continue;
            }

            if force.contains(&chunk.chunk_number) {
                result.forced.push(chunk.chunk_number);
            }

            result.eligible.push(chunk.chunk_number);
            if !selection.verify_only {
                result.to_process.push(*chunk);
            }
        }

        result
    }
}
