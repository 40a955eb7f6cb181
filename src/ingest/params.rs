//! Invocation parameters for one ingestion run

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::config::DEFAULT_CHUNK_DAYS;
use super::plan::ChunkSelection;
use super::{IngestError, IngestResult};

const DATE_FORMAT: &str = "%Y-%m-%d";

fn default_chunk_days() -> u32 {
    DEFAULT_CHUNK_DAYS
}

/// Parameters of an ingestion run
///
/// Field names follow the orchestrator's keyword arguments, so a JSON params
/// document deserializes directly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestParams {
    /// Range start, `YYYY-MM-DD`
    pub fecha_inicio: Option<String>,
    /// Range end, `YYYY-MM-DD`
    pub fecha_fin: Option<String>,
    /// Days per chunk
    #[serde(default = "default_chunk_days")]
    pub chunk_days: u32,
    /// Verbose logging for resumed runs
    #[serde(default)]
    pub resume_mode: bool,
    /// Walk failed chunks once more after the main pass
    #[serde(default)]
    pub retry_failed_chunks: bool,
    /// Plan and report only
    #[serde(default)]
    pub verify_only: bool,
    /// Chunk numbers never processed
    #[serde(default)]
    pub skip_chunks: Vec<u32>,
    /// Chunk numbers always processed
    #[serde(default)]
    pub force_chunks: Vec<u32>,
    /// Abort the run on the first chunk failure
    #[serde(default)]
    pub fail_fast: bool,
}

impl Default for IngestParams {
    fn default() -> Self {
        Self {
            fecha_inicio: None,
            fecha_fin: None,
            chunk_days: DEFAULT_CHUNK_DAYS,
            resume_mode: false,
            retry_failed_chunks: false,
            verify_only: false,
            skip_chunks: Vec::new(),
            force_chunks: Vec::new(),
            fail_fast: false,
        }
    }
}

impl IngestParams {
    /// Parameters for `[start, end]` with default controls
    pub fn new(start: impl Into<String>, end: impl Into<String>) -> Self {
        Self {
            fecha_inicio: Some(start.into()),
            fecha_fin: Some(end.into()),
            ..Self::default()
        }
    }

    /// Set days per chunk
    pub fn with_chunk_days(mut self, chunk_days: u32) -> Self {
        self.chunk_days = chunk_days;
        self
    }

    /// Set chunks to skip
    pub fn with_skip_chunks(mut self, chunks: Vec<u32>) -> Self {
        self.skip_chunks = chunks;
        self
    }

    /// Set chunks to force
    pub fn with_force_chunks(mut self, chunks: Vec<u32>) -> Self {
        self.force_chunks = chunks;
        self
    }

    /// Enable or disable dry-run mode
    pub fn with_verify_only(mut self, verify_only: bool) -> Self {
        self.verify_only = verify_only;
        self
    }

    /// Enable or disable the failed-chunk retry pass
    pub fn with_retry_failed_chunks(mut self, retry: bool) -> Self {
        self.retry_failed_chunks = retry;
        self
    }

    /// Enable or disable aborting on the first chunk failure
    pub fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    /// Validate and parse the date range
    ///
    /// # Errors
    /// Returns [`IngestError::InvalidArgument`] when a date is absent or malformed,
    /// when the end precedes the start, or when `chunk_days` is zero
    pub fn validate(&self) -> IngestResult<(NaiveDate, NaiveDate)> {
        let start = parse_date("fecha_inicio", self.fecha_inicio.as_deref())?;
        let end = parse_date("fecha_fin", self.fecha_fin.as_deref())?;

        if end < start {
            return Err(IngestError::InvalidArgument(format!(
                "fecha_fin ({end}) must not precede fecha_inicio ({start})"
            )));
        }

        if self.chunk_days < 1 {
            return Err(IngestError::InvalidArgument(
                "chunk_days must be at least 1".to_string(),
            ));
        }

        Ok((start, end))
    }

    /// Selection controls for the planner
    pub fn selection(&self) -> ChunkSelection {
        ChunkSelection {
            skip_chunks: self.skip_chunks.clone(),
            force_chunks: self.force_chunks.clone(),
            resume_mode: self.resume_mode,
            verify_only: self.verify_only,
        }
    }
}

fn parse_date(name: &str, value: Option<&str>) -> IngestResult<NaiveDate> {
    let value = value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| IngestError::InvalidArgument(format!("{name} is required (YYYY-MM-DD)")))?;

    NaiveDate::parse_from_str(value, DATE_FORMAT).map_err(|e| {
        IngestError::InvalidArgument(format!("{name} '{value}' is not a YYYY-MM-DD date: {e}"))
    })
}
