//! Chunked ingestion orchestration
//!
//! # Overview
//!
//! A run walks a historical date range chunk by chunk:
//!
//! 1. **Parameters**: validate the range and controls with [`params::IngestParams`]
//! 2. **Planning**: partition and select chunks with [`plan::ChunkPlanner`]
//! 3. **Execution**: walk every selected chunk with [`executor::IngestExecutor`]
//! 4. **Progress**: record completed / failed / skipped chunks in
//!    [`progress::ProgressTracker`]
//!
//! # Error Handling
//!
//! Configuration problems fail the run before any request. A chunk that cannot be
//! walked is recorded and the run moves on, unless `fail_fast` is set.
//!
//! # Related Modules
//!
//! - [`crate::fetcher`] - page fetching and pagination
//! - [`crate::export`] - writing the accumulated rows

pub mod config;
pub mod executor;
pub mod params;
pub mod plan;
pub mod progress;

pub use executor::{dedupe_first_wins, IngestExecutor, IngestReport};
pub use params::IngestParams;
pub use plan::{Chunk, ChunkPlanner, ChunkSelection, Selection};
pub use progress::{FailedChunk, ProgressTracker};

/// Ingestion errors
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// Missing or malformed invocation parameter
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Range cannot be planned
    #[error("planning error: {0}")]
    PlanError(String),
}

/// Result type for ingestion operations
pub type IngestResult<T> = Result<T, IngestError>;
