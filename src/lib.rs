//! # Resilient Backfill Library
//!
//! Long-range, chunked backfills of paginated OAuth query APIs (QuickBooks Online
//! style) into an idempotent row store.
//!
//! ## Features
//!
//! - **Date-range chunking**: split a historical window into fixed-size day chunks
//!   with skip / force / verify-only selection
//! - **Resilient fetching**: bounded retries, exponential backoff, escalating
//!   timeouts, `Retry-After` aware waiting and token refresh on 401
//! - **Circuit breaking**: consecutive failures across pages and chunks suspend
//!   requests for a cool-down
//! - **Idempotent export**: rows are merged into SQLite with `ON CONFLICT DO UPDATE`,
//!   so re-running a backfill never duplicates records
//!
//! ## Quick Start
//!
//! ```no_run
//! use resilient_backfill::ingest::{IngestExecutor, IngestParams};
//! use resilient_backfill::export::UpsertExporter;
//! # use resilient_backfill::fetcher::pagination::PaginationWalker;
//!
//! # async fn example(walker: PaginationWalker) -> Result<(), Box<dyn std::error::Error>> {
//! let params = IngestParams::new("2024-01-01", "2024-01-10").with_chunk_days(7);
//!
//! let report = IngestExecutor::new(walker).run(&params).await?;
//!
//! let exporter = UpsertExporter::open("backfill.db", "qb_customer")?;
//! let summary = exporter.export(&report.rows)?;
//! println!("{} inserted, {} updated", summary.inserted, summary.updated);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`auth`] - OAuth refresh-token exchange
//! - [`fetcher`] - HTTP transport, circuit breaker, retrying fetcher and pagination
//! - [`ingest`] - chunk planning, run orchestration and progress tracking
//! - [`export`] - SQLite upsert exporter
//! - [`cli`] - command line front-end

#![warn(missing_docs)]
#![warn(clippy::all)]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// OAuth token management
pub mod auth;

/// CLI command implementations
pub mod cli;

/// Idempotent row export
pub mod export;

/// Query API fetching
pub mod fetcher;

/// Chunked ingestion orchestration
pub mod ingest;

/// JSON field holding a record's stable identifier
pub const RECORD_ID_FIELD: &str = "Id";

/// Page-level bookkeeping shared by every row extracted from one page
#[derive(Debug, Clone, PartialEq)]
pub struct PageProvenance {
    /// When the run started ingesting
    pub ingested_at_utc: DateTime<Utc>,
    /// Start of the chunk's extract window
    pub extract_window_start_utc: DateTime<Utc>,
    /// End of the chunk's extract window
    pub extract_window_end_utc: DateTime<Utc>,
    /// 1-based page number within the chunk
    pub page_number: u32,
    /// Number of records the page returned
    pub page_size: u32,
    /// Snapshot of the request that produced the page (authorization masked)
    pub request_payload: Value,
}

/// One flattened record ready for export
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Row {
    /// Stable record identifier (primary key downstream)
    pub id: String,
    /// The raw entity document
    pub payload: Value,
    /// When the run started ingesting
    pub ingested_at_utc: DateTime<Utc>,
    /// Start of the chunk's extract window
    pub extract_window_start_utc: DateTime<Utc>,
    /// End of the chunk's extract window
    pub extract_window_end_utc: DateTime<Utc>,
    /// 1-based page number within the chunk
    pub page_number: u32,
    /// Number of records in the page this row came from
    pub page_size: u32,
    /// Snapshot of the request that produced the page
    pub request_payload: Value,
}

impl Row {
    /// Flatten a record into a row, returning `None` when it carries no usable `Id`.
    ///
    /// Numeric identifiers are accepted and stored in their decimal form.
    pub fn from_record(record: &Value, provenance: &PageProvenance) -> Option<Self> {
        let id = match record.get(RECORD_ID_FIELD)? {
            Value::String(s) if !s.trim().is_empty() => s.clone(),
            Value::Number(n) => n.to_string(),
            _ => return None,
        };

        Some(Self {
            id,
            payload: record.clone(),
            ingested_at_utc: provenance.ingested_at_utc,
            extract_window_start_utc: provenance.extract_window_start_utc,
            extract_window_end_utc: provenance.extract_window_end_utc,
            page_number: provenance.page_number,
            page_size: provenance.page_size,
            request_payload: provenance.request_payload.clone(),
        })
    }

    /// Validate row integrity before it is written
    pub fn validate(&self) -> Result<(), String> {
        if self.id.trim().is_empty() {
            return Err("Row id cannot be empty".to_string());
        }

        if self.extract_window_end_utc < self.extract_window_start_utc {
            return Err(format!(
                "Extract window end ({}) must not precede start ({})",
                self.extract_window_end_utc, self.extract_window_start_utc
            ));
        }

        if self.page_number == 0 {
            return Err("Page number must be 1-based".to_string());
        }

        Ok(())
    }
}
