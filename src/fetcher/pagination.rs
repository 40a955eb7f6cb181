//! Offset-cursor pagination over one chunk
//!
//! The walker issues the chunk's window query with `STARTPOSITION` starting at 1 and
//! advances by the page size until a short page or an empty response ends the walk.
//!
//! Includes safety mechanisms:
//! - A hard page cap turns a runaway walk into a [`WalkError`] that keeps its rows
//! - A failure on a later page keeps the rows gathered so far

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use super::api_config::{paginated_query, ApiConfig};
use super::{FetcherError, PageSource};
use crate::ingest::plan::Chunk;
use crate::{PageProvenance, Row};

/// Maximum number of pages walked per chunk
pub const MAX_ITERATIONS: usize = 10_000;

/// Rows and statistics from one chunk
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChunkWalk {
    /// Rows in page order
    pub rows: Vec<Row>,
    /// Pages that returned a document
    pub pages: u32,
    /// Records seen, including ones skipped for a missing `Id`
    pub records: usize,
    /// Whether a later page failed and the walk stopped early
    pub truncated: bool,
}

/// A chunk that could not be walked
#[derive(Debug, thiserror::Error)]
#[error("chunk {chunk_number} failed after {pages} page(s): {source}")]
pub struct WalkError {
    /// Failed chunk
    pub chunk_number: u32,
    /// Pages fetched before the failure
    pub pages: u32,
    /// Rows gathered before the failure
    pub partial: Vec<Row>,
    /// Underlying fetch failure
    #[source]
    pub source: FetcherError,
}

/// Walks the pages of one chunk into rows
pub struct PaginationWalker {
    source: Arc<dyn PageSource>,
    api: ApiConfig,
    max_pages: usize,
}

impl PaginationWalker {
    /// Create a walker fetching through `source`
    pub fn new(source: Arc<dyn PageSource>, api: ApiConfig) -> Self {
        Self {
            source,
            api,
            max_pages: MAX_ITERATIONS,
        }
    }

    /// Override the page cap
    pub fn with_max_pages(mut self, max_pages: usize) -> Self {
        self.max_pages = max_pages;
        self
    }

    /// API configuration in use
    pub fn api(&self) -> &ApiConfig {
        &self.api
    }

    /// Walk every page of `chunk`, stamping rows with `ingested_at`
    ///
    /// # Errors
    /// Returns [`WalkError`] when the page size is zero, the first page cannot be
    /// fetched, or the page cap is hit
    pub async fn walk(
        &self,
        chunk: &Chunk,
        ingested_at: DateTime<Utc>,
    ) -> Result<ChunkWalk, WalkError> {
        let window_start = chunk.window_start_utc();
        let window_end = chunk.window_end_utc();
        let query = self.api.window_query(window_start, window_end);
        let page_size = self.api.page_size;

        // A zero page size would never advance the cursor
        if page_size == 0 {
            return Err(WalkError {
                chunk_number: chunk.chunk_number,
                pages: 0,
                partial: Vec::new(),
                source: FetcherError::InvalidConfig("page size must be at least 1".to_string()),
            });
        }

        let mut walk = ChunkWalk::default();
        let mut start_position: u32 = 1;
        let mut page_number: u32 = 1;

        debug!(
            chunk_number = chunk.chunk_number,
            query = %query,
            page_size,
            "Walking chunk"
        );

        loop {
            // Safety check: prevent infinite loops
            if page_number as usize > self.max_pages {
                return Err(WalkError {
                    chunk_number: chunk.chunk_number,
                    pages: walk.pages,
                    partial: walk.rows,
                    source: FetcherError::MaxIterations(self.max_pages),
                });
            }

            let page_started = Instant::now();
            let document = match self
                .source
                .fetch_page(&query, start_position, page_size)
                .await
            {
                Ok(document) => document,
                Err(source) if page_number == 1 => {
                    return Err(WalkError {
                        chunk_number: chunk.chunk_number,
                        pages: 0,
                        partial: walk.rows,
                        source,
                    });
                }
                Err(err) => {
                    warn!(
                        chunk_number = chunk.chunk_number,
                        page_number,
                        rows_kept = walk.rows.len(),
                        error = %err,
                        "Page fetch failed, keeping rows gathered so far"
                    );
                    walk.truncated = true;
                    break;
                }
            };

            let Some(records) = extract_records(&document, &self.api.entity) else {
                debug!(
                    chunk_number = chunk.chunk_number,
                    page_number,
                    "No {} records in response, chunk exhausted",
                    self.api.entity
                );
                break;
            };

            let record_count = records.len();
            let paginated = paginated_query(&query, start_position, page_size);
            let provenance = PageProvenance {
                ingested_at_utc: ingested_at,
                extract_window_start_utc: window_start,
                extract_window_end_utc: window_end,
                page_number,
                page_size: record_count as u32,
                request_payload: self.api.request_snapshot(&query, &paginated),
            };

            for record in records {
                match Row::from_record(record, &provenance) {
                    Some(row) => walk.rows.push(row),
                    None => warn!(
                        chunk_number = chunk.chunk_number,
                        page_number,
                        "Skipping {} record without Id",
                        self.api.entity
                    ),
                }
            }

            walk.pages += 1;
            walk.records += record_count;

            info!(
                chunk_number = chunk.chunk_number,
                page_number,
                records = record_count,
                total_rows = walk.rows.len(),
                duration_secs = page_started.elapsed().as_secs_f64(),
                "Page fetched"
            );

            if record_count < page_size as usize {
                break;
            }

            start_position += page_size;
            page_number += 1;
        }

        debug!(
            chunk_number = chunk.chunk_number,
            pages = walk.pages,
            rows = walk.rows.len(),
            "Pagination completed"
        );

        Ok(walk)
    }
}

/// Entity array of a query response, `None` when the response holds no such array
pub fn extract_records<'a>(document: &'a Value, entity: &str) -> Option<&'a Vec<Value>> {
    document.get("QueryResponse")?.get(entity)?.as_array()
}
