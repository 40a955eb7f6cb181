//! SQLite upsert exporter

use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use tracing::{debug, error, info, warn};

use super::{validate_table_name, ExportError, ExportResult, ExportSummary};
use crate::ingest::config::EXPORT_PROGRESS_INTERVAL;
use crate::Row;

/// Writes rows into one SQLite table with `INSERT ... ON CONFLICT(id) DO UPDATE`
///
/// Each row is its own implicit transaction, so a failing row never takes the
/// rest of the batch with it.
pub struct UpsertExporter {
    conn: Connection,
    table: String,
}

impl UpsertExporter {
    /// Open (or create) the database at `path`
    ///
    /// # Errors
    /// Returns [`ExportError`] if the table name is invalid or the file cannot be opened
    pub fn open(path: impl AsRef<Path>, table: impl Into<String>) -> ExportResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        debug!(path = %path.display(), "Opened destination database");
        Self::from_connection(conn, table)
    }

    /// Exporter over an in-memory database
    pub fn in_memory(table: impl Into<String>) -> ExportResult<Self> {
        Self::from_connection(Connection::open_in_memory()?, table)
    }

    /// Exporter over an existing connection
    pub fn from_connection(conn: Connection, table: impl Into<String>) -> ExportResult<Self> {
        let table = table.into();
        validate_table_name(&table)?;
        Ok(Self { conn, table })
    }

    /// Destination table
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Underlying connection
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Whether the destination table exists
    pub fn table_exists(&self) -> ExportResult<bool> {
        let found: Option<String> = self
            .conn
            .query_row(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?1",
                [&self.table],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Create the destination table if absent; returns whether it was created
    pub fn ensure_table(&self) -> ExportResult<bool> {
        if self.table_exists()? {
            return Ok(false);
        }

        self.conn.execute_batch(&format!(
            "CREATE TABLE {} (
                id TEXT PRIMARY KEY,
                payload TEXT,
                ingested_at_utc TEXT,
                extract_window_start_utc TEXT,
                extract_window_end_utc TEXT,
                page_number INTEGER,
                page_size INTEGER,
                request_payload TEXT
            )",
            self.table
        ))?;

        info!(table = %self.table, "Created destination table");
        Ok(true)
    }

    /// Rows currently in the table
    pub fn count_rows(&self) -> ExportResult<u64> {
        let count: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", self.table),
            [],
            |row| row.get(0),
        )?;
        Ok(u64::try_from(count).unwrap_or_default())
    }

    /// Upsert every row, isolating per-row failures
    ///
    /// # Errors
    /// Returns [`ExportError`] only when the table cannot be prepared; row failures
    /// are counted in [`ExportSummary::errored`]
    pub fn export(&self, rows: &[Row]) -> ExportResult<ExportSummary> {
        if rows.is_empty() {
            info!(table = %self.table, "No rows to export");
            return Ok(ExportSummary::default());
        }

        self.ensure_table()?;

        let total = rows.len();
        let mut summary = ExportSummary::default();
        info!(table = %self.table, rows = total, "Exporting rows");

        for row in rows {
            summary.processed += 1;

            match self.upsert_row(row) {
                Ok(true) => summary.updated += 1,
                Ok(false) => summary.inserted += 1,
                Err(e) => {
                    error!(id = %row.id, error = %e, "Failed to upsert row");
                    self.rollback_if_needed();
                    summary.errored += 1;
                }
            }

            if summary.processed % EXPORT_PROGRESS_INTERVAL == 0 {
                info!(
                    processed = summary.processed,
                    total,
                    inserted = summary.inserted,
                    updated = summary.updated,
                    errored = summary.errored,
                    "Export progress"
                );
            }
        }

        summary.table_total = match self.count_rows() {
            Ok(count) => Some(count),
            Err(e) => {
                warn!(error = %e, "Could not count destination rows");
                None
            }
        };

        info!(
            table = %self.table,
            processed = summary.processed,
            inserted = summary.inserted,
            updated = summary.updated,
            errored = summary.errored,
            table_total = ?summary.table_total,
            "Export finished"
        );

        Ok(summary)
    }

    /// Upsert one row; returns whether the id already existed
    fn upsert_row(&self, row: &Row) -> ExportResult<bool> {
        row.validate().map_err(ExportError::Serialization)?;

        let payload = serde_json::to_string(&row.payload)
            .map_err(|e| ExportError::Serialization(e.to_string()))?;
        let request_payload = serde_json::to_string(&row.request_payload)
            .map_err(|e| ExportError::Serialization(e.to_string()))?;

        let existed: bool = self.conn.query_row(
            &format!("SELECT EXISTS(SELECT 1 FROM {} WHERE id = ?1)", self.table),
            [&row.id],
            |r| r.get(0),
        )?;

        let mut stmt = self.conn.prepare_cached(&format!(
            "INSERT INTO {} (
                id, payload, ingested_at_utc, extract_window_start_utc,
                extract_window_end_utc, page_number, page_size, request_payload
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT (id) DO UPDATE SET
                payload = excluded.payload,
                ingested_at_utc = excluded.ingested_at_utc,
                extract_window_start_utc = excluded.extract_window_start_utc,
                extract_window_end_utc = excluded.extract_window_end_utc,
                page_number = excluded.page_number,
                page_size = excluded.page_size,
                request_payload = excluded.request_payload",
            self.table
        ))?;

        stmt.execute(params![
            row.id,
            payload,
            row.ingested_at_utc.to_rfc3339(),
            row.extract_window_start_utc.to_rfc3339(),
            row.extract_window_end_utc.to_rfc3339(),
            row.page_number,
            row.page_size,
            request_payload,
        ])?;

        Ok(existed)
    }

    fn rollback_if_needed(&self) {
        if self.conn.is_autocommit() {
            return;
        }

        match self.conn.execute_batch("ROLLBACK") {
            Ok(()) => warn!("Rolled back open transaction after row failure"),
            Err(e) => error!(error = %e, "Rollback failed"),
        }
    }
}
