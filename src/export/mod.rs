//! Idempotent row export
//!
//! Rows are merged into a destination table keyed by `id`: new ids are inserted,
//! known ids have every other column overwritten. Re-running a backfill over the
//! same range therefore never duplicates records.

use serde::Serialize;

pub mod sqlite;

pub use sqlite::UpsertExporter;

/// Default destination table
pub const DEFAULT_TABLE: &str = "qb_customer";

/// Exporter errors
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    /// SQLite error outside the per-row isolation (opening, schema, counting)
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Table name is not a plain identifier
    #[error("invalid table name: '{0}'")]
    InvalidTable(String),

    /// Database file or its directory could not be created
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Row could not be serialized for storage
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Result type for export operations
pub type ExportResult<T> = Result<T, ExportError>;

/// Counts from one export
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExportSummary {
    /// Rows attempted
    pub processed: usize,
    /// Rows whose id was new
    pub inserted: usize,
    /// Rows whose id already existed
    pub updated: usize,
    /// Rows that could not be written
    pub errored: usize,
    /// Rows in the table after the export
    pub table_total: Option<u64>,
}

/// Validate a table name as a plain SQL identifier (`[A-Za-z_][A-Za-z0-9_]*`)
pub fn validate_table_name(table: &str) -> ExportResult<()> {
    let mut chars = table.chars();
    let valid = match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };

    if valid {
        Ok(())
    } else {
        Err(ExportError::InvalidTable(table.to_string()))
    }
}
