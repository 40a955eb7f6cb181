//! CLI error types and conversions

use crate::export::ExportError;
use crate::ingest::IngestError;

/// CLI errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Ingestion error
    #[error("ingest error: {0}")]
    IngestError(#[from] IngestError),

    /// Export error
    #[error("export error: {0}")]
    ExportError(#[from] ExportError),

    /// Configuration error
    #[error("configuration error: {0}")]
    ConfigurationError(String),

    /// Run finished but some chunks or rows failed
    #[error("run finished with {failed_chunks} failed chunk(s) and {errored_rows} failed row write(s)")]
    PartialFailure {
        /// Chunks left failed
        failed_chunks: usize,
        /// Rows the exporter could not write
        errored_rows: usize,
    },
}
