//! CLI command implementations

pub mod error;
pub mod ingest;
pub mod plan;

pub use error::CliError;
pub use ingest::{Cli, Commands, IngestArgs, OutputFormat, RangeArgs};
pub use plan::PlanArgs;
