//! Ingest command implementation

use crate::auth::{OAuthCredentials, TokenManager};
use crate::export::{ExportSummary, UpsertExporter, DEFAULT_TABLE};
use crate::fetcher::api_config::{ApiConfig, ApiDefaults, PRODUCTION_CONFIG, SANDBOX_CONFIG};
use crate::fetcher::circuit_breaker::CircuitBreaker;
use crate::fetcher::http::HttpQueryTransport;
use crate::fetcher::pagination::PaginationWalker;
use crate::fetcher::resilient::ResilientFetcher;
use crate::fetcher::shared_resources::global_http_client;
use crate::ingest::config::{DEFAULT_CHUNK_DAYS, MAX_ATTEMPTS};
use crate::ingest::{IngestExecutor, IngestParams, IngestReport};
use crate::Row;
use clap::{Args, Parser, Subcommand};
use serde_json::json;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;

use super::{CliError, PlanArgs};

/// Resilient backfill CLI
#[derive(Parser, Debug)]
#[command(name = "resilient-backfill")]
#[command(about = "Chunked, resumable backfill of a paginated OAuth query API into SQLite", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Output format (json or human)
    #[arg(long, global = true, default_value = "human")]
    pub output_format: OutputFormat,

    /// Attempts per page request (default: 5, range: 1-20)
    #[arg(long, global = true, default_value_t = MAX_ATTEMPTS, value_parser = clap::value_parser!(u32).range(1..=20))]
    pub max_attempts: u32,
}

/// CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Ingest a date range and upsert it into SQLite
    Ingest(IngestArgs),

    /// Print the chunk plan for a date range without making requests
    Plan(PlanArgs),
}

/// Date range and chunk selection shared by `ingest` and `plan`
#[derive(Args, Debug, Clone)]
pub struct RangeArgs {
    /// Range start (YYYY-MM-DD)
    #[arg(long = "fecha-inicio", visible_alias = "start")]
    pub fecha_inicio: Option<String>,

    /// Range end (YYYY-MM-DD), inclusive
    #[arg(long = "fecha-fin", visible_alias = "end")]
    pub fecha_fin: Option<String>,

    /// Days per chunk
    #[arg(long, default_value_t = DEFAULT_CHUNK_DAYS)]
    pub chunk_days: u32,

    /// Chunk numbers to skip (comma separated)
    #[arg(long, value_delimiter = ',')]
    pub skip_chunks: Vec<u32>,

    /// Chunk numbers to process regardless of other controls (comma separated)
    #[arg(long, value_delimiter = ',')]
    pub force_chunks: Vec<u32>,

    /// Log the per-chunk plan of a resumed run
    #[arg(long, default_value_t = false)]
    pub resume_mode: bool,
}

impl RangeArgs {
    /// Parameters with the range and selection controls filled in
    pub fn to_params(&self) -> IngestParams {
        IngestParams {
            fecha_inicio: self.fecha_inicio.clone(),
            fecha_fin: self.fecha_fin.clone(),
            chunk_days: self.chunk_days,
            resume_mode: self.resume_mode,
            skip_chunks: self.skip_chunks.clone(),
            force_chunks: self.force_chunks.clone(),
            ..IngestParams::default()
        }
    }
}

/// Ingest command arguments
#[derive(Args, Debug)]
pub struct IngestArgs {
    /// Date range and selection
    #[command(flatten)]
    pub range: RangeArgs,

    /// Walk failed chunks once more after the main pass
    #[arg(long, default_value_t = false)]
    pub retry_failed_chunks: bool,

    /// Plan and report without making requests
    #[arg(long, default_value_t = false)]
    pub verify_only: bool,

    /// Abort on the first chunk failure
    #[arg(long, default_value_t = false)]
    pub fail_fast: bool,

    /// Company (realm) id
    #[arg(long, env = "QB_REALM_ID")]
    pub realm_id: Option<String>,

    /// Initial access token
    #[arg(long, env = "QB_ACCESS_TOKEN", default_value = "", hide_env_values = true)]
    pub access_token: String,

    /// OAuth refresh token
    #[arg(long, env = "QB_REFRESH_TOKEN", default_value = "", hide_env_values = true)]
    pub refresh_token: String,

    /// OAuth client id
    #[arg(long, env = "QB_CLIENT_ID", default_value = "")]
    pub client_id: String,

    /// OAuth client secret
    #[arg(long, env = "QB_CLIENT_SECRET", default_value = "", hide_env_values = true)]
    pub client_secret: String,

    /// Target the production API instead of the sandbox
    #[arg(long, default_value_t = false)]
    pub production: bool,

    /// API base URL (defaults to the sandbox or production endpoint)
    #[arg(long, env = "QB_BASE_URL")]
    pub base_url: Option<String>,

    /// OAuth token endpoint
    #[arg(long, env = "QB_TOKEN_URL")]
    pub token_url: Option<String>,

    /// `minorversion` query parameter
    #[arg(long, default_value_t = SANDBOX_CONFIG.minor_version)]
    pub minor_version: u32,

    /// Entity to query
    #[arg(long, default_value = SANDBOX_CONFIG.entity)]
    pub entity: String,

    /// Records per page
    #[arg(long, default_value_t = SANDBOX_CONFIG.page_size)]
    pub page_size: u32,

    /// Destination SQLite database
    #[arg(long, default_value = "backfill.db")]
    pub database: PathBuf,

    /// Destination table
    #[arg(long, default_value = DEFAULT_TABLE)]
    pub table: String,
}

impl IngestArgs {
    /// Run parameters from the flags
    pub fn to_params(&self) -> IngestParams {
        IngestParams {
            retry_failed_chunks: self.retry_failed_chunks,
            verify_only: self.verify_only,
            fail_fast: self.fail_fast,
            ..self.range.to_params()
        }
    }

    /// Environment defaults selected by `--production`
    pub fn api_defaults(&self) -> &'static ApiDefaults {
        if self.production {
            &PRODUCTION_CONFIG
        } else {
            &SANDBOX_CONFIG
        }
    }

    /// API configuration from the flags
    pub fn api_config(&self) -> ApiConfig {
        let defaults = self.api_defaults();
        let base_url = self
            .base_url
            .clone()
            .unwrap_or_else(|| defaults.base_url.to_string());

        ApiConfig::from_defaults(defaults, self.realm_id.clone().unwrap_or_default())
            .with_base_url(base_url)
            .with_entity(self.entity.clone())
            .with_page_size(self.page_size)
            .with_minor_version(self.minor_version)
    }

    /// Token endpoint from the flags or the environment defaults
    pub fn token_url(&self) -> String {
        self.token_url
            .clone()
            .unwrap_or_else(|| self.api_defaults().token_url.to_string())
    }

    fn credentials(&self) -> OAuthCredentials {
        OAuthCredentials {
            client_id: self.client_id.clone(),
            client_secret: self.client_secret.clone(),
            refresh_token: self.refresh_token.clone(),
        }
    }

    /// Whether refresh-token credentials are complete
    pub fn can_refresh(&self) -> bool {
        !self.refresh_token.is_empty() && !self.client_id.is_empty() && !self.client_secret.is_empty()
    }

    fn validate_config(&self) -> Result<(), CliError> {
        self.api_config()
            .validate()
            .map_err(CliError::ConfigurationError)?;

        if self.access_token.is_empty() && !self.can_refresh() {
            return Err(CliError::ConfigurationError(
                "either --access-token or --refresh-token, --client-id and --client-secret are required"
                    .to_string(),
            ));
        }

        crate::export::validate_table_name(&self.table)?;
        Ok(())
    }

    /// Execute the ingest command
    pub async fn execute(&self, cli: &Cli) -> Result<(), CliError> {
        let params = self.to_params();
        params.validate()?;

        if !params.verify_only {
            self.validate_config()?;
        }

        let api = self.api_config();
        let client = global_http_client();
        let tokens = Arc::new(TokenManager::new(
            client.clone(),
            self.token_url(),
            self.credentials(),
            self.access_token.clone(),
        ));
        let transport = Arc::new(HttpQueryTransport::new(client, api.clone()));
        let fetcher = ResilientFetcher::new(transport, tokens.clone(), CircuitBreaker::shared())
            .with_max_attempts(cli.max_attempts);
        let walker = PaginationWalker::new(Arc::new(fetcher), api);

        let mut executor = IngestExecutor::new(walker);
        if self.can_refresh() {
            executor = executor.with_token_refresher(tokens);
        }

        let mut report = executor.run(&params).await?;

        let summary = if report.verify_only {
            None
        } else {
            let rows = std::mem::take(&mut report.rows);
            Some(export_rows(self.database.clone(), self.table.clone(), rows).await?)
        };

        match cli.output_format {
            OutputFormat::Json => output_json(&report, summary.as_ref()),
            OutputFormat::Human => output_human(&report, summary.as_ref()),
        }

        let failed_chunks = report.progress.failed_chunks.len();
        let errored_rows = summary.map_or(0, |s| s.errored);
        if failed_chunks > 0 || errored_rows > 0 {
            return Err(CliError::PartialFailure {
                failed_chunks,
                errored_rows,
            });
        }

        Ok(())
    }
}

/// Run the synchronous exporter off the async runtime
async fn export_rows(
    database: PathBuf,
    table: String,
    rows: Vec<Row>,
) -> Result<ExportSummary, CliError> {
    info!(database = %database.display(), table = %table, rows = rows.len(), "Handing rows to exporter");

    let summary = tokio::task::spawn_blocking(move || {
        let exporter = UpsertExporter::open(&database, table)?;
        exporter.export(&rows)
    })
    .await
    .map_err(|e| CliError::ConfigurationError(format!("export task failed: {e}")))??;

    Ok(summary)
}

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// JSON output
    Json,
    /// Human-readable output
    Human,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(OutputFormat::Json),
            "human" => Ok(OutputFormat::Human),
            _ => Err(format!("Invalid output format: {s}")),
        }
    }
}

fn output_json(report: &IngestReport, summary: Option<&ExportSummary>) {
    let progress = &report.progress;
    let output = json!({
        "success": !report.has_failures() && summary.map_or(true, |s| s.errored == 0),
        "run_id": report.run_id,
        "verify_only": report.verify_only,
        "planned_chunks": report.plan.len(),
        "selected_chunks": report.selection.eligible.len(),
        "completed_chunks": progress.completed_chunks,
        "failed_chunks": progress.failed_chunks,
        "skipped_chunks": progress.skipped_chunks,
        "forced_chunks": progress.forced_chunks,
        "pages": progress.total_pages,
        "raw_rows": report.raw_rows,
        "duplicates_removed": report.duplicates_removed,
        "aborted_at_chunk": report.aborted_at_chunk,
        "export": summary,
    });

    println!("{output}");
}

fn output_human(report: &IngestReport, summary: Option<&ExportSummary>) {
    let progress = &report.progress;

    if report.verify_only {
        println!("\nVerify-only run {}", report.run_id);
        println!(
            "Chunks planned: {}, would process: {}, skipped: {}",
            report.plan.len(),
            report.selection.eligible.len(),
            report.selection.skipped.len()
        );
        return;
    }

    println!("\nIngestion run {}", report.run_id);
    println!(
        "Chunks: {} completed, {} failed, {} skipped (of {} planned)",
        progress.completed_chunks.len(),
        progress.failed_chunks.len(),
        progress.skipped_chunks.len(),
        report.plan.len()
    );
    println!(
        "Rows: {} fetched in {} pages, {} duplicates removed",
        report.raw_rows, progress.total_pages, report.duplicates_removed
    );
    if let Some(chunk_number) = report.aborted_at_chunk {
        println!("Run aborted after chunk {chunk_number} failed (--fail-fast)");
    }

    if let Some(summary) = summary {
        println!(
            "Export: {} inserted, {} updated, {} failed",
            summary.inserted, summary.updated, summary.errored
        );
        if let Some(total) = summary.table_total {
            println!("Table rows: {total}");
        }
    }

    for failed in &progress.failed_chunks {
        println!(
            "  FAILED chunk {} ({}): {}",
            failed.chunk_number, failed.date_range, failed.error
        );
    }
}
