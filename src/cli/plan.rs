//! Plan subcommand: print the chunk plan without touching the API

use crate::ingest::{ChunkPlanner, IngestParams};
use clap::Args;
use serde_json::json;

use super::{Cli, CliError, OutputFormat, RangeArgs};

/// Plan command arguments
#[derive(Args, Debug)]
pub struct PlanArgs {
    /// Date range and selection
    #[command(flatten)]
    pub range: RangeArgs,
}

impl PlanArgs {
    /// Dry-run parameters for the range
    pub fn to_params(&self) -> IngestParams {
        self.range.to_params().with_verify_only(true)
    }

    /// Execute the plan command
    pub async fn execute(&self, cli: &Cli) -> Result<(), CliError> {
        let params = self.to_params();
        let (start, end) = params.validate()?;
        let plan = ChunkPlanner::plan(start, end, params.chunk_days)?;
        let selection = ChunkPlanner::select(&plan, &params.selection());

        let state = |number: u32| {
            if selection.skipped.contains(&number) {
                "skip"
            } else if selection.forced.contains(&number) {
                "force"
            } else {
                "process"
            }
        };

        match cli.output_format {
            OutputFormat::Json => {
                let chunks: Vec<_> = plan
                    .iter()
                    .map(|c| {
                        json!({
                            "chunk_number": c.chunk_number,
                            "start_date": c.start_date_str(),
                            "end_date": c.end_date_str(),
                            "days": c.days(),
                            "state": state(c.chunk_number),
                        })
                    })
                    .collect();
                let output = json!({
                    "start_date": start.to_string(),
                    "end_date": end.to_string(),
                    "chunk_days": params.chunk_days,
                    "planned_chunks": plan.len(),
                    "would_process": selection.eligible.len(),
                    "skipped": selection.skipped,
                    "forced": selection.forced,
                    "chunks": chunks,
                });
                println!("{output}");
            }
            OutputFormat::Human => {
                println!(
                    "Plan {} to {} in {}-day chunks: {} planned, {} to process",
                    start,
                    end,
                    params.chunk_days,
                    plan.len(),
                    selection.eligible.len()
                );
                for chunk in &plan {
                    println!(
                        "  #{:<4} {} ({} days) {}",
                        chunk.chunk_number,
                        chunk.date_range(),
                        chunk.days(),
                        state(chunk.chunk_number)
                    );
                }
            }
        }

        Ok(())
    }
}
