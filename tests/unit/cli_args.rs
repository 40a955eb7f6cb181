//! Unit tests for command line parsing

use clap::Parser;
use resilient_backfill::cli::{Cli, Commands, OutputFormat};
use resilient_backfill::fetcher::api_config::{PRODUCTION_CONFIG, SANDBOX_CONFIG};

fn parse(args: &[&str]) -> Cli {
    Cli::try_parse_from(std::iter::once("resilient-backfill").chain(args.iter().copied()))
        .unwrap()
}

#[test]
fn test_ingest_defaults() {
    let cli = parse(&["ingest", "--fecha-inicio", "2024-01-01", "--fecha-fin", "2024-01-31"]);

    assert_eq!(cli.max_attempts, 5);
    assert_eq!(cli.output_format, OutputFormat::Human);

    let Commands::Ingest(args) = cli.command else {
        panic!("expected ingest command");
    };
    assert_eq!(args.range.chunk_days, 7);
    assert!(args.range.skip_chunks.is_empty());
    assert!(!args.verify_only);
    assert_eq!(args.entity, "Customer");
    assert_eq!(args.page_size, 100);
    assert_eq!(args.minor_version, 75);
    assert_eq!(args.table, "qb_customer");
    assert_eq!(args.database.to_str(), Some("backfill.db"));
}

#[test]
fn test_ingest_flags_map_to_params() {
    let cli = parse(&[
        "ingest",
        "--start",
        "2024-01-01",
        "--end",
        "2024-02-29",
        "--chunk-days",
        "14",
        "--skip-chunks",
        "1,2",
        "--force-chunks",
        "4",
        "--retry-failed-chunks",
        "--fail-fast",
        "--resume-mode",
    ]);

    let Commands::Ingest(args) = cli.command else {
        panic!("expected ingest command");
    };
    let params = args.to_params();

    assert_eq!(params.fecha_inicio.as_deref(), Some("2024-01-01"));
    assert_eq!(params.fecha_fin.as_deref(), Some("2024-02-29"));
    assert_eq!(params.chunk_days, 14);
    assert_eq!(params.skip_chunks, vec![1, 2]);
    assert_eq!(params.force_chunks, vec![4]);
    assert!(params.retry_failed_chunks);
    assert!(params.fail_fast);
    assert!(params.resume_mode);
    assert!(!params.verify_only);
}

#[test]
fn test_global_flags_after_subcommand() {
    let cli = parse(&[
        "plan",
        "--start",
        "2024-01-01",
        "--end",
        "2024-01-10",
        "--output-format",
        "json",
        "--max-attempts",
        "3",
    ]);

    assert_eq!(cli.output_format, OutputFormat::Json);
    assert_eq!(cli.max_attempts, 3);

    let Commands::Plan(args) = cli.command else {
        panic!("expected plan command");
    };
    assert!(args.to_params().verify_only);
}

#[test]
fn test_max_attempts_out_of_range_rejected() {
    for value in ["0", "21"] {
        let result = Cli::try_parse_from([
            "resilient-backfill",
            "--max-attempts",
            value,
            "plan",
            "--start",
            "2024-01-01",
            "--end",
            "2024-01-02",
        ]);
        assert!(result.is_err(), "max-attempts {value} should be rejected");
    }
}

#[test]
fn test_invalid_output_format_rejected() {
    let result = Cli::try_parse_from([
        "resilient-backfill",
        "--output-format",
        "xml",
        "plan",
        "--start",
        "2024-01-01",
        "--end",
        "2024-01-02",
    ]);
    assert!(result.is_err());
}

#[test]
fn test_api_config_from_flags() {
    let cli = parse(&[
        "ingest",
        "--start",
        "2024-01-01",
        "--end",
        "2024-01-02",
        "--realm-id",
        "4620816365",
        "--base-url",
        "http://127.0.0.1:9000/",
        "--entity",
        "Invoice",
        "--page-size",
        "500",
    ]);

    let Commands::Ingest(args) = cli.command else {
        panic!("expected ingest command");
    };
    let api = args.api_config();

    assert_eq!(api.query_url(), "http://127.0.0.1:9000/v3/company/4620816365/query");
    assert_eq!(api.entity, "Invoice");
    assert_eq!(api.page_size, 500);
}

#[test]
fn test_production_flag_selects_production_endpoints() {
    if std::env::var("QB_BASE_URL").is_ok() || std::env::var("QB_TOKEN_URL").is_ok() {
        return;
    }
    let cli = parse(&["ingest", "--realm-id", "42", "--production"]);
    let Commands::Ingest(args) = cli.command else {
        panic!("expected ingest command");
    };
    assert_eq!(
        args.api_config().query_url(),
        "https://quickbooks.api.intuit.com/v3/company/42/query"
    );
    assert_eq!(args.token_url(), PRODUCTION_CONFIG.token_url);

    let cli = parse(&["ingest", "--realm-id", "42"]);
    let Commands::Ingest(args) = cli.command else {
        panic!("expected ingest command");
    };
    assert_eq!(
        args.api_config().query_url(),
        format!("{}/v3/company/42/query", SANDBOX_CONFIG.base_url)
    );
}

#[test]
fn test_explicit_base_url_overrides_production() {
    let cli = parse(&[
        "ingest",
        "--realm-id",
        "42",
        "--production",
        "--base-url",
        "http://127.0.0.1:9000",
        "--token-url",
        "http://127.0.0.1:9000/token",
    ]);
    let Commands::Ingest(args) = cli.command else {
        panic!("expected ingest command");
    };
    assert_eq!(args.api_config().query_url(), "http://127.0.0.1:9000/v3/company/42/query");
    assert_eq!(args.token_url(), "http://127.0.0.1:9000/token");
}

#[test]
fn test_can_refresh_needs_all_three_values() {
    let cli = parse(&[
        "ingest",
        "--refresh-token",
        "rt",
        "--client-id",
        "id",
        "--client-secret",
        "secret",
    ]);
    let Commands::Ingest(args) = cli.command else {
        panic!("expected ingest command");
    };
    assert!(args.can_refresh());

    let cli = parse(&["ingest", "--refresh-token", "rt", "--client-id", "id"]);
    let Commands::Ingest(args) = cli.command else {
        panic!("expected ingest command");
    };
    if std::env::var("QB_CLIENT_SECRET").is_err() {
        assert!(!args.can_refresh());
    }
}
