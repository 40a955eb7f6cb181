//! Binary-level tests for the `plan` and `ingest` commands

use assert_cmd::Command;
use serde_json::{json, Value};
use tempfile::TempDir;

use crate::common::{customers_page, StubResponse, StubServer};

const QB_ENV: [&str; 7] = [
    "QB_REALM_ID",
    "QB_ACCESS_TOKEN",
    "QB_REFRESH_TOKEN",
    "QB_CLIENT_ID",
    "QB_CLIENT_SECRET",
    "QB_BASE_URL",
    "QB_TOKEN_URL",
];

fn backfill() -> Command {
    let mut cmd = Command::cargo_bin("resilient-backfill").unwrap();
    for var in QB_ENV {
        cmd.env_remove(var);
    }
    cmd.env("RUST_LOG", "resilient_backfill=warn");
    cmd
}

fn stdout_json(output: &std::process::Output) -> Value {
    serde_json::from_slice(&output.stdout).unwrap()
}

#[test]
fn test_plan_json_output() {
    let output = backfill()
        .args([
            "plan",
            "--start",
            "2024-01-01",
            "--end",
            "2024-01-10",
            "--skip-chunks",
            "2",
            "--output-format",
            "json",
        ])
        .assert()
        .success()
        .get_output()
        .clone();

    let plan = stdout_json(&output);
    assert_eq!(plan["planned_chunks"], 2);
    assert_eq!(plan["would_process"], 1);
    assert_eq!(plan["skipped"], json!([2]));
    assert_eq!(plan["chunks"][0]["start_date"], "2024-01-01");
    assert_eq!(plan["chunks"][0]["end_date"], "2024-01-07");
    assert_eq!(plan["chunks"][0]["state"], "process");
    assert_eq!(plan["chunks"][1]["days"], 3);
    assert_eq!(plan["chunks"][1]["state"], "skip");
}

#[test]
fn test_plan_human_output() {
    let output = backfill()
        .args(["plan", "--fecha-inicio", "2024-01-01", "--fecha-fin", "2024-01-14"])
        .assert()
        .success()
        .get_output()
        .clone();

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("2 planned"), "stdout was: {stdout}");
    assert!(stdout.contains("2024-01-08 to 2024-01-14"));
}

#[test]
fn test_plan_rejects_reversed_range() {
    backfill()
        .args(["plan", "--start", "2024-02-01", "--end", "2024-01-01"])
        .assert()
        .failure();
}

#[test]
fn test_ingest_verify_only_needs_no_credentials() {
    let dir = TempDir::new().unwrap();
    let database = dir.path().join("backfill.db");

    let output = backfill()
        .args([
            "ingest",
            "--start",
            "2024-01-01",
            "--end",
            "2024-01-31",
            "--verify-only",
            "--output-format",
            "json",
            "--database",
            database.to_str().unwrap(),
        ])
        .assert()
        .success()
        .get_output()
        .clone();

    let report = stdout_json(&output);
    assert_eq!(report["verify_only"], true);
    assert_eq!(report["planned_chunks"], 5);
    assert_eq!(report["export"], Value::Null);
    assert!(!database.exists());
}

#[test]
fn test_ingest_without_credentials_fails() {
    backfill()
        .args([
            "ingest",
            "--start",
            "2024-01-01",
            "--end",
            "2024-01-02",
            "--realm-id",
            "4620816365",
        ])
        .assert()
        .failure();
}

#[test]
fn test_ingest_without_realm_fails() {
    backfill()
        .args([
            "ingest",
            "--start",
            "2024-01-01",
            "--end",
            "2024-01-02",
            "--access-token",
            "token",
        ])
        .assert()
        .failure();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_ingest_exports_into_sqlite() {
    let server = StubServer::start(vec![StubResponse::json(200, customers_page(1, 2))]).await;
    let dir = TempDir::new().unwrap();
    let database = dir.path().join("backfill.db");
    let base_url = server.url();
    let db_arg = database.to_str().unwrap().to_string();

    let output = tokio::task::spawn_blocking(move || {
        backfill()
            .args([
                "ingest",
                "--start",
                "2024-01-01",
                "--end",
                "2024-01-01",
                "--realm-id",
                "4620816365",
                "--access-token",
                "token",
                "--base-url",
                base_url.as_str(),
                "--database",
                db_arg.as_str(),
                "--output-format",
                "json",
            ])
            .output()
            .unwrap()
    })
    .await
    .unwrap();

    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let report = stdout_json(&output);
    assert_eq!(report["success"], true);
    assert_eq!(report["export"]["inserted"], 2);
    assert_eq!(report["export"]["table_total"], 2);

    let conn = rusqlite::Connection::open(&database).unwrap();
    let count: i64 = conn
        .query_row("SELECT COUNT(*) FROM qb_customer", [], |row| row.get(0))
        .unwrap();
    assert_eq!(count, 2);
    assert_eq!(
        server.requests()[0].header("authorization"),
        Some("Bearer token")
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_ingest_failed_chunk_exits_nonzero() {
    let server =
        StubServer::start(vec![StubResponse::json(400, json!({"Fault": "bad query"}))]).await;
    let dir = TempDir::new().unwrap();
    let db_arg = dir.path().join("backfill.db").to_str().unwrap().to_string();
    let base_url = server.url();

    let output = tokio::task::spawn_blocking(move || {
        backfill()
            .args([
                "--max-attempts",
                "1",
                "ingest",
                "--start",
                "2024-01-01",
                "--end",
                "2024-01-01",
                "--realm-id",
                "4620816365",
                "--access-token",
                "token",
                "--base-url",
                base_url.as_str(),
                "--database",
                db_arg.as_str(),
                "--output-format",
                "json",
            ])
            .output()
            .unwrap()
    })
    .await
    .unwrap();

    assert!(!output.status.success());
    let report = stdout_json(&output);
    assert_eq!(report["success"], false);
    assert_eq!(report["failed_chunks"][0]["chunk_number"], 1);
    assert_eq!(server.requests().len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_ingest_fail_fast_reports_aborted_chunk() {
    let server = StubServer::start(vec![
        StubResponse::json(200, customers_page(1, 1)),
        StubResponse::json(400, json!({"Fault": "bad query"})),
        StubResponse::json(200, customers_page(5, 1)),
    ])
    .await;
    let dir = TempDir::new().unwrap();
    let database = dir.path().join("backfill.db");
    let db_arg = database.to_str().unwrap().to_string();
    let base_url = server.url();

    let output = tokio::task::spawn_blocking(move || {
        backfill()
            .args([
                "--max-attempts",
                "1",
                "ingest",
                "--start",
                "2024-01-01",
                "--end",
                "2024-01-03",
                "--chunk-days",
                "1",
                "--fail-fast",
                "--realm-id",
                "4620816365",
                "--access-token",
                "token",
                "--base-url",
                base_url.as_str(),
                "--database",
                db_arg.as_str(),
                "--output-format",
                "json",
            ])
            .output()
            .unwrap()
    })
    .await
    .unwrap();

    assert!(!output.status.success());
    let report = stdout_json(&output);
    assert_eq!(report["success"], false);
    assert_eq!(report["aborted_at_chunk"], 2);
    assert_eq!(report["completed_chunks"], json!([1]));
    assert_eq!(report["export"]["inserted"], 1);
    assert_eq!(server.requests().len(), 2);

    let conn = rusqlite::Connection::open(&database).unwrap();
    let count: i64 = conn
        .query_row("SELECT COUNT(*) FROM qb_customer", [], |row| row.get(0))
        .unwrap();
    assert_eq!(count, 1);
}
