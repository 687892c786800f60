#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::path::Path;

use assert_cmd::Command;
use serde_json::{json, Value};
use tempfile::tempdir;

#[path = "util.rs"]
mod util;

use util::{branch_bundle, write_bundle};

fn ledgerload(db: &Path, data_dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("ledgerload").unwrap();
    for var in [
        "LEDGERLOAD_DB",
        "LEDGERLOAD_DATA_DIR",
        "LEDGERLOAD_REMOTE_URL",
        "LEDGERLOAD_SYNC",
        "LEDGERLOAD_REPORTS_DIR",
        "LEDGERLOAD_LOG_DIR",
    ] {
        cmd.env_remove(var);
    }
    cmd.env("LEDGERLOAD_LOG", "off")
        .arg("--db")
        .arg(db)
        .arg("--data-dir")
        .arg(data_dir);
    cmd
}

fn stdout_json(output: &std::process::Output) -> Value {
    serde_json::from_slice(&output.stdout).unwrap()
}

#[test]
fn import_then_list_ledger() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("db/ledgerload.sqlite3");
    let data = dir.path().join("data");
    write_bundle(&data, "seed.json", branch_bundle("seed", &[], 1));

    let output = ledgerload(&db, &data)
        .args(["import", "--json"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(0));
    let summary = stdout_json(&output);
    assert_eq!(summary["appliedCount"], json!(1));
    assert_eq!(summary["failures"], json!([]));

    let output = ledgerload(&db, &data)
        .args(["import", "--json"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(0));
    assert_eq!(stdout_json(&output)["skipped"], json!(["seed"]));

    let output = ledgerload(&db, &data)
        .args(["ledger", "--json"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(0));
    let entries = stdout_json(&output);
    assert_eq!(entries[0]["name"], json!("seed"));
    assert_eq!(entries[0]["source"], json!("LOCAL"));
    assert!(!String::from_utf8_lossy(&output.stdout).contains("seed.json"));
}

#[test]
fn partial_failure_exits_with_two_and_writes_report() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("ledgerload.sqlite3");
    let data = dir.path().join("data");
    let reports = dir.path().join("reports");
    write_bundle(&data, "ok.json", branch_bundle("ok", &[], 1));
    write_bundle(&data, "bad.json", json!({"name": "bad", "payload": {"operations": []}}));

    let output = ledgerload(&db, &data)
        .env("LEDGERLOAD_REPORTS_DIR", &reports)
        .arg("import")
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2));
    let table = String::from_utf8_lossy(&output.stdout);
    assert!(table.contains("Applied          : 1"));
    assert!(table.contains("missing required field: type"));

    let written: Vec<_> = std::fs::read_dir(&reports).unwrap().collect();
    assert_eq!(written.len(), 1);
}

#[test]
fn missing_data_dir_is_fatal() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("ledgerload.sqlite3");
    let output = ledgerload(&db, &dir.path().join("absent"))
        .arg("import")
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("IMPORT/DISCOVERY"));
}
