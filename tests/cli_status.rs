//! Integration tests for the `callsync` binary.

use assert_cmd::Command;
use serde_json::Value;
use std::path::Path;

/// Get the `callsync` command with an isolated environment.
fn callsync(db: &Path) -> Command {
    let mut cmd = Command::cargo_bin("callsync").unwrap();
    cmd.env("RUST_LOG", "error")
        .env_remove("CALLSYNC_API_URL")
        .env_remove("CALLSYNC_TEST_DB")
        .arg("--db")
        .arg(db)
        .arg("--json");
    cmd
}

fn stdout_json(cmd: &mut Command) -> Value {
    let output = cmd.output().unwrap();
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).unwrap()
}

fn write_call_log(dir: &Path) -> std::path::PathBuf {
    let path = dir.join("calls.json");
    let entries = serde_json::json!([
        { "number": "+15550100", "cached_name": "Ann", "type": 1, "duration": 42, "date": 1_767_225_600_000_i64 },
        { "number": "+15550101", "type": 3, "duration": 0, "date": 1_767_225_660_000_i64 },
        { "number": "+15550102", "type": 4, "duration": 10, "date": 1_767_225_720_000_i64 }
    ]);
    std::fs::write(&path, entries.to_string()).unwrap();
    path
}

#[test]
fn import_then_status_counts() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("data").join("callsync.db");
    let log = write_call_log(dir.path());

    let imported = stdout_json(callsync(&db).arg("import").arg(&log));
    assert_eq!(imported["stats"]["created"], 2);
    assert_eq!(imported["stats"]["untracked"], 1);

    let again = stdout_json(callsync(&db).arg("import").arg(&log));
    assert_eq!(again["stats"]["created"], 0);
    assert_eq!(again["stats"]["existing"], 2);

    let status = stdout_json(callsync(&db).arg("status"));
    assert_eq!(status["total_calls"], 2);
    assert_eq!(status["metadata"]["PENDING"], 2);
    assert_eq!(status["recording"]["PENDING"], 1);
    assert_eq!(status["recording"]["NOT_APPLICABLE"], 1);
    assert!(status["pairing"].is_null());
    assert!(status.get("pending").is_none());
}

#[test]
fn status_without_database_fails() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("missing.db");

    let output = callsync(&db).arg("status").output().unwrap();
    assert_eq!(output.status.code(), Some(2));
    let error: Value = serde_json::from_slice(&output.stderr).unwrap();
    assert_eq!(error["error"]["code"], "NOT_INITIALIZED");
    assert!(!db.exists());
}

#[test]
fn annotate_shows_in_history() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("callsync.db");
    let log = write_call_log(dir.path());
    stdout_json(callsync(&db).arg("import").arg(&log));

    let status = stdout_json(callsync(&db).args(["status", "--pending"]));
    let pending = status["pending"].as_array().unwrap();
    assert_eq!(pending.len(), 2);
    let id = pending[0]["composite_id"].as_str().unwrap().to_string();

    let call = stdout_json(callsync(&db).args(["annotate", &id, "--note", "asked for a quote"]));
    assert_eq!(call["note"], "asked for a quote");

    let history = stdout_json(callsync(&db).args(["history", &id]));
    let events: Vec<&str> = history
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|e| e["event"].as_str())
        .collect();
    assert!(events.contains(&"call_annotated"));
    assert!(events.contains(&"call_imported"));
}

#[test]
fn annotate_unknown_call_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("callsync.db");
    stdout_json(callsync(&db).args(["pair", "--org", "org_1", "--user", "user_1"]));

    let output = callsync(&db)
        .args(["annotate", "call_missing", "--reviewed", "true"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(3));
}

#[test]
fn repairing_keeps_device_id() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("callsync.db");

    let first = stdout_json(callsync(&db).args(["pair", "--org", "org_1", "--user", "user_1"]));
    let second = stdout_json(callsync(&db).args(["pair", "--org", "org_2", "--user", "user_1"]));
    assert_eq!(second["org_id"], "org_2");
    assert_eq!(first["device_id"], second["device_id"]);

    let status = stdout_json(callsync(&db).arg("status"));
    assert_eq!(status["pairing"]["org_id"], "org_2");
}

#[test]
fn sync_requires_api_url() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("callsync.db");
    stdout_json(callsync(&db).args(["pair", "--org", "org_1", "--user", "user_1"]));

    let output = callsync(&db).arg("sync").output().unwrap();
    assert_eq!(output.status.code(), Some(7));
    let error: Value = serde_json::from_slice(&output.stderr).unwrap();
    assert_eq!(error["error"]["code"], "CONFIG_ERROR");
}
