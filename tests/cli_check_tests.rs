//! Integration tests for `perfledger check` exit codes and store effects
#![allow(deprecated)] // suppress assert_cmd::Command::cargo_bin deprecation in tests

mod utils;

use perfledger::store::{FileStore, HistoryStore};
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;
use utils::{fixture, seeded_store, write_run, COMMIT, PULL, SUITE};

fn check(store: &std::path::Path, run: &std::path::Path) -> assert_cmd::Command {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("perfledger");
    cmd.arg("check")
        .arg(run)
        .arg("--store")
        .arg(store)
        .arg("--suite")
        .arg(SUITE);
    cmd
}

#[test]
fn test_first_ingest_reports_no_baseline() {
    let dir = TempDir::new().unwrap();
    let store = dir.path().join("data.json");
    let run = write_run(dir.path(), "run.json", COMMIT, 1_700_000_600_000, 0.706);

    check(&store, &run)
        .assert()
        .code(0)
        .stdout(predicate::str::contains("NO BASELINE"));

    let entries = FileStore::new(&store).query(SUITE).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].commit_id(), COMMIT);
}

#[test]
fn test_regression_exits_one() {
    let (_dir, store) = seeded_store();

    check(&store, &fixture("run_regressed.json"))
        .assert()
        .code(1)
        .stdout(predicate::str::contains("REGRESSION DETECTED"))
        .stdout(predicate::str::contains("+3403.61%"));

    // the regressed entry is still recorded
    assert_eq!(FileStore::new(&store).query(SUITE).unwrap().len(), 2);
}

#[test]
fn test_raw_samples_with_config_pass() {
    let (_dir, store) = seeded_store();

    check(&store, &fixture("run_samples.json"))
        .arg("--config")
        .arg(fixture("soci.toml"))
        .assert()
        .code(0)
        .stdout(predicate::str::contains("NO REGRESSION DETECTED"));

    let entries = FileStore::new(&store).query(SUITE).unwrap();
    let pull = entries[1].bench(PULL).unwrap();
    assert!((pull.value - 0.721).abs() < 1e-9);
    assert_eq!(pull.extra.as_deref(), Some("P90"));
}

#[test]
fn test_unit_mismatch_exits_two() {
    let (_dir, store) = seeded_store();

    check(&store, &fixture("run_unit_mismatch.json"))
        .assert()
        .code(2)
        .stdout(predicate::str::contains("unit mismatch"));

    let entries = FileStore::new(&store).query(SUITE).unwrap();
    assert_eq!(entries.len(), 2);
    assert!(entries[1].bench(PULL).is_none());
    assert_eq!(entries[0].bench(PULL).unwrap().unit, "Seconds");
}

#[test]
fn test_corrupt_store_exits_two_and_is_untouched() {
    let dir = TempDir::new().unwrap();
    let store = dir.path().join("data.json");
    fs::write(&store, "{\"entries\": {").unwrap();
    let run = write_run(dir.path(), "run.json", COMMIT, 1_700_000_600_000, 0.706);

    check(&store, &run)
        .assert()
        .code(2)
        .stderr(predicate::str::contains("corrupt"));

    assert_eq!(fs::read_to_string(&store).unwrap(), "{\"entries\": {");
}

#[test]
fn test_rerun_same_commit_keeps_one_entry() {
    let (dir, store) = seeded_store();
    let run = write_run(dir.path(), "run.json", COMMIT, 1_700_000_600_000, 0.71);

    check(&store, &run).assert().code(0);
    check(&store, &run).assert().code(0);

    let entries = FileStore::new(&store).query(SUITE).unwrap();
    assert_eq!(entries.iter().filter(|e| e.commit_id() == COMMIT).count(), 1);
    assert_eq!(entries.len(), 2);
}

#[test]
fn test_dry_run_does_not_write() {
    let (_dir, store) = seeded_store();
    let before = fs::read_to_string(&store).unwrap();

    check(&store, &fixture("run_regressed.json"))
        .arg("--dry-run")
        .assert()
        .code(1);

    assert_eq!(fs::read_to_string(&store).unwrap(), before);
}

#[test]
fn test_missing_results_file_exits_two() {
    let (dir, store) = seeded_store();

    check(&store, &dir.path().join("missing.json"))
        .assert()
        .code(2)
        .stdout(predicate::str::contains("failed to read results file"));
}

#[test]
fn test_invalid_input_wins_over_regression() {
    let (dir, store) = seeded_store();
    let regressed = fixture("run_regressed.json");
    let broken = dir.path().join("broken.json");
    fs::write(&broken, "not json").unwrap();

    let mut cmd = check(&store, &regressed);
    cmd.arg(&broken).assert().code(2);
}

#[test]
fn test_json_format() {
    let (_dir, store) = seeded_store();

    let output = check(&store, &fixture("run_regressed.json"))
        .arg("--format")
        .arg("json")
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));

    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let bench = &value["outcomes"][0]["report"]["benches"][0];
    assert_eq!(bench["name"], PULL);
    assert_eq!(bench["flagged"], true);
    assert_eq!(bench["baselineValue"], 0.706);
}

#[test]
fn test_markdown_format() {
    let (_dir, store) = seeded_store();

    check(&store, &fixture("run_regressed.json"))
        .arg("--format")
        .arg("markdown")
        .assert()
        .code(1)
        .stdout(predicate::str::contains("| Bench | Baseline | Current | Delta | Status |"));
}

#[test]
fn test_script_store_round_trip() {
    let dir = TempDir::new().unwrap();
    let store = dir.path().join("data.js");
    let run = write_run(dir.path(), "run.json", COMMIT, 1_700_000_600_000, 0.706);

    check(&store, &run).assert().code(0);

    let text = fs::read_to_string(&store).unwrap();
    assert!(text.starts_with("window.BENCHMARK_DATA = "));
}
