// Shared helpers for integration tests

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub const SUITE: &str = "soci-snapshotter";
pub const PULL: &str = "SociFullECR-public-busybox-pullTaskDuration";
pub const COMMIT: &str = "184d1715c2a6e4b0f8d3e9a1c7b5d2f4e6a8c0b2";

/// Path of a file under tests/fixtures
pub fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

/// Temp dir holding a copy of the seeded soci history as `data.json`
pub fn seeded_store() -> (TempDir, PathBuf) {
    let dir = TempDir::new().unwrap();
    let store = dir.path().join("data.json");
    fs::copy(fixture("soci_history.json"), &store).unwrap();
    (dir, store)
}

/// Write a run file with the given commit, date and single bench value
pub fn write_run(dir: &Path, file: &str, commit: &str, date: u64, value: f64) -> PathBuf {
    let run = serde_json::json!({
        "commit": {"id": commit},
        "date": date,
        "tool": "customSmallerIsBetter",
        "benches": [{"name": PULL, "unit": "Seconds", "value": value}],
    });
    let path = dir.join(file);
    fs::write(&path, serde_json::to_string_pretty(&run).unwrap()).unwrap();
    path
}
