//! Historical store: per-suite, ordered, append-only entry sequences
//!
//! Mutation goes through [`HistoryStore::update`], which runs a
//! read-modify-write closure under a single-writer discipline. For
//! [`FileStore`] that is an exclusive advisory lock on a sibling `.lock`
//! file; two CI jobs finishing at the same time therefore cannot both read
//! the same prior state and lose one of the appends.
//!
//! Entries are upserted by commit id (re-running CI for a commit replaces its
//! entry, last write wins) and each suite is re-sorted by recorded date after
//! every change. Nothing is ever deleted.

use crate::model::{BenchmarkData, Entry};
use rand::Rng;
use serde::Serialize;
use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write as _};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Prefix of the dashboard's script form (`data.js`)
pub const SCRIPT_PREFIX: &str = "window.BENCHMARK_DATA = ";

#[derive(Error, Debug)]
pub enum StoreError {
    /// The persisted document cannot be parsed. Never repaired automatically.
    #[error("history store {path} is corrupt: {reason}")]
    Corruption { path: PathBuf, reason: String },

    /// Another writer held the lock for the whole retry budget
    #[error(
        "concurrent write conflict: lock {path} held after {attempts} attempts ({elapsed_ms} ms)"
    )]
    ConcurrentWriteConflict {
        path: PathBuf,
        attempts: usize,
        elapsed_ms: u128,
    },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to serialize history: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl StoreError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::ConcurrentWriteConflict { .. })
    }

    fn io(path: &Path, source: io::Error) -> Self {
        StoreError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Result of an upsert
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AppendOutcome {
    Inserted,
    /// An entry with the same commit id existed and was overwritten
    Replaced { previous: Box<Entry> },
}

impl AppendOutcome {
    pub fn is_replace(&self) -> bool {
        matches!(self, AppendOutcome::Replaced { .. })
    }
}

/// What an [`HistoryStore::update`] closure wants done with its changes
#[derive(Debug)]
pub enum Mutation<T> {
    /// Persist the modified document
    Commit(T),
    /// Drop the modifications
    Abort(T),
}

impl BenchmarkData {
    /// Insert `entry` into `suite`, replacing any entry with the same commit id
    ///
    /// The suite is re-sorted by recorded date afterwards (stable, so equal
    /// dates keep their insertion order).
    pub fn upsert(&mut self, suite: &str, entry: Entry) -> AppendOutcome {
        let entries = self.entries.entry(suite.to_string()).or_default();

        let outcome = match entries
            .iter()
            .position(|e| e.commit_id() == entry.commit_id())
        {
            Some(index) => AppendOutcome::Replaced {
                previous: Box::new(std::mem::replace(&mut entries[index], entry)),
            },
            None => {
                entries.push(entry);
                AppendOutcome::Inserted
            }
        };

        entries.sort_by_key(Entry::recorded_at);
        outcome
    }

    /// Structural checks a parseable document must still pass
    fn check_integrity(&self) -> std::result::Result<(), String> {
        for (suite, entries) in &self.entries {
            let mut ids = HashSet::new();
            for entry in entries {
                if !ids.insert(entry.commit_id()) {
                    return Err(format!(
                        "suite '{}' holds commit '{}' more than once",
                        suite,
                        entry.commit_id()
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Storage for benchmark history
pub trait HistoryStore {
    /// Read the whole document
    fn load(&self) -> Result<BenchmarkData>;

    /// Run a read-modify-write cycle as the single logical writer
    ///
    /// The closure works on a copy of the document; changes are persisted
    /// only when it returns [`Mutation::Commit`].
    fn update<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut BenchmarkData) -> Mutation<T>;

    /// Insert or replace an entry by commit id
    fn append(&self, suite: &str, entry: Entry) -> Result<AppendOutcome> {
        self.update(move |data| Mutation::Commit(data.upsert(suite, entry)))
    }

    /// The suite's entries in ascending recorded-date order
    fn query(&self, suite: &str) -> Result<Vec<Entry>> {
        Ok(self.load()?.suite(suite).to_vec())
    }

    fn suites(&self) -> Result<Vec<String>> {
        Ok(self.load()?.suite_names().map(str::to_string).collect())
    }
}

/// Lock acquisition budget for [`FileStore`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LockOptions {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            max_retries: 10,
            base_delay: Duration::from_millis(25),
            max_delay: Duration::from_millis(800),
        }
    }
}

impl LockOptions {
    fn backoff(&self, attempt: usize) -> Duration {
        let exp = self
            .base_delay
            .saturating_mul(1u32 << attempt.min(16))
            .min(self.max_delay);
        let jitter_ms = (exp.as_millis() as u64 / 4).max(1);
        exp + Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
    }
}

/// JSON (or `data.js`) document on disk
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
    lock_options: LockOptions,
}

/// Held exclusive lock; released on drop
struct WriteLock {
    file: File,
}

impl Drop for WriteLock {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.file);
    }
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock_options: LockOptions::default(),
        }
    }

    pub fn with_lock_options(mut self, lock_options: LockOptions) -> Self {
        self.lock_options = lock_options;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.path.with_file_name(format!("{}.lock", name))
    }

    fn is_script(&self) -> bool {
        self.path.extension().is_some_and(|ext| ext == "js")
    }

    fn acquire(&self) -> Result<WriteLock> {
        use fs2::FileExt;

        let lock_path = self.lock_path();
        ensure_parent_dir(&lock_path)?;
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|e| StoreError::io(&lock_path, e))?;

        let start = Instant::now();
        for attempt in 0..=self.lock_options.max_retries {
            match file.try_lock_exclusive() {
                Ok(()) => {
                    tracing::trace!(lock = %lock_path.display(), attempt, "write lock acquired");
                    return Ok(WriteLock { file });
                }
                Err(e) if e.kind() == fs2::lock_contended_error().kind() => {
                    if attempt == self.lock_options.max_retries {
                        break;
                    }
                    let delay = self.lock_options.backoff(attempt);
                    tracing::debug!(
                        lock = %lock_path.display(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "write lock contended, backing off"
                    );
                    std::thread::sleep(delay);
                }
                Err(e) => return Err(StoreError::io(&lock_path, e)),
            }
        }

        Err(StoreError::ConcurrentWriteConflict {
            path: lock_path,
            attempts: self.lock_options.max_retries + 1,
            elapsed_ms: start.elapsed().as_millis(),
        })
    }

    fn read_document(&self) -> Result<BenchmarkData> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::debug!(store = %self.path.display(), "store missing, starting empty");
                return Ok(BenchmarkData::default());
            }
            Err(e) => return Err(StoreError::io(&self.path, e)),
        };
        decode(&self.path, &text, self.is_script())
    }

    fn write_document(&self, data: &BenchmarkData) -> Result<()> {
        let body = serde_json::to_string_pretty(data)?;
        let content = if self.is_script() {
            format!("{}{}\n", SCRIPT_PREFIX, body)
        } else {
            format!("{}\n", body)
        };
        atomic_write(&self.path, content.as_bytes())
    }
}

impl HistoryStore for FileStore {
    /// Writers replace the file atomically, so readers need no lock
    fn load(&self) -> Result<BenchmarkData> {
        self.read_document()
    }

    fn update<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut BenchmarkData) -> Mutation<T>,
    {
        let _lock = self.acquire()?;
        let mut data = self.read_document()?;

        match f(&mut data) {
            Mutation::Commit(value) => {
                data.last_update = Some(now_ms());
                self.write_document(&data)?;
                tracing::debug!(store = %self.path.display(), "history written");
                Ok(value)
            }
            Mutation::Abort(value) => Ok(value),
        }
    }
}

/// In-process store for tests and library callers
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: Mutex<BenchmarkData>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_data(data: BenchmarkData) -> Self {
        Self {
            data: Mutex::new(data),
        }
    }
}

impl HistoryStore for MemoryStore {
    fn load(&self) -> Result<BenchmarkData> {
        let guard = self.data.lock().unwrap_or_else(|p| p.into_inner());
        Ok(guard.clone())
    }

    fn update<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut BenchmarkData) -> Mutation<T>,
    {
        let mut guard = self.data.lock().unwrap_or_else(|p| p.into_inner());
        let mut working = guard.clone();

        match f(&mut working) {
            Mutation::Commit(value) => {
                working.last_update = Some(now_ms());
                *guard = working;
                Ok(value)
            }
            Mutation::Abort(value) => Ok(value),
        }
    }
}

/// Parse a persisted document, JSON or `window.BENCHMARK_DATA = {...}`
pub fn decode(path: &Path, text: &str, script: bool) -> Result<BenchmarkData> {
    let corruption = |reason: String| StoreError::Corruption {
        path: path.to_path_buf(),
        reason,
    };

    let body = if script {
        text.trim_start()
            .strip_prefix(SCRIPT_PREFIX)
            .ok_or_else(|| corruption(format!("missing '{}' prefix", SCRIPT_PREFIX.trim_end())))?
            .trim_end()
            .trim_end_matches(';')
    } else {
        text
    };

    let mut data: BenchmarkData =
        serde_json::from_str(body).map_err(|e| corruption(e.to_string()))?;
    data.check_integrity().map_err(corruption)?;

    // The dashboard appends in arrival order
    for entries in data.entries.values_mut() {
        entries.sort_by_key(Entry::recorded_at);
    }
    Ok(data)
}

fn ensure_parent_dir(path: &Path) -> Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))
        }
        _ => Ok(()),
    }
}

/// Write via a temp file in the target directory, fsync, then rename
fn atomic_write(path: &Path, data: &[u8]) -> Result<()> {
    static COUNTER: AtomicU64 = AtomicU64::new(0);

    ensure_parent_dir(path)?;
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp_path = parent.join(format!(".{}.tmp-{}-{}", file_name, std::process::id(), seq));

    let write = || -> io::Result<()> {
        let mut f = File::create(&tmp_path)?;
        f.write_all(data)?;
        f.sync_data()?;
        fs::rename(&tmp_path, path)
    };

    write().map_err(|e| {
        let _ = fs::remove_file(&tmp_path);
        StoreError::io(path, e)
    })
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Bench, CommitInfo};
    use tempfile::TempDir;

    fn entry(id: &str, date: u64, value: f64) -> Entry {
        Entry {
            commit: CommitInfo::new(id),
            date,
            tool: "customSmallerIsBetter".to_string(),
            benches: vec![Bench::new("pull", value, "Seconds").with_extra("P90")],
        }
    }

    #[test]
    fn test_upsert_inserts_and_sorts() {
        let mut data = BenchmarkData::default();
        assert_eq!(data.upsert("soci", entry("b", 20, 1.0)), AppendOutcome::Inserted);
        assert_eq!(data.upsert("soci", entry("a", 10, 1.0)), AppendOutcome::Inserted);

        let ids: Vec<&str> = data.suite("soci").iter().map(Entry::commit_id).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn test_upsert_same_commit_is_idempotent() {
        let mut data = BenchmarkData::default();
        data.upsert("soci", entry("184d1715", 10, 0.7));
        let outcome = data.upsert("soci", entry("184d1715", 10, 0.7));

        assert!(outcome.is_replace());
        assert_eq!(data.suite("soci").len(), 1);
    }

    #[test]
    fn test_upsert_replace_reorders() {
        let mut data = BenchmarkData::default();
        data.upsert("soci", entry("a", 10, 1.0));
        data.upsert("soci", entry("b", 20, 1.0));

        // Re-run of "a" finished after "b"
        let outcome = data.upsert("soci", entry("a", 30, 2.0));
        match outcome {
            AppendOutcome::Replaced { previous } => assert_eq!(previous.date, 10),
            AppendOutcome::Inserted => panic!("expected replace"),
        }

        let suite = data.suite("soci");
        assert_eq!(suite[0].commit_id(), "b");
        assert_eq!(suite[1].commit_id(), "a");
        assert_eq!(suite[1].benches[0].value, 2.0);
    }

    #[test]
    fn test_suites_are_independent() {
        let mut data = BenchmarkData::default();
        data.upsert("soci", entry("a", 10, 1.0));
        data.upsert("overlay", entry("a", 10, 1.0));
        assert_eq!(data.suite("soci").len(), 1);
        assert_eq!(data.suite("overlay").len(), 1);
    }

    #[test]
    fn test_file_store_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path().join("data.json"));
        assert!(store.query("soci").unwrap().is_empty());
        assert!(store.suites().unwrap().is_empty());
    }

    #[test]
    fn test_file_store_append_and_query() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path().join("nested").join("data.json"));

        store.append("soci", entry("b", 20, 1.0)).unwrap();
        store.append("soci", entry("a", 10, 1.0)).unwrap();

        let entries = store.query("soci").unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].commit_id(), "a");
        assert!(store.load().unwrap().last_update.is_some());
    }

    #[test]
    fn test_file_store_script_format() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.js");
        let store = FileStore::new(&path);

        store.append("soci", entry("a", 10, 1.0)).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.starts_with(SCRIPT_PREFIX));
        assert_eq!(store.query("soci").unwrap().len(), 1);
    }

    #[test]
    fn test_corrupt_store_is_not_repaired() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.json");
        fs::write(&path, "{\"entries\": {\"soci\": [").unwrap();
        let store = FileStore::new(&path);

        let err = store.append("soci", entry("a", 10, 1.0)).unwrap_err();
        assert!(matches!(err, StoreError::Corruption { .. }));
        assert!(!err.is_retryable());
        assert_eq!(fs::read_to_string(&path).unwrap(), "{\"entries\": {\"soci\": [");
    }

    #[test]
    fn test_duplicate_commit_on_disk_is_corruption() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.json");
        let mut data = BenchmarkData::default();
        data.entries
            .insert("soci".to_string(), vec![entry("a", 10, 1.0), entry("a", 11, 1.0)]);
        fs::write(&path, serde_json::to_string(&data).unwrap()).unwrap();

        let err = FileStore::new(&path).load().unwrap_err();
        assert!(matches!(err, StoreError::Corruption { .. }));
    }

    #[test]
    fn test_load_orders_out_of_order_document() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.json");
        let mut data = BenchmarkData::default();
        data.entries.insert(
            "soci".to_string(),
            vec![
                entry("new", 1_700_000_200_000, 24.7355),
                entry("mid", 1_700_000_150_000, 0.71),
                entry("old", 1_700_000_100_000, 0.706),
            ],
        );
        let text = serde_json::to_string(&data).unwrap();
        fs::write(&path, &text).unwrap();
        let store = FileStore::new(&path);

        let ids: Vec<String> = store
            .query("soci")
            .unwrap()
            .iter()
            .map(|e| e.commit_id().to_string())
            .collect();
        assert_eq!(ids, vec!["old", "mid", "new"]);

        // reading never rewrites the file
        assert_eq!(fs::read_to_string(&path).unwrap(), text);

        let history = store.query("soci").unwrap();
        let report = crate::compare::compare(
            "soci",
            &history[2],
            &history,
            &crate::compare::CompareOptions::default(),
        )
        .unwrap();
        assert_eq!(report.baseline_commit.as_deref(), Some("mid"));
        assert!(report.has_regression());
    }

    #[test]
    fn test_load_keeps_equal_dates_in_file_order() {
        let text = serde_json::json!({
            "entries": {"soci": [
                {"commit": {"id": "b"}, "date": 20, "tool": "cargo", "benches": []},
                {"commit": {"id": "a1"}, "date": 10, "tool": "cargo", "benches": []},
                {"commit": {"id": "a2"}, "date": 10, "tool": "cargo", "benches": []}
            ]}
        })
        .to_string();
        let data = decode(Path::new("data.json"), &text, false).unwrap();
        let ids: Vec<&str> = data.suite("soci").iter().map(Entry::commit_id).collect();
        assert_eq!(ids, vec!["a1", "a2", "b"]);
    }

    #[test]
    fn test_script_without_prefix_is_corruption() {
        let err = decode(Path::new("data.js"), "{\"entries\": {}}", true).unwrap_err();
        assert!(matches!(err, StoreError::Corruption { .. }));
    }

    #[test]
    fn test_lock_contention_reports_conflict() {
        use fs2::FileExt;

        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path().join("data.json")).with_lock_options(LockOptions {
            max_retries: 2,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        });

        let holder = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(store.lock_path())
            .unwrap();
        holder.lock_exclusive().unwrap();

        let err = store.append("soci", entry("a", 10, 1.0)).unwrap_err();
        assert!(err.is_retryable());
        match err {
            StoreError::ConcurrentWriteConflict { attempts, .. } => assert_eq!(attempts, 3),
            other => panic!("unexpected error: {other}"),
        }

        holder.unlock().unwrap();
        store.append("soci", entry("a", 10, 1.0)).unwrap();
    }

    #[test]
    fn test_abort_discards_changes() {
        let store = MemoryStore::new();
        store
            .update(|data| Mutation::Abort(data.upsert("soci", entry("a", 10, 1.0))))
            .unwrap();
        assert!(store.query("soci").unwrap().is_empty());

        store.append("soci", entry("a", 10, 1.0)).unwrap();
        assert_eq!(store.query("soci").unwrap().len(), 1);
    }
}
