//! Data model for benchmark history
//!
//! The shapes here are the wire format shared with the dashboard front-end:
//!
//! ```json
//! {"lastUpdate": 1700000000000,
//!  "entries": {"<suite>": [{"commit": {"id": "184d1715..."},
//!                           "date": 1700000000000,
//!                           "tool": "customSmallerIsBetter",
//!                           "benches": [{"name": "...", "value": 0.706,
//!                                        "unit": "Seconds", "extra": "P90"}]}]}}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Commit metadata attached to an entry
///
/// Only `id` is interpreted (it is the natural key of an entry within a
/// suite). Author, committer, timestamp, message and any other fields are
/// carried through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitInfo {
    pub id: String,
    #[serde(flatten)]
    pub metadata: Map<String, Value>,
}

impl CommitInfo {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            metadata: Map::new(),
        }
    }

    /// Attach an opaque metadata field
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// One named measurement within an entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bench {
    pub name: String,
    pub value: f64,
    pub unit: String,
    /// Aggregation label, e.g. "P90"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<String>,
}

impl Bench {
    pub fn new(name: impl Into<String>, value: f64, unit: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value,
            unit: unit.into(),
            extra: None,
        }
    }

    pub fn with_extra(mut self, extra: impl Into<String>) -> Self {
        self.extra = Some(extra.into());
        self
    }
}

/// One CI run's result for a suite
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub commit: CommitInfo,
    /// Epoch milliseconds when the run completed
    pub date: u64,
    pub tool: String,
    pub benches: Vec<Bench>,
}

impl Entry {
    pub fn commit_id(&self) -> &str {
        &self.commit.id
    }

    pub fn recorded_at(&self) -> u64 {
        self.date
    }

    /// Look up a bench by name
    pub fn bench(&self, name: &str) -> Option<&Bench> {
        self.benches.iter().find(|b| b.name == name)
    }
}

/// The persisted history document: suites keyed by name
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BenchmarkData {
    /// Epoch milliseconds of the last successful write
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo_url: Option<String>,
    #[serde(default)]
    pub entries: BTreeMap<String, Vec<Entry>>,
}

impl BenchmarkData {
    /// Ordered entries of a suite (empty for an unknown suite)
    pub fn suite(&self, name: &str) -> &[Entry] {
        self.entries.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn suite_names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

/// Which direction of change counts as "better" for a benchmark
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Polarity {
    /// Durations, sizes: growth is a regression
    SmallerIsBetter,
    /// Throughput: shrinkage is a regression
    BiggerIsBetter,
}

/// Tool identifier recorded on each entry
///
/// The identifier names the producer of the numbers and, through it, their
/// polarity. Names follow the dashboard's tool catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Tool {
    CustomSmallerIsBetter,
    CustomBiggerIsBetter,
    Cargo,
    Go,
    Googlecpp,
    Catch2,
    Benchmarkjs,
    Pytest,
}

impl Tool {
    pub const ALL: [Tool; 8] = [
        Tool::CustomSmallerIsBetter,
        Tool::CustomBiggerIsBetter,
        Tool::Cargo,
        Tool::Go,
        Tool::Googlecpp,
        Tool::Catch2,
        Tool::Benchmarkjs,
        Tool::Pytest,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Tool::CustomSmallerIsBetter => "customSmallerIsBetter",
            Tool::CustomBiggerIsBetter => "customBiggerIsBetter",
            Tool::Cargo => "cargo",
            Tool::Go => "go",
            Tool::Googlecpp => "googlecpp",
            Tool::Catch2 => "catch2",
            Tool::Benchmarkjs => "benchmarkjs",
            Tool::Pytest => "pytest",
        }
    }

    pub fn polarity(self) -> Polarity {
        match self {
            Tool::CustomBiggerIsBetter | Tool::Benchmarkjs | Tool::Pytest => {
                Polarity::BiggerIsBetter
            }
            Tool::CustomSmallerIsBetter
            | Tool::Cargo
            | Tool::Go
            | Tool::Googlecpp
            | Tool::Catch2 => Polarity::SmallerIsBetter,
        }
    }
}

impl fmt::Display for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tool {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Tool::ALL
            .into_iter()
            .find(|tool| tool.as_str() == s)
            .ok_or_else(|| {
                let known: Vec<&str> = Tool::ALL.iter().map(|t| t.as_str()).collect();
                format!("unknown tool '{}' (expected one of: {})", s, known.join(", "))
            })
    }
}
