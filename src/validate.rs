//! Ingestion validation for candidate entries
//!
//! Validation never stops at the first problem: a CI caller gets every
//! violation for an entry in one round trip. Violations are scoped either to
//! a single bench (the rest of the entry can still be stored) or to the whole
//! entry.

use crate::model::{Entry, Tool};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// 2000-01-01T00:00:00Z in epoch milliseconds
pub const MIN_PLAUSIBLE_DATE_MS: u64 = 946_684_800_000;

/// How far into the future a run timestamp may lie (clock skew allowance)
pub const MAX_FUTURE_SKEW_MS: u64 = 24 * 60 * 60 * 1000;

/// A single problem found in a candidate entry
#[derive(Error, Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Violation {
    #[error("commit id is empty")]
    EmptyCommitId,

    #[error("recorded date {date} is not a plausible epoch-millisecond timestamp")]
    ImplausibleTimestamp { date: u64 },

    #[error("entry contains no benches")]
    NoBenches,

    #[error("unknown tool '{tool}'")]
    UnknownTool { tool: String },

    #[error("tool mismatch: suite uses '{expected}', entry reports '{found}'")]
    ToolMismatch { expected: Tool, found: String },

    #[error("bench #{index} has an empty name")]
    EmptyBenchName { index: usize },

    #[error("bench '{bench}' has invalid value {value} (must be finite and >= 0)")]
    NegativeValue {
        index: usize,
        bench: String,
        value: f64,
    },

    #[error("unit mismatch for '{bench}': suite records '{expected}', entry reports '{found}'")]
    UnitMismatch {
        index: usize,
        bench: String,
        expected: String,
        found: String,
    },

    #[error("bench '{bench}' appears more than once in the entry")]
    DuplicateBench { index: usize, bench: String },
}

impl Violation {
    /// Index of the offending bench for bench-scoped violations
    pub fn bench_index(&self) -> Option<usize> {
        match self {
            Violation::EmptyBenchName { index }
            | Violation::NegativeValue { index, .. }
            | Violation::UnitMismatch { index, .. }
            | Violation::DuplicateBench { index, .. } => Some(*index),
            Violation::EmptyCommitId
            | Violation::ImplausibleTimestamp { .. }
            | Violation::NoBenches
            | Violation::UnknownTool { .. }
            | Violation::ToolMismatch { .. } => None,
        }
    }

    pub fn is_bench_scoped(&self) -> bool {
        self.bench_index().is_some()
    }
}

/// Every violation found in one candidate entry
#[derive(Error, Debug, Clone, PartialEq, Serialize)]
#[error("entry for commit '{commit_id}' failed validation: {}", join_violations(.violations))]
pub struct ValidationError {
    pub commit_id: String,
    pub violations: Vec<Violation>,
}

fn join_violations(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl ValidationError {
    /// True when at least one violation rejects the entry as a whole
    pub fn rejects_entry(&self) -> bool {
        self.violations.iter().any(|v| !v.is_bench_scoped())
    }

    /// Indices of benches that must be dropped from the entry
    pub fn rejected_benches(&self) -> BTreeSet<usize> {
        self.violations
            .iter()
            .filter_map(Violation::bench_index)
            .collect()
    }
}

/// Non-fatal findings
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Warning {
    /// The run finished before the suite's newest entry (CI scheduling delay)
    OutOfOrder { date: u64, newest: u64 },
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Warning::OutOfOrder { date, newest } => write!(
                f,
                "recorded date {} is earlier than the suite's newest entry ({})",
                date, newest
            ),
        }
    }
}

/// Validate a candidate against the suite's current entries
///
/// `configured_tool` is the suite's tool from configuration. Without one the
/// suite keeps the tool of its newest entry; a brand-new suite accepts any
/// known tool.
pub fn validate(
    candidate: &Entry,
    suite: &[Entry],
    configured_tool: Option<Tool>,
) -> Result<Vec<Warning>, ValidationError> {
    validate_at(candidate, suite, configured_tool, now_ms())
}

/// [`validate`] with an explicit clock, in epoch milliseconds
pub fn validate_at(
    candidate: &Entry,
    suite: &[Entry],
    configured_tool: Option<Tool>,
    now_ms: u64,
) -> Result<Vec<Warning>, ValidationError> {
    let mut violations = Vec::new();
    let mut warnings = Vec::new();

    if candidate.commit_id().trim().is_empty() {
        violations.push(Violation::EmptyCommitId);
    }

    let date = candidate.recorded_at();
    if date < MIN_PLAUSIBLE_DATE_MS || date > now_ms.saturating_add(MAX_FUTURE_SKEW_MS) {
        violations.push(Violation::ImplausibleTimestamp { date });
    } else if let Some(newest) = suite.iter().map(Entry::recorded_at).max() {
        if date < newest {
            warnings.push(Warning::OutOfOrder { date, newest });
        }
    }

    check_tool(candidate, suite, configured_tool, &mut violations);

    if candidate.benches.is_empty() {
        violations.push(Violation::NoBenches);
    }
    check_benches(candidate, suite, &mut violations);

    if !violations.is_empty() {
        return Err(ValidationError {
            commit_id: candidate.commit_id().to_string(),
            violations,
        });
    }

    for warning in &warnings {
        tracing::warn!(commit = candidate.commit_id(), "{}", warning);
    }
    Ok(warnings)
}

fn check_tool(
    candidate: &Entry,
    suite: &[Entry],
    configured_tool: Option<Tool>,
    violations: &mut Vec<Violation>,
) {
    let Ok(tool) = candidate.tool.parse::<Tool>() else {
        violations.push(Violation::UnknownTool {
            tool: candidate.tool.clone(),
        });
        return;
    };

    let expected = configured_tool.or_else(|| {
        suite
            .iter()
            .max_by_key(|e| e.recorded_at())
            .and_then(|e| e.tool.parse().ok())
    });

    if let Some(expected) = expected {
        if expected != tool {
            violations.push(Violation::ToolMismatch {
                expected,
                found: candidate.tool.clone(),
            });
        }
    }
}

fn check_benches(candidate: &Entry, suite: &[Entry], violations: &mut Vec<Violation>) {
    // The earliest entry in date order defines each name's unit
    let mut known_units: HashMap<&str, &str> = HashMap::new();
    for bench in suite.iter().flat_map(|e| &e.benches) {
        known_units
            .entry(bench.name.as_str())
            .or_insert(bench.unit.as_str());
    }

    let mut seen = HashSet::new();
    for (index, bench) in candidate.benches.iter().enumerate() {
        if bench.name.trim().is_empty() {
            violations.push(Violation::EmptyBenchName { index });
            continue;
        }

        if !seen.insert(bench.name.as_str()) {
            violations.push(Violation::DuplicateBench {
                index,
                bench: bench.name.clone(),
            });
        }

        if !bench.value.is_finite() || bench.value < 0.0 {
            violations.push(Violation::NegativeValue {
                index,
                bench: bench.name.clone(),
                value: bench.value,
            });
        }

        if let Some(&expected) = known_units.get(bench.name.as_str()) {
            if expected != bench.unit {
                violations.push(Violation::UnitMismatch {
                    index,
                    bench: bench.name.clone(),
                    expected: expected.to_string(),
                    found: bench.unit.clone(),
                });
            }
        }
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
