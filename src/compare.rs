//! Baseline selection and polarity-aware regression comparison
//!
//! The entry's tool is resolved to a [`Polarity`] once, up front; the
//! per-bench comparison only ever asks the polarity whether a delta is a
//! regression, so adding a tool never touches the comparison itself.

use crate::aggregate::percentile;
use crate::model::{Entry, Polarity, Tool};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CompareError {
    #[error("cannot compare entry for commit '{commit}': {reason}")]
    UnknownTool { commit: String, reason: String },

    #[error("pinned baseline commit '{0}' is not in the suite history")]
    BaselineNotFound(String),

    #[error("threshold must be a non-negative percentage, got {0}")]
    InvalidThreshold(f64),
}

/// Where the baseline for each bench comes from
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum BaselinePolicy {
    /// The entry immediately preceding the compared one
    #[default]
    Previous,
    /// A fixed commit, e.g. the last release
    Commit(String),
    /// Median of the bench over up to N preceding entries
    MedianOfLast(usize),
}

impl FromStr for BaselinePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            None if s == "previous" => Ok(BaselinePolicy::Previous),
            Some(("commit", id)) if !id.is_empty() => Ok(BaselinePolicy::Commit(id.to_string())),
            Some(("median", n)) => match n.parse::<usize>() {
                Ok(window) if window > 0 => Ok(BaselinePolicy::MedianOfLast(window)),
                _ => Err(format!("median window must be a positive integer, got '{}'", n)),
            },
            _ => Err(format!(
                "invalid baseline policy '{}' (expected previous, commit:<id> or median:<n>)",
                s
            )),
        }
    }
}

impl TryFrom<String> for BaselinePolicy {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<BaselinePolicy> for String {
    fn from(policy: BaselinePolicy) -> Self {
        policy.to_string()
    }
}

impl fmt::Display for BaselinePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BaselinePolicy::Previous => f.write_str("previous"),
            BaselinePolicy::Commit(id) => write!(f, "commit:{}", id),
            BaselinePolicy::MedianOfLast(n) => write!(f, "median:{}", n),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompareOptions {
    /// Percent change in the "worse" direction that counts as a regression
    pub threshold: f64,
    pub baseline: BaselinePolicy,
}

impl Default for CompareOptions {
    fn default() -> Self {
        Self {
            threshold: 20.0,
            baseline: BaselinePolicy::Previous,
        }
    }
}

impl Polarity {
    /// Whether `percent_delta` crosses `threshold` in the worse direction
    pub fn is_regression(self, percent_delta: f64, threshold: f64) -> bool {
        match self {
            Polarity::SmallerIsBetter => percent_delta > threshold,
            Polarity::BiggerIsBetter => percent_delta < -threshold,
        }
    }

    /// Whether `percent_delta` crosses `threshold` in the better direction
    pub fn is_improvement(self, percent_delta: f64, threshold: f64) -> bool {
        self.is_regression(-percent_delta, threshold)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonStatus {
    /// Nothing to compare against yet
    NoBaseline,
    /// Baseline is zero, a relative change is undefined
    ZeroBaseline,
    Regressed,
    Improved,
    Unchanged,
}

/// Comparison of one bench against its baseline
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BenchComparison {
    pub name: String,
    pub unit: String,
    pub baseline_value: Option<f64>,
    pub current_value: f64,
    pub percent_delta: Option<f64>,
    pub flagged: bool,
    pub status: ComparisonStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegressionReport {
    pub suite: String,
    pub commit_id: String,
    pub tool: Tool,
    pub polarity: Polarity,
    pub threshold: f64,
    pub baseline_policy: BaselinePolicy,
    /// Commit the baseline values came from, when a single entry supplied them
    pub baseline_commit: Option<String>,
    pub benches: Vec<BenchComparison>,
}

impl RegressionReport {
    pub fn has_regression(&self) -> bool {
        self.benches.iter().any(|b| b.flagged)
    }

    pub fn regressions(&self) -> impl Iterator<Item = &BenchComparison> {
        self.benches.iter().filter(|b| b.flagged)
    }

    /// True when at least one bench had a baseline to compare against
    pub fn has_baseline(&self) -> bool {
        self.benches.iter().any(|b| b.baseline_value.is_some())
    }
}

/// Baseline chosen for an entry
enum Baseline<'a> {
    None,
    Entry(&'a Entry),
    Median(Vec<&'a Entry>, usize),
}

impl Baseline<'_> {
    fn value_for(&self, bench: &str) -> Option<f64> {
        match self {
            Baseline::None => None,
            Baseline::Entry(entry) => entry.bench(bench).map(|b| b.value),
            Baseline::Median(prior, window) => {
                let mut values: Vec<f64> = prior
                    .iter()
                    .rev()
                    .take(*window)
                    .filter_map(|e| e.bench(bench).map(|b| b.value))
                    .collect();
                if values.is_empty() {
                    return None;
                }
                values.sort_by(f64::total_cmp);
                Some(percentile(&values, 50.0))
            }
        }
    }

    fn commit(&self) -> Option<String> {
        match self {
            Baseline::Entry(entry) => Some(entry.commit_id().to_string()),
            Baseline::None | Baseline::Median(..) => None,
        }
    }
}

/// Entries that precede `entry` in the suite, oldest first, excluding itself
fn preceding<'a>(entry: &Entry, history: &'a [Entry]) -> Vec<&'a Entry> {
    match history.iter().position(|e| e.commit_id() == entry.commit_id()) {
        Some(index) => history[..index].iter().collect(),
        None => history
            .iter()
            .filter(|e| e.recorded_at() <= entry.recorded_at())
            .collect(),
    }
}

fn select_baseline<'a>(
    entry: &Entry,
    history: &'a [Entry],
    policy: &BaselinePolicy,
) -> Result<Baseline<'a>, CompareError> {
    let prior = preceding(entry, history);

    match policy {
        BaselinePolicy::Previous => Ok(prior
            .last()
            .copied()
            .map_or(Baseline::None, Baseline::Entry)),
        BaselinePolicy::Commit(id) if id == entry.commit_id() => Ok(Baseline::None),
        BaselinePolicy::Commit(id) => history
            .iter()
            .find(|e| e.commit_id() == id)
            .map(Baseline::Entry)
            .ok_or_else(|| CompareError::BaselineNotFound(id.clone())),
        BaselinePolicy::MedianOfLast(window) => {
            if prior.is_empty() {
                Ok(Baseline::None)
            } else {
                Ok(Baseline::Median(prior, *window))
            }
        }
    }
}

/// Compare an entry against its baseline within the suite's history
///
/// `history` is the suite's ordered sequence, normally including `entry`
/// itself (just appended); the entry never serves as its own baseline.
///
/// # Example
/// ```
/// use perfledger::compare::{compare, CompareOptions};
/// use perfledger::model::{Bench, CommitInfo, Entry};
///
/// let entry = |id: &str, date: u64, value: f64| Entry {
///     commit: CommitInfo::new(id),
///     date,
///     tool: "customSmallerIsBetter".to_string(),
///     benches: vec![Bench::new("pull", value, "Seconds")],
/// };
/// let history = vec![entry("old", 1, 0.706), entry("new", 2, 24.7355)];
///
/// let report = compare("soci", &history[1], &history, &CompareOptions::default()).unwrap();
/// assert!(report.has_regression());
/// ```
pub fn compare(
    suite: &str,
    entry: &Entry,
    history: &[Entry],
    options: &CompareOptions,
) -> Result<RegressionReport, CompareError> {
    if !options.threshold.is_finite() || options.threshold < 0.0 {
        return Err(CompareError::InvalidThreshold(options.threshold));
    }

    let tool: Tool = entry.tool.parse().map_err(|reason| CompareError::UnknownTool {
        commit: entry.commit_id().to_string(),
        reason,
    })?;
    let polarity = tool.polarity();
    let baseline = select_baseline(entry, history, &options.baseline)?;

    let benches = entry
        .benches
        .iter()
        .map(|bench| {
            let baseline_value = baseline.value_for(&bench.name);
            let (percent_delta, status) = match baseline_value {
                None => (None, ComparisonStatus::NoBaseline),
                Some(base) if base == 0.0 => (None, ComparisonStatus::ZeroBaseline),
                Some(base) => {
                    let delta = (bench.value - base) / base * 100.0;
                    let status = if polarity.is_regression(delta, options.threshold) {
                        ComparisonStatus::Regressed
                    } else if polarity.is_improvement(delta, options.threshold) {
                        ComparisonStatus::Improved
                    } else {
                        ComparisonStatus::Unchanged
                    };
                    (Some(delta), status)
                }
            };

            if status == ComparisonStatus::Regressed {
                tracing::info!(
                    suite,
                    bench = %bench.name,
                    baseline = baseline_value,
                    current = bench.value,
                    percent_delta,
                    "regression detected"
                );
            }

            BenchComparison {
                name: bench.name.clone(),
                unit: bench.unit.clone(),
                baseline_value,
                current_value: bench.value,
                percent_delta,
                flagged: status == ComparisonStatus::Regressed,
                status,
            }
        })
        .collect();

    Ok(RegressionReport {
        suite: suite.to_string(),
        commit_id: entry.commit_id().to_string(),
        tool,
        polarity,
        threshold: options.threshold,
        baseline_policy: options.baseline.clone(),
        baseline_commit: baseline.commit(),
        benches,
    })
}
