//! Ingestion pipeline: run file -> aggregated entry -> validation -> store -> report
//!
//! Failures stay as small as possible. A bench that cannot be aggregated or
//! fails a bench-scoped check is dropped and reported while the rest of the
//! entry is stored; an entry-scoped violation rejects that entry only, and
//! the rest of the batch proceeds. Validation, upsert and comparison all
//! happen inside one store update so they see the same suite state.

use crate::aggregate::{aggregate, SampleSummary};
use crate::compare::{compare, RegressionReport};
use crate::config::SuiteSettings;
use crate::model::{Bench, CommitInfo, Entry};
use crate::store::{AppendOutcome, HistoryStore, Mutation, StoreError};
use crate::validate::{validate, ValidationError, Warning};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::ExitCode;

/// One CI run as produced by the benchmark harness
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub commit: CommitInfo,
    pub date: u64,
    pub tool: String,
    pub benches: Vec<RunBench>,
}

/// A bench in a run file: raw samples, or a value the harness already aggregated
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunBench {
    pub name: String,
    pub unit: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub samples: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<String>,
}

impl RunRecord {
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read results file {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("malformed results file {}", path.display()))
    }
}

/// A bench dropped before storage
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BenchFailure {
    pub bench: String,
    pub reason: String,
}

/// What happened to the entry
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Disposition {
    Stored { append: AppendOutcome },
    /// Validated and compared, but the store was left untouched
    DryRun { append: AppendOutcome },
    Rejected,
}

/// Result of ingesting one run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestOutcome {
    pub suite: String,
    pub commit_id: String,
    pub disposition: Disposition,
    /// Benches that could not be aggregated
    pub aggregation_failures: Vec<BenchFailure>,
    /// Every violation found, including those of benches that were dropped
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation: Option<ValidationError>,
    pub warnings: Vec<Warning>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<RegressionReport>,
    /// Set when the stored entry could not be compared
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compare_error: Option<String>,
}

impl IngestOutcome {
    /// Nothing was dropped or rejected and the comparison ran
    pub fn is_clean(&self) -> bool {
        self.aggregation_failures.is_empty()
            && self.validation.is_none()
            && self.compare_error.is_none()
            && !matches!(self.disposition, Disposition::Rejected)
    }

    pub fn has_regression(&self) -> bool {
        self.report.as_ref().is_some_and(RegressionReport::has_regression)
    }
}

/// Run file that never made it to validation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoadFailure {
    pub source: String,
    pub reason: String,
}

/// Store failure that stopped a batch
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoreFailure {
    /// Run file being ingested when the store failed
    pub source: String,
    pub reason: String,
    pub retryable: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchOutcome {
    pub outcomes: Vec<IngestOutcome>,
    pub load_failures: Vec<LoadFailure>,
    /// Files after this one were not processed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store_failure: Option<StoreFailure>,
}

impl BatchOutcome {
    pub fn verdict(&self) -> Verdict {
        if self.store_failure.is_some()
            || !self.load_failures.is_empty()
            || self.outcomes.iter().any(|o| !o.is_clean())
        {
            Verdict::InvalidInput
        } else if self.outcomes.iter().any(IngestOutcome::has_regression) {
            Verdict::Regression
        } else {
            Verdict::Clean
        }
    }
}

/// Process exit status of a check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Clean = 0,
    Regression = 1,
    InvalidInput = 2,
}

impl From<Verdict> for ExitCode {
    fn from(verdict: Verdict) -> Self {
        ExitCode::from(verdict as u8)
    }
}

/// Ingests runs into one suite of a store
pub struct Ingestor<'a, S: HistoryStore> {
    store: &'a S,
    suite: String,
    settings: SuiteSettings,
    dry_run: bool,
}

impl<'a, S: HistoryStore> Ingestor<'a, S> {
    pub fn new(store: &'a S, suite: impl Into<String>, settings: SuiteSettings) -> Self {
        Self {
            store,
            suite: suite.into(),
            settings,
            dry_run: false,
        }
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Aggregate a run into a candidate entry
    pub fn build_candidate(&self, run: RunRecord) -> (Entry, Vec<BenchFailure>) {
        let mut benches = Vec::with_capacity(run.benches.len());
        let mut failures = Vec::new();

        for raw in run.benches {
            match self.reduce(&raw) {
                Ok(bench) => benches.push(bench),
                Err(reason) => {
                    tracing::warn!(bench = %raw.name, "dropping bench: {}", reason);
                    failures.push(BenchFailure {
                        bench: raw.name,
                        reason,
                    });
                }
            }
        }

        let entry = Entry {
            commit: run.commit,
            date: run.date,
            tool: run.tool,
            benches,
        };
        (entry, failures)
    }

    fn reduce(&self, raw: &RunBench) -> Result<Bench, String> {
        match (&raw.samples, raw.value) {
            (Some(samples), None) => {
                let policy = &self.settings.aggregation;
                if let Some(summary) = SampleSummary::from_samples(samples, policy.skip) {
                    if summary.is_noisy(self.settings.noise_threshold) {
                        tracing::warn!(
                            bench = %raw.name,
                            cv = summary.coefficient_of_variation(),
                            samples = summary.count,
                            "noisy samples"
                        );
                    }
                }
                aggregate(&raw.name, &raw.unit, samples, policy).map_err(|e| e.to_string())
            }
            (None, Some(value)) => Ok(Bench {
                name: raw.name.clone(),
                value,
                unit: raw.unit.clone(),
                extra: raw.extra.clone(),
            }),
            (Some(_), Some(_)) => Err("bench carries both samples and value".to_string()),
            (None, None) => Err("bench carries neither samples nor value".to_string()),
        }
    }

    /// Ingest one run
    ///
    /// Only store failures are returned as errors; everything about the run
    /// itself is reported in the outcome.
    pub fn ingest(&self, run: RunRecord) -> Result<IngestOutcome, StoreError> {
        let (candidate, aggregation_failures) = self.build_candidate(run);
        let suite = self.suite.as_str();
        let commit_id = candidate.commit_id().to_string();

        let mut outcome = IngestOutcome {
            suite: suite.to_string(),
            commit_id: commit_id.clone(),
            disposition: Disposition::Rejected,
            aggregation_failures,
            validation: None,
            warnings: Vec::new(),
            report: None,
            compare_error: None,
        };

        self.store.update(|data| {
            let (entry, validation, warnings) =
                match screen(candidate, data.suite(suite), &self.settings) {
                    Screened::Rejected(err) => {
                        tracing::warn!(suite, "{}", err);
                        outcome.validation = Some(err);
                        return Mutation::Abort(());
                    }
                    Screened::Accepted {
                        entry,
                        validation,
                        warnings,
                    } => (entry, validation, warnings),
                };
            outcome.validation = validation;
            outcome.warnings = warnings;

            let append = data.upsert(suite, entry);
            tracing::info!(
                suite,
                commit = %commit_id,
                replaced = append.is_replace(),
                "entry upserted"
            );

            let history = data.suite(suite);
            if let Some(stored) = history.iter().find(|e| e.commit_id() == commit_id) {
                match compare(suite, stored, history, &self.settings.compare) {
                    Ok(report) => outcome.report = Some(report),
                    Err(e) => outcome.compare_error = Some(e.to_string()),
                }
            }

            if self.dry_run {
                outcome.disposition = Disposition::DryRun { append };
                Mutation::Abort(())
            } else {
                outcome.disposition = Disposition::Stored { append };
                Mutation::Commit(())
            }
        })?;

        Ok(outcome)
    }

    /// Ingest several run files
    ///
    /// Unreadable files are recorded and skipped. A store failure stops the
    /// batch but keeps the outcomes of the files already ingested.
    pub fn ingest_files<P: AsRef<Path>>(&self, paths: &[P]) -> BatchOutcome {
        let mut batch = BatchOutcome::default();

        for path in paths {
            let path = path.as_ref();
            match RunRecord::from_file(path) {
                Ok(run) => match self.ingest(run) {
                    Ok(outcome) => batch.outcomes.push(outcome),
                    Err(e) => {
                        tracing::error!(source = %path.display(), "{}", e);
                        batch.store_failure = Some(StoreFailure {
                            source: path.display().to_string(),
                            reason: e.to_string(),
                            retryable: e.is_retryable(),
                        });
                        break;
                    }
                },
                Err(e) => {
                    tracing::warn!(source = %path.display(), "{:#}", e);
                    batch.load_failures.push(LoadFailure {
                        source: path.display().to_string(),
                        reason: format!("{:#}", e),
                    });
                }
            }
        }

        batch
    }
}

enum Screened {
    Accepted {
        entry: Entry,
        /// Bench-scoped violations whose benches were dropped
        validation: Option<ValidationError>,
        warnings: Vec<Warning>,
    },
    Rejected(ValidationError),
}

/// Validate a candidate, dropping benches that carry bench-scoped violations
fn screen(mut candidate: Entry, suite: &[Entry], settings: &SuiteSettings) -> Screened {
    let err = match validate(&candidate, suite, settings.tool) {
        Ok(warnings) => {
            return Screened::Accepted {
                entry: candidate,
                validation: None,
                warnings,
            }
        }
        Err(err) => err,
    };

    if err.rejects_entry() {
        return Screened::Rejected(err);
    }

    let dropped = err.rejected_benches();
    let mut index = 0;
    candidate.benches.retain(|_| {
        let keep = !dropped.contains(&index);
        index += 1;
        keep
    });

    if candidate.benches.is_empty() {
        return Screened::Rejected(err);
    }

    // The survivors passed every bench check; only warnings remain
    match validate(&candidate, suite, settings.tool) {
        Ok(warnings) => Screened::Accepted {
            entry: candidate,
            validation: Some(err),
            warnings,
        },
        Err(rest) => Screened::Rejected(rest),
    }
}
