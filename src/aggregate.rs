//! Sample aggregation: raw per-iteration timings to one bench value
//!
//! The first `skip` samples of a run are discarded as cold-start noise (image
//! pulls after a cache flush, JIT warm-up). The rest are sorted and reduced
//! to a percentile using linear interpolation between ranks, so the result
//! does not depend on the order in which the surviving samples arrived.

use crate::model::Bench;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use trueno::Vector;

/// Errors raised while aggregating one bench
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AggregateError {
    #[error(
        "insufficient samples for '{bench}': {total} collected, {skipped} skipped as cold start"
    )]
    InsufficientSamples {
        bench: String,
        total: usize,
        skipped: usize,
    },

    #[error("sample #{index} of '{bench}' is not a finite number: {value}")]
    InvalidSample {
        bench: String,
        index: usize,
        value: f64,
    },

    #[error("percentile must be in [0, 100], got {0}")]
    InvalidPercentile(f64),
}

/// How raw samples are reduced
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AggregationPolicy {
    /// Percentile in [0, 100]
    pub percentile: f64,
    /// Leading samples discarded unconditionally
    pub skip: usize,
}

impl Default for AggregationPolicy {
    fn default() -> Self {
        Self {
            percentile: 90.0,
            skip: 0,
        }
    }
}

impl AggregationPolicy {
    pub fn new(percentile: f64, skip: usize) -> Self {
        Self { percentile, skip }
    }

    pub fn validate(&self) -> Result<(), AggregateError> {
        if !(0.0..=100.0).contains(&self.percentile) {
            return Err(AggregateError::InvalidPercentile(self.percentile));
        }
        Ok(())
    }

    /// Label stored in `Bench::extra`, e.g. "P90" or "P99.9"
    pub fn label(&self) -> String {
        if self.percentile.fract() == 0.0 {
            format!("P{}", self.percentile as u64)
        } else {
            format!("P{}", self.percentile)
        }
    }
}

/// Reduce one benchmark's raw samples to a tagged bench value
///
/// # Example
/// ```
/// use perfledger::aggregate::{aggregate, AggregationPolicy};
///
/// let samples = [0.059, 0.0115, 0.010, 0.0095, 0.008];
/// let bench = aggregate("pull", "Seconds", &samples, &AggregationPolicy::new(90.0, 1)).unwrap();
/// assert!((bench.value - 0.01105).abs() < 1e-12);
/// assert_eq!(bench.extra.as_deref(), Some("P90"));
/// ```
pub fn aggregate(
    name: &str,
    unit: &str,
    samples: &[f64],
    policy: &AggregationPolicy,
) -> Result<Bench, AggregateError> {
    policy.validate()?;

    let mut kept = surviving_samples(name, samples, policy.skip)?;
    kept.sort_by(f64::total_cmp);

    let value = percentile(&kept, policy.percentile);
    tracing::debug!(
        bench = name,
        kept = kept.len(),
        skipped = samples.len() - kept.len(),
        value,
        "aggregated samples"
    );

    Ok(Bench::new(name, value, unit).with_extra(policy.label()))
}

/// Samples left after the cold-start skip, checked for finiteness
fn surviving_samples(name: &str, samples: &[f64], skip: usize) -> Result<Vec<f64>, AggregateError> {
    if samples.len() <= skip {
        return Err(AggregateError::InsufficientSamples {
            bench: name.to_string(),
            total: samples.len(),
            skipped: samples.len(),
        });
    }

    samples
        .iter()
        .enumerate()
        .skip(skip)
        .map(|(index, &value)| {
            if value.is_finite() {
                Ok(value)
            } else {
                Err(AggregateError::InvalidSample {
                    bench: name.to_string(),
                    index,
                    value,
                })
            }
        })
        .collect()
}

/// Percentile of ascending-sorted data by linear interpolation between ranks
///
/// `rank = (p / 100) * (n - 1)`. A single sample is its own percentile.
/// Returns 0.0 for empty input.
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    match sorted.len() {
        0 => 0.0,
        1 => sorted[0],
        n => {
            let rank = (p / 100.0) * (n - 1) as f64;
            let lower = rank.floor() as usize;
            let upper = rank.ceil() as usize;

            if lower == upper {
                sorted[lower]
            } else {
                let weight = rank - lower as f64;
                sorted[lower] * (1.0 - weight) + sorted[upper] * weight
            }
        }
    }
}

/// Descriptive statistics over the samples that survived the skip
///
/// Informational only: used to warn about noisy runs, never to change the
/// aggregated value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SampleSummary {
    pub count: usize,
    pub skipped: usize,
    pub mean: f64,
    pub stddev: f64,
    pub min: f64,
    pub max: f64,
}

impl SampleSummary {
    /// Summarize `samples[skip..]`; `None` when nothing survives
    pub fn from_samples(samples: &[f64], skip: usize) -> Option<Self> {
        let kept = samples.get(skip..).filter(|rest| !rest.is_empty())?;
        let values: Vec<f32> = kept.iter().map(|&v| v as f32).collect();
        let v = Vector::from_slice(&values);

        Some(Self {
            count: kept.len(),
            skipped: skip,
            mean: v.mean().unwrap_or(0.0) as f64,
            stddev: v.stddev().unwrap_or(0.0) as f64,
            min: v.min().unwrap_or(0.0) as f64,
            max: v.max().unwrap_or(0.0) as f64,
        })
    }

    /// Coefficient of variation (stddev / |mean|), 0.0 for a zero mean
    pub fn coefficient_of_variation(&self) -> f64 {
        if self.mean.abs() < 1e-12 {
            return 0.0;
        }
        self.stddev / self.mean.abs()
    }

    pub fn is_noisy(&self, threshold: f64) -> bool {
        self.coefficient_of_variation() > threshold
    }
}
