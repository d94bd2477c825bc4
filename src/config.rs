//! Suite configuration
//!
//! Settings resolve in layers: built-in defaults, then the `[defaults]` table
//! of the TOML file, then `[suites.<name>]`, then explicit CLI flags.
//!
//! ```toml
//! [defaults]
//! percentile = 90.0
//! threshold = 20.0
//!
//! [suites."soci-snapshotter"]
//! tool = "customSmallerIsBetter"
//! skip = 1
//! ```

use crate::aggregate::AggregationPolicy;
use crate::compare::{BaselinePolicy, CompareOptions};
use crate::model::Tool;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid setting for suite '{suite}': {reason}")]
    Invalid { suite: String, reason: String },
}

/// Top-level configuration file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub defaults: Defaults,
    pub suites: BTreeMap<String, SuiteConfig>,
}

/// Settings shared by every suite
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Defaults {
    /// Percentile used to aggregate raw samples
    pub percentile: f64,
    /// Leading cold-start samples to discard
    pub skip: usize,
    /// Regression threshold in percent
    pub threshold: f64,
    /// Coefficient of variation above which a run is logged as noisy
    pub noise_threshold: f64,
    pub baseline: BaselinePolicy,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            percentile: 90.0,
            skip: 0,
            threshold: 20.0,
            noise_threshold: 0.5,
            baseline: BaselinePolicy::Previous,
        }
    }
}

/// Per-suite overrides
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SuiteConfig {
    /// Tool every entry of the suite must report
    pub tool: Option<Tool>,
    pub percentile: Option<f64>,
    pub skip: Option<usize>,
    pub threshold: Option<f64>,
    pub noise_threshold: Option<f64>,
    pub baseline: Option<BaselinePolicy>,
}

/// Values given explicitly on the command line
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Overrides {
    pub tool: Option<Tool>,
    pub percentile: Option<f64>,
    pub skip: Option<usize>,
    pub threshold: Option<f64>,
    pub baseline: Option<BaselinePolicy>,
}

/// Fully resolved settings for one suite
#[derive(Debug, Clone, PartialEq)]
pub struct SuiteSettings {
    pub tool: Option<Tool>,
    pub aggregation: AggregationPolicy,
    pub compare: CompareOptions,
    pub noise_threshold: f64,
}

impl Config {
    /// Load from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Resolve the settings for `suite`
    pub fn resolve(
        &self,
        suite: &str,
        overrides: &Overrides,
    ) -> Result<SuiteSettings, ConfigError> {
        let defaults = &self.defaults;
        let suite_cfg = self.suites.get(suite).cloned().unwrap_or_default();

        let settings = SuiteSettings {
            tool: overrides.tool.or(suite_cfg.tool),
            aggregation: AggregationPolicy {
                percentile: overrides
                    .percentile
                    .or(suite_cfg.percentile)
                    .unwrap_or(defaults.percentile),
                skip: overrides.skip.or(suite_cfg.skip).unwrap_or(defaults.skip),
            },
            compare: CompareOptions {
                threshold: overrides
                    .threshold
                    .or(suite_cfg.threshold)
                    .unwrap_or(defaults.threshold),
                baseline: overrides
                    .baseline
                    .clone()
                    .or(suite_cfg.baseline)
                    .unwrap_or_else(|| defaults.baseline.clone()),
            },
            noise_threshold: suite_cfg.noise_threshold.unwrap_or(defaults.noise_threshold),
        };

        settings.validate().map_err(|reason| ConfigError::Invalid {
            suite: suite.to_string(),
            reason,
        })?;
        Ok(settings)
    }
}

impl SuiteSettings {
    pub fn validate(&self) -> Result<(), String> {
        self.aggregation.validate().map_err(|e| e.to_string())?;

        if !self.compare.threshold.is_finite() || self.compare.threshold < 0.0 {
            return Err(format!(
                "threshold must be a non-negative percentage, got {}",
                self.compare.threshold
            ));
        }

        if self.noise_threshold < 0.0 {
            return Err(format!(
                "noise_threshold must be non-negative, got {}",
                self.noise_threshold
            ));
        }

        Ok(())
    }
}
