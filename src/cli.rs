//! CLI argument parsing for perfledger

use crate::compare::BaselinePolicy;
use crate::model::Tool;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Output format for reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text format (default)
    Text,
    /// JSON format for machine parsing
    Json,
    /// Markdown tables for PR comments
    Markdown,
}

#[derive(Parser, Debug)]
#[command(name = "perfledger")]
#[command(version)]
#[command(
    about = "Benchmark history ledger with percentile aggregation and regression gating",
    long_about = None
)]
pub struct Cli {
    /// Enable debug tracing output to stderr
    #[arg(long = "debug", global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Ingest run results, store them and gate on regressions
    ///
    /// Exit status: 0 no regression, 1 regression, 2 invalid input.
    Check(CheckArgs),

    /// Reduce a JSON array of raw samples to one percentile value
    Aggregate(AggregateArgs),

    /// List stored entries
    Query(QueryArgs),

    /// Compare a stored entry against its baseline without ingesting
    Compare(CompareArgs),
}

#[derive(clap::Args, Debug)]
pub struct CheckArgs {
    /// Run result files (JSON)
    #[arg(required = true, value_name = "RESULTS")]
    pub results: Vec<PathBuf>,

    /// History store (`.json`, or `.js` for the dashboard script form)
    #[arg(long, value_name = "FILE")]
    pub store: PathBuf,

    /// Suite the results belong to
    #[arg(long)]
    pub suite: String,

    /// Suite configuration (TOML)
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Tool every entry of the suite must report
    #[arg(long, value_parser = parse_tool)]
    pub tool: Option<Tool>,

    #[command(flatten)]
    pub aggregation: AggregationArgs,

    /// Regression threshold in percent
    #[arg(long)]
    pub threshold: Option<f64>,

    /// Baseline policy: previous, commit:<id> or median:<n>
    #[arg(long, value_parser = parse_baseline)]
    pub baseline: Option<BaselinePolicy>,

    /// Validate and compare without writing to the store
    #[arg(long)]
    pub dry_run: bool,

    #[arg(long, value_enum, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(clap::Args, Debug, Default)]
pub struct AggregationArgs {
    /// Percentile used to aggregate raw samples (0-100)
    #[arg(long)]
    pub percentile: Option<f64>,

    /// Leading cold-start samples to discard
    #[arg(long)]
    pub skip: Option<usize>,
}

#[derive(clap::Args, Debug)]
pub struct AggregateArgs {
    /// JSON file holding an array of samples, or `-` for stdin
    #[arg(value_name = "SAMPLES")]
    pub samples: PathBuf,

    /// Bench name
    #[arg(long)]
    pub name: String,

    #[arg(long)]
    pub unit: String,

    #[command(flatten)]
    pub aggregation: AggregationArgs,
}

#[derive(clap::Args, Debug)]
pub struct QueryArgs {
    #[arg(long, value_name = "FILE")]
    pub store: PathBuf,

    /// Suite to list; all suite names when omitted
    #[arg(long)]
    pub suite: Option<String>,

    #[arg(long, value_enum, default_value = "json")]
    pub format: OutputFormat,
}

#[derive(clap::Args, Debug)]
pub struct CompareArgs {
    #[arg(long, value_name = "FILE")]
    pub store: PathBuf,

    #[arg(long)]
    pub suite: String,

    /// Commit to compare; the newest entry when omitted
    #[arg(long)]
    pub commit: Option<String>,

    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    #[arg(long)]
    pub threshold: Option<f64>,

    #[arg(long, value_parser = parse_baseline)]
    pub baseline: Option<BaselinePolicy>,

    #[arg(long, value_enum, default_value = "text")]
    pub format: OutputFormat,
}

fn parse_tool(s: &str) -> Result<Tool, String> {
    s.parse()
}

fn parse_baseline(s: &str) -> Result<BaselinePolicy, String> {
    s.parse()
}
