use anyhow::{Context, Result};
use clap::Parser;
use perfledger::aggregate::{aggregate, AggregationPolicy};
use perfledger::cli::{AggregateArgs, CheckArgs, Cli, Command, CompareArgs, OutputFormat, QueryArgs};
use perfledger::compare::compare;
use perfledger::config::{Config, Overrides};
use perfledger::ingest::{Ingestor, Verdict};
use perfledger::report;
use perfledger::store::{FileStore, HistoryStore};
use std::io::Read as _;
use std::path::Path;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber; warnings always reach stderr
fn init_tracing(debug: bool) {
    let filter = if debug {
        EnvFilter::from_default_env().add_directive(tracing::Level::TRACE.into())
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Ok(Config::from_file(path)?),
        None => Ok(Config::default()),
    }
}

fn run_check(args: CheckArgs) -> Result<Verdict> {
    let config = load_config(args.config.as_deref())?;
    let settings = config.resolve(
        &args.suite,
        &Overrides {
            tool: args.tool,
            percentile: args.aggregation.percentile,
            skip: args.aggregation.skip,
            threshold: args.threshold,
            baseline: args.baseline,
        },
    )?;
    tracing::debug!(suite = %args.suite, ?settings, "resolved settings");

    let store = FileStore::new(&args.store);
    let batch = Ingestor::new(&store, &args.suite, settings)
        .dry_run(args.dry_run)
        .ingest_files(&args.results);

    let rendered = match args.format {
        OutputFormat::Text => report::batch_text(&batch),
        OutputFormat::Json => report::to_json(&batch)?,
        OutputFormat::Markdown => report::batch_markdown(&batch),
    };
    println!("{}", rendered);

    if let Some(failure) = &batch.store_failure {
        eprintln!(
            "Error: history store {}: {}{}",
            args.store.display(),
            failure.reason,
            if failure.retryable { " (retry the job)" } else { "" }
        );
    }

    Ok(batch.verdict())
}

fn read_samples(path: &Path) -> Result<Vec<f64>> {
    let text = if path == Path::new("-") {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("failed to read samples from stdin")?;
        buf
    } else {
        std::fs::read_to_string(path)
            .with_context(|| format!("failed to read samples file {}", path.display()))?
    };
    serde_json::from_str(&text).context("samples must be a JSON array of numbers")
}

fn run_aggregate(args: AggregateArgs) -> Result<Verdict> {
    let defaults = AggregationPolicy::default();
    let policy = AggregationPolicy::new(
        args.aggregation.percentile.unwrap_or(defaults.percentile),
        args.aggregation.skip.unwrap_or(defaults.skip),
    );
    let samples = read_samples(&args.samples)?;
    let bench = aggregate(&args.name, &args.unit, &samples, &policy)?;
    println!("{}", report::to_json(&bench)?);
    Ok(Verdict::Clean)
}

fn run_query(args: QueryArgs) -> Result<Verdict> {
    let store = FileStore::new(&args.store);

    let Some(suite) = args.suite else {
        let suites = store.suites()?;
        match args.format {
            OutputFormat::Json => println!("{}", report::to_json(&suites)?),
            OutputFormat::Text | OutputFormat::Markdown => {
                for suite in suites {
                    println!("{}", suite);
                }
            }
        }
        return Ok(Verdict::Clean);
    };

    let entries = store.query(&suite)?;
    let rendered = match args.format {
        OutputFormat::Text => report::entries_text(&suite, &entries),
        OutputFormat::Json => report::to_json(&entries)?,
        OutputFormat::Markdown => report::entries_markdown(&suite, &entries),
    };
    println!("{}", rendered);
    Ok(Verdict::Clean)
}

fn run_compare(args: CompareArgs) -> Result<Verdict> {
    let config = load_config(args.config.as_deref())?;
    let settings = config.resolve(
        &args.suite,
        &Overrides {
            threshold: args.threshold,
            baseline: args.baseline,
            ..Overrides::default()
        },
    )?;

    let history = FileStore::new(&args.store).query(&args.suite)?;
    let entry = match &args.commit {
        Some(id) => history
            .iter()
            .find(|e| e.commit_id() == id)
            .with_context(|| format!("commit '{}' not found in suite '{}'", id, args.suite))?,
        None => history
            .last()
            .with_context(|| format!("suite '{}' has no entries", args.suite))?,
    };

    let report = compare(&args.suite, entry, &history, &settings.compare)?;
    let rendered = match args.format {
        OutputFormat::Text => report::report_text(&report),
        OutputFormat::Json => report::to_json(&report)?,
        OutputFormat::Markdown => report::report_markdown(&report),
    };
    println!("{}", rendered);

    Ok(if report.has_regression() {
        Verdict::Regression
    } else {
        Verdict::Clean
    })
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    let result = match cli.command {
        Command::Check(args) => run_check(args),
        Command::Aggregate(args) => run_aggregate(args),
        Command::Query(args) => run_query(args),
        Command::Compare(args) => run_compare(args),
    };

    match result {
        Ok(verdict) => verdict.into(),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            Verdict::InvalidInput.into()
        }
    }
}
