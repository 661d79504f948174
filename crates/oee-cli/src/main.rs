use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use oee_api::{OeeApi, RangeQuery};
use oee_core::{timestamp, Frequency, NewProductionRecord, ProductionRecord, RecordMetrics};
use serde_json::Value;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

const CLI_CONTRACT_VERSION: &str = "cli.v1";

#[derive(Debug, Parser)]
#[command(name = "oee")]
#[command(about = "OEE production record CLI")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the CSV upload template.
    Template,
    /// Validate a CSV file without storing it anywhere.
    Check(CheckArgs),
    /// Bucketed OEE series for a CSV file.
    Summary(SummaryArgs),
    /// Print generated sample records as CSV.
    Sample(SampleArgs),
    /// OEE metrics for one set of counters.
    Metrics(MetricsArgs),
}

#[derive(Debug, Args)]
struct CheckArgs {
    #[arg(long)]
    file: PathBuf,
}

#[derive(Debug, Args)]
struct SummaryArgs {
    #[arg(long)]
    file: PathBuf,
    #[arg(long, value_enum, default_value_t = FrequencyArg::Day)]
    frequency: FrequencyArg,
    #[arg(long)]
    start: Option<String>,
    #[arg(long)]
    end: Option<String>,
}

#[derive(Debug, Args)]
struct SampleArgs {
    #[arg(long, default_value_t = 10)]
    count: u32,
}

#[derive(Debug, Args)]
struct MetricsArgs {
    #[arg(long)]
    planned: u32,
    #[arg(long)]
    actual: u32,
    #[arg(long)]
    ideal_cycle_time: f64,
    #[arg(long)]
    total: u32,
    #[arg(long)]
    good: u32,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum FrequencyArg {
    Hour,
    Day,
    Week,
    Month,
}

impl From<FrequencyArg> for Frequency {
    fn from(value: FrequencyArg) -> Self {
        match value {
            FrequencyArg::Hour => Self::Hour,
            FrequencyArg::Day => Self::Day,
            FrequencyArg::Week => Self::Week,
            FrequencyArg::Month => Self::Month,
        }
    }
}

fn with_contract_version(value: Value) -> Value {
    match value {
        Value::Object(mut object) => {
            object.insert(
                "contract_version".to_string(),
                Value::String(CLI_CONTRACT_VERSION.to_string()),
            );
            Value::Object(object)
        }
        other => serde_json::json!({
            "contract_version": CLI_CONTRACT_VERSION,
            "payload": other
        }),
    }
}

fn emit_json(value: Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&with_contract_version(value))?);
    Ok(())
}

fn read_csv(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("failed to read CSV file {}", path.display()))
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Template => {
            print!("{}", oee_api::csv::template());
            Ok(())
        }
        Command::Check(args) => run_check(&args),
        Command::Summary(args) => run_summary(&args),
        Command::Sample(args) => run_sample(&args),
        Command::Metrics(args) => run_metrics(&args),
    }
}

fn run_check(args: &CheckArgs) -> Result<()> {
    let records = oee_api::csv::parse(&read_csv(&args.file)?)?;
    let earliest = records.iter().filter_map(|record| record.start_of_order).min();
    let latest = records.iter().filter_map(|record| record.start_of_order).max();
    emit_json(serde_json::json!({
        "file": args.file.display().to_string(),
        "records": records.len(),
        "earliest_start_of_order": earliest.map(timestamp::format_local).transpose()?,
        "latest_start_of_order": latest.map(timestamp::format_local).transpose()?
    }))
}

fn run_summary(args: &SummaryArgs) -> Result<()> {
    let api = OeeApi::new();
    let report = api.ingest_csv(&read_csv(&args.file)?)?;

    let query = RangeQuery {
        start: Some(range_bound(args.start.as_deref(), &report.records, std::cmp::min)?),
        end: Some(range_bound(args.end.as_deref(), &report.records, std::cmp::max)?),
        frequency: Some(Frequency::from(args.frequency).as_str().to_string()),
    };

    let summary = api.summary(&query)?;
    emit_json(serde_json::to_value(summary)?)
}

/// An explicit bound wins; otherwise the earliest or latest record bounds the range.
fn range_bound(
    explicit: Option<&str>,
    records: &[ProductionRecord],
    pick: fn(OffsetDateTime, OffsetDateTime) -> OffsetDateTime,
) -> Result<String> {
    if let Some(value) = explicit {
        return Ok(value.to_string());
    }
    let at = records
        .iter()
        .map(ProductionRecord::start_of_order)
        .reduce(pick)
        .ok_or_else(|| anyhow!("CSV file contained no records"))?;
    Ok(at.format(&Rfc3339)?)
}

fn run_sample(args: &SampleArgs) -> Result<()> {
    let inputs =
        oee_api::sample::generate(args.count, OffsetDateTime::now_utc(), &mut rand::thread_rng())?;
    let api = OeeApi::new();
    let mut records = Vec::with_capacity(inputs.len());
    for input in inputs {
        records.push(api.add_record(input)?);
    }
    print!("{}", oee_api::csv::render(&records)?);
    Ok(())
}

fn run_metrics(args: &MetricsArgs) -> Result<()> {
    let input = NewProductionRecord {
        start_of_order: None,
        planned_production_time: args.planned,
        actual_production_time: args.actual,
        ideal_cycle_time: args.ideal_cycle_time,
        total_pieces: args.total,
        good_pieces: args.good,
    };
    let run = input.resolve(OffsetDateTime::now_utc())?;
    emit_json(serde_json::to_value(RecordMetrics::from_run(&run))?)
}
