//! Jobrank demo driver.
//!
//! Registers the configured priorities, schedules a small workload from a
//! producer task while the worker pool runs, and prints every completion with
//! its original and final priority.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use colored::*;
use parking_lot::Mutex;
use serde::Serialize;
use tabled::{
    settings::{object::Columns, Alignment, Modify, Style},
    Table, Tabled,
};

use jobrank_core::prelude::*;
use jobrank_core::telemetry::{init_logging, init_metrics};

// ═══════════════════════════════════════════════════════════════════════════════
// CLI Structure
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Parser)]
#[command(
    name = "jobrank-demo",
    version,
    about = "Run a sample workload through the aging priority scheduler"
)]
struct Cli {
    /// Configuration file path (TOML)
    #[arg(short, long, env = "JOBRANK_CONFIG")]
    config: Option<PathBuf>,

    /// Number of workers; overrides the configuration
    #[arg(short, long)]
    workers: Option<usize>,

    /// How long the pool runs before shutting down
    #[arg(short, long, default_value = "1s", value_parser = parse_duration)]
    duration: Duration,

    /// How long each job works
    #[arg(long, default_value = "50ms", value_parser = parse_duration)]
    work: Duration,

    /// Extra jobs scheduled at the least urgent priority to show aging
    #[arg(long, default_value_t = 0)]
    backlog: usize,

    /// Output format
    #[arg(short, long, default_value = "table")]
    format: OutputFormat,

    /// Print the effective configuration and exit
    #[arg(long)]
    print_config: bool,

    /// Print Prometheus metrics after the run
    #[arg(long)]
    metrics: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Disable colored output
    #[arg(long)]
    no_color: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum, Default)]
enum OutputFormat {
    /// Render as a formatted table
    #[default]
    Table,
    /// Render as JSON
    Json,
}

fn parse_duration(value: &str) -> std::result::Result<Duration, String> {
    humantime_serde::re::humantime::parse_duration(value).map_err(|e| e.to_string())
}

// ═══════════════════════════════════════════════════════════════════════════════
// Output
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Serialize, Tabled)]
struct CompletionRow {
    #[tabled(rename = "#")]
    order: usize,
    #[tabled(rename = "Job")]
    label: String,
    #[tabled(rename = "Scheduled")]
    original: String,
    #[tabled(rename = "Picked Up")]
    priority: String,
    #[tabled(rename = "Waited")]
    waited: String,
    #[tabled(rename = "Promotions")]
    promotions: u32,
    #[tabled(rename = "Worker")]
    worker: usize,
    #[tabled(rename = "Status")]
    status: String,
}

impl CompletionRow {
    fn new(order: usize, done: &CompletedJob) -> Self {
        let priority = if done.was_promoted() {
            done.priority.to_string().yellow().to_string()
        } else {
            done.priority.to_string()
        };
        let status = match done.result.error() {
            Some(error) => format!("{} {}", "failed".red(), error),
            None => "ok".green().to_string(),
        };
        Self {
            order,
            label: done.job.label().unwrap_or("-").to_string(),
            original: done.original_priority.to_string(),
            priority,
            waited: format!("{:.1?}", done.waited),
            promotions: done.promotions,
            worker: done.worker,
            status,
        }
    }
}

fn print_rows(rows: &[CompletionRow], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Table => {
            if rows.is_empty() {
                println!("{}", "No jobs completed.".dimmed());
                return Ok(());
            }
            let table = Table::new(rows)
                .with(Style::rounded())
                .with(Modify::new(Columns::first()).with(Alignment::right()))
                .to_string();
            println!("{}", table);
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(rows)?);
        }
    }
    Ok(())
}

fn print_info(message: &str) {
    println!("{} {}", "[INFO]".blue().bold(), message);
}

// ═══════════════════════════════════════════════════════════════════════════════
// Workload
// ═══════════════════════════════════════════════════════════════════════════════

fn sleeper(label: &str, work: Duration, value: Option<&'static str>) -> Arc<Job> {
    Job::labeled(label, move |token: CancelToken| async move {
        tokio::select! {
            _ = tokio::time::sleep(work) => {}
            _ = token.stopped() => {}
        }
        value.map(JobResult::value)
    })
}

/// Schedules the sample workload with short gaps, the way a live producer would.
async fn produce(
    scheduler: Scheduler,
    levels: Vec<Priority>,
    background_job: Arc<Job>,
    work: Duration,
    backlog: usize,
) -> jobrank_core::Result<()> {
    let (Some(most_urgent), Some(least_urgent)) = (levels.first(), levels.last()) else {
        return Ok(());
    };
    let middle = levels.get(levels.len() / 2).unwrap_or(most_urgent);
    let gap = Duration::from_millis(20);

    tokio::time::sleep(gap).await;
    scheduler.schedule(least_urgent, background_job)?;

    for i in 0..backlog {
        scheduler.schedule(least_urgent, sleeper(&format!("backlog-{}", i + 1), work, None))?;
    }

    tokio::time::sleep(gap).await;
    scheduler.schedule(most_urgent, sleeper("urgent", work, None))?;

    tokio::time::sleep(gap).await;
    scheduler.schedule(middle, sleeper("necessary", work, None))?;

    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════════════
// Main
// ═══════════════════════════════════════════════════════════════════════════════

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    if cli.no_color {
        colored::control::set_override(false);
    }

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(workers) = cli.workers {
        config.scheduler.workers = workers;
    }
    if cli.verbose {
        config.telemetry.logging.level = "debug".to_string();
    }

    if cli.print_config {
        print!("{}", config.to_toml_string()?);
        return Ok(());
    }

    init_logging(&config.telemetry.logging)?;
    let registry = if cli.metrics {
        Some(init_metrics(
            &config.telemetry.metrics,
            &config.telemetry.service_name,
        )?)
    } else {
        None
    };

    let scheduler = config.scheduler.build()?;
    let levels = scheduler.priorities();

    let rows = Arc::new(Mutex::new(Vec::new()));
    let sink = rows.clone();
    scheduler.set_completion_hook(move |done| {
        let mut rows = sink.lock();
        let order = rows.len() + 1;
        rows.push(CompletionRow::new(order, done));
    })?;

    print_info(&format!(
        "Running {} worker(s) for {:?} over {}",
        config.scheduler.workers,
        cli.duration,
        levels
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    ));

    let background_job = sleeper("background", cli.work, Some("background"));
    let producer = tokio::spawn(produce(
        scheduler.clone(),
        levels,
        background_job.clone(),
        cli.work,
        cli.backlog,
    ));

    let token = CancelToken::with_timeout(cli.duration);
    match scheduler.run(&token, config.scheduler.workers).await {
        Err(error) if error.is_interruption() => {}
        Err(error) => return Err(error.into()),
        Ok(()) => {}
    }
    producer.await??;

    print_rows(&rows.lock(), cli.format)?;

    let grace = CancelToken::with_timeout(Duration::from_millis(100));
    match background_job.wait_result(&grace).await {
        Some(result) => match result.get_value::<&'static str>() {
            Ok(value) => print_info(&format!("Result of background job: {}", value)),
            Err(error) => print_info(&format!("Background job returned no value: {}", error)),
        },
        None => print_info("Background job did not finish in time"),
    }

    let stats = scheduler.stats();
    print_info(&format!(
        "executed={} failed={} promoted={} pending={}",
        stats.executed, stats.failed, stats.queue.promoted_total, stats.queue.pending
    ));

    if let Some(registry) = registry {
        print!("{}", registry.render());
    }

    Ok(())
}
