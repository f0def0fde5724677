//! CLI command definitions for jobmill.
//!
//! Two commands drive the library end to end: `bench` pushes a batch of
//! synthetic jobs through a [`Manager`], and `cron` runs a recurring job on
//! a [`CronScheduler`] while printing its result events.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use clap::Parser;
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use crate::cron::{CronEvent, CronOutcome, CronScheduler};
use crate::error::JobFailure;
use crate::metrics::{export_metrics, init_metrics};
use crate::scheduler::{
    Config, Job, JobHandle, JobOk, JobQueue, JobResult, Manager, MemoryQueue, PoolStats,
    ENV_MAX_ATTEMPTS, ENV_MAX_PARALLEL_JOBS, ENV_SLEEP_AFTER_CHECK_MS,
};

/// Queue name used by the bench command, visible in logs and metrics.
const BENCH_QUEUE_NAME: &str = "bench";

/// Bounded-concurrency job execution engine.
#[derive(Parser)]
#[command(name = "jobmill")]
#[command(about = "Run jobs on a fixed-size worker pool with retry and recurring schedules")]
#[command(version)]
#[command(
    long_about = "jobmill runs jobs from a shared FIFO queue on a fixed number of workers, re-enqueues failures up to a retry limit, and can drain the queue to completion.\n\nExample usage:\n  jobmill bench --jobs 5000 --parallel 50 --job-ms 500\n  jobmill cron --name heartbeat --every-ms 1000 --for-secs 10"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,

    /// Print Prometheus metrics after the command finishes.
    #[arg(long, global = true)]
    pub metrics: bool,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Enqueue synthetic jobs and drain (or stop) the pool.
    Bench(BenchArgs),

    /// Run a recurring job and print its result events.
    Cron(CronArgs),
}

/// Arguments for `jobmill bench`.
#[derive(Parser, Debug, Clone)]
pub struct BenchArgs {
    /// Number of jobs to enqueue.
    #[arg(short = 'n', long, default_value = "1000")]
    pub jobs: usize,

    /// Number of workers.
    #[arg(short = 'p', long, default_value = "5", env = ENV_MAX_PARALLEL_JOBS)]
    pub parallel: usize,

    /// Idle backoff of a worker that found the queue empty, in milliseconds.
    #[arg(long, default_value = "100", env = ENV_SLEEP_AFTER_CHECK_MS, allow_hyphen_values = true)]
    pub sleep_after_check_ms: i64,

    /// Duration of every synthetic job, in milliseconds.
    #[arg(long, default_value = "10")]
    pub job_ms: u64,

    /// Every K-th job always fails (0 disables failures).
    #[arg(long, default_value = "0")]
    pub fail_every: usize,

    /// Maximum executions per job.
    #[arg(short = 'a', long, default_value = "1", env = ENV_MAX_ATTEMPTS)]
    pub max_attempts: u32,

    /// Stop after this many milliseconds instead of draining.
    #[arg(long)]
    pub stop_after_ms: Option<u64>,

    /// Output the report as JSON.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Arguments for `jobmill cron`.
#[derive(Parser, Debug, Clone)]
pub struct CronArgs {
    /// Name of the recurring job.
    #[arg(long, default_value = "heartbeat")]
    pub name: String,

    /// Interval between the end of a run and the next enqueue, in milliseconds.
    #[arg(long, default_value = "1000")]
    pub every_ms: u64,

    /// How long to keep the scheduler running, in seconds.
    #[arg(long, default_value = "10")]
    pub for_secs: u64,

    /// Duration of every run, in milliseconds.
    #[arg(long, default_value = "0")]
    pub job_ms: u64,

    /// Every K-th run fails (0 disables failures).
    #[arg(long, default_value = "0")]
    pub fail_every: u64,

    /// Print each event as a JSON line.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Parse CLI arguments and return the Cli struct.
///
/// This allows main.rs to access CLI arguments (like log_level) before running commands.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    if cli.metrics {
        init_metrics()?;
    }

    match cli.command {
        Commands::Bench(args) => run_bench_command(args).await?,
        Commands::Cron(args) => run_cron_command(args).await?,
    }

    if cli.metrics {
        print!("{}", export_metrics());
    }
    Ok(())
}

// ============================================================================
// Bench
// ============================================================================

/// Job that sleeps for a fixed time and then succeeds or fails.
struct SyntheticJob {
    id: String,
    duration: Duration,
    fails: bool,
}

#[async_trait]
impl Job for SyntheticJob {
    fn id(&self) -> &str {
        &self.id
    }

    async fn run(&self) -> JobResult {
        tokio::time::sleep(self.duration).await;
        if self.fails {
            Err(JobFailure::failed(format!("{} is configured to fail", self.id)))
        } else {
            Ok(JobOk::new())
        }
    }
}

/// Summary printed by `jobmill bench`.
#[derive(Debug, Clone, Serialize)]
pub struct BenchReport {
    pub jobs: usize,
    pub parallel: usize,
    pub max_attempts: u32,
    pub drained: bool,
    pub elapsed_ms: u64,
    /// Sum of `total_run` over every enqueued job.
    pub total_run: u64,
    pub remaining_in_queue: usize,
    pub executions: u64,
    pub jobs_succeeded: u64,
    pub jobs_failed: u64,
    pub retries: u64,
    pub average_job_ms: f64,
    pub success_rate: f64,
}

impl BenchReport {
    fn new(
        args: &BenchArgs,
        elapsed: Duration,
        total_run: u64,
        remaining: usize,
        stats: &PoolStats,
    ) -> Self {
        Self {
            jobs: args.jobs,
            parallel: args.parallel,
            max_attempts: args.max_attempts,
            drained: args.stop_after_ms.is_none(),
            elapsed_ms: elapsed.as_millis() as u64,
            total_run,
            remaining_in_queue: remaining,
            executions: stats.executions,
            jobs_succeeded: stats.jobs_succeeded,
            jobs_failed: stats.jobs_failed,
            retries: stats.retries,
            average_job_ms: stats.average_job_duration.as_secs_f64() * 1000.0,
            success_rate: stats.success_rate(),
        }
    }
}

/// Runs a bench to completion and returns its report.
pub async fn execute_bench(args: &BenchArgs) -> anyhow::Result<BenchReport> {
    let config = Config::with_sleep_millis(args.parallel, args.sleep_after_check_ms)?;
    let queue = Arc::new(MemoryQueue::named(BENCH_QUEUE_NAME));
    let manager = Manager::with_max_attempts(queue.clone(), config, args.max_attempts)?;

    let jobs: Vec<JobHandle> = (1..=args.jobs)
        .map(|i| {
            JobHandle::new(SyntheticJob {
                id: format!("job-{}", i),
                duration: Duration::from_millis(args.job_ms),
                fails: args.fail_every > 0 && i % args.fail_every == 0,
            })
        })
        .collect();
    queue.enqueue_batch(jobs.clone());

    info!(
        jobs = args.jobs,
        parallel = args.parallel,
        job_ms = args.job_ms,
        max_attempts = args.max_attempts,
        "Starting bench"
    );

    let started = Instant::now();
    manager.start()?;

    if let Some(stop_after_ms) = args.stop_after_ms {
        tokio::time::sleep(Duration::from_millis(stop_after_ms)).await;
        manager.stop();
    }
    // After a stop this only waits for the workers to exit.
    manager.finish_all_and_stop().await?;
    let elapsed = started.elapsed();

    let total_run: u64 = jobs.iter().map(|job| u64::from(job.total_run())).sum();

    Ok(BenchReport::new(
        args,
        elapsed,
        total_run,
        queue.len(),
        &manager.stats(),
    ))
}

async fn run_bench_command(args: BenchArgs) -> anyhow::Result<()> {
    let report = execute_bench(&args).await?;

    if args.json {
        let json_output = serde_json::to_string_pretty(&report)
            .map_err(|e| anyhow::anyhow!("Failed to serialize bench report: {}", e))?;
        println!("{}", json_output);
        return Ok(());
    }

    println!("\n=== Bench Results ===");
    println!("Jobs:           {}", report.jobs);
    println!("Workers:        {}", report.parallel);
    println!("Max attempts:   {}", report.max_attempts);
    println!(
        "Mode:           {}",
        if report.drained { "drain" } else { "stop" }
    );
    println!("Elapsed:        {}ms", report.elapsed_ms);
    println!("Total runs:     {}", report.total_run);
    println!("Left in queue:  {}", report.remaining_in_queue);
    println!("Succeeded:      {}", report.jobs_succeeded);
    println!("Failed:         {}", report.jobs_failed);
    println!("Retries:        {}", report.retries);
    println!("Avg job time:   {:.1}ms", report.average_job_ms);
    println!("Success rate:   {:.1}%", report.success_rate);

    Ok(())
}

// ============================================================================
// Cron
// ============================================================================

fn format_event(event: &CronEvent) -> String {
    let status = match &event.outcome {
        CronOutcome::Success { detail: Some(detail) } => format!("ok ({})", detail),
        CronOutcome::Success { detail: None } => "ok".to_string(),
        CronOutcome::Failure { message, fault: true } => format!("PANIC: {}", message),
        CronOutcome::Failure { message, .. } => format!("FAIL: {}", message),
    };
    format!(
        "[{}] {} #{} {}",
        event.finished_at.format("%H:%M:%S%.3f"),
        event.job_name,
        event.run_number,
        status
    )
}

async fn run_cron_command(args: CronArgs) -> anyhow::Result<()> {
    let scheduler = CronScheduler::new(Config::from_env()?)?;
    let mut events = scheduler.subscribe();

    let counter = Arc::new(AtomicU64::new(0));
    let job_ms = args.job_ms;
    let fail_every = args.fail_every;
    scheduler.register(
        args.name.clone(),
        Duration::from_millis(args.every_ms),
        move || {
            let run = counter.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if job_ms > 0 {
                    tokio::time::sleep(Duration::from_millis(job_ms)).await;
                }
                if fail_every > 0 && run % fail_every == 0 {
                    Err(JobFailure::failed(format!("run {} is configured to fail", run)))
                } else {
                    Ok(JobOk::with_detail(format!("run {}", run)))
                }
            }
        },
    )?;
    scheduler.start()?;

    let deadline = tokio::time::sleep(Duration::from_secs(args.for_secs));
    tokio::pin!(deadline);

    let mut received = 0_u64;
    loop {
        tokio::select! {
            _ = &mut deadline => break,
            event = events.recv() => match event {
                Ok(event) => {
                    received += 1;
                    if args.json {
                        println!("{}", serde_json::to_string(&event)?);
                    } else {
                        println!("{}", format_event(&event));
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped = skipped, "Event subscriber lagged");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    scheduler.shutdown_and_drain().await?;
    info!(events = received, "Cron command finished");

    Ok(())
}
