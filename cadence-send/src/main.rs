//! cadence-send - Background daemon for scheduled publishing
//!
//! Publishes posts when they come due, retries failures with backoff, and
//! captures engagement metrics at fixed checkbacks after publication.

use clap::Parser;
use libcadence::analytics::rapidapi::RapidApiClient;
use libcadence::error::ConfigError;
use libcadence::logging;
use libcadence::platforms::blotato::BlotatoClient;
use libcadence::scheduler::{shutdown_channel, ShutdownTrigger};
use libcadence::{
    CadenceError, Config, Database, MetricsCollectorTask, Result, ScheduledJob,
    ScheduledPublishTask, Scheduler,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "cadence-send")]
#[command(version)]
#[command(about = "Background daemon for scheduled publishing")]
#[command(long_about = "\
cadence-send - Background daemon for scheduled publishing

DESCRIPTION:
    cadence-send is a long-running daemon that publishes posts from the
    Cadence queue when they come due.

    Every poll it recovers abandoned publish attempts, claims due posts,
    and publishes them through Blotato. Failed attempts are retried with
    exponential backoff until the retry budget is spent. Once a post is
    live, its views, likes, comments and shares are captured 1h, 6h, 24h,
    72h and 168h after publication.

USAGE:
    # Run in foreground (logs to stderr)
    cadence-send

    # Poll every 30 seconds, collect metrics every 10 minutes
    cadence-send --poll-interval 30 --metrics-interval 600

    # Run each task once and exit
    cadence-send --once

SIGNALS:
    SIGTERM, SIGINT - Graceful shutdown (running cycles finish first)

CONFIGURATION:
    Configuration file: ~/.config/cadence/config.toml
    Override with CADENCE_CONFIG; database path with CADENCE_DB_PATH.

    [scheduling]
    poll_interval = 60      # seconds between publish cycles
    metrics_interval = 300  # seconds between metrics cycles
    max_attempts = 5        # attempts before a post is marked failed

    [blotato]
    api_key = \"...\"        # or CADENCE_BLOTATO_API_KEY

    [analytics]
    api_key = \"...\"        # or CADENCE_RAPIDAPI_KEY

EXIT CODES:
    0 - Clean shutdown
    1 - Runtime error
    2 - Configuration or database error
")]
struct Cli {
    /// Poll interval in seconds (overrides config)
    #[arg(long, value_name = "SECONDS")]
    poll_interval: Option<u64>,

    /// Metrics collection interval in seconds (overrides config)
    #[arg(long, value_name = "SECONDS")]
    metrics_interval: Option<u64>,

    /// Enable verbose logging to stderr
    #[arg(short, long)]
    verbose: bool,

    /// Run every task once and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    logging::init_default(cli.verbose);

    if let Err(e) = run(cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(e.exit_code());
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load()?;
    let db = Database::new(&config.database.path).await?;

    let scheduling = &config.scheduling;
    let poll_interval = cli
        .poll_interval
        .unwrap_or(scheduling.poll_interval)
        .max(1);
    let metrics_interval = cli
        .metrics_interval
        .unwrap_or(scheduling.metrics_interval)
        .max(1);

    let blotato = config
        .blotato
        .as_ref()
        .ok_or_else(|| ConfigError::MissingField("[blotato] section".to_string()))?;
    let publisher = Arc::new(BlotatoClient::from_config(blotato)?);

    let publish_task =
        ScheduledPublishTask::new(db.clone(), publisher, scheduling.retry_policy())
            .with_concurrency(scheduling.concurrency)
            .with_stale_claim_timeout(scheduling.stale_claim_timeout());

    let mut jobs = vec![ScheduledJob::new(
        Arc::new(publish_task),
        Duration::from_secs(poll_interval),
    )];

    match config.analytics.as_ref() {
        Some(analytics) => {
            let fetcher = Arc::new(RapidApiClient::from_config(analytics)?);
            let metrics_task = MetricsCollectorTask::new(db.clone(), fetcher)
                .with_concurrency(scheduling.concurrency);
            jobs.push(ScheduledJob::new(
                Arc::new(metrics_task),
                Duration::from_secs(metrics_interval),
            ));
        }
        None => warn!("No [analytics] section configured; metrics collection disabled"),
    }

    let scheduler = Scheduler::new(jobs);

    if cli.once {
        let failures = scheduler.run_once().await;
        info!("cadence-send: ran every task once, exiting");
        if failures > 0 {
            return Err(CadenceError::Runtime(format!(
                "{} task(s) failed during the run",
                failures
            )));
        }
        return Ok(());
    }

    info!(
        poll_interval,
        metrics_interval,
        jobs = scheduler.jobs().len(),
        "cadence-send daemon starting"
    );

    let (trigger, shutdown) = shutdown_channel();
    setup_signal_handlers(trigger)?;

    scheduler.run(shutdown).await;

    info!("cadence-send daemon stopped");
    Ok(())
}

/// Set up signal handlers for graceful shutdown
#[cfg(unix)]
fn setup_signal_handlers(trigger: ShutdownTrigger) -> Result<()> {
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM])
        .map_err(|e| CadenceError::Runtime(format!("Signal setup failed: {}", e)))?;

    std::thread::spawn(move || {
        if let Some(sig) = signals.forever().next() {
            info!(signal = sig, "Received shutdown signal, stopping gracefully...");
            trigger.trigger();
        }
    });

    Ok(())
}

#[cfg(not(unix))]
fn setup_signal_handlers(trigger: ShutdownTrigger) -> Result<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl-C, stopping gracefully...");
            trigger.trigger();
        }
    });
    Ok(())
}
