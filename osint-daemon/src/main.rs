//! osint-daemon - Background daemon for scheduled collection
//!
//! Loads the persisted tasks, runs them when due and keeps the proxy pool's
//! health up to date until SIGINT/SIGTERM.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use libosint::logging::LoggingConfig;
use libosint::service::OsintService;
use libosint::{Config, OsintError};
use std::time::Duration;
use tracing::{error, info};

const ANALYSIS_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Parser, Debug)]
#[command(name = "osint-daemon")]
#[command(version)]
#[command(about = "Background daemon running scheduled collection tasks")]
#[command(long_about = "\
osint-daemon - Background daemon for scheduled collection

DESCRIPTION:
    osint-daemon is a long-running process that evaluates the task table on
    a fixed tick and collects every target of each due task through the
    shared pipeline. Tasks that became overdue while the daemon was down run
    once on startup, then continue on their schedule.

    Stored results are announced on the event bus for analysis consumers;
    the daemon logs each one at info level.

USAGE:
    # Run in foreground (logs to stderr)
    osint-daemon

    # Evaluate due tasks every 10 seconds
    osint-daemon --tick 10

    # JSON logs for a log shipper
    OSINT_LOG_FORMAT=json osint-daemon

SIGNALS:
    SIGTERM, SIGINT - Graceful shutdown (cancels in-flight jobs, records
                      their outcome and flushes stored results)

CONFIGURATION:
    Configuration file: ~/.config/osint/config.toml

    [scheduler]
    tick_interval = 60     # seconds between due-task evaluations

    [collection]
    workers = 5            # concurrent jobs
    max_attempts = 3

EXIT CODES:
    0 - Clean shutdown
    1 - Runtime error
    2 - Configuration or database error
")]
struct Cli {
    /// Seconds between due-task evaluations (overrides config)
    #[arg(long, value_name = "SECONDS")]
    tick: Option<u64>,

    /// Enable verbose logging to stderr
    #[arg(short, long)]
    verbose: bool,

    /// Run due tasks once and exit (for testing)
    #[arg(long, hide = true)]
    once: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    LoggingConfig::from_env("info", cli.verbose).init();

    if let Err(e) = run(cli).await {
        error!("{:#}", e);
        eprintln!("Error: {:#}", e);
        let code = e
            .downcast_ref::<OsintError>()
            .map(OsintError::exit_code)
            .unwrap_or(1);
        std::process::exit(code);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = Config::load()?;
    if let Some(tick) = cli.tick {
        config.scheduler.tick_interval = tick;
        config.validate()?;
    }

    info!("osint-daemon starting");
    let service = OsintService::from_config(config).await?;
    info!(
        tasks = service.scheduler().list_tasks().len(),
        tick_secs = service.config().scheduler.tick_interval,
        "tasks loaded"
    );

    let analysis = service.events().on_result_stored(|summary| {
        info!(
            target = %summary.target,
            items = summary.item_count,
            success = summary.success,
            "result ready for analysis"
        );
    });

    if cli.once {
        let runs = service.scheduler().run_due_tasks(Utc::now()).await?;
        info!(runs = runs.len(), "processed due tasks once, exiting");
    } else {
        let handle = service.start();
        wait_for_shutdown().await?;
        info!("shutdown requested, stopping scheduler");
        handle.stop(&service).await;
    }

    service.shutdown().await;

    // The listener drains once the last event sender is gone
    drop(service);
    if tokio::time::timeout(ANALYSIS_DRAIN_TIMEOUT, analysis).await.is_err() {
        info!("analysis listener still busy, not waiting");
    }
    info!("osint-daemon stopped");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown() -> Result<()> {
    use futures::StreamExt;
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook_tokio::Signals;

    let mut signals =
        Signals::new([SIGINT, SIGTERM]).context("failed to install signal handlers")?;
    let handle = signals.handle();

    if let Some(signal) = signals.next().await {
        info!(signal, "received shutdown signal");
    }
    handle.close();
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_shutdown() -> Result<()> {
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    Ok(())
}
