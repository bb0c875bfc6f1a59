//! osint-status - Inspect the collection pipeline
//!
//! Shows proxy health, configured rate limits and what has been stored.

use chrono::Utc;
use clap::{Parser, Subcommand};
use libosint::logging;
use libosint::service::OsintService;
use libosint::{OsintError, ProxyHealth, Result, Target};
use tracing::debug;

#[derive(Parser, Debug)]
#[command(name = "osint-status")]
#[command(version)]
#[command(about = "Inspect proxies, rate limits and stored results")]
#[command(long_about = "\
osint-status - Inspect the collection pipeline

COMMANDS:
    proxies  List proxy endpoints and their health (--probe checks them now)
    limits   Show configured per-platform rate limits
    results  Show the most recently stored results
    counts   Count stored results per platform over a recent period

USAGE EXAMPLES:
    osint-status proxies --probe
    osint-status limits --format json
    osint-status results --target instagram:alice --limit 5
    osint-status counts --since 24h

CONFIGURATION:
    Configuration file: ~/.config/osint/config.toml
    Override with environment variables:
        OSINT_CONFIG    - Path to config file
        OSINT_DB_PATH   - Path to database file

EXIT CODES:
    0 - Success
    1 - At least one probed proxy is unreachable
    2 - Database or configuration error
    3 - Invalid input
")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging to stderr
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List proxy endpoints
    Proxies {
        /// Probe every endpoint before reporting
        #[arg(long)]
        probe: bool,

        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show rate limits
    Limits {
        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show recently stored results
    Results {
        /// Only results for this platform:username
        #[arg(short, long)]
        target: Option<String>,

        #[arg(short, long, default_value = "20")]
        limit: usize,

        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Count stored results per platform
    Counts {
        /// Look-back period, e.g. "24h", "7d"
        #[arg(long, default_value = "24h")]
        since: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    logging::init_cli(cli.verbose);

    match run(cli).await {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(e.exit_code());
        }
    }
}

fn check_format(format: &str) -> Result<()> {
    if format != "text" && format != "json" {
        return Err(OsintError::InvalidInput(format!(
            "Invalid format '{}'. Must be 'text' or 'json'",
            format
        )));
    }
    Ok(())
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| OsintError::InvalidInput(format!("Failed to encode output: {}", e)))?;
    println!("{}", json);
    Ok(())
}

/// Returns false when a probe found an unreachable endpoint
async fn run(cli: Cli) -> Result<bool> {
    let service = OsintService::new().await?;

    let outcome = match cli.command {
        Commands::Proxies { probe, format } => cmd_proxies(&service, probe, &format).await,
        Commands::Limits { format } => cmd_limits(&service, &format).map(|_| true),
        Commands::Results {
            target,
            limit,
            format,
        } => cmd_results(&service, target.as_deref(), limit, &format)
            .await
            .map(|_| true),
        Commands::Counts { since } => cmd_counts(&service, &since).await.map(|_| true),
    };

    service.shutdown().await;
    outcome
}

/// Proxy endpoints, optionally probed first
async fn cmd_proxies(service: &OsintService, probe: bool, format: &str) -> Result<bool> {
    check_format(format)?;

    let mut all_reachable = true;
    if probe {
        for (id, health) in service.probe_proxies().await {
            debug!(endpoint = %id, health = %health, "probed");
            if health == ProxyHealth::Unreachable {
                all_reachable = false;
            }
        }
    }

    let endpoints = service.proxy_status();
    if format == "json" {
        print_json(&endpoints)?;
        return Ok(all_reachable);
    }

    if !service.config().proxy.enabled {
        println!("proxy pool disabled (direct connections)");
    }
    for endpoint in &endpoints {
        println!(
            "{} | {} | {} failures | checked {}",
            endpoint.id,
            endpoint.health,
            endpoint.consecutive_failures,
            endpoint
                .last_checked_at
                .map(|at| at.format("%Y-%m-%d %H:%M:%S UTC").to_string())
                .unwrap_or_else(|| "never".to_string())
        );
    }
    Ok(all_reachable)
}

/// Configured rate limits
fn cmd_limits(service: &OsintService, format: &str) -> Result<()> {
    check_format(format)?;
    let limits = service.rate_limit_status();

    if format == "json" {
        return print_json(&limits);
    }

    for limit in &limits {
        println!(
            "{} | {} per {}s | {} remaining",
            limit.platform, limit.max_requests, limit.window_secs, limit.tokens_remaining
        );
    }
    if let Some(default) = service.config().default_rate_limit() {
        println!(
            "default | {} per {}s",
            default.max_requests(),
            default.window().as_secs()
        );
    }
    Ok(())
}

/// Recently stored results
async fn cmd_results(
    service: &OsintService,
    target: Option<&str>,
    limit: usize,
    format: &str,
) -> Result<()> {
    check_format(format)?;
    let target = target.map(|t| t.parse::<Target>()).transpose()?;
    let results = service.recent_results(target.as_ref(), limit).await?;

    if format == "json" {
        return print_json(&results);
    }

    for result in &results {
        let status = match result.error {
            None => "ok".to_string(),
            Some(kind) => kind.to_string(),
        };
        println!(
            "{} | {} | {} | {} items",
            result.fetched_at.format("%Y-%m-%d %H:%M:%S UTC"),
            result.target,
            status,
            result.item_count()
        );
    }
    Ok(())
}

/// Stored results per platform since a look-back period
async fn cmd_counts(service: &OsintService, since: &str) -> Result<()> {
    let period = humantime::parse_duration(since)
        .map_err(|e| OsintError::InvalidInput(format!("Invalid period '{}': {}", since, e)))?;
    let period = chrono::Duration::from_std(period)
        .map_err(|_| OsintError::InvalidInput(format!("Period '{}' is too long", since)))?;

    let counts = service
        .database()
        .result_counts_since(Utc::now() - period)
        .await?;
    for (platform, count) in counts {
        println!("{}\t{}", platform, count);
    }
    Ok(())
}
