//! osint-fetch - Collect public profile data now
//!
//! Runs one collection job per target through the shared pipeline (rate
//! limits, proxies, retries) and stores the results.

use clap::Parser;
use futures::future::join_all;
use libosint::logging;
use libosint::service::OsintService;
use libosint::{JobOutcome, OsintError, ProxyPreference, Result, Target};
use std::io::{IsTerminal, Read};

#[derive(Parser, Debug)]
#[command(name = "osint-fetch")]
#[command(version)]
#[command(about = "Collect public profile data for one or more targets")]
#[command(long_about = "\
osint-fetch - Collect public profile data now

DESCRIPTION:
    osint-fetch runs one collection job per target immediately, honouring the
    configured per-platform rate limits, proxy pool and retry policy. Results
    are stored in the database (and the JSON output directory, if configured).

    Targets are written as platform:username. When no targets are given on
    the command line they are read from stdin, one per line.

USAGE EXAMPLES:
    # Fetch one profile
    osint-fetch demo:alice

    # Fetch several profiles through Tor, at most 5 items each
    osint-fetch --proxy tor --max-items 5 demo:alice demo:bob

    # Read targets from a file, JSON output
    cat targets.txt | osint-fetch --format json

CONFIGURATION:
    Configuration file: ~/.config/osint/config.toml
    Override with environment variables:
        OSINT_CONFIG    - Path to config file
        OSINT_DB_PATH   - Path to database file

EXIT CODES:
    0 - Every target produced data
    1 - At least one target failed or was cancelled
    2 - Database or configuration error
    3 - Invalid input (bad target, unsupported platform, etc.)
")]
struct Cli {
    /// Targets as platform:username
    #[arg(value_name = "TARGET")]
    targets: Vec<String>,

    /// Maximum items per target (default from config)
    #[arg(short = 'n', long)]
    max_items: Option<usize>,

    /// Proxy preference: none, http, socks5 or tor
    #[arg(short, long, default_value = "none")]
    proxy: String,

    /// Output format: text or json
    #[arg(short, long, default_value = "text")]
    format: String,

    /// Enable verbose logging to stderr
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    logging::init_cli(cli.verbose);

    match run(cli).await {
        Ok(all_succeeded) => {
            if !all_succeeded {
                std::process::exit(1);
            }
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(e.exit_code());
        }
    }
}

/// Returns whether every target produced data
async fn run(cli: Cli) -> Result<bool> {
    if cli.format != "text" && cli.format != "json" {
        return Err(OsintError::InvalidInput(format!(
            "Invalid format '{}'. Must be 'text' or 'json'",
            cli.format
        )));
    }
    let proxy: ProxyPreference = cli.proxy.parse()?;
    let targets = parse_targets(read_targets(cli.targets)?)?;

    let service = OsintService::new().await?;

    let fetchers = service.pipeline().fetchers();
    if let Some(target) = targets.iter().find(|t| !fetchers.supports(t.platform())) {
        return Err(OsintError::InvalidInput(format!(
            "No fetcher registered for platform '{}' (registered: {})",
            target.platform(),
            fetchers
                .platforms()
                .iter()
                .map(|p| p.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        )));
    }

    let fetches = targets
        .into_iter()
        .map(|target| service.fetch_now(target, cli.max_items, proxy));
    let outcomes = join_all(fetches)
        .await
        .into_iter()
        .collect::<Result<Vec<JobOutcome>>>();

    // Flush queued results before reporting
    service.shutdown().await;
    let outcomes = outcomes?;

    if cli.format == "json" {
        let json = serde_json::to_string_pretty(&outcomes)
            .map_err(|e| OsintError::InvalidInput(format!("Failed to encode output: {}", e)))?;
        println!("{}", json);
    } else {
        for outcome in &outcomes {
            print_text(outcome);
        }
    }

    Ok(outcomes.iter().all(|o| o.state.has_data()))
}

fn read_targets(args: Vec<String>) -> Result<Vec<String>> {
    if !args.is_empty() {
        return Ok(args);
    }

    let mut stdin = std::io::stdin();
    if stdin.is_terminal() {
        return Err(OsintError::InvalidInput(
            "No targets given. Pass platform:username arguments or pipe them on stdin".to_string(),
        ));
    }

    let mut buffer = String::new();
    stdin
        .read_to_string(&mut buffer)
        .map_err(|e| OsintError::InvalidInput(format!("Failed to read stdin: {}", e)))?;

    let lines: Vec<String> = buffer
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(String::from)
        .collect();
    if lines.is_empty() {
        return Err(OsintError::InvalidInput("No targets on stdin".to_string()));
    }
    Ok(lines)
}

fn parse_targets(raw: Vec<String>) -> Result<Vec<Target>> {
    let mut targets: Vec<Target> = Vec::with_capacity(raw.len());
    for entry in raw {
        let target: Target = entry.parse()?;
        if !targets.contains(&target) {
            targets.push(target);
        }
    }
    Ok(targets)
}

fn print_text(outcome: &JobOutcome) {
    let result = &outcome.result;
    let detail = match (&result.error, &result.message) {
        (Some(kind), Some(message)) => format!(" ({}: {})", kind, message),
        (Some(kind), None) => format!(" ({})", kind),
        _ => String::new(),
    };
    println!(
        "{}\t{}\t{} items\t{} attempt{}{}",
        result.target,
        outcome.state,
        result.item_count(),
        outcome.attempts,
        if outcome.attempts == 1 { "" } else { "s" },
        detail
    );
}
