//! osint-tasks - Manage scheduled collection tasks
//!
//! Unix-style tool for adding, listing, running and inspecting the tasks the
//! daemon executes.

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use libosint::logging;
use libosint::scheduler::{NewTask, ScheduledTask, TaskRun};
use libosint::scheduling::parse_start_time;
use libosint::service::OsintService;
use libosint::{OsintError, ProxyPreference, Result, ScheduleType, Target};
use tracing::debug;

#[derive(Parser, Debug)]
#[command(name = "osint-tasks")]
#[command(version)]
#[command(about = "Manage scheduled collection tasks")]
#[command(long_about = "\
osint-tasks - Manage scheduled collection tasks

DESCRIPTION:
    osint-tasks edits the persisted task table that osint-daemon executes.
    A task collects a list of targets on a schedule: once, hourly, daily,
    weekly, every <N><s|m|h|d>, or a cron expression.

COMMANDS:
    add      Add a task
    remove   Remove a task (history is kept)
    list     List tasks
    enable   Enable a task
    disable  Disable a task
    run      Run a task immediately
    history  Show recent runs of a task

USAGE EXAMPLES:
    # Collect two profiles every day, first run tomorrow at 9am
    osint-tasks add watchlist -t instagram:alice -t twitter:bob \\
        --schedule daily --start \"tomorrow 9am\"

    # One-off snapshot through Tor
    osint-tasks add snapshot -t demo:carol --schedule once --proxy tor

    # Cron schedule (5 or 6 fields)
    osint-tasks add weekday -t demo:dave --schedule \"cron:0 9 * * Mon-Fri\"

    # Trigger a run now and show the last five runs
    osint-tasks run watchlist
    osint-tasks history watchlist --limit 5

CONFIGURATION:
    Configuration file: ~/.config/osint/config.toml
    Override with environment variables:
        OSINT_CONFIG    - Path to config file
        OSINT_DB_PATH   - Path to database file

EXIT CODES:
    0 - Success
    1 - Operation failed
    2 - Database or configuration error
    3 - Invalid input (bad schedule, target, time format, etc.)
    4 - Task not found
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
    /// Add a task
    Add {
        /// Unique task name
        name: String,

        /// Target as platform:username (repeatable)
        #[arg(short, long = "target", required = true)]
        targets: Vec<String>,

        /// once, hourly, daily, weekly, "every 30m" or "cron:<expr>"
        #[arg(short, long, default_value = "daily")]
        schedule: String,

        /// First run, e.g. "30m", "2025-11-20 15:00", "09:30", "tomorrow 9am"
        #[arg(long)]
        start: Option<String>,

        /// Maximum items per target (default from config)
        #[arg(short = 'n', long)]
        max_items: Option<usize>,

        /// Proxy preference: none, http, socks5 or tor
        #[arg(short, long, default_value = "none")]
        proxy: String,
    },

    /// Remove a task
    Remove {
        name: String,
    },

    /// List tasks
    List {
        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Enable a task
    Enable {
        name: String,
    },

    /// Disable a task
    Disable {
        name: String,
    },

    /// Run a task immediately
    Run {
        name: String,

        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show recent runs of a task, newest first
    History {
        name: String,

        #[arg(short, long, default_value = "10")]
        limit: usize,

        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    logging::init_cli(cli.verbose);

    if let Err(e) = run(cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(e.exit_code());
    }
}

async fn run(cli: Cli) -> Result<()> {
    let service = OsintService::new().await?;

    let outcome = match cli.command {
        Commands::Add {
            name,
            targets,
            schedule,
            start,
            max_items,
            proxy,
        } => cmd_add(&service, name, targets, &schedule, start.as_deref(), max_items, &proxy).await,
        Commands::Remove { name } => cmd_remove(&service, &name).await,
        Commands::List { format } => cmd_list(&service, &format),
        Commands::Enable { name } => cmd_set_enabled(&service, &name, true).await,
        Commands::Disable { name } => cmd_set_enabled(&service, &name, false).await,
        Commands::Run { name, format } => cmd_run(&service, &name, &format).await,
        Commands::History {
            name,
            limit,
            format,
        } => cmd_history(&service, &name, limit, &format).await,
    };

    service.shutdown().await;
    outcome
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

/// Add a task
async fn cmd_add(
    service: &OsintService,
    name: String,
    targets: Vec<String>,
    schedule: &str,
    start: Option<&str>,
    max_items: Option<usize>,
    proxy: &str,
) -> Result<()> {
    let targets = targets
        .iter()
        .map(|t| t.parse::<Target>())
        .collect::<Result<Vec<_>>>()?;
    let schedule: ScheduleType = schedule.parse()?;

    let mut new = NewTask::new(name, targets, schedule);
    new.start_at = start.map(|s| parse_start_time(s, Utc::now())).transpose()?;
    new.max_items = max_items;
    new.proxy_preference = proxy.parse::<ProxyPreference>()?;

    let task = service.scheduler().add_task(new).await?;
    debug!(task = %task.name, "added");
    println!(
        "Added task '{}' ({}), next run {}",
        task.name,
        task.schedule,
        format_next(task.next_run_at)
    );
    Ok(())
}

/// Remove a task
async fn cmd_remove(service: &OsintService, name: &str) -> Result<()> {
    service.scheduler().remove_task(name).await?;
    println!("Removed task '{}'", name);
    Ok(())
}

/// List tasks
fn cmd_list(service: &OsintService, format: &str) -> Result<()> {
    check_format(format)?;
    let tasks = service.scheduler().list_tasks();

    if format == "json" {
        return print_json(&tasks);
    }
    for task in &tasks {
        print_task(task);
    }
    Ok(())
}

fn print_task(task: &ScheduledTask) {
    let targets: Vec<String> = task.targets.iter().map(|t| t.to_string()).collect();
    println!(
        "{} | {} | {} | next: {} | last: {} | {}",
        task.name,
        task.schedule,
        if task.enabled { "enabled" } else { "disabled" },
        format_next(task.next_run_at),
        task.last_run_at
            .map(format_time)
            .unwrap_or_else(|| "never".to_string()),
        targets.join(", ")
    );
}

/// Enable or disable a task
async fn cmd_set_enabled(service: &OsintService, name: &str, enabled: bool) -> Result<()> {
    let task = service.scheduler().set_enabled(name, enabled).await?;
    println!(
        "Task '{}' {}",
        task.name,
        if task.enabled { "enabled" } else { "disabled" }
    );
    Ok(())
}

/// Run a task now
async fn cmd_run(service: &OsintService, name: &str, format: &str) -> Result<()> {
    check_format(format)?;
    let run = service.scheduler().run_task_now(name).await?;

    if format == "json" {
        return print_json(&run);
    }
    print_run(&run);
    Ok(())
}

/// Show run history
async fn cmd_history(service: &OsintService, name: &str, limit: usize, format: &str) -> Result<()> {
    check_format(format)?;
    let runs = service.scheduler().history(name, limit).await?;
    if runs.is_empty() && service.scheduler().get_task(name).is_none() {
        return Err(OsintError::NotFound(format!("task '{}'", name)));
    }

    if format == "json" {
        return print_json(&runs);
    }
    for run in &runs {
        print_run(run);
    }
    Ok(())
}

fn print_run(run: &TaskRun) {
    println!(
        "{} | {} | {} | {} succeeded, {} failed",
        format_time(run.ran_at),
        run.task_name,
        if run.manual { "manual" } else { "scheduled" },
        run.succeeded(),
        run.failed()
    );
    for outcome in &run.outcomes {
        let error = outcome
            .error
            .map(|kind| format!(" ({})", kind))
            .unwrap_or_default();
        println!(
            "    {}\t{}\t{} items{}",
            outcome.target, outcome.state, outcome.item_count, error
        );
    }
}

fn format_time(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

fn format_next(next: Option<DateTime<Utc>>) -> String {
    match next {
        Some(at) => format!("{} ({})", format_time(at), format_time_until(Utc::now(), at)),
        None => "none".to_string(),
    }
}

/// Human-readable distance to a future time
fn format_time_until(now: DateTime<Utc>, at: DateTime<Utc>) -> String {
    let diff = (at - now).num_seconds();
    if diff < 0 {
        return "overdue".to_string();
    }

    let minutes = diff / 60;
    let hours = minutes / 60;
    let days = hours / 24;

    if days > 0 {
        format!("in {} day{}", days, if days == 1 { "" } else { "s" })
    } else if hours > 0 {
        format!("in {} hour{}", hours, if hours == 1 { "" } else { "s" })
    } else if minutes > 0 {
        format!("in {} minute{}", minutes, if minutes == 1 { "" } else { "s" })
    } else {
        "in <1 minute".to_string()
    }
}
