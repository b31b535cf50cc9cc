//! synd-status - Inspect Syndicast slots, workers and posting history
//!
//! Unix-style tool for operators: reads the same database the daemon
//! writes and reports slot state, per-worker and per-destination attempt
//! statistics, and the recent posting history.

use clap::{Parser, Subcommand};
use libsyndicast::logging;
use libsyndicast::{Config, Database, Result, SlotId, SyndicastError};

#[derive(Parser, Debug)]
#[command(name = "synd-status")]
#[command(version)]
#[command(about = "Inspect slots, workers and posting history")]
#[command(long_about = "\
synd-status - Inspect Syndicast slots, workers and posting history

DESCRIPTION:
    synd-status reads the Syndicast database and reports the state of
    content slots, per-worker and per-destination delivery statistics,
    and the recent posting history. It can also pause and resume slots.

COMMANDS:
    slots         List content slots
    workers       Show per-worker attempt statistics
    destinations  Show per-destination attempt statistics
    attempts      Show recent posting attempts
    pause         Pause a slot (it stops being scheduled)
    resume        Resume a paused slot

USAGE EXAMPLES:
    # List all slots
    synd-status slots

    # Worker statistics in JSON format
    synd-status workers --format json

    # Last 50 posting attempts
    synd-status attempts --limit 50

    # Pause a slot
    synd-status pause 2f1c0a3e-...

CONFIGURATION:
    Configuration file: ~/.config/syndicast/config.toml
    Database location: ~/.local/share/syndicast/syndicast.db

    Override with environment variables:
        SYNDICAST_CONFIG - Path to config file

EXIT CODES:
    0 - Success
    1 - Operation failed
    2 - Database or configuration error
    3 - Invalid input (bad slot ID, format, etc.)
")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging to stderr
    #[arg(short, long, global = true)]
    #[arg(help = "Enable verbose logging to stderr (useful for debugging)")]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List content slots
    Slots {
        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show per-worker attempt statistics
    Workers {
        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show per-destination attempt statistics
    Destinations {
        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show recent posting attempts
    Attempts {
        /// Maximum number of attempts to show
        #[arg(short, long, default_value = "20")]
        limit: usize,

        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Pause a slot
    Pause {
        /// Slot ID to pause
        slot_id: String,
    },

    /// Resume a paused slot
    Resume {
        /// Slot ID to resume
        slot_id: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Quiet by default: this tool prints to stdout, diagnostics go to stderr.
    logging::init_from_env(if cli.verbose { "debug" } else { "error" });

    // Run the main logic and handle errors
    if let Err(e) = run(cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(e.exit_code());
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load()?;
    let db = Database::new(&config.database.path).await?;

    match cli.command {
        Commands::Slots { format } => cmd_slots(&db, &format).await?,
        Commands::Workers { format } => cmd_workers(&db, &format).await?,
        Commands::Destinations { format } => cmd_destinations(&db, &format).await?,
        Commands::Attempts { limit, format } => cmd_attempts(&db, limit, &format).await?,
        Commands::Pause { slot_id } => cmd_set_active(&db, &slot_id, false).await?,
        Commands::Resume { slot_id } => cmd_set_active(&db, &slot_id, true).await?,
    }

    Ok(())
}

fn check_format(format: &str) -> Result<()> {
    if format != "text" && format != "json" {
        return Err(SyndicastError::InvalidInput(format!(
            "Invalid format '{}'. Must be 'text' or 'json'",
            format
        )));
    }
    Ok(())
}

async fn cmd_slots(db: &Database, format: &str) -> Result<()> {
    check_format(format)?;
    let slots = db.list_slots().await?;
    let now = chrono::Utc::now().timestamp();

    if format == "json" {
        let json: Vec<serde_json::Value> = slots
            .iter()
            .map(|s| {
                serde_json::json!({
                    "id": s.id.as_str(),
                    "owner": s.owner,
                    "destinations": s.destinations.iter().map(|d| d.as_str()).collect::<Vec<_>>(),
                    "interval_secs": s.interval_secs,
                    "last_sent_at": s.last_sent_at,
                    "active": s.active,
                    "due": s.is_due(now),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&json).unwrap());
    } else {
        for slot in &slots {
            let state = if !slot.active {
                "paused".to_string()
            } else if slot.is_due(now) {
                "due".to_string()
            } else {
                let next = slot.last_sent_at.unwrap_or(now) + slot.interval_secs;
                format!("next in {}", format_secs(next - now))
            };
            println!(
                "{} | {} dest(s) | every {} | {}",
                slot.id,
                slot.destinations.len(),
                format_secs(slot.interval_secs),
                state
            );
        }
    }
    Ok(())
}

async fn cmd_workers(db: &Database, format: &str) -> Result<()> {
    check_format(format)?;
    let stats = db.worker_stats().await?;
    let now = chrono::Utc::now().timestamp();

    if format == "json" {
        let json: Vec<serde_json::Value> = stats
            .iter()
            .map(|s| {
                serde_json::json!({
                    "worker_id": s.worker_id.0,
                    "attempts": s.attempts,
                    "successes": s.successes,
                    "failures": s.failures,
                    "last_attempt_at": s.last_attempt_at,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&json).unwrap());
    } else {
        for s in &stats {
            println!(
                "worker {} | {} attempts | {} ok | {} failed | last {}",
                s.worker_id,
                s.attempts,
                s.successes,
                s.failures,
                format_ago(now, s.last_attempt_at)
            );
        }
    }
    Ok(())
}

async fn cmd_destinations(db: &Database, format: &str) -> Result<()> {
    check_format(format)?;
    let stats = db.destination_stats().await?;
    let now = chrono::Utc::now().timestamp();

    if format == "json" {
        let json: Vec<serde_json::Value> = stats
            .iter()
            .map(|s| {
                serde_json::json!({
                    "destination": s.destination.as_str(),
                    "attempts": s.attempts,
                    "successes": s.successes,
                    "failures": s.failures,
                    "last_attempt_at": s.last_attempt_at,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&json).unwrap());
    } else {
        for s in &stats {
            println!(
                "{} | {} attempts | {} ok | {} failed | last {}",
                s.destination,
                s.attempts,
                s.successes,
                s.failures,
                format_ago(now, s.last_attempt_at)
            );
        }
    }
    Ok(())
}

async fn cmd_attempts(db: &Database, limit: usize, format: &str) -> Result<()> {
    check_format(format)?;
    let attempts = db.recent_attempts(limit).await?;
    let now = chrono::Utc::now().timestamp();

    if format == "json" {
        let json: Vec<serde_json::Value> = attempts
            .iter()
            .map(|a| {
                serde_json::json!({
                    "id": a.id,
                    "slot_id": a.slot_id.as_str(),
                    "destination": a.destination.as_str(),
                    "worker_id": a.worker_id.0,
                    "attempted_at": a.attempted_at,
                    "success": a.success,
                    "failure_kind": a.failure_kind,
                    "detail": a.detail,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&json).unwrap());
    } else {
        for a in &attempts {
            let outcome = if a.success {
                "ok".to_string()
            } else {
                a.failure_kind.clone().unwrap_or_else(|| "failed".to_string())
            };
            println!(
                "{} | {} -> {} | worker {} | {} | {}",
                format_ago(now, Some(a.attempted_at)),
                a.slot_id,
                a.destination,
                a.worker_id,
                outcome,
                a.detail.as_deref().unwrap_or("-")
            );
        }
    }
    Ok(())
}

async fn cmd_set_active(db: &Database, slot_id: &str, active: bool) -> Result<()> {
    let id = SlotId(slot_id.to_string());
    if db.get_slot(&id).await?.is_none() {
        return Err(SyndicastError::InvalidInput(format!(
            "no such slot: {}",
            slot_id
        )));
    }
    db.set_slot_active(&id, active).await?;
    println!("{} {}", if active { "resumed" } else { "paused" }, slot_id);
    Ok(())
}

/// Format a duration in seconds as a compact human-readable string.
fn format_secs(secs: i64) -> String {
    humantime::format_duration(std::time::Duration::from_secs(secs.max(0) as u64)).to_string()
}

fn format_ago(now: i64, at: Option<i64>) -> String {
    match at {
        Some(at) if at <= now => format!("{} ago", format_secs(now - at)),
        Some(_) => "just now".to_string(),
        None => "never".to_string(),
    }
}
