//! synd-send - Background daemon for scheduled content dispatch
//!
//! Polls the slot store for due content and dispatches it to each
//! destination through the worker pool, honoring per-worker rate limits
//! and destination suppression.

use clap::Parser;
use libsyndicast::logging;
use libsyndicast::{
    Config, Database, DestinationHealth, Dispatcher, ExecTransport, Result, Scheduler,
    SyndicastError, WorkerPool,
};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "synd-send")]
#[command(version)]
#[command(about = "Background daemon for scheduled content dispatch")]
#[command(long_about = "\
synd-send - Background daemon for scheduled content dispatch

DESCRIPTION:
    synd-send is a long-running daemon that polls the Syndicast database
    for content slots whose posting interval has elapsed and dispatches
    their content to every configured destination.

    Deliveries are spread across a pool of registered worker identities.
    The daemon enforces per-worker hourly/daily send limits and reuse
    cooldowns, retries transient failures with backoff, quarantines
    workers on ban signals, and pauses destinations that keep failing.
    Every attempt is recorded in the posting history.

USAGE:
    # Run in foreground (logs to stderr)
    synd-send

    # Run with custom poll interval
    synd-send --poll-interval 30

    # Enable verbose logging
    synd-send --verbose

SIGNALS:
    SIGTERM, SIGINT - Graceful shutdown (in-flight cycles finish first)

CONFIGURATION:
    Configuration file: ~/.config/syndicast/config.toml
    Database location: ~/.local/share/syndicast/syndicast.db

    [transport]
    command = \"syndicast-deliver\"   # external delivery command (required)

    [scheduler]
    poll_interval_secs = 60
    fanout_limit = 8

    [limits]
    hourly_per_worker = 15
    daily_per_worker = 150

EXIT CODES:
    0 - Clean shutdown
    1 - Runtime error
    2 - Configuration error
")]
struct Cli {
    /// Path to configuration file (overrides SYNDICAST_CONFIG)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Poll interval in seconds (overrides config)
    #[arg(long, value_name = "SECONDS")]
    #[arg(help = "How often to check for due slots (default: 60)")]
    poll_interval: Option<u64>,

    /// Enable verbose logging to stderr
    #[arg(short, long)]
    #[arg(help = "Enable verbose logging (useful for debugging)")]
    verbose: bool,

    /// Run one scheduling pass and exit (for testing)
    #[arg(long, hide = true)]
    #[arg(help = "Process due slots once and exit (for testing)")]
    once: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    logging::init_from_env(if cli.verbose { "debug" } else { "info" });

    if let Err(e) = run(cli).await {
        error!("{}", e);
        std::process::exit(e.exit_code());
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => Config::load_from_path(path)?,
        None => Config::load()?,
    };
    let db = Database::new(&config.database.path).await?;

    info!("synd-send daemon starting");

    let scheduler = build_scheduler(&config, &db).await?;

    let shutdown = Arc::new(AtomicBool::new(false));
    setup_signal_handlers(shutdown.clone())?;

    let poll_interval = cli
        .poll_interval
        .unwrap_or(config.scheduler.poll_interval_secs);
    info!("Poll interval: {}s", poll_interval);

    if cli.once {
        scheduler.run_once().await?;
        info!("synd-send: processed due slots once, exiting");
    } else {
        scheduler.run(poll_interval, shutdown).await?;
    }

    info!("synd-send daemon stopped");
    Ok(())
}

/// Wire the engine together: workers from the database into the pool, the
/// exec transport from config, history back into the database.
async fn build_scheduler(config: &Config, db: &Database) -> Result<Scheduler> {
    let transport_config = config.transport.as_ref().ok_or_else(|| {
        SyndicastError::Config(libsyndicast::error::ConfigError::MissingField(
            "transport.command".to_string(),
        ))
    })?;

    let workers = db.list_registered_workers().await?;
    if workers.is_empty() {
        warn!("no workers registered; every dispatch will be skipped");
    }

    let pool = Arc::new(WorkerPool::new(config.worker_limits()));
    for reg in &workers {
        pool.register(reg);
    }
    info!("registered {} worker(s)", workers.len());

    let health = Arc::new(DestinationHealth::new(config.suppression_policy()));
    let transport = Arc::new(ExecTransport::new(
        transport_config.command.clone(),
        transport_config.args.clone(),
    ));

    let dispatcher = Arc::new(Dispatcher::new(
        pool,
        health,
        transport,
        Arc::new(db.clone()),
        config.dispatch_policy(),
    ));

    Ok(Scheduler::new(
        Arc::new(db.clone()),
        dispatcher,
        config.scheduler.fanout_limit,
    ))
}

/// Set up signal handlers for graceful shutdown
fn setup_signal_handlers(shutdown: Arc<AtomicBool>) -> Result<()> {
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM])
        .map_err(|e| SyndicastError::InvalidInput(format!("Signal setup failed: {}", e)))?;

    // Spawn thread to handle signals
    let shutdown_clone = shutdown.clone();
    std::thread::spawn(move || {
        for sig in signals.forever() {
            match sig {
                SIGTERM | SIGINT => {
                    info!("Received shutdown signal, stopping gracefully...");
                    shutdown_clone.store(true, Ordering::Relaxed);
                    break;
                }
                _ => {}
            }
        }
    });

    Ok(())
}
