//! Favorites-Keeper main entry point
//!
//! This is the command-line interface for the Favorites-Keeper archiver.

use anyhow::Context;
use clap::Parser;
use favorites_keeper::config::{load_config_with_hash, Config};
use favorites_keeper::control::ControlSurface;
use favorites_keeper::crawler::{CrawlOrchestrator, RunRequest, Scheduler};
use favorites_keeper::output::{
    format_run_report, format_scheduler_status, load_statistics, print_runs_table,
    print_statistics,
};
use favorites_keeper::state::CrawlMode;
use favorites_keeper::storage::{open_storage, InstanceLock, SqliteStorage};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing_subscriber::EnvFilter;

/// Favorites-Keeper: an unattended backup of saved posts
///
/// Runs as a daemon that periodically pages through the favorites API,
/// storing every post not yet archived and recording the health of each run.
#[derive(Parser, Debug)]
#[command(name = "favorites-keeper")]
#[command(version = "1.0.0")]
#[command(about = "An unattended backup of saved posts", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Run a single manual crawl in the foreground and exit
    #[arg(long, conflicts_with_all = ["list_runs", "show_log", "check_session", "stats", "dry_run"])]
    once: bool,

    /// Fetch at most this many pages (with --once)
    #[arg(
        long,
        value_name = "N",
        requires = "once",
        value_parser = clap::value_parser!(u32).range(1..)
    )]
    pages: Option<u32>,

    /// Keep paging past previously stored favorites (with --once)
    #[arg(long, requires = "once")]
    full_scan: bool,

    /// Print the run history and exit
    #[arg(long, conflicts_with_all = ["show_log", "check_session", "stats", "dry_run"])]
    list_runs: bool,

    /// Number of runs to show (with --list-runs)
    #[arg(long, value_name = "N", requires = "list_runs")]
    limit: Option<usize>,

    /// Print run history as JSON (with --list-runs)
    #[arg(long, requires = "list_runs")]
    json: bool,

    /// Print the log of one run and exit
    #[arg(long, value_name = "RUN_ID", conflicts_with_all = ["check_session", "stats", "dry_run"])]
    show_log: Option<i64>,

    /// Validate the session credential and exit
    #[arg(long, conflicts_with_all = ["stats", "dry_run"])]
    check_session: bool,

    /// Show archive statistics and exit
    #[arg(long, conflicts_with = "dry_run")]
    stats: bool,

    /// Validate config and show what would run without crawling
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    tracing::debug!("Configuration loaded (hash: {})", config_hash);

    if cli.dry_run {
        handle_dry_run(&config);
    } else if cli.stats {
        handle_stats(&config)?;
    } else if cli.check_session {
        handle_check_session(&config, &config_hash).await?;
    } else if let Some(run_id) = cli.show_log {
        handle_show_log(&config, &config_hash, run_id)?;
    } else if cli.list_runs {
        handle_list_runs(&config, &config_hash, cli.limit, cli.json)?;
    } else if cli.once {
        let mode = if cli.full_scan {
            CrawlMode::FullScan
        } else {
            config.crawler.mode
        };
        handle_once(&config, &config_hash, cli.pages, mode).await?;
    } else {
        handle_daemon(&config, &config_hash).await?;
    }

    Ok(())
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("favorites_keeper=info,warn"),
            1 => EnvFilter::new("favorites_keeper=debug,info"),
            2 => EnvFilter::new("favorites_keeper=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

fn shared_storage(config: &Config) -> anyhow::Result<Arc<Mutex<SqliteStorage>>> {
    let storage = open_storage(Path::new(&config.output.database_path))
        .with_context(|| format!("failed to open {}", config.output.database_path))?;
    Ok(Arc::new(Mutex::new(storage)))
}

fn build_scheduler(
    config: &Config,
    config_hash: &str,
) -> anyhow::Result<Arc<Scheduler<SqliteStorage>>> {
    let storage = shared_storage(config)?;
    let orchestrator = CrawlOrchestrator::from_config(config, config_hash, storage)?;
    Ok(Arc::new(Scheduler::new(
        Arc::new(orchestrator),
        config.scheduler.interval_seconds,
    )))
}

/// Handles the --dry-run mode: validates config and shows what would run
fn handle_dry_run(config: &Config) {
    println!("=== Favorites-Keeper Dry Run ===\n");

    println!("Crawler Configuration:");
    println!("  Workers: {}", config.crawler.workers);
    println!("  Mode: {}", config.crawler.mode);
    println!("  Dedup backend: {:?}", config.crawler.dedup);
    match config.crawler.page_limit() {
        Some(limit) => println!("  Page limit: {}", limit),
        None => println!("  Page limit: unlimited"),
    }
    println!(
        "  Retries: {} attempt(s), {}ms base backoff",
        config.crawler.max_attempts, config.crawler.retry_delay_ms
    );
    println!("  Request delay: {}ms", config.crawler.request_delay_ms);
    println!("  Failed page budget: {}", config.crawler.max_failed_pages);

    println!("\nAPI:");
    println!("  Favorites: {}", config.api.favorites_url);
    println!("  Profile: {}", config.api.profile_url);
    println!("  Timeout: {}s", config.api.timeout_secs);

    println!("\nScheduler:");
    println!("  Interval: {}s", config.scheduler.interval_seconds);
    println!("  Autostart: {}", config.scheduler.autostart);

    println!("\nCredential:");
    println!("  Cookie file: {}", config.credential.cookie_path);

    println!("\nOutput:");
    println!("  Database: {}", config.output.database_path);
    println!("  Run logs: {}", config.output.logs_dir);

    println!("\n✓ Configuration is valid");
}

/// Handles the --stats mode: shows statistics from the database
fn handle_stats(config: &Config) -> anyhow::Result<()> {
    println!("Database: {}\n", config.output.database_path);

    let storage = SqliteStorage::new(Path::new(&config.output.database_path))?;
    let stats = load_statistics(&storage)?;
    print_statistics(&stats);

    Ok(())
}

/// Handles the --check-session mode
async fn handle_check_session(config: &Config, config_hash: &str) -> anyhow::Result<()> {
    let storage = shared_storage(config)?;
    let orchestrator = CrawlOrchestrator::from_config(config, config_hash, storage)?;

    let credential = orchestrator.check_session().await?;
    if credential.valid {
        println!(
            "✓ Session valid for {} ({})",
            credential.user_name.as_deref().unwrap_or("unknown user"),
            credential.user_id.as_deref().unwrap_or("-")
        );
        Ok(())
    } else {
        anyhow::bail!("session credential rejected; log in again to refresh the cookie file")
    }
}

/// Handles the --show-log mode
fn handle_show_log(config: &Config, config_hash: &str, run_id: i64) -> anyhow::Result<()> {
    let control = ControlSurface::new(build_scheduler(config, config_hash)?);
    let log = control.get_run_log(run_id)?;
    if log.is_empty() {
        println!("(run {} has no log lines)", run_id);
    } else {
        print!("{}", log);
    }
    Ok(())
}

/// Handles the --list-runs mode
fn handle_list_runs(
    config: &Config,
    config_hash: &str,
    limit: Option<usize>,
    json: bool,
) -> anyhow::Result<()> {
    let control = ControlSurface::new(build_scheduler(config, config_hash)?);
    let runs = control.list_runs(limit)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&runs)?);
    } else {
        print_runs_table(&runs);
    }
    Ok(())
}

/// Handles the --once mode: one manual run in the foreground
async fn handle_once(
    config: &Config,
    config_hash: &str,
    pages: Option<u32>,
    mode: CrawlMode,
) -> anyhow::Result<()> {
    let storage = shared_storage(config)?;
    let _lock = InstanceLock::acquire(Path::new(&config.output.database_path))?;
    let orchestrator = CrawlOrchestrator::from_config(config, config_hash, storage)?;

    // Holding the lock means no other process owns a running run
    orchestrator.tracker().recover_interrupted()?;

    let request = RunRequest::manual(pages).with_mode(mode);
    let report = orchestrator.run(request).await?;
    print!("{}", format_run_report(&report));

    Ok(())
}

/// Handles the default daemon mode
async fn handle_daemon(config: &Config, config_hash: &str) -> anyhow::Result<()> {
    let scheduler = build_scheduler(config, config_hash)?;
    let _lock = InstanceLock::acquire(Path::new(&config.output.database_path))?;
    let control = ControlSurface::new(Arc::clone(&scheduler));

    scheduler.orchestrator().tracker().recover_interrupted()?;

    if config.scheduler.autostart {
        control.scheduler_start();
        // First run fires right away; later ones follow the interval.
        if let Err(e) = scheduler.tick() {
            tracing::error!("Initial run could not start: {}", e);
        }
    }
    tracing::info!("{}", format_scheduler_status(&control.scheduler_status()).trim_end());

    let timer = scheduler.spawn_timer();

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("Shutdown requested");

    control.scheduler_stop();
    timer.abort();
    scheduler.wait_for_active_run().await;

    tracing::info!("Favorites-Keeper stopped");
    Ok(())
}
