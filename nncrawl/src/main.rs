//! nncrawl - chess network crawler
//!
//! `nncrawl run` evaluates every claimable (network, position) job with the
//! configured UCI engine and stores the results. `nncrawl status` prints job
//! counts per status.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use nncrawl::models::JobStatus;
use nncrawl::{build_coordinator, job_repository, ConfigOverrides, CrawlConfig};
use nncrawl_common::config::{load_toml_config, resolve_config_path};
use nncrawl_common::db::init_database;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Command-line arguments for nncrawl
#[derive(Parser, Debug)]
#[command(name = "nncrawl")]
#[command(about = "Evaluate chess network checkpoints against a position battery")]
#[command(version)]
struct Args {
    /// TOML configuration file
    #[arg(long, global = true, env = "NNCRAWL_CONFIG")]
    config: Option<PathBuf>,

    /// SQLite database holding networks, positions and jobs
    #[arg(long, global = true, env = "NNCRAWL_DATABASE")]
    database: Option<PathBuf>,

    /// UCI engine binary (path or name on PATH)
    #[arg(long, global = true, env = "NNCRAWL_ENGINE")]
    engine: Option<PathBuf>,

    /// Number of concurrent workers
    #[arg(long, global = true, env = "NNCRAWL_WORKERS")]
    workers: Option<usize>,

    /// Search budget: nodes:N, depth:N or movetime:MS
    #[arg(long, global = true, env = "NNCRAWL_BUDGET")]
    budget: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the crawl until no claimable job is left
    Run,
    /// Print job counts per status
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = resolve_config_path(args.config.as_deref());
    let toml_config = load_toml_config(config_path.as_deref()).context("Failed to load configuration file")?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&toml_config.logging.level)),
        )
        .init();

    info!(
        "Starting nncrawl v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );
    match &config_path {
        Some(path) => info!("Config file: {}", path.display()),
        None => info!("No config file, using defaults"),
    }

    let overrides = ConfigOverrides {
        database_path: args.database,
        engine_path: args.engine,
        worker_count: args.workers,
        search_budget: args.budget,
    };
    let config = CrawlConfig::resolve(&toml_config, &overrides).context("Invalid configuration")?;

    match args.command {
        Command::Run => run(config).await,
        Command::Status => status(config).await,
    }
}

async fn run(config: CrawlConfig) -> Result<()> {
    config.validate().context("Startup checks failed")?;

    let pool_size = config.db_pool_size().context("Invalid configuration")?;
    let pool = init_database(&config.database_path, pool_size)
        .await
        .with_context(|| format!("Failed to open database {}", config.database_path.display()))?;
    info!("Database: {}", config.database_path.display());

    let coordinator = build_coordinator(pool, &config).context("Failed to set up crawler")?;

    let cancel = CancellationToken::new();
    let ctrl_c_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing in-flight jobs");
            ctrl_c_cancel.cancel();
        }
    });

    let summary = match coordinator.run(cancel).await {
        Ok(summary) => summary,
        Err(e) => {
            error!("Crawl aborted: {}", e);
            return Err(e).context("Crawl aborted");
        }
    };

    println!("Done: {}", summary.counts.done);
    println!("Failed: {}", summary.counts.failed);
    if summary.cancelled {
        println!("(cancelled; {} jobs still pending)", summary.counts.pending);
    }
    Ok(())
}

async fn status(config: CrawlConfig) -> Result<()> {
    let pool = init_database(&config.database_path, 1)
        .await
        .with_context(|| format!("Failed to open database {}", config.database_path.display()))?;

    let counts = job_repository(pool, &config)
        .status_counts()
        .await
        .context("Failed to read job counts")?;

    for status in [JobStatus::Pending, JobStatus::InProgress, JobStatus::Done, JobStatus::Failed] {
        println!("{:<12} {}", status.as_str(), counts.get(status));
    }
    println!("{:<12} {}", "total", counts.total());
    Ok(())
}
