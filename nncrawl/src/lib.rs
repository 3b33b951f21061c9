//! nncrawl library interface
//!
//! Crawls chess network checkpoints: every (network, position) job gets the
//! network weights downloaded and cached, the position evaluated by an
//! external UCI engine, and the result stored in SQLite.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod utils;

pub use crate::config::{ConfigOverrides, CrawlConfig};
pub use crate::error::{CrawlError, CrawlResult, ErrorKind};

use crate::db::JobRepository;
use crate::services::{CrawlCoordinator, UciEngineRunner, WeightStore};
use sqlx::SqlitePool;
use std::sync::Arc;

/// Repository configured with the retry policy and lock wait of `config`
pub fn job_repository(pool: SqlitePool, config: &CrawlConfig) -> JobRepository {
    JobRepository::new(pool, config.retry_policy()).with_max_lock_wait(config.db_max_lock_wait)
}

/// Coordinator wired to the real weight store and UCI engine
pub fn build_coordinator(pool: SqlitePool, config: &CrawlConfig) -> CrawlResult<CrawlCoordinator> {
    let weights = WeightStore::new(config.weight_store_config())?;
    let engine = UciEngineRunner::new(config.engine_config());

    Ok(CrawlCoordinator::new(
        job_repository(pool, config),
        Arc::new(weights),
        Arc::new(engine),
        config.crawl_settings(),
    ))
}
