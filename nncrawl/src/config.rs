//! Crawler configuration
//!
//! Resolution priority per setting: CLI argument / environment variable
//! (both handled by clap) → TOML file → compiled default.

use crate::db::RetryPolicy;
use crate::error::CrawlError;
use crate::models::SearchBudget;
use crate::services::crawl_coordinator::CrawlSettings;
use crate::services::engine_runner::EngineConfig;
use crate::services::weight_store::{WeightStoreConfig, DEFAULT_WEIGHTS_URL_TEMPLATE, NETWORK_ID_PLACEHOLDER};
use nncrawl_common::config::{default_data_folder, TomlConfig};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

pub const DEFAULT_ENGINE: &str = "lc0";
pub const DEFAULT_RETRY_LIMIT: u32 = 3;
pub const DEFAULT_WORKER_COUNT: usize = 2;
pub const DEFAULT_CLAIM_TIMEOUT_MS: u64 = 30 * 60 * 1000;
pub const DEFAULT_ENGINE_TIMEOUT_MS: u64 = 5 * 60 * 1000;
pub const DEFAULT_DOWNLOAD_TIMEOUT_MS: u64 = 10 * 60 * 1000;
pub const DEFAULT_RETRY_BACKOFF_MS: u64 = 5_000;
pub const DEFAULT_RETRY_BACKOFF_MAX_MS: u64 = 5 * 60 * 1000;
pub const DEFAULT_DB_MAX_LOCK_WAIT_MS: u64 = 5_000;

/// Upper bound for `worker_count` (one database connection each, plus one)
pub const MAX_WORKER_COUNT: usize = 256;

/// Upper bound for `retry_backoff` and `retry_backoff_max`
pub const MAX_RETRY_BACKOFF: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// UCI options every evaluation starts from; TOML `engine_options` override them
pub const DEFAULT_ENGINE_OPTIONS: &[(&str, &str)] = &[("VerboseMoveStats", "true"), ("SmartPruningFactor", "0")];

/// Values given on the command line or through `NNCRAWL_*` variables
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub database_path: Option<PathBuf>,
    pub engine_path: Option<PathBuf>,
    pub worker_count: Option<usize>,
    pub search_budget: Option<String>,
}

/// Fully resolved crawler configuration
#[derive(Debug, Clone, PartialEq)]
pub struct CrawlConfig {
    pub database_path: PathBuf,
    pub engine_path: PathBuf,
    pub engine_args: Vec<String>,
    pub engine_options: BTreeMap<String, String>,
    pub raw_policy_pass: bool,
    pub search_budget: SearchBudget,
    pub retry_limit: u32,
    pub claim_timeout: Duration,
    pub engine_timeout: Duration,
    pub worker_count: usize,
    pub weight_cache_dir: PathBuf,
    pub weights_url_template: String,
    pub download_timeout: Duration,
    /// `None` keeps every downloaded network
    pub max_cached_networks: Option<usize>,
    pub retry_backoff: Duration,
    pub retry_backoff_max: Duration,
    pub db_max_lock_wait: Duration,
    pub log_level: String,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        let data_folder = default_data_folder();
        Self {
            database_path: data_folder.join("nncrawl.db"),
            engine_path: PathBuf::from(DEFAULT_ENGINE),
            engine_args: Vec::new(),
            engine_options: default_engine_options(),
            raw_policy_pass: true,
            search_budget: SearchBudget::default(),
            retry_limit: DEFAULT_RETRY_LIMIT,
            claim_timeout: Duration::from_millis(DEFAULT_CLAIM_TIMEOUT_MS),
            engine_timeout: Duration::from_millis(DEFAULT_ENGINE_TIMEOUT_MS),
            worker_count: DEFAULT_WORKER_COUNT,
            weight_cache_dir: data_folder.join("weights"),
            weights_url_template: DEFAULT_WEIGHTS_URL_TEMPLATE.to_string(),
            download_timeout: Duration::from_millis(DEFAULT_DOWNLOAD_TIMEOUT_MS),
            max_cached_networks: None,
            retry_backoff: Duration::from_millis(DEFAULT_RETRY_BACKOFF_MS),
            retry_backoff_max: Duration::from_millis(DEFAULT_RETRY_BACKOFF_MAX_MS),
            db_max_lock_wait: Duration::from_millis(DEFAULT_DB_MAX_LOCK_WAIT_MS),
            log_level: "info".to_string(),
        }
    }
}

fn default_engine_options() -> BTreeMap<String, String> {
    DEFAULT_ENGINE_OPTIONS
        .iter()
        .map(|(name, value)| (name.to_string(), value.to_string()))
        .collect()
}

impl CrawlConfig {
    /// Merge overrides, TOML values and defaults
    pub fn resolve(toml: &TomlConfig, overrides: &ConfigOverrides) -> Result<Self, CrawlError> {
        let defaults = Self::default();
        let ms = Duration::from_millis;

        let budget_text = overrides.search_budget.as_ref().or(toml.search_budget.as_ref());
        let search_budget = match budget_text {
            Some(text) => text
                .parse::<SearchBudget>()
                .map_err(|e| CrawlError::Config(format!("search_budget: {}", e)))?,
            None => defaults.search_budget,
        };

        let mut engine_options = defaults.engine_options;
        engine_options.extend(toml.engine_options.clone());

        Ok(Self {
            database_path: overrides
                .database_path
                .clone()
                .or_else(|| toml.database_path.clone())
                .unwrap_or(defaults.database_path),
            engine_path: overrides
                .engine_path
                .clone()
                .or_else(|| toml.engine_path.clone())
                .unwrap_or(defaults.engine_path),
            engine_args: toml.engine_args.clone(),
            engine_options,
            raw_policy_pass: toml.raw_policy_pass.unwrap_or(defaults.raw_policy_pass),
            search_budget,
            retry_limit: toml.retry_limit.unwrap_or(defaults.retry_limit),
            claim_timeout: toml.claim_timeout_ms.map(ms).unwrap_or(defaults.claim_timeout),
            engine_timeout: toml.engine_timeout_ms.map(ms).unwrap_or(defaults.engine_timeout),
            worker_count: overrides
                .worker_count
                .or(toml.worker_count)
                .unwrap_or(defaults.worker_count),
            weight_cache_dir: toml
                .weight_cache_dir
                .clone()
                .unwrap_or(defaults.weight_cache_dir),
            weights_url_template: toml
                .weights_url_template
                .clone()
                .unwrap_or(defaults.weights_url_template),
            download_timeout: toml.download_timeout_ms.map(ms).unwrap_or(defaults.download_timeout),
            max_cached_networks: toml.max_cached_networks.or(defaults.max_cached_networks),
            retry_backoff: toml.retry_backoff_ms.map(ms).unwrap_or(defaults.retry_backoff),
            retry_backoff_max: toml.retry_backoff_max_ms.map(ms).unwrap_or(defaults.retry_backoff_max),
            db_max_lock_wait: toml.db_max_lock_wait_ms.map(ms).unwrap_or(defaults.db_max_lock_wait),
            log_level: toml.logging.level.clone(),
        })
    }

    /// Startup precondition checks
    ///
    /// Creates the weight cache directory if needed.
    pub fn validate(&self) -> Result<(), CrawlError> {
        if self.worker_count == 0 {
            return Err(CrawlError::Config("worker_count must be at least 1".to_string()));
        }
        if self.worker_count > MAX_WORKER_COUNT {
            return Err(CrawlError::Config(format!(
                "worker_count ({}) must not exceed {}",
                self.worker_count, MAX_WORKER_COUNT
            )));
        }
        if self.retry_limit == 0 {
            return Err(CrawlError::Config("retry_limit must be at least 1".to_string()));
        }
        if self.engine_timeout.is_zero() {
            return Err(CrawlError::Config("engine_timeout must be non-zero".to_string()));
        }
        if self.engine_timeout >= self.claim_timeout {
            return Err(CrawlError::Config(format!(
                "engine_timeout ({} ms) must be shorter than claim_timeout ({} ms)",
                self.engine_timeout.as_millis(),
                self.claim_timeout.as_millis()
            )));
        }
        if self.retry_backoff_max > MAX_RETRY_BACKOFF {
            return Err(CrawlError::Config(format!(
                "retry_backoff_max ({} ms) must not exceed {} ms",
                self.retry_backoff_max.as_millis(),
                MAX_RETRY_BACKOFF.as_millis()
            )));
        }
        if self.retry_backoff > self.retry_backoff_max {
            return Err(CrawlError::Config(format!(
                "retry_backoff ({} ms) must not exceed retry_backoff_max ({} ms)",
                self.retry_backoff.as_millis(),
                self.retry_backoff_max.as_millis()
            )));
        }
        if self.max_cached_networks == Some(0) {
            return Err(CrawlError::Config("max_cached_networks must be at least 1".to_string()));
        }
        if !self.weights_url_template.contains(NETWORK_ID_PLACEHOLDER) {
            return Err(CrawlError::Config(format!(
                "weights_url_template must contain {}",
                NETWORK_ID_PLACEHOLDER
            )));
        }

        let engine = find_executable(&self.engine_path).ok_or_else(|| {
            CrawlError::Config(format!(
                "Engine binary not found: {}",
                self.engine_path.display()
            ))
        })?;

        std::fs::create_dir_all(&self.weight_cache_dir).map_err(|e| {
            CrawlError::Config(format!(
                "Cannot create weight cache directory {}: {}",
                self.weight_cache_dir.display(),
                e
            ))
        })?;

        info!(
            engine = %engine.display(),
            database = %self.database_path.display(),
            weight_cache = %self.weight_cache_dir.display(),
            budget = %self.search_budget,
            workers = self.worker_count,
            retry_limit = self.retry_limit,
            "Configuration validated"
        );
        Ok(())
    }

    /// Database connections: one per worker plus one for the coordinator
    pub fn db_pool_size(&self) -> Result<u32, CrawlError> {
        self.worker_count
            .checked_add(1)
            .and_then(|n| u32::try_from(n).ok())
            .ok_or_else(|| CrawlError::Config(format!("worker_count ({}) is too large", self.worker_count)))
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            engine_path: self.engine_path.clone(),
            engine_args: self.engine_args.clone(),
            options: self.engine_options.clone(),
            raw_policy_pass: self.raw_policy_pass,
            timeout: self.engine_timeout,
        }
    }

    pub fn weight_store_config(&self) -> WeightStoreConfig {
        WeightStoreConfig::new(&self.weight_cache_dir)
            .with_url_template(&self.weights_url_template)
            .with_download_timeout(self.download_timeout)
            .with_max_cached_networks(self.max_cached_networks)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retry_limit).with_backoff(self.retry_backoff, self.retry_backoff_max)
    }

    pub fn crawl_settings(&self) -> CrawlSettings {
        CrawlSettings {
            worker_count: self.worker_count,
            claim_timeout: self.claim_timeout,
            search_budget: self.search_budget,
        }
    }
}

/// Locate an executable: paths with a directory component are checked as
/// given, bare names are searched on `PATH`
pub fn find_executable(path: &Path) -> Option<PathBuf> {
    if path.components().count() > 1 || path.is_absolute() {
        return path.is_file().then(|| path.to_path_buf());
    }

    let search = std::env::var_os("PATH")?;
    std::env::split_paths(&search)
        .map(|dir| dir.join(path))
        .find(|candidate| candidate.is_file())
}
