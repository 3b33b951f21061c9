//! Configuration loading and data folder resolution
//!
//! The TOML file is the bootstrap layer of the crawler configuration. Every
//! field is optional: values missing here fall back to environment/CLI
//! overrides applied by the binary, then to compiled defaults.
//!
//! Config file resolution order:
//! 1. Explicit path (command-line argument or `NNCRAWL_CONFIG`)
//! 2. `<config_dir>/nncrawl/config.toml` (if it exists)
//! 3. No file (all defaults)

use crate::{Error, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable naming the TOML config file
pub const CONFIG_ENV_VAR: &str = "NNCRAWL_CONFIG";

/// Bootstrap configuration loaded from TOML
///
/// Durations are integer milliseconds.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    /// SQLite database file holding networks, positions and jobs
    pub database_path: Option<PathBuf>,

    /// External UCI engine binary
    pub engine_path: Option<PathBuf>,

    /// Extra command-line arguments passed to the engine
    pub engine_args: Vec<String>,

    /// Search budget, e.g. `nodes:800`, `depth:20`, `movetime:1000`
    pub search_budget: Option<String>,

    /// Attempts per job before it is marked failed
    pub retry_limit: Option<u32>,

    /// Age after which an in-progress claim is considered abandoned
    pub claim_timeout_ms: Option<u64>,

    /// Wall-clock limit for one engine evaluation
    pub engine_timeout_ms: Option<u64>,

    /// Number of concurrent workers
    pub worker_count: Option<usize>,

    /// Directory holding downloaded weight files
    pub weight_cache_dir: Option<PathBuf>,

    /// Download URL with a `{network_id}` placeholder
    pub weights_url_template: Option<String>,

    /// HTTP timeout for one weight download
    pub download_timeout_ms: Option<u64>,

    /// Base delay before a failed job becomes claimable again
    pub retry_backoff_ms: Option<u64>,

    /// Upper bound for the exponential retry delay
    pub retry_backoff_max_ms: Option<u64>,

    /// Maximum time spent retrying a locked database operation
    pub db_max_lock_wait_ms: Option<u64>,

    /// UCI options sent with `setoption` before every budgeted search
    pub engine_options: BTreeMap<String, String>,

    /// Record the untempered network policy with a single-node pass first
    pub raw_policy_pass: Option<bool>,

    /// Weight files kept in the cache; older ones are removed after a download
    pub max_cached_networks: Option<usize>,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Pick the config file to load, if any
pub fn resolve_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }

    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    default_config_file().filter(|path| path.exists())
}

/// Platform config file location (`~/.config/nncrawl/config.toml` on Linux)
pub fn default_config_file() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("nncrawl").join("config.toml"))
}

/// Default data folder for the database and weight cache
pub fn default_data_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("nncrawl"))
        .unwrap_or_else(|| PathBuf::from("./nncrawl_data"))
}

/// Load TOML configuration
///
/// A missing file is not an error: a warning is logged and defaults are
/// returned. A file that exists but does not parse is a configuration error.
pub fn load_toml_config(path: Option<&Path>) -> Result<TomlConfig> {
    let Some(path) = path else {
        info!("No config file found, using defaults");
        return Ok(TomlConfig::default());
    };

    if !path.exists() {
        warn!(path = %path.display(), "Config file not found, using defaults");
        return Ok(TomlConfig::default());
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
    let config: TomlConfig = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))?;

    info!(path = %path.display(), "Loaded config file");
    Ok(config)
}
