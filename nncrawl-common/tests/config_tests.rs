//! Config file resolution and loading
//!
//! Tests touching NNCRAWL_CONFIG are #[serial] to avoid environment races.

use nncrawl_common::config::{load_toml_config, resolve_config_path, TomlConfig, CONFIG_ENV_VAR};
use serial_test::serial;
use std::env;
use std::path::PathBuf;
use tempfile::TempDir;

#[test]
#[serial]
fn test_env_var_used_when_no_explicit_path() {
    env::set_var(CONFIG_ENV_VAR, "/etc/nncrawl/from-env.toml");

    let resolved = resolve_config_path(None);
    assert_eq!(resolved, Some(PathBuf::from("/etc/nncrawl/from-env.toml")));

    env::remove_var(CONFIG_ENV_VAR);
}

#[test]
#[serial]
fn test_explicit_path_beats_env_var() {
    env::set_var(CONFIG_ENV_VAR, "/etc/nncrawl/from-env.toml");

    let explicit = PathBuf::from("/tmp/explicit.toml");
    assert_eq!(resolve_config_path(Some(&explicit)), Some(explicit));

    env::remove_var(CONFIG_ENV_VAR);
}

#[test]
#[serial]
fn test_blank_env_var_ignored() {
    env::set_var(CONFIG_ENV_VAR, "   ");

    let resolved = resolve_config_path(None);
    assert_ne!(resolved, Some(PathBuf::from("   ")));

    env::remove_var(CONFIG_ENV_VAR);
}

#[test]
fn test_load_full_config_file() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("config.toml");
    std::fs::write(
        &path,
        r#"
        database_path = "/data/crawl.db"
        engine_path = "/opt/lc0/lc0"
        engine_args = ["--backend=eigen"]
        search_budget = "depth:12"
        retry_limit = 4
        claim_timeout_ms = 600000
        engine_timeout_ms = 120000
        worker_count = 2
        weight_cache_dir = "/data/weights"
        weights_url_template = "http://localhost:9000/nets/{network_id}"

        [engine_options]
        VerboseMoveStats = "true"
        SmartPruningFactor = "0"
        "#,
    )
    .unwrap();

    let config = load_toml_config(Some(&path)).unwrap();
    assert_eq!(config.database_path, Some(PathBuf::from("/data/crawl.db")));
    assert_eq!(config.engine_args, vec!["--backend=eigen".to_string()]);
    assert_eq!(config.search_budget.as_deref(), Some("depth:12"));
    assert_eq!(config.worker_count, Some(2));
    assert_eq!(config.engine_options.len(), 2);
    assert_eq!(config.logging.level, "info");
}

#[test]
fn test_malformed_config_is_error() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("config.toml");
    std::fs::write(&path, "worker_count = \"many\"").unwrap();

    let result = load_toml_config(Some(&path));
    assert!(matches!(result, Err(nncrawl_common::Error::Config(_))));
}

#[test]
fn test_no_path_gives_defaults() {
    assert_eq!(load_toml_config(None).unwrap(), TomlConfig::default());
}
