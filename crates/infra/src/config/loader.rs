//! Configuration loader
//!
//! Loads Tributary configuration from environment variables or files.
//!
//! ## Loading Strategy
//! 1. First, attempts to load from environment variables
//! 2. If `TRIBUTARY_SOURCES` is unset, falls back to loading from file
//! 3. Probes multiple paths for config files
//! 4. Supports JSON and TOML formats
//!
//! Whatever the source, the result is validated before it is returned.
//!
//! ## Environment Variables
//! - `TRIBUTARY_SOURCES`: JSON array of upstream sources (required)
//! - `TRIBUTARY_L1_CAPACITY`, `TRIBUTARY_L1_TTL_SECONDS`: in-process LRU tier
//! - `TRIBUTARY_L2_CAPACITY`, `TRIBUTARY_L2_TTL_SECONDS`: in-process TTL tier
//! - `TRIBUTARY_STALE_RETENTION_SECONDS`: how long expired L2 entries are kept
//! - `TRIBUTARY_FAILURE_THRESHOLD`: breaker failures before opening
//! - `TRIBUTARY_RECOVERY_TIMEOUT_SECONDS`: breaker open duration
//! - `TRIBUTARY_MAX_ATTEMPTS`: attempts per fetch, first one included
//! - `TRIBUTARY_BASE_DELAY_MS`: first backoff delay
//! - `TRIBUTARY_STALE_WHILE_REVALIDATE`: serve stale and refresh (true/false)
//! - `TRIBUTARY_SHARED_STORE_ENABLED`: enable the L3 tier (true/false)
//! - `TRIBUTARY_LOG_LEVEL`: default log filter
//! - `TRIBUTARY_LOG_JSON`: JSON log output (true/false)
//!
//! Unset optional variables keep their defaults.
//!
//! ## File Locations
//! The loader probes the following paths (in order):
//! 1. `./tributary.json` or `./tributary.toml` (current working directory)
//! 2. `./config.json` or `./config.toml` (current working directory)
//! 3. The same names in the parent and grandparent directories
//! 4. Relative to executable location

use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use tributary_domain::{Config, Result, TributaryError, UpstreamSource};

const CONFIG_FILE_NAMES: [&str; 4] =
    ["tributary.json", "tributary.toml", "config.json", "config.toml"];

/// Load configuration with automatic fallback strategy
///
/// First attempts to load from environment variables. If that fails, falls
/// back to loading from a config file.
///
/// # Errors
/// Returns `TributaryError::Config` if:
/// - Configuration cannot be loaded from either source
/// - File format is invalid
/// - A value fails validation
pub fn load() -> Result<Config> {
    match load_from_env() {
        Ok(config) => {
            tracing::info!(sources = config.sources.len(), "Configuration loaded from environment variables");
            Ok(config)
        }
        Err(e) => {
            tracing::debug!(error = ?e, "Failed to load from environment, trying file");
            load_from_file(None)
        }
    }
}

/// Load configuration from environment variables
///
/// `TRIBUTARY_SOURCES` must be present; every other variable is an optional
/// override of the default.
///
/// # Errors
/// Returns `TributaryError::Config` if `TRIBUTARY_SOURCES` is missing or any
/// variable has an invalid value.
pub fn load_from_env() -> Result<Config> {
    let sources_json = env_var("TRIBUTARY_SOURCES")?;
    let sources: Vec<UpstreamSource> = serde_json::from_str(&sources_json)
        .map_err(|e| TributaryError::Config(format!("Invalid TRIBUTARY_SOURCES: {e}")))?;

    let mut config = Config { sources, ..Config::default() };

    if let Some(v) = env_parse("TRIBUTARY_L1_CAPACITY")? {
        config.cache.l1_capacity = v;
    }
    if let Some(v) = env_parse("TRIBUTARY_L1_TTL_SECONDS")? {
        config.cache.l1_ttl_seconds = v;
    }
    if let Some(v) = env_parse("TRIBUTARY_L2_CAPACITY")? {
        config.cache.l2_capacity = v;
    }
    if let Some(v) = env_parse("TRIBUTARY_L2_TTL_SECONDS")? {
        config.cache.l2_ttl_seconds = v;
    }
    if let Some(v) = env_parse("TRIBUTARY_STALE_RETENTION_SECONDS")? {
        config.cache.stale_retention_seconds = v;
    }
    if let Some(v) = env_parse("TRIBUTARY_FAILURE_THRESHOLD")? {
        config.breaker.failure_threshold = v;
    }
    if let Some(v) = env_parse("TRIBUTARY_RECOVERY_TIMEOUT_SECONDS")? {
        config.breaker.recovery_timeout_seconds = v;
    }
    if let Some(v) = env_parse("TRIBUTARY_MAX_ATTEMPTS")? {
        config.retry.max_attempts = v;
    }
    if let Some(v) = env_parse("TRIBUTARY_BASE_DELAY_MS")? {
        config.retry.base_delay_ms = v;
    }
    config.aggregator.stale_while_revalidate =
        env_bool("TRIBUTARY_STALE_WHILE_REVALIDATE", config.aggregator.stale_while_revalidate);
    config.shared_store.enabled =
        env_bool("TRIBUTARY_SHARED_STORE_ENABLED", config.shared_store.enabled);
    if let Ok(level) = std::env::var("TRIBUTARY_LOG_LEVEL") {
        config.logging.level = level;
    }
    config.logging.json = env_bool("TRIBUTARY_LOG_JSON", config.logging.json);

    config.validate()?;
    Ok(config)
}

/// Load configuration from a file
///
/// If `path` is `None`, probes multiple locations for config files.
/// Supports both JSON and TOML formats (detected by file extension).
///
/// # Errors
/// Returns `TributaryError::Config` if:
/// - File not found (when path is specified)
/// - No config file found (when path is `None`)
/// - File format is invalid
/// - A value fails validation
pub fn load_from_file(path: Option<PathBuf>) -> Result<Config> {
    let config_path = match path {
        Some(p) => {
            if !p.exists() {
                return Err(TributaryError::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            p
        }
        None => probe_config_paths().ok_or_else(|| {
            TributaryError::Config(
                "No config file found in any of the standard locations".to_string(),
            )
        })?,
    };

    tracing::info!(path = %config_path.display(), "Loading configuration from file");

    let contents = std::fs::read_to_string(&config_path)
        .map_err(|e| TributaryError::Config(format!("Failed to read config file: {e}")))?;

    let config = parse_config(&contents, &config_path)?;
    config.validate()?;
    Ok(config)
}

/// Parse configuration from string content
///
/// Format is detected by file extension (`.json` or `.toml`).
fn parse_config(contents: &str, path: &Path) -> Result<Config> {
    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("json");

    match extension {
        "toml" => toml::from_str(contents)
            .map_err(|e| TributaryError::Config(format!("Invalid TOML format: {e}"))),
        "json" => serde_json::from_str(contents)
            .map_err(|e| TributaryError::Config(format!("Invalid JSON format: {e}"))),
        _ => Err(TributaryError::Config(format!("Unsupported config format: {extension}"))),
    }
}

/// Probe multiple paths for configuration files
///
/// Searches the current working directory, its parent and grandparent, then
/// the same three levels relative to the executable.
///
/// # Returns
/// The first config file found, or `None` if no file exists.
pub fn probe_config_paths() -> Option<PathBuf> {
    let mut candidates = Vec::new();

    if let Ok(cwd) = std::env::current_dir() {
        candidates.extend(candidates_under(&cwd));
    }

    if let Ok(exe_path) = std::env::current_exe() {
        if let Some(exe_dir) = exe_path.parent() {
            candidates.extend(candidates_under(exe_dir));
        }
    }

    candidates.into_iter().find(|path| path.exists())
}

fn candidates_under(dir: &Path) -> Vec<PathBuf> {
    ["", "..", "../.."]
        .iter()
        .flat_map(|up| CONFIG_FILE_NAMES.iter().map(move |name| dir.join(up).join(name)))
        .collect()
}

/// Get required environment variable
///
/// # Errors
/// Returns `TributaryError::Config` if the variable is not set.
fn env_var(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| {
        TributaryError::Config(format!("Missing required environment variable: {key}"))
    })
}

/// Parse an optional environment variable
///
/// # Errors
/// Returns `TributaryError::Config` if the variable is set but unparsable.
fn env_parse<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| TributaryError::Config(format!("Invalid {key}: {e}"))),
        Err(_) => Ok(None),
    }
}

/// Parse boolean from environment variable
///
/// Accepts: `1`/`0`, `true`/`false`, `yes`/`no`, `on`/`off` (case-insensitive)
fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|s| matches!(s.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(default)
}
