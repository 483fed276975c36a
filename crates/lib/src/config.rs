//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.dataprompt/config.json`).
//! Missing file means defaults; everything has a sensible local-dev default.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Backend HTTP settings.
    #[serde(default)]
    pub backend: BackendConfig,

    /// Local result cache settings.
    #[serde(default)]
    pub cache: CacheConfig,
}

/// Backend base URL and timeouts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendConfig {
    /// Base URL of the analysis backend (default "http://127.0.0.1:8000").
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Whole-request timeout for upload/datasets/analyze, in seconds (default 60).
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// How long the chat stream may go without a chunk before it is sealed
    /// with partial content, in seconds (default 120).
    #[serde(default = "default_stream_idle_timeout_secs")]
    pub stream_idle_timeout_secs: u64,
}

fn default_base_url() -> String {
    "http://127.0.0.1:8000".to_string()
}

fn default_request_timeout_secs() -> u64 {
    60
}

fn default_stream_idle_timeout_secs() -> u64 {
    120
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            request_timeout_secs: default_request_timeout_secs(),
            stream_idle_timeout_secs: default_stream_idle_timeout_secs(),
        }
    }
}

/// Result cache: best-effort, bounded.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheConfig {
    /// Disable to skip persisting analysis results entirely.
    #[serde(default = "default_cache_enabled")]
    pub enabled: bool,

    /// Maximum entries kept; oldest are evicted first (default 50).
    #[serde(default = "default_cache_max_entries")]
    pub max_entries: usize,

    /// Override the cache file. Relative paths resolve against the config
    /// file's parent. Default: `results.json` next to the config file.
    #[serde(default)]
    pub file: Option<PathBuf>,
}

fn default_cache_enabled() -> bool {
    true
}

fn default_cache_max_entries() -> usize {
    50
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: default_cache_enabled(),
            max_entries: default_cache_max_entries(),
            file: None,
        }
    }
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("DATAPROMPT_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .map(|h| h.join(".dataprompt").join("config.json"))
                .unwrap_or_else(|| PathBuf::from("config.json"))
        })
}

/// Load config from the default path (or DATAPROMPT_CONFIG_PATH). Missing file => default config.
/// Returns the config and the path that was used (for resolving the config directory).
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    Ok((config, path))
}

/// Resolve the cache file: `cache.file` override (relative to the config file's
/// parent), otherwise `results.json` next to the config file.
pub fn resolve_cache_path(config: &Config, config_path: &Path) -> PathBuf {
    let config_parent = config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    match &config.cache.file {
        Some(f) if !f.as_os_str().is_empty() => {
            if f.is_absolute() {
                f.clone()
            } else {
                config_parent.join(f)
            }
        }
        _ => config_parent.join("results.json"),
    }
}
