//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/faultline/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/faultline/` (~/.config/faultline/)
//! - Data: `$XDG_DATA_HOME/faultline/` (~/.local/share/faultline/)
//! - State/Logs: `$XDG_STATE_HOME/faultline/` (~/.local/state/faultline/)
//!
//! Every component receives its `Config` explicitly; there is no global
//! default instance.

use crate::error::{Error, Result};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Minimum length of a usable API key.
const MIN_API_KEY_LEN: usize = 10;

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_DATA_HOME or ~/.local/share
fn xdg_data_home() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/share"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main configuration struct
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Project API key issued by the collector
    #[serde(default)]
    pub api_key: Option<String>,

    /// Collector base URL
    #[serde(default = "default_server_url")]
    pub server_url: String,

    /// Master switch for event submission
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Events per submission request (shrunk at runtime on 413 responses)
    #[serde(default = "default_submission_batch_size")]
    pub submission_batch_size: usize,

    /// Seconds between queue processing attempts
    #[serde(default = "default_submission_interval")]
    pub submission_interval_secs: u64,

    /// Maximum number of events held in the offline queue
    #[serde(default = "default_queue_max_items")]
    pub queue_max_items: usize,

    /// Duplicate merge window and flush period in milliseconds
    #[serde(default = "default_duplicate_interval")]
    pub duplicate_interval_ms: u64,

    /// Seconds between background settings refreshes
    #[serde(default = "default_settings_refresh_interval")]
    pub settings_refresh_interval_secs: u64,

    /// Tags added to every event
    #[serde(default)]
    pub default_tags: Vec<String>,

    /// Properties added to every event (existing event keys win)
    #[serde(default)]
    pub default_data: Map<String, Value>,

    /// Local settings; server settings are merged over these
    #[serde(default)]
    pub settings: HashMap<String, String>,

    /// Storage configuration
    #[serde(default)]
    pub storage: StorageConfig,

    /// Transport configuration
    #[serde(default)]
    pub transport: TransportConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_key: None,
            server_url: default_server_url(),
            enabled: default_enabled(),
            submission_batch_size: default_submission_batch_size(),
            submission_interval_secs: default_submission_interval(),
            queue_max_items: default_queue_max_items(),
            duplicate_interval_ms: default_duplicate_interval(),
            settings_refresh_interval_secs: default_settings_refresh_interval(),
            default_tags: Vec::new(),
            default_data: Map::new(),
            settings: HashMap::new(),
            storage: StorageConfig::default(),
            transport: TransportConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

fn default_server_url() -> String {
    "https://collector.faultline.dev".to_string()
}

fn default_enabled() -> bool {
    true
}

fn default_submission_batch_size() -> usize {
    50
}

fn default_submission_interval() -> u64 {
    10
}

fn default_queue_max_items() -> usize {
    250
}

fn default_duplicate_interval() -> u64 {
    30_000
}

fn default_settings_refresh_interval() -> u64 {
    120
}

/// Where queued events and the settings snapshot are persisted
#[derive(Debug, Deserialize, Clone, Default)]
pub struct StorageConfig {
    /// SQLite file path (defaults to `Config::storage_path()`)
    pub path: Option<PathBuf>,

    /// Keep everything in memory; nothing survives a restart
    #[serde(default)]
    pub in_memory: bool,
}

/// Transport settings shared by concrete transports
#[derive(Debug, Deserialize, Clone)]
pub struct TransportConfig {
    /// HTTP request timeout in seconds
    #[serde(default = "default_transport_timeout")]
    pub timeout_secs: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_transport_timeout(),
        }
    }
}

fn default_transport_timeout() -> u64 {
    30
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Maximum number of log files to keep
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_files: default_max_log_files(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_log_files() -> usize {
    5
}

impl Config {
    /// Config with the given API key and defaults for everything else.
    pub fn with_api_key(api_key: &str) -> Self {
        Self {
            api_key: Some(api_key.to_string()),
            ..Default::default()
        }
    }

    /// True when an API key long enough to be real is configured.
    pub fn is_valid(&self) -> bool {
        self.api_key
            .as_deref()
            .map(|k| k.trim().len() >= MIN_API_KEY_LEN)
            .unwrap_or(false)
    }

    /// Validate configuration, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        if self.server_url.trim().is_empty() {
            return Err(Error::Config("server_url must not be empty".to_string()));
        }
        if self.submission_batch_size == 0 {
            return Err(Error::Config(
                "submission_batch_size must be at least 1".to_string(),
            ));
        }
        if self.queue_max_items == 0 {
            return Err(Error::Config(
                "queue_max_items must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn submission_interval(&self) -> Duration {
        Duration::from_secs(self.submission_interval_secs.max(1))
    }

    pub fn duplicate_interval(&self) -> Duration {
        Duration::from_millis(self.duplicate_interval_ms.max(1))
    }

    pub fn settings_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.settings_refresh_interval_secs.max(1))
    }

    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/faultline/config.toml` (~/.config/faultline/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("faultline").join("config.toml")
    }

    /// Returns the data directory path (for the queue database)
    ///
    /// `$XDG_DATA_HOME/faultline/` (~/.local/share/faultline/)
    pub fn data_dir() -> PathBuf {
        xdg_data_home().join("faultline")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/faultline/` (~/.local/state/faultline/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("faultline")
    }

    /// Returns the default storage file path
    ///
    /// `$XDG_DATA_HOME/faultline/faultline.db`
    pub fn storage_path() -> PathBuf {
        Self::data_dir().join("faultline.db")
    }

    /// Returns the log file path
    ///
    /// `$XDG_STATE_HOME/faultline/faultline.log`
    pub fn log_path() -> PathBuf {
        Self::state_dir().join("faultline.log")
    }

    /// Storage path from config, falling back to the XDG default.
    pub fn resolved_storage_path(&self) -> PathBuf {
        self.storage
            .path
            .clone()
            .unwrap_or_else(Self::storage_path)
    }
}
