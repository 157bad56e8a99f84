//! Traffic Configuration - operator-tunable TOML values
//!
//! Each section implements `Default` with the values in [`super::defaults`],
//! so a missing file or a partial file behaves exactly like the built-ins.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use super::defaults;
use crate::types::AccidentRule;

/// Environment variable naming the config file.
pub const CONFIG_ENV_VAR: &str = "TRAFFIC_CONFIG";

/// Config file looked up in the working directory.
pub const LOCAL_CONFIG_FILE: &str = "traffic_config.toml";

// ============================================================================
// Top-Level Config
// ============================================================================

/// Root configuration for a traffic conditions deployment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrafficConfig {
    /// Counter store backend and bucket layout
    #[serde(default)]
    pub store: StoreConfig,

    /// Classification rule parameters
    #[serde(default)]
    pub congestion: CongestionConfig,

    /// Parser loop and sink worker tuning
    #[serde(default)]
    pub ingest: IngestConfig,

    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,
}

impl TrafficConfig {
    /// Load configuration using the standard search order:
    /// 1. `$TRAFFIC_CONFIG` environment variable
    /// 2. `./traffic_config.toml` in the current working directory
    /// 3. Built-in defaults
    ///
    /// A file that exists but fails to parse or validate is an error, not a
    /// silent fallback.
    pub fn load() -> Result<Self, ConfigError> {
        // 1. Check env var
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            let p = PathBuf::from(&path);
            if p.exists() {
                let config = Self::load_from_file(&p)?;
                info!(path = %p.display(), "Loaded traffic config from {CONFIG_ENV_VAR}");
                return Ok(config);
            }
            warn!(path = %path, "{CONFIG_ENV_VAR} points to non-existent file, falling back");
        }

        // 2. Check ./traffic_config.toml
        let local = PathBuf::from(LOCAL_CONFIG_FILE);
        if local.exists() {
            let config = Self::load_from_file(&local)?;
            info!("Loaded traffic config from ./{LOCAL_CONFIG_FILE}");
            return Ok(config);
        }

        // 3. Defaults
        info!("No {LOCAL_CONFIG_FILE} found, using built-in defaults");
        Ok(Self::default())
    }

    /// Load from a specific TOML file path.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents).map_err(|e| match e {
            ConfigError::Toml(source) => ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })
    }

    /// Parse and validate a TOML document.
    ///
    /// Unknown keys are logged as warnings with a suggested correction. They
    /// never fail the load.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        for w in super::validation::validate_unknown_keys(contents) {
            warn!("{}", w);
        }

        let config: Self = toml::from_str(contents).map_err(ConfigError::Toml)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize the current config to a TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Check every value the store, classifier and pipeline rely on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let (errors, warnings) = super::validation::validate_ranges(self);
        for w in &warnings {
            warn!("{}", w);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }
}

// ============================================================================
// Error Type
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config I/O error ({}): {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("config parse error ({}): {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("config parse error: {0}")]
    Toml(toml::de::Error),

    #[error("config serialization error: {0}")]
    Serialize(toml::ser::Error),

    #[error("config validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),
}

// ============================================================================
// Store
// ============================================================================

/// Which counter store implementation to open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    #[default]
    Sled,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,

    /// sled database directory (ignored by the memory backend)
    #[serde(default = "default_store_path")]
    pub path: PathBuf,

    /// Bucket width in milliseconds. Fixed for the lifetime of a database.
    #[serde(default = "default_interval_ms")]
    pub interval_ms: i64,
}

fn default_store_path() -> PathBuf {
    PathBuf::from(defaults::DEFAULT_DATA_DIR)
}
const fn default_interval_ms() -> i64 {
    defaults::DEFAULT_INTERVAL_MS
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            path: default_store_path(),
            interval_ms: default_interval_ms(),
        }
    }
}

// ============================================================================
// Congestion
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CongestionConfig {
    /// Vehicle entries strictly above this value count as busy
    #[serde(default = "default_threshold")]
    pub threshold: i64,

    /// Lookback window = `lookback_multiplier` x store interval
    #[serde(default = "default_lookback_multiplier")]
    pub lookback_multiplier: i64,

    #[serde(default)]
    pub accident_rule: AccidentRule,
}

const fn default_threshold() -> i64 {
    defaults::DEFAULT_CONGESTION_THRESHOLD
}
const fn default_lookback_multiplier() -> i64 {
    defaults::DEFAULT_LOOKBACK_MULTIPLIER
}

impl Default for CongestionConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            lookback_multiplier: default_lookback_multiplier(),
            accident_rule: AccidentRule::default(),
        }
    }
}

impl CongestionConfig {
    /// Lookback window in milliseconds for a store with the given interval.
    pub const fn lookback_ms(&self, interval_ms: i64) -> i64 {
        interval_ms.saturating_mul(self.lookback_multiplier)
    }
}

// ============================================================================
// Ingest
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    #[serde(default = "default_sink_workers")]
    pub sink_workers: usize,

    /// Capacity of the bounded record and event channels
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    #[serde(default = "default_max_store_retries")]
    pub max_store_retries: u32,

    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    /// Drop events with a zero or negative count instead of storing them
    #[serde(default = "default_true")]
    pub skip_non_positive: bool,
}

const fn default_sink_workers() -> usize {
    defaults::DEFAULT_SINK_WORKERS
}
const fn default_channel_capacity() -> usize {
    defaults::DEFAULT_CHANNEL_CAPACITY
}
const fn default_max_store_retries() -> u32 {
    defaults::DEFAULT_MAX_STORE_RETRIES
}
const fn default_retry_base_delay_ms() -> u64 {
    defaults::DEFAULT_RETRY_BASE_DELAY_MS
}
const fn default_true() -> bool {
    true
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            sink_workers: default_sink_workers(),
            channel_capacity: default_channel_capacity(),
            max_store_retries: default_max_store_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            skip_non_positive: default_true(),
        }
    }
}

// ============================================================================
// Server
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP server bind address.
    ///
    /// Can be overridden by `TRAFFIC_SERVER_ADDR` env var or `--addr` CLI flag.
    #[serde(default = "default_server_addr")]
    pub addr: String,

    /// Deadline for one congestion query, in milliseconds
    #[serde(default = "default_query_timeout_ms")]
    pub query_timeout_ms: u64,

    /// Allowed CORS origins. Empty means same-origin only.
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

fn default_server_addr() -> String {
    defaults::DEFAULT_SERVER_ADDR.to_string()
}
const fn default_query_timeout_ms() -> u64 {
    defaults::DEFAULT_QUERY_TIMEOUT_MS
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: default_server_addr(),
            query_timeout_ms: default_query_timeout_ms(),
            cors_origins: Vec::new(),
        }
    }
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.addr.parse().map_err(|_| {
            ConfigError::Validation(vec![format!(
                "server.addr '{}' is not a valid socket address",
                self.addr
            )])
        })
    }
}
