//! Configuration system for fetch
//!
//! Supports TOML configuration files with sensible defaults.
//! Configuration is loaded from:
//! - macOS: ~/Library/Application Support/fetch/config.toml
//! - Linux: ~/.config/fetch/config.toml
//! - Windows: %APPDATA%/fetch/config.toml

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::DEFAULT_QUEUE_DEPTH;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Cache store settings
    pub cache: CacheConfig,
    /// Where misses are fetched from
    pub origin: OriginConfig,
    /// HTTP server settings
    pub server: ServerConfig,
}

/// Cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum bytes resident on disk (default 10GB)
    pub capacity_bytes: u64,
    /// Cache directory (uses system cache dir if None)
    pub root: Option<PathBuf>,
    /// Bounded request queue depth per store
    pub queue_depth: usize,
    /// Number of independent stores the keyspace is split across
    pub shards: usize,
    /// How long `open` waits for the store, 0 waits forever
    pub request_timeout_secs: u64,
    /// Remove leftover files from a previous run at startup
    pub clear_on_start: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity_bytes: 10 * 1024 * 1024 * 1024, // 10GB
            root: None,
            queue_depth: DEFAULT_QUEUE_DEPTH,
            shards: 1,
            request_timeout_secs: 30,
            clear_on_start: true,
        }
    }
}

impl CacheConfig {
    pub fn request_timeout(&self) -> Option<Duration> {
        match self.request_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

/// Origin configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum OriginConfig {
    /// Serve files from a local directory
    Dir { path: PathBuf },
    /// Serve objects from an S3-compatible bucket
    S3 {
        bucket: String,
        #[serde(default)]
        region: Option<String>,
        /// Custom endpoint (MinIO, R2, ...)
        #[serde(default)]
        endpoint: Option<String>,
        #[serde(default)]
        force_path_style: bool,
        /// Per-request timeout in seconds, 0 disables
        #[serde(default)]
        timeout_secs: u64,
    },
}

impl Default for OriginConfig {
    fn default() -> Self {
        OriginConfig::Dir {
            path: PathBuf::from("/content"),
        }
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address
    pub bind: IpAddr,
    /// Listen port
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 8080,
        }
    }
}

impl ServerConfig {
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Self {
        match Self::default_path() {
            Some(path) => Self::load_from(&path).unwrap_or_else(|e| {
                warn!("Failed to load config from {:?}: {}, using defaults", path, e);
                Self::default()
            }),
            None => {
                debug!("No config directory found, using defaults");
                Self::default()
            }
        }
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            debug!("Config file {:?} not found, using defaults", path);
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;

        info!("Loaded config from {:?}", path);
        Ok(config)
    }

    /// Save configuration to a specific path
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        info!("Saved config to {:?}", path);
        Ok(())
    }

    /// Get the default config file path
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "fetch").map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Get the effective cache directory (config override or system default)
    pub fn cache_root(&self) -> PathBuf {
        self.cache
            .root
            .clone()
            .or_else(|| ProjectDirs::from("", "", "fetch").map(|d| d.cache_dir().join("objects")))
            .unwrap_or_else(|| PathBuf::from("/tmp/fetch"))
    }

    /// Check values that serde cannot
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache.shards == 0 {
            return Err(ConfigError::Invalid("cache.shards must be at least 1".into()));
        }
        if self.cache.queue_depth == 0 {
            return Err(ConfigError::Invalid("cache.queue_depth must be at least 1".into()));
        }
        if self.cache.capacity_bytes < self.cache.shards as u64 {
            return Err(ConfigError::Invalid(
                "cache.capacity_bytes must leave at least one byte per shard".into(),
            ));
        }
        Ok(())
    }

    /// Generate a sample configuration file content
    pub fn sample() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Serialization error: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
