//! Client configuration, loaded from YAML.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::model::{Endpoint, EndpointError};

/// Default cap on one frame's payload (guards against corrupt length headers).
pub const DEFAULT_MAX_FRAME_LEN: u32 = 256 * 1024 * 1024;

/// Configuration loading errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Invalid server endpoint: {0}")]
    Endpoint(#[from] EndpointError),
}

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Inference server connection settings.
    #[serde(default)]
    pub server: ServerConfig,
    /// Diagnostics and event log settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Inference server connection settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Per-address connect timeout.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Timeout for blocking reads of a response. None blocks indefinitely.
    ///
    /// A timeout tears the session down exactly like a disconnect.
    #[serde(default)]
    pub read_timeout_ms: Option<u64>,
    /// Timeout for writing a request. None blocks indefinitely.
    ///
    /// Only bites when the server stops draining its socket; handled like a
    /// read timeout.
    #[serde(default)]
    pub write_timeout_ms: Option<u64>,
    /// Largest accepted frame payload in bytes.
    #[serde(default = "default_max_frame_len")]
    pub max_frame_len: u32,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    55555
}

fn default_connect_timeout_ms() -> u64 {
    5000
}

fn default_max_frame_len() -> u32 {
    DEFAULT_MAX_FRAME_LEN
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            connect_timeout_ms: default_connect_timeout_ms(),
            read_timeout_ms: None,
            write_timeout_ms: None,
            max_frame_len: default_max_frame_len(),
        }
    }
}

impl ServerConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout_ms.map(Duration::from_millis)
    }

    pub fn write_timeout(&self) -> Option<Duration> {
        self.write_timeout_ms.map(Duration::from_millis)
    }
}

/// Diagnostics settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// If set, session events are appended to this NDJSON file.
    #[serde(default)]
    pub events_path: Option<String>,
    /// Flush the event log every N lines (0 disables periodic flushing).
    #[serde(default = "default_flush_every_lines")]
    pub flush_every_lines: u64,
    /// `tracing` filter directive used when RUST_LOG is not set.
    #[serde(default = "default_filter")]
    pub filter: String,
}

fn default_flush_every_lines() -> u64 {
    1
}

fn default_filter() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            events_path: None,
            flush_every_lines: default_flush_every_lines(),
            filter: default_filter(),
        }
    }
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Validated server endpoint.
    pub fn endpoint(&self) -> Result<Endpoint, ConfigError> {
        Ok(Endpoint::new(self.server.host.clone(), self.server.port)?)
    }
}
