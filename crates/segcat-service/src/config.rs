//! Configuration management for the segment catalog.
//!
//! Supports multiple configuration sources with precedence:
//! 1. Environment variables (highest priority)
//! 2. TOML configuration file
//! 3. Default values (lowest priority)

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::segment_manager::SegmentManagerConfig;

/// Main configuration structure for the coordinator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Metadata database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Segment table and poll schedule
    #[serde(default)]
    pub segments: SegmentsConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite database path (default: "sqlite://segcat.db")
    #[serde(default = "default_db_path")]
    pub path: String,

    /// Max connections in pool (default: 8)
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Connection acquire timeout in seconds (default: 5)
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout_seconds: u64,
}

/// Segment table and poll schedule
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentsConfig {
    /// Name of the persistent segment table (default: "segments")
    #[serde(default = "default_segment_table")]
    pub table: String,

    /// Delay between the end of one poll and the start of the next (default: 60)
    #[serde(default = "default_poll_period")]
    pub poll_period_seconds: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error (default: "info")
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty (default: "pretty")
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_db_path() -> String {
    "sqlite://segcat.db".to_string()
}

fn default_max_connections() -> u32 {
    8
}

fn default_connection_timeout() -> u64 {
    5
}

fn default_segment_table() -> String {
    "segments".to_string()
}

fn default_poll_period() -> u64 {
    60
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            max_connections: default_max_connections(),
            connection_timeout_seconds: default_connection_timeout(),
        }
    }
}

impl Default for SegmentsConfig {
    fn default() -> Self {
        Self {
            table: default_segment_table(),
            poll_period_seconds: default_poll_period(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file doesn't exist or has invalid TOML syntax.
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let contents = std::fs::read_to_string(&path).map_err(|e| ConfigError::IoError {
            path: path.clone(),
            source: e,
        })?;

        toml::from_str(&contents).map_err(|e| ConfigError::TomlError { path, source: e })
    }

    /// Load configuration with environment variable overrides.
    ///
    /// Reads `path` when given, otherwise `segcat.toml` if it exists, otherwise defaults.
    ///
    /// Supported environment variables:
    /// - `SEGCAT_DB_PATH` - Database path
    /// - `SEGCAT_SEGMENT_TABLE` - Segment table name
    /// - `SEGCAT_POLL_PERIOD_SECONDS` - Poll period
    /// - `SEGCAT_LOG_LEVEL` - Log level
    /// - `SEGCAT_LOG_FORMAT` - Log format
    pub fn load(path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None if std::path::Path::new("segcat.toml").exists() => {
                Self::from_file("segcat.toml")?
            }
            None => Self::default(),
        };

        config.apply_env_overrides();

        Ok(config)
    }

    /// Apply environment variable overrides to the configuration.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides read through `lookup`, keyed by environment variable name.
    ///
    /// Unparsable numeric values are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(path) = lookup("SEGCAT_DB_PATH") {
            self.database.path = path;
        }

        if let Some(table) = lookup("SEGCAT_SEGMENT_TABLE") {
            self.segments.table = table;
        }

        if let Some(period) = lookup("SEGCAT_POLL_PERIOD_SECONDS") {
            if let Ok(period) = period.parse() {
                self.segments.poll_period_seconds = period;
            }
        }

        if let Some(level) = lookup("SEGCAT_LOG_LEVEL") {
            self.logging.level = level;
        }

        if let Some(format) = lookup("SEGCAT_LOG_FORMAT") {
            self.logging.format = format;
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database.path.is_empty() {
            return Err(ConfigError::ValidationError(
                "database.path cannot be empty".to_string(),
            ));
        }

        if self.database.max_connections == 0 {
            return Err(ConfigError::ValidationError(
                "database.max_connections must be > 0".to_string(),
            ));
        }

        if self.database.connection_timeout_seconds == 0 {
            return Err(ConfigError::ValidationError(
                "database.connection_timeout_seconds must be > 0".to_string(),
            ));
        }

        segcat_metadata::validate_table_name(&self.segments.table)
            .map_err(|e| ConfigError::ValidationError(format!("segments.table: {e}")))?;

        if self.segments.poll_period_seconds == 0 {
            return Err(ConfigError::ValidationError(
                "segments.poll_period_seconds must be > 0".to_string(),
            ));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "logging.level must be one of: {}",
                valid_levels.join(", ")
            )));
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "logging.format must be one of: {}",
                valid_formats.join(", ")
            )));
        }

        Ok(())
    }

    /// Settings handed to the segment manager at construction.
    pub fn segment_manager(&self) -> SegmentManagerConfig {
        SegmentManagerConfig {
            poll_period: Duration::from_secs(self.segments.poll_period_seconds),
            segment_table: self.segments.table.clone(),
        }
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// I/O error reading configuration file
    #[error("Failed to read config file {path:?}: {source}")]
    IoError {
        path: PathBuf,
        source: std::io::Error,
    },

    /// TOML parsing error
    #[error("Failed to parse TOML in {path:?}: {source}")]
    TomlError {
        path: PathBuf,
        source: toml::de::Error,
    },

    /// Validation error
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
