//! # Configuration Module
//!
//! Handles loading and validating bridge configuration.
//!
//! Configuration comes from an optional TOML file, with environment
//! variables (`SERIAL_PORT`, `BAUD_RATE`, `DB_PATH`, `LOG_DIR`) taking
//! precedence over file values. The bridge has no CLI flags.

use serde::Deserialize;
use serde::de::Error;
use std::fs;
use std::path::Path;

use crate::error::Result;

/// Main configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub serial: SerialConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub log: LogConfig,
}

/// Serial port configuration
#[derive(Debug, Deserialize, Clone)]
pub struct SerialConfig {
    #[serde(default = "default_serial_port")]
    pub port: String,

    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    /// Delay after each write, giving the device time to process the
    /// command before the next one arrives
    #[serde(default = "default_write_settle_ms")]
    pub write_settle_ms: u64,

    /// How long a single receive poll waits for bytes before reporting
    /// "nothing available"
    #[serde(default = "default_read_poll_ms")]
    pub read_poll_ms: u64,
}

/// Storage (SQLite) configuration
#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

/// Log output configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LogConfig {
    #[serde(default = "default_log_file_enabled")]
    pub file_enabled: bool,

    #[serde(default = "default_log_dir")]
    pub dir: String,
}

// Default value functions
fn default_serial_port() -> String { "/dev/ttyUSB0".to_string() }
fn default_baud_rate() -> u32 { 9600 }
fn default_write_settle_ms() -> u64 { 100 }
fn default_read_poll_ms() -> u64 { 10 }

fn default_db_path() -> String { "drone_bridge.db".to_string() }

fn default_log_file_enabled() -> bool { true }
fn default_log_dir() -> String { "./logs".to_string() }

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: default_serial_port(),
            baud_rate: default_baud_rate(),
            write_settle_ms: default_write_settle_ms(),
            read_poll_ms: default_read_poll_ms(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { path: default_db_path() }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            file_enabled: default_log_file_enabled(),
            dir: default_log_dir(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Returns
    ///
    /// * `Result<Config>` - Loaded and validated configuration
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read, TOML parsing fails, or
    /// validation fails.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Build configuration from the process environment
    ///
    /// Reads an optional TOML file named by `BRIDGE_CONFIG`, then applies
    /// environment variable overrides on top. With no file and no
    /// variables set, every field takes its default.
    ///
    /// # Errors
    ///
    /// Returns error if the named config file is unreadable or invalid,
    /// or if the resulting configuration fails validation.
    pub fn from_env() -> Result<Self> {
        let mut config = match std::env::var("BRIDGE_CONFIG") {
            Ok(path) => Self::load(path)?,
            Err(_) => Self::default(),
        };

        config.apply_overrides(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    /// Apply environment-style overrides from a lookup function
    ///
    /// Separated from [`Config::from_env`] so tests can supply variables
    /// without touching the process environment.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup("SERIAL_PORT") {
            self.serial.port = port;
        }
        if let Some(baud) = lookup("BAUD_RATE") {
            match baud.parse::<u32>() {
                Ok(rate) => self.serial.baud_rate = rate,
                Err(_) => tracing::warn!("ignoring unparseable BAUD_RATE: {}", baud),
            }
        }
        if let Some(path) = lookup("DB_PATH") {
            self.storage.path = path;
        }
        if let Some(dir) = lookup("LOG_DIR") {
            self.log.dir = dir;
        }
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any configuration value is out of valid range
    pub fn validate(&self) -> Result<()> {
        if self.serial.port.is_empty() {
            return Err(crate::error::BridgeError::Config(
                toml::de::Error::custom("serial port cannot be empty")
            ));
        }

        if self.serial.baud_rate == 0 {
            return Err(crate::error::BridgeError::Config(
                toml::de::Error::custom("baud_rate must be greater than 0")
            ));
        }

        if self.serial.write_settle_ms > 10000 {
            return Err(crate::error::BridgeError::Config(
                toml::de::Error::custom("write_settle_ms must be at most 10000")
            ));
        }

        if self.serial.read_poll_ms == 0 || self.serial.read_poll_ms > 1000 {
            return Err(crate::error::BridgeError::Config(
                toml::de::Error::custom("read_poll_ms must be between 1 and 1000")
            ));
        }

        if self.storage.path.is_empty() {
            return Err(crate::error::BridgeError::Config(
                toml::de::Error::custom("storage path cannot be empty")
            ));
        }

        if self.log.file_enabled && self.log.dir.is_empty() {
            return Err(crate::error::BridgeError::Config(
                toml::de::Error::custom("log dir cannot be empty when file logging is enabled")
            ));
        }

        Ok(())
    }
}
