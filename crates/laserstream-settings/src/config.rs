//! Configuration and settings management for laserstream
//!
//! Provides configuration file handling and validation. Supports JSON and
//! TOML files; the default location lives in the platform config directory.
//!
//! Configuration is organized into two sections:
//! - Connection settings (device selection, baud rate, timeouts)
//! - Streaming settings (firmware buffer size, flow control, status polling)

use laserstream_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application directory name under the platform config dir
pub const APP_DIR: &str = "laserstream";

/// Default config file name
pub const CONFIG_FILE: &str = "config.toml";

/// How an enumerated device is compared against the match pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStrategy {
    /// Pattern is searched for in the device path and its USB hardware id (VID:PID)
    HardwareId,
    /// Device file name or description starts with the pattern
    NamePrefix,
    /// Device path equals the pattern
    Exact,
}

impl MatchStrategy {
    /// The strategy that suits the host platform
    pub fn platform_default() -> Self {
        if cfg!(target_os = "linux") {
            Self::HardwareId
        } else {
            Self::NamePrefix
        }
    }
}

impl Default for MatchStrategy {
    fn default() -> Self {
        Self::platform_default()
    }
}

/// Device pattern that finds an Arduino-based controller on this platform
pub fn default_match_pattern() -> String {
    if cfg!(windows) {
        "Arduino".to_string()
    } else if cfg!(target_os = "linux") {
        // Arduino USB vendor id
        "2341".to_string()
    } else {
        "tty.usbmodem".to_string()
    }
}

/// Connection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionSettings {
    /// Explicit device path; skips matching when set
    pub port: Option<String>,
    /// Pattern used to pick a device when no port is given
    pub match_pattern: String,
    /// How `match_pattern` is compared
    pub match_strategy: MatchStrategy,
    /// Serial baud rate
    pub baud_rate: u32,
    /// Read poll timeout in milliseconds
    pub read_timeout_ms: u64,
    /// Upper bound on a single write in milliseconds
    pub write_timeout_ms: u64,
    /// Wait after opening before discarding boot output, in milliseconds
    pub settle_ms: u64,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            port: None,
            match_pattern: default_match_pattern(),
            match_strategy: MatchStrategy::platform_default(),
            baud_rate: 57600,
            read_timeout_ms: 10,
            write_timeout_ms: 100,
            settle_ms: 1000,
        }
    }
}

impl ConnectionSettings {
    /// Read timeout as a duration
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    /// Write timeout as a duration
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    /// Settle delay as a duration
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
}

/// Where the window learns that the firmware consumed bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowControlMode {
    /// Trust the free-byte count in status reports
    #[default]
    BufferReport,
    /// Retire the oldest in-flight command on every `ok` or `error:` line
    Acknowledge,
}

impl std::fmt::Display for FlowControlMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BufferReport => write!(f, "buffer-report"),
            Self::Acknowledge => write!(f, "acknowledge"),
        }
    }
}

/// Streaming settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingSettings {
    /// Firmware receive buffer size in bytes; must match the firmware build
    pub rx_buffer_capacity: usize,
    /// Flow control mode
    pub flow_control: FlowControlMode,
    /// Status query interval in milliseconds; `None` or 0 never polls
    pub status_poll_ms: Option<u64>,
    /// Drop blank lines when enqueueing a whole program
    pub skip_blank_lines: bool,
}

impl Default for StreamingSettings {
    fn default() -> Self {
        Self {
            rx_buffer_capacity: 128,
            flow_control: FlowControlMode::BufferReport,
            status_poll_ms: Some(100),
            skip_blank_lines: true,
        }
    }
}

impl StreamingSettings {
    /// Status poll interval as a duration
    pub fn status_poll_interval(&self) -> Option<Duration> {
        self.status_poll_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }
}

/// Complete application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Connection settings
    pub connection: ConnectionSettings,
    /// Streaming settings
    pub streaming: StreamingSettings,
}

impl Config {
    /// Create new config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Load config from file (JSON or TOML)
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("Failed to read config file: {}", e)))?;

        let config: Self = if path.extension().is_some_and(|ext| ext == "json") {
            serde_json::from_str(&content)
                .map_err(|e| Error::config(format!("Invalid JSON config: {}", e)))?
        } else if path.extension().is_some_and(|ext| ext == "toml") {
            toml::from_str(&content)
                .map_err(|e| Error::config(format!("Invalid TOML config: {}", e)))?
        } else {
            return Err(Error::config("Config file must be .json or .toml"));
        };

        config.validate()?;
        Ok(config)
    }

    /// Save config to file (JSON or TOML)
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        self.validate()?;

        let content = if path.extension().is_some_and(|ext| ext == "json") {
            serde_json::to_string_pretty(self)
                .map_err(|e| Error::config(format!("Failed to serialize config: {}", e)))?
        } else if path.extension().is_some_and(|ext| ext == "toml") {
            toml::to_string_pretty(self)
                .map_err(|e| Error::config(format!("Failed to serialize config: {}", e)))?
        } else {
            return Err(Error::config("Config file must be .json or .toml"));
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)
            .map_err(|e| Error::config(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    /// Load from `path`, or fall back to defaults when the file is missing
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load_from_file(path)
        } else {
            tracing::debug!("No config at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.connection.baud_rate == 0 {
            return Err(Error::config("Baud rate must be > 0"));
        }

        if self.connection.read_timeout_ms == 0 || self.connection.write_timeout_ms == 0 {
            return Err(Error::config("Serial timeouts must be > 0"));
        }

        if self.connection.match_pattern.trim().is_empty() {
            return Err(Error::config("Device match pattern must not be empty"));
        }

        if let Some(port) = &self.connection.port {
            if port.trim().is_empty() {
                return Err(Error::config("Explicit port must not be empty"));
            }
        }

        if self.streaming.rx_buffer_capacity == 0 {
            return Err(Error::config("Receive buffer capacity must be > 0"));
        }

        Ok(())
    }
}

/// `<platform config dir>/laserstream/config.toml`, if the platform has one
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(APP_DIR).join(CONFIG_FILE))
}
