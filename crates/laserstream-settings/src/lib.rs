//! # Laserstream Settings
//!
//! Connection and streaming configuration with TOML/JSON persistence.

pub mod config;

pub use config::{
    default_config_path, default_match_pattern, Config, ConnectionSettings, FlowControlMode,
    MatchStrategy, StreamingSettings,
};
