//! Configuration for conpty-host.
//!
//! Settings are read from `~/.conpty-host/config.toml`:
//!
//! ```toml
//! # Command to run when none is given on the command line (optional)
//! command = "cmd.exe"
//!
//! # Console size used when the host terminal size is unknown
//! width = 120
//! height = 30
//!
//! # Strip ANSI control sequences from output
//! filter_control_sequences = false
//!
//! # Give up looking for the startup title after this many bytes
//! max_title_len = 65536
//!
//! # Log level: error, warn, info, debug, trace
//! log_level = "info"
//! ```
//!
//! A missing or unreadable file falls back to the defaults.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::monitor::DEFAULT_MAX_TITLE_LEN;

/// Directory under the home directory holding config and logs
pub const APP_DIR: &str = ".conpty-host";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Read(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Could not determine config path")]
    NoHome,
}

/// Main configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Default command line
    pub command: Option<String>,
    /// Fallback console width
    pub width: i16,
    /// Fallback console height
    pub height: i16,
    /// Strip control sequences from output
    pub filter_control_sequences: bool,
    /// Title buffer bound
    pub max_title_len: usize,
    /// Log level filter
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            command: None,
            width: 120,
            height: 30,
            filter_control_sequences: false,
            max_title_len: DEFAULT_MAX_TITLE_LEN,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        Ok(config.sanitized())
    }

    /// Load configuration from the default location
    pub fn load() -> Self {
        match Self::config_path() {
            Some(path) => Self::load_from(&path),
            None => Self::default(),
        }
    }

    /// Load configuration from `path`, falling back to defaults
    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }
        fs::read_to_string(path)
            .map_err(ConfigError::from)
            .and_then(|content| Self::from_toml(&content))
            .unwrap_or_default()
    }

    /// Save configuration to the default location
    pub fn save(&self) -> Result<(), ConfigError> {
        let path = Self::config_path().ok_or(ConfigError::NoHome)?;
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Get config file path
    pub fn config_path() -> Option<PathBuf> {
        app_dir().map(|dir| dir.join("config.toml"))
    }

    /// Replace out-of-range values with defaults
    fn sanitized(mut self) -> Self {
        let defaults = Self::default();
        if self.width < 1 {
            self.width = defaults.width;
        }
        if self.height < 1 {
            self.height = defaults.height;
        }
        if self.max_title_len == 0 {
            self.max_title_len = defaults.max_title_len;
        }
        self
    }
}

/// `~/.conpty-host`
pub fn app_dir() -> Option<PathBuf> {
    home_dir().map(|home| home.join(APP_DIR))
}

// Get home directory
fn home_dir() -> Option<PathBuf> {
    std::env::var_os("USERPROFILE")
        .or_else(|| std::env::var_os("HOME"))
        .map(PathBuf::from)
}
