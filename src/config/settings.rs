//! Application settings

use crate::core::codec::{ResponseFormat, TextEncoding};
use crate::core::command::{CommandFormat, LineEnding};
use crate::core::receiver::FramingConfig;
use crate::core::transport::{SerialConfig, TcpConfig, TransportParams};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// No platform configuration directory
    #[error("Could not determine config directory")]
    NoConfigDir,

    /// Reading or writing the file failed
    #[error("Config I/O error on {path}: {source}")]
    Io {
        /// Settings file
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },

    /// File contents are not valid settings
    #[error("Invalid config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// Settings could not be serialized
    #[error("Cannot serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Which transport to open
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionMode {
    /// TCP socket
    #[default]
    Tcp,
    /// Serial port
    Serial,
}

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Transport to open on connect
    pub mode: ConnectionMode,
    /// Line ending appended to commands
    pub line_ending: LineEnding,
    /// Text encoding of commands and responses
    pub encoding: TextEncoding,
    /// Response display mode
    pub response_format: ResponseFormat,
    /// Silence in milliseconds that ends a response
    pub idle_timeout_ms: u64,
    /// Root directory of response logs
    pub log_dir: PathBuf,
    /// TCP parameters
    pub tcp: TcpConfig,
    /// Serial parameters
    pub serial: SerialConfig,
    /// Named command presets
    pub presets: BTreeMap<String, String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            mode: ConnectionMode::Tcp,
            line_ending: LineEnding::CrLf,
            encoding: TextEncoding::Utf8,
            response_format: ResponseFormat::Text,
            idle_timeout_ms: 500,
            log_dir: super::log_dir(),
            tcp: TcpConfig::default(),
            serial: SerialConfig::default(),
            presets: BTreeMap::new(),
        }
    }
}

impl Settings {
    /// Load settings from the platform config directory, or defaults when
    /// no file exists yet
    pub fn load() -> Result<Self, ConfigError> {
        let path = super::config_file().ok_or(ConfigError::NoConfigDir)?;
        Self::load_from(&path)
    }

    /// Load settings from `path`, or defaults when it does not exist
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(toml::from_str(&content)?)
    }

    /// Save settings to the platform config directory
    pub fn save(&self) -> Result<(), ConfigError> {
        let path = super::config_file().ok_or(ConfigError::NoConfigDir)?;
        self.save_to(&path)
    }

    /// Save settings to `path`
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        let io_error = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io_error)?;
        }
        std::fs::write(path, content).map_err(io_error)?;
        Ok(())
    }

    /// Resolved transport parameters for the selected mode
    pub fn transport_params(&self) -> TransportParams {
        match self.mode {
            ConnectionMode::Tcp => TransportParams::Tcp(self.tcp.clone()),
            ConnectionMode::Serial => TransportParams::Serial(self.serial.clone()),
        }
    }

    /// Command format for the connection
    pub fn command_format(&self) -> CommandFormat {
        CommandFormat::new(self.line_ending, self.encoding)
    }

    /// Framing parameters for the connection
    pub fn framing(&self) -> FramingConfig {
        FramingConfig::default()
            .idle_timeout(Duration::from_millis(self.idle_timeout_ms))
            .telnet(self.tcp.telnet)
    }

    /// Look up a preset by name
    pub fn preset(&self, name: &str) -> Option<&str> {
        self.presets.get(name).map(String::as_str)
    }
}
