//! Runtime configuration types for the logger

use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::Level;

use crate::logger::error::LoggerError;

/// Valid log levels accepted by [`LoggerConfig::parse_level`]
pub const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Main logger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggerConfig {
    pub console: ConsoleConfig,
    pub file: FileConfig,
    pub level: String,
}

impl LoggerConfig {
    /// Create a new logger configuration with validation
    pub fn new(console: ConsoleConfig, file: FileConfig, level: String) -> Result<Self, LoggerError> {
        let config = Self {
            console,
            file,
            level,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), LoggerError> {
        self.parse_level()?;
        self.file.validate()?;

        if !self.console.enabled && !self.file.enabled {
            return Err(LoggerError::config(
                "At least one output (console or file) must be enabled",
            ));
        }

        Ok(())
    }

    /// Parse the level string into a `tracing::Level`
    pub fn parse_level(&self) -> Result<Level, LoggerError> {
        match self.level.to_lowercase().as_str() {
            "trace" => Ok(Level::TRACE),
            "debug" => Ok(Level::DEBUG),
            "info" => Ok(Level::INFO),
            "warn" => Ok(Level::WARN),
            "error" => Ok(Level::ERROR),
            _ => Err(LoggerError::config(format!(
                "Invalid log level '{}'. Valid levels are: {}",
                self.level,
                LOG_LEVELS.join(", ")
            ))),
        }
    }
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            console: ConsoleConfig::default(),
            file: FileConfig::default(),
            level: "info".to_string(),
        }
    }
}

/// Console output configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsoleConfig {
    pub enabled: bool,
    pub colored: bool,
}

impl ConsoleConfig {
    pub fn new(enabled: bool, colored: bool) -> Self {
        Self { enabled, colored }
    }
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            colored: true,
        }
    }
}

/// File output configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileConfig {
    pub enabled: bool,
    pub path: PathBuf,
    pub append: bool,
    pub format: LogFormat,
    pub rotation: RotationConfig,
}

impl FileConfig {
    /// Create a new file configuration with validation
    pub fn new(
        enabled: bool,
        path: PathBuf,
        append: bool,
        format: LogFormat,
        rotation: RotationConfig,
    ) -> Result<Self, LoggerError> {
        let config = Self {
            enabled,
            path,
            append,
            format,
            rotation,
        };
        config.validate()?;
        Ok(config)
    }

    /// Pure validation. Directory creation happens when the writer is built.
    pub fn validate(&self) -> Result<(), LoggerError> {
        if !self.enabled {
            return Ok(());
        }

        if self.path.as_os_str().is_empty() {
            return Err(LoggerError::config(
                "File path cannot be empty when file output is enabled",
            ));
        }

        self.rotation.validate()
    }
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: PathBuf::from("logs/perpetua.log"),
            append: true,
            format: LogFormat::Full,
            rotation: RotationConfig::default(),
        }
    }
}

/// Log line format for the file output
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum LogFormat {
    /// `2026-10-16 09:30:00  INFO message key=value`
    #[default]
    Full,
    Compact,
    Json,
}

impl LogFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogFormat::Full => "full",
            LogFormat::Compact => "compact",
            LogFormat::Json => "json",
        }
    }
}

impl FromStr for LogFormat {
    type Err = LoggerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "full" => Ok(LogFormat::Full),
            "compact" => Ok(LogFormat::Compact),
            "json" => Ok(LogFormat::Json),
            _ => Err(LoggerError::config(format!(
                "Invalid log format '{}'. Valid formats are: full, compact, json",
                s
            ))),
        }
    }
}

/// File rotation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RotationConfig {
    pub strategy: RotationStrategy,
    /// Size threshold in bytes, used by `Size` and `Combined`
    pub max_size: u64,
    /// Number of rotated files kept next to the active one
    pub max_files: usize,
}

impl RotationConfig {
    pub fn new(
        strategy: RotationStrategy,
        max_size: u64,
        max_files: usize,
    ) -> Result<Self, LoggerError> {
        let config = Self {
            strategy,
            max_size,
            max_files,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), LoggerError> {
        if self.max_size == 0 {
            return Err(LoggerError::config(
                "Maximum file size must be greater than 0",
            ));
        }

        if self.max_files == 0 {
            return Err(LoggerError::config(
                "Maximum number of files must be greater than 0",
            ));
        }

        Ok(())
    }
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            strategy: RotationStrategy::Time(RollingPeriod::Daily),
            max_size: 10 * 1024 * 1024,
            max_files: 7,
        }
    }
}

/// When the active log file is rolled over
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RotationStrategy {
    /// Roll when the file reaches `max_size`
    Size,
    /// Roll when the calendar period changes
    Time(RollingPeriod),
    /// Roll on whichever of a daily boundary or `max_size` comes first
    Combined,
}

impl FromStr for RotationStrategy {
    type Err = LoggerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "size" => Ok(RotationStrategy::Size),
            "time" | "daily" => Ok(RotationStrategy::Time(RollingPeriod::Daily)),
            "hourly" => Ok(RotationStrategy::Time(RollingPeriod::Hourly)),
            "combined" => Ok(RotationStrategy::Combined),
            _ => Err(LoggerError::config(format!(
                "Invalid rotation strategy '{}'. Valid strategies are: size, daily, hourly, combined",
                s
            ))),
        }
    }
}

/// Calendar period of a time-rolled log file
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RollingPeriod {
    Hourly,
    Daily,
}

impl RollingPeriod {
    /// strftime pattern naming the period a timestamp falls into
    pub fn label_pattern(&self) -> &'static str {
        match self {
            RollingPeriod::Hourly => "%Y%m%d%H",
            RollingPeriod::Daily => "%Y%m%d",
        }
    }
}
