//! Configuration settings structures for perpetua
//!
//! Every section can be loaded from TOML files and overridden through
//! `PERPETUA_*` environment variables.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::error::ConfigError;
use crate::logger::{ConsoleConfig, FileConfig, LogFormat, LoggerConfig, RotationConfig};

// ============================================================================
// Default value functions
// ============================================================================

fn default_app_name() -> String {
    "perpetua".to_string()
}

fn default_app_version() -> String {
    crate::pkg_version().to_string()
}

fn default_max_connections() -> u32 {
    4
}

fn default_min_connections() -> u32 {
    1
}

fn default_connection_timeout() -> u64 {
    30
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_visibility_timeout() -> u64 {
    300
}

fn default_maintenance_interval() -> u64 {
    30
}

fn default_backoff_initial_ms() -> u64 {
    500
}

fn default_backoff_max() -> u64 {
    60
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_retention_hours() -> u64 {
    168 // 7 days
}

fn default_interval_seconds() -> u64 {
    60
}

fn default_handler() -> String {
    crate::jobs::tasks::MessageLogHandler::HANDLER_ID.to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_log_path() -> String {
    "logs/perpetua.log".to_string()
}

fn default_log_format() -> String {
    "full".to_string()
}

fn default_rotation_strategy() -> String {
    "daily".to_string()
}

fn default_max_size() -> u64 {
    10 * 1024 * 1024 // 10MB
}

fn default_max_files() -> usize {
    7
}

// ============================================================================
// Application Configuration
// ============================================================================

/// Application basic information configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationConfig {
    #[serde(default = "default_app_name")]
    pub name: String,

    #[serde(default = "default_app_version")]
    pub version: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_app_name(),
            version: default_app_version(),
        }
    }
}

// ============================================================================
// Store Configuration
// ============================================================================

/// Where job records are kept
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// One PostgreSQL database per tenant, addressed by its storage locator
    #[default]
    Postgres,
    /// Process-local store; nothing survives a restart
    Memory,
}

impl std::fmt::Display for StoreBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreBackend::Postgres => f.write_str("postgres"),
            StoreBackend::Memory => f.write_str("memory"),
        }
    }
}

/// Job store backend and per-tenant connection pool settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,

    /// Maximum number of connections in each tenant pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Idle connections kept open in each tenant pool
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Connection checkout timeout in seconds
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout: u64,

    /// Apply pending migrations to every tenant database on start
    #[serde(default)]
    pub auto_migrate: bool,
}

impl StoreConfig {
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout)
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            connection_timeout: default_connection_timeout(),
            auto_migrate: false,
        }
    }
}

// ============================================================================
// Scheduler Configuration
// ============================================================================

/// How the initial job of each tenant chain is enqueued on start
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeedPolicy {
    /// Seed only when the tenant queue holds no live record
    #[default]
    IfAbsent,
    /// Seed on every start, even if a chain is already running
    Always,
}

/// Dispatcher timing and retention
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Idle sleep between claim attempts, in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Claim lifetime in seconds; also bounds a single handler run
    #[serde(default = "default_visibility_timeout")]
    pub visibility_timeout: u64,

    /// Seconds between expired-claim release and retention sweeps
    #[serde(default = "default_maintenance_interval")]
    pub maintenance_interval: u64,

    /// First backoff delay after a store failure, in milliseconds
    #[serde(default = "default_backoff_initial_ms")]
    pub backoff_initial_ms: u64,

    /// Backoff ceiling in seconds
    #[serde(default = "default_backoff_max")]
    pub backoff_max: u64,

    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Finished records older than this many hours are purged
    #[serde(default = "default_retention_hours")]
    pub retention_hours: u64,

    #[serde(default)]
    pub seed_policy: SeedPolicy,
}

impl SchedulerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.visibility_timeout)
    }

    pub fn maintenance_interval(&self) -> Duration {
        Duration::from_secs(self.maintenance_interval)
    }

    pub fn backoff_initial(&self) -> Duration {
        Duration::from_millis(self.backoff_initial_ms)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_secs(self.backoff_max)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_hours.saturating_mul(3600))
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            visibility_timeout: default_visibility_timeout(),
            maintenance_interval: default_maintenance_interval(),
            backoff_initial_ms: default_backoff_initial_ms(),
            backoff_max: default_backoff_max(),
            backoff_multiplier: default_backoff_multiplier(),
            retention_hours: default_retention_hours(),
            seed_policy: SeedPolicy::default(),
        }
    }
}

// ============================================================================
// Tenant Configuration
// ============================================================================

/// One `[[tenants]]` entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantSettings {
    /// Tenant identity; defaults to the database name of the locator
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Connection descriptor of the tenant's own database
    pub storage_locator: String,

    /// Seconds between the end of one run and the next due time
    #[serde(default = "default_interval_seconds")]
    pub interval_seconds: u64,

    /// Handler identifier resolved by the activator
    #[serde(default = "default_handler")]
    pub handler: String,
}

impl TenantSettings {
    pub fn new(storage_locator: impl Into<String>, interval_seconds: u64) -> Self {
        Self {
            name: None,
            storage_locator: storage_locator.into(),
            interval_seconds,
            handler: default_handler(),
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }
}

// ============================================================================
// Logger Settings
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsoleSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_true")]
    pub colored: bool,
}

impl Default for ConsoleSettings {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            colored: default_true(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RotationSettings {
    /// "daily", "hourly", "size" or "combined"
    #[serde(default = "default_rotation_strategy")]
    pub strategy: String,

    /// Size threshold in bytes
    #[serde(default = "default_max_size")]
    pub max_size: u64,

    /// Rotated files kept on disk
    #[serde(default = "default_max_files")]
    pub max_files: usize,
}

impl Default for RotationSettings {
    fn default() -> Self {
        Self {
            strategy: default_rotation_strategy(),
            max_size: default_max_size(),
            max_files: default_max_files(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_log_path")]
    pub path: String,

    #[serde(default = "default_true")]
    pub append: bool,

    /// "full", "compact" or "json"
    #[serde(default = "default_log_format")]
    pub format: String,

    #[serde(default)]
    pub rotation: RotationSettings,
}

impl Default for FileSettings {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            path: default_log_path(),
            append: default_true(),
            format: default_log_format(),
            rotation: RotationSettings::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggerSettings {
    /// "trace", "debug", "info", "warn" or "error"
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub console: ConsoleSettings,

    #[serde(default)]
    pub file: FileSettings,
}

impl Default for LoggerSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            console: ConsoleSettings::default(),
            file: FileSettings::default(),
        }
    }
}

impl LoggerSettings {
    /// Convert the file representation into the runtime logger configuration
    pub fn into_logger_config(self) -> Result<LoggerConfig, ConfigError> {
        let console = ConsoleConfig::new(self.console.enabled, self.console.colored);
        let file = self.file.into_file_config()?;

        LoggerConfig::new(console, file, self.level)
            .map_err(|e| ConfigError::validation("logger", e.to_string()))
    }
}

impl FileSettings {
    pub fn into_file_config(self) -> Result<FileConfig, ConfigError> {
        let format = self
            .format
            .parse::<LogFormat>()
            .map_err(|e| ConfigError::validation("logger.file.format", e.to_string()))?;
        let rotation = self.rotation.into_rotation_config()?;

        FileConfig::new(
            self.enabled,
            PathBuf::from(self.path),
            self.append,
            format,
            rotation,
        )
        .map_err(|e| ConfigError::validation("logger.file", e.to_string()))
    }
}

impl RotationSettings {
    pub fn into_rotation_config(self) -> Result<RotationConfig, ConfigError> {
        let strategy = self
            .strategy
            .parse()
            .map_err(|e: crate::logger::LoggerError| {
                ConfigError::validation("logger.file.rotation.strategy", e.to_string())
            })?;

        RotationConfig::new(strategy, self.max_size, self.max_files)
            .map_err(|e| ConfigError::validation("logger.file.rotation", e.to_string()))
    }
}

// ============================================================================
// Root Settings
// ============================================================================

/// Root configuration structure
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub application: ApplicationConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Tenants in configuration order
    #[serde(default)]
    pub tenants: Vec<TenantSettings>,

    #[serde(default)]
    pub logger: LoggerSettings,
}
