//! Configuration validation logic
//!
//! This module provides validation methods for all configuration structures
//! to ensure configuration values are within acceptable ranges and formats.

use crate::config::error::ConfigError;
use crate::config::settings::{
    FileSettings, LoggerSettings, SchedulerConfig, Settings, StoreConfig,
};
use crate::logger::LOG_LEVELS;
use crate::tenants::TenantRegistry;

/// Valid log formats
const VALID_LOG_FORMATS: &[&str] = &["full", "compact", "json"];

/// Valid rotation strategies
const VALID_ROTATION_STRATEGIES: &[&str] = &["size", "time", "daily", "hourly", "combined"];

impl StoreConfig {
    /// Validate store configuration
    ///
    /// # Validation Rules
    /// - Max connections must be greater than 0
    /// - Min connections must not exceed max connections
    /// - Connection timeout must be greater than 0
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_connections == 0 {
            return Err(ConfigError::validation(
                "store.max_connections",
                "Max connections must be greater than 0.",
            ));
        }

        if self.min_connections > self.max_connections {
            return Err(ConfigError::validation(
                "store.min_connections",
                format!(
                    "Min connections ({}) cannot exceed max connections ({}).",
                    self.min_connections, self.max_connections
                ),
            ));
        }

        if self.connection_timeout == 0 {
            return Err(ConfigError::validation(
                "store.connection_timeout",
                "Connection timeout must be greater than 0 seconds.",
            ));
        }

        Ok(())
    }
}

/// Ten years
pub const MAX_RETENTION_HOURS: u64 = 10 * 365 * 24;

impl SchedulerConfig {
    /// Validate scheduler configuration
    ///
    /// # Validation Rules
    /// - Poll, visibility, maintenance and backoff durations must be greater than 0
    /// - Backoff ceiling must not be below the initial backoff
    /// - Backoff multiplier must be at least 1.0
    /// - Retention must be between 1 and `MAX_RETENTION_HOURS` hours
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("scheduler.poll_interval_ms", self.poll_interval_ms),
            ("scheduler.visibility_timeout", self.visibility_timeout),
            ("scheduler.maintenance_interval", self.maintenance_interval),
            ("scheduler.backoff_initial_ms", self.backoff_initial_ms),
            ("scheduler.backoff_max", self.backoff_max),
            ("scheduler.retention_hours", self.retention_hours),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(ConfigError::validation(field, "Value must be greater than 0."));
            }
        }

        if self.retention_hours > MAX_RETENTION_HOURS {
            return Err(ConfigError::validation(
                "scheduler.retention_hours",
                format!(
                    "Retention cannot exceed {} hours, got {}.",
                    MAX_RETENTION_HOURS, self.retention_hours
                ),
            ));
        }

        if self.backoff_max() < self.backoff_initial() {
            return Err(ConfigError::validation(
                "scheduler.backoff_max",
                format!(
                    "Backoff ceiling ({}s) cannot be below the initial backoff ({}ms).",
                    self.backoff_max, self.backoff_initial_ms
                ),
            ));
        }

        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(ConfigError::validation(
                "scheduler.backoff_multiplier",
                format!(
                    "Backoff multiplier must be a finite number of at least 1.0, got {}.",
                    self.backoff_multiplier
                ),
            ));
        }

        Ok(())
    }
}

impl FileSettings {
    /// Validate file logging settings
    ///
    /// # Validation Rules
    /// - If enabled, path must not be empty
    /// - Format must be one of: full, compact, json
    /// - Rotation strategy must be one of: size, time, daily, hourly, combined
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.enabled && self.path.trim().is_empty() {
            return Err(ConfigError::validation(
                "logger.file.path",
                "File path cannot be empty when file logging is enabled.",
            ));
        }

        if !VALID_LOG_FORMATS.contains(&self.format.to_lowercase().as_str()) {
            return Err(ConfigError::validation(
                "logger.file.format",
                format!(
                    "Invalid log format '{}'. Valid formats are: {}",
                    self.format,
                    VALID_LOG_FORMATS.join(", ")
                ),
            ));
        }

        if !VALID_ROTATION_STRATEGIES.contains(&self.rotation.strategy.to_lowercase().as_str()) {
            return Err(ConfigError::validation(
                "logger.file.rotation.strategy",
                format!(
                    "Invalid rotation strategy '{}'. Valid strategies are: {}",
                    self.rotation.strategy,
                    VALID_ROTATION_STRATEGIES.join(", ")
                ),
            ));
        }

        Ok(())
    }
}

impl LoggerSettings {
    /// Validate logger settings
    ///
    /// # Validation Rules
    /// - Log level must be one of: trace, debug, info, warn, error
    /// - File settings must be valid
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !LOG_LEVELS.contains(&self.level.to_lowercase().as_str()) {
            return Err(ConfigError::validation(
                "logger.level",
                format!(
                    "Invalid log level '{}'. Valid levels are: {}",
                    self.level,
                    LOG_LEVELS.join(", ")
                ),
            ));
        }

        self.file.validate()
    }
}

impl Settings {
    /// Validate all configuration settings
    ///
    /// Returns the first validation error encountered. Tenant entries are
    /// checked by building the registry, which also rejects shared queues.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.store.validate()?;
        self.scheduler.validate()?;
        self.logger.validate()?;
        TenantRegistry::from_settings(&self.tenants)?;
        Ok(())
    }

    /// Registry of the configured tenants
    pub fn tenant_registry(&self) -> Result<TenantRegistry, ConfigError> {
        TenantRegistry::from_settings(&self.tenants)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::settings::TenantSettings;

    fn field_of(err: ConfigError) -> String {
        err.field().unwrap_or_default().to_string()
    }

    // ========================================================================
    // StoreConfig validation tests
    // ========================================================================

    #[test]
    fn test_store_config_valid() {
        assert!(StoreConfig::default().validate().is_ok());
    }

    #[test]
    fn test_store_config_invalid_max_connections() {
        let config = StoreConfig {
            max_connections: 0,
            min_connections: 0,
            ..Default::default()
        };
        assert_eq!(field_of(config.validate().unwrap_err()), "store.max_connections");
    }

    #[test]
    fn test_store_config_min_exceeds_max() {
        let config = StoreConfig {
            max_connections: 2,
            min_connections: 5,
            ..Default::default()
        };
        assert_eq!(field_of(config.validate().unwrap_err()), "store.min_connections");
    }

    #[test]
    fn test_store_config_zero_timeout() {
        let config = StoreConfig {
            connection_timeout: 0,
            ..Default::default()
        };
        assert_eq!(field_of(config.validate().unwrap_err()), "store.connection_timeout");
    }

    // ========================================================================
    // SchedulerConfig validation tests
    // ========================================================================

    #[test]
    fn test_scheduler_config_valid() {
        assert!(SchedulerConfig::default().validate().is_ok());
    }

    #[test]
    fn test_scheduler_config_zero_durations() {
        let config = SchedulerConfig {
            poll_interval_ms: 0,
            ..Default::default()
        };
        assert_eq!(field_of(config.validate().unwrap_err()), "scheduler.poll_interval_ms");

        let config = SchedulerConfig {
            visibility_timeout: 0,
            ..Default::default()
        };
        assert_eq!(field_of(config.validate().unwrap_err()), "scheduler.visibility_timeout");
    }

    #[test]
    fn test_scheduler_config_retention_ceiling() {
        let config = SchedulerConfig {
            retention_hours: MAX_RETENTION_HOURS,
            ..Default::default()
        };
        assert!(config.validate().is_ok());

        let config = SchedulerConfig {
            retention_hours: u64::MAX,
            ..Default::default()
        };
        assert_eq!(field_of(config.validate().unwrap_err()), "scheduler.retention_hours");
    }

    #[test]
    fn test_scheduler_config_backoff_bounds() {
        let config = SchedulerConfig {
            backoff_initial_ms: 5_000,
            backoff_max: 1,
            ..Default::default()
        };
        assert_eq!(field_of(config.validate().unwrap_err()), "scheduler.backoff_max");

        for multiplier in [0.5, f64::NAN, f64::INFINITY] {
            let config = SchedulerConfig {
                backoff_multiplier: multiplier,
                ..Default::default()
            };
            assert_eq!(
                field_of(config.validate().unwrap_err()),
                "scheduler.backoff_multiplier"
            );
        }
    }

    // ========================================================================
    // LoggerSettings validation tests
    // ========================================================================

    #[test]
    fn test_logger_settings_valid_levels() {
        for level in ["trace", "debug", "info", "warn", "error", "INFO", "Debug"] {
            let settings = LoggerSettings {
                level: level.to_string(),
                ..Default::default()
            };
            assert!(settings.validate().is_ok(), "Level should be valid: {}", level);
        }
    }

    #[test]
    fn test_logger_settings_invalid_level() {
        let settings = LoggerSettings {
            level: "verbose".to_string(),
            ..Default::default()
        };
        assert_eq!(field_of(settings.validate().unwrap_err()), "logger.level");
    }

    #[test]
    fn test_file_settings_empty_path() {
        let settings = FileSettings {
            enabled: true,
            path: "  ".to_string(),
            ..Default::default()
        };
        assert_eq!(field_of(settings.validate().unwrap_err()), "logger.file.path");

        let disabled = FileSettings {
            enabled: false,
            ..settings
        };
        assert!(disabled.validate().is_ok());
    }

    #[test]
    fn test_file_settings_invalid_format() {
        let settings = FileSettings {
            format: "xml".to_string(),
            ..Default::default()
        };
        assert_eq!(field_of(settings.validate().unwrap_err()), "logger.file.format");
    }

    // ========================================================================
    // Settings validation tests
    // ========================================================================

    #[test]
    fn test_settings_default_valid() {
        assert!(Settings::default().validate().is_ok());
    }

    #[test]
    fn test_settings_reports_bad_tenant() {
        let settings = Settings {
            tenants: vec![
                TenantSettings::new("Database=tenant_a", 10),
                TenantSettings::new("Server=db", 10),
            ],
            ..Default::default()
        };
        assert_eq!(
            field_of(settings.validate().unwrap_err()),
            "tenants[1].storage_locator"
        );
    }

    #[test]
    fn test_settings_builds_registry() {
        let settings = Settings {
            tenants: vec![
                TenantSettings::new("Database=tenant_a", 10),
                TenantSettings::new("Database=tenant_b", 30),
            ],
            ..Default::default()
        };
        assert!(settings.validate().is_ok());
        assert_eq!(settings.tenant_registry().unwrap().len(), 2);
    }
}
