//! Configuration loader for perpetua
//!
//! This module provides the `ConfigLoader` struct that handles loading
//! configuration from multiple sources with proper precedence.

use std::path::{Path, PathBuf};

use config::{Config, ConfigBuilder, Environment, File, FileFormat, builder::DefaultState};

use crate::config::environment::Environment as AppEnvironment;
use crate::config::error::ConfigError;
use crate::config::settings::Settings;

/// Environment variable for configuration directory
pub const CONFIG_DIR_ENV: &str = "PERPETUA_CONFIG_DIR";

/// Environment variable for specific configuration file
pub const CONFIG_FILE_ENV: &str = "PERPETUA_CONFIG_FILE";

/// Default configuration directory
const DEFAULT_CONFIG_DIR: &str = "config";

/// Environment variable prefix for configuration overrides
const ENV_PREFIX: &str = "PERPETUA";

/// Separator for nested configuration keys in environment variables
const ENV_SEPARATOR: &str = "__";

/// Configuration loader that handles layered configuration loading
///
/// The loader supports the following configuration sources (in order of priority):
/// 1. `default.toml` - Base default configuration (required)
/// 2. `{environment}.toml` - Environment-specific configuration (optional)
/// 3. `local.toml` - Local development overrides (optional)
/// 4. `PERPETUA_*` environment variables (highest priority)
///
/// Tenants are an array of tables and can only come from files; environment
/// variables override the scalar sections.
#[derive(Debug)]
pub struct ConfigLoader {
    /// Configuration directory path
    config_dir: PathBuf,
    /// Specific configuration file path (if set, skips layered loading)
    config_file: Option<PathBuf>,
    /// Current application environment
    environment: AppEnvironment,
}

impl ConfigLoader {
    /// Create a new configuration loader
    ///
    /// This reads environment variables to determine:
    /// - Configuration directory (`PERPETUA_CONFIG_DIR`)
    /// - Specific configuration file (`PERPETUA_CONFIG_FILE`)
    /// - Application environment (`PERPETUA_APP_ENV`)
    ///
    /// # Errors
    ///
    /// Returns an error if both `PERPETUA_CONFIG_DIR` and `PERPETUA_CONFIG_FILE` are set,
    /// as they are mutually exclusive.
    pub fn new() -> Result<Self, ConfigError> {
        let config_dir_var = std::env::var(CONFIG_DIR_ENV).ok();
        let config_file = std::env::var(CONFIG_FILE_ENV).ok().map(PathBuf::from);

        if config_file.is_some() && config_dir_var.is_some() {
            return Err(ConfigError::mutual_exclusivity(
                "PERPETUA_CONFIG_DIR and PERPETUA_CONFIG_FILE cannot both be set. \
                 Use PERPETUA_CONFIG_DIR for layered configuration or \
                 PERPETUA_CONFIG_FILE for a single configuration file.",
            ));
        }

        let config_dir = config_dir_var
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_DIR));

        Ok(Self {
            config_dir,
            config_file,
            environment: AppEnvironment::from_env(),
        })
    }

    /// Load a single file, ignoring the configuration directory
    pub fn from_file(path: impl Into<PathBuf>) -> Self {
        Self {
            config_dir: PathBuf::from(DEFAULT_CONFIG_DIR),
            config_file: Some(path.into()),
            environment: AppEnvironment::from_env(),
        }
    }

    /// Select the `{environment}.toml` overlay explicitly
    pub fn with_environment(mut self, environment: AppEnvironment) -> Self {
        self.environment = environment;
        self
    }

    /// Get the current application environment
    pub fn environment(&self) -> AppEnvironment {
        self.environment
    }

    /// Get the configuration directory path
    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    /// Load configuration from all sources
    ///
    /// If a single configuration file is set, loads only that file.
    /// Otherwise, performs layered loading from the configuration directory.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `default.toml` is not found (when using layered loading)
    /// - Configuration parsing fails
    /// - Configuration validation fails
    pub fn load(&self) -> Result<Settings, ConfigError> {
        let config = self.build_config()?;
        let settings: Settings = config.try_deserialize().map_err(|e| {
            ConfigError::ParseError(format!("Failed to deserialize configuration: {}", e))
        })?;

        settings.validate()?;

        Ok(settings)
    }

    /// Build the config::Config instance from all sources
    fn build_config(&self) -> Result<Config, ConfigError> {
        let builder = Config::builder();

        let builder = if let Some(ref config_file) = self.config_file {
            self.add_file_source(builder, config_file, true)?
        } else {
            self.build_layered_config(builder)?
        };

        // PERPETUA_SCHEDULER__POLL_INTERVAL_MS -> scheduler.poll_interval_ms
        let builder = Self::add_env_source(builder);

        builder.build().map_err(ConfigError::from)
    }

    /// Build layered configuration from multiple files
    fn build_layered_config(
        &self,
        builder: ConfigBuilder<DefaultState>,
    ) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
        let default_path = self.config_dir.join("default.toml");
        let builder = self.add_file_source(builder, &default_path, true)?;

        let env_path = self
            .config_dir
            .join(format!("{}.toml", self.environment.as_str()));
        let builder = self.add_file_source(builder, &env_path, false)?;

        let local_path = self.config_dir.join("local.toml");
        let builder = self.add_file_source(builder, &local_path, false)?;

        Ok(builder)
    }

    /// Add a file source to the config builder
    fn add_file_source(
        &self,
        builder: ConfigBuilder<DefaultState>,
        path: &Path,
        required: bool,
    ) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
        if required && !path.exists() {
            return Err(ConfigError::file_not_found(format!(
                "Required configuration file not found: {}",
                path.display()
            )));
        }

        Ok(builder.add_source(File::from(path).format(FileFormat::Toml).required(required)))
    }

    /// Add environment variable source to the config builder
    ///
    /// Examples:
    /// - `PERPETUA_STORE__BACKEND` -> `store.backend`
    /// - `PERPETUA_LOGGER__LEVEL` -> `logger.level`
    fn add_env_source(builder: ConfigBuilder<DefaultState>) -> ConfigBuilder<DefaultState> {
        builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator(ENV_SEPARATOR)
                .ignore_empty(true)
                .try_parsing(true),
        )
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new().unwrap_or_else(|_| Self {
            config_dir: PathBuf::from(DEFAULT_CONFIG_DIR),
            config_file: None,
            environment: AppEnvironment::default(),
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::settings::{SeedPolicy, StoreBackend};
    use std::fs;
    use std::sync::Mutex;
    use tempfile::TempDir;

    // Env vars are process-global; every test touching them holds this lock
    pub(crate) static TEST_MUTEX: Mutex<()> = Mutex::new(());

    const DEFAULT_CONFIG: &str = r#"
[application]
name = "test-app"
version = "1.0.0"

[store]
backend = "memory"
max_connections = 4

[scheduler]
poll_interval_ms = 1000
visibility_timeout = 300

[[tenants]]
storage_locator = "postgres://app@localhost/tenant_alpha"
interval_seconds = 60

[[tenants]]
storage_locator = "Host=localhost;Database=tenant_beta;Username=app"
interval_seconds = 30

[logger]
level = "info"

[logger.console]
enabled = true
colored = true

[logger.file]
enabled = false
"#;

    fn setup_config_dir(files: &[(&str, &str)]) -> TempDir {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        for (name, content) in files {
            let path = temp_dir.path().join(name);
            fs::write(&path, content).expect("Failed to write config file");
        }
        temp_dir
    }

    /// Sets environment variables for one test and restores them on drop
    pub(crate) struct EnvGuard {
        vars_to_restore: Vec<(String, Option<String>)>,
    }

    impl EnvGuard {
        pub(crate) fn new() -> Self {
            Self {
                vars_to_restore: Vec::new(),
            }
        }

        pub(crate) fn set(&mut self, key: &str, value: &str) {
            let original = std::env::var(key).ok();
            self.vars_to_restore.push((key.to_string(), original));
            unsafe {
                std::env::set_var(key, value);
            }
        }

        pub(crate) fn remove(&mut self, key: &str) {
            let original = std::env::var(key).ok();
            self.vars_to_restore.push((key.to_string(), original));
            unsafe {
                std::env::remove_var(key);
            }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            // Restore in reverse so a key touched twice ends at its first original
            for (key, original_value) in self.vars_to_restore.iter().rev() {
                unsafe {
                    match original_value {
                        Some(value) => std::env::set_var(key, value),
                        None => std::env::remove_var(key),
                    }
                }
            }
        }
    }

    #[test]
    fn test_config_loader_new_default() {
        let _guard = TEST_MUTEX.lock().unwrap();
        let mut env = EnvGuard::new();

        env.remove(CONFIG_DIR_ENV);
        env.remove(CONFIG_FILE_ENV);
        env.remove(AppEnvironment::ENV_VAR);

        let loader = ConfigLoader::new().expect("Should create loader");
        assert_eq!(loader.config_dir(), Path::new("config"));
        assert!(loader.config_file.is_none());
        assert_eq!(loader.environment(), AppEnvironment::Development);
    }

    #[test]
    fn test_config_loader_mutual_exclusivity_error() {
        let _guard = TEST_MUTEX.lock().unwrap();
        let mut env = EnvGuard::new();

        env.set(CONFIG_DIR_ENV, "/custom/config");
        env.set(CONFIG_FILE_ENV, "/path/to/config.toml");

        match ConfigLoader::new() {
            Err(ConfigError::MutualExclusivityError(msg)) => {
                assert!(msg.contains(CONFIG_DIR_ENV));
                assert!(msg.contains(CONFIG_FILE_ENV));
            }
            other => panic!("Expected MutualExclusivityError, got {:?}", other),
        }
    }

    #[test]
    fn test_config_loader_environment_from_env() {
        let _guard = TEST_MUTEX.lock().unwrap();
        let mut env = EnvGuard::new();

        env.remove(CONFIG_DIR_ENV);
        env.remove(CONFIG_FILE_ENV);
        env.set(AppEnvironment::ENV_VAR, "production");

        let loader = ConfigLoader::new().expect("Should create loader");
        assert_eq!(loader.environment(), AppEnvironment::Production);
    }

    #[test]
    fn test_load_missing_default_toml() {
        let _guard = TEST_MUTEX.lock().unwrap();
        let mut env = EnvGuard::new();

        let temp_dir = setup_config_dir(&[]);
        env.set(CONFIG_DIR_ENV, temp_dir.path().to_str().unwrap());
        env.remove(CONFIG_FILE_ENV);
        env.remove(AppEnvironment::ENV_VAR);

        let loader = ConfigLoader::new().expect("Should create loader");
        match loader.load() {
            Err(ConfigError::FileNotFound(msg)) => assert!(msg.contains("default.toml")),
            other => panic!("Expected FileNotFound error, got {:?}", other),
        }
    }

    #[test]
    fn test_load_default_toml_only() {
        let _guard = TEST_MUTEX.lock().unwrap();
        let mut env = EnvGuard::new();

        let temp_dir = setup_config_dir(&[("default.toml", DEFAULT_CONFIG)]);
        env.set(CONFIG_DIR_ENV, temp_dir.path().to_str().unwrap());
        env.remove(CONFIG_FILE_ENV);
        env.remove(AppEnvironment::ENV_VAR);

        let settings = ConfigLoader::new()
            .expect("Should create loader")
            .load()
            .expect("Should load settings");

        assert_eq!(settings.application.name, "test-app");
        assert_eq!(settings.store.backend, StoreBackend::Memory);
        assert_eq!(settings.tenants.len(), 2);
        assert_eq!(settings.tenants[1].interval_seconds, 30);
        assert_eq!(settings.scheduler.seed_policy, SeedPolicy::IfAbsent);
    }

    #[test]
    fn test_load_full_precedence_chain() {
        let _guard = TEST_MUTEX.lock().unwrap();
        let mut env = EnvGuard::new();

        let development_config = r#"
[application]
name = "dev-app"

[scheduler]
poll_interval_ms = 250
visibility_timeout = 120
"#;

        let local_config = r#"
[scheduler]
poll_interval_ms = 500
"#;

        let temp_dir = setup_config_dir(&[
            ("default.toml", DEFAULT_CONFIG),
            ("development.toml", development_config),
            ("local.toml", local_config),
        ]);

        env.set(CONFIG_DIR_ENV, temp_dir.path().to_str().unwrap());
        env.remove(CONFIG_FILE_ENV);
        env.remove(AppEnvironment::ENV_VAR);
        env.set("PERPETUA_STORE__MAX_CONNECTIONS", "9");

        let settings = ConfigLoader::new()
            .expect("Should create loader")
            .load()
            .expect("Should load settings");

        // Environment variable has highest priority
        assert_eq!(settings.store.max_connections, 9);
        // local.toml overrides development.toml
        assert_eq!(settings.scheduler.poll_interval_ms, 500);
        // development.toml overrides default.toml
        assert_eq!(settings.scheduler.visibility_timeout, 120);
        assert_eq!(settings.application.name, "dev-app");
        // default.toml provides base values
        assert_eq!(settings.application.version, "1.0.0");
    }

    #[test]
    fn test_load_single_file_mode() {
        let _guard = TEST_MUTEX.lock().unwrap();
        let mut env = EnvGuard::new();

        let temp_dir = setup_config_dir(&[("single.toml", DEFAULT_CONFIG)]);
        let config_file_path = temp_dir.path().join("single.toml");

        env.remove(CONFIG_DIR_ENV);
        env.set(CONFIG_FILE_ENV, config_file_path.to_str().unwrap());
        env.remove(AppEnvironment::ENV_VAR);

        let settings = ConfigLoader::new()
            .expect("Should create loader")
            .load()
            .expect("Should load settings");

        assert_eq!(settings.application.name, "test-app");
        assert_eq!(settings.tenants.len(), 2);
    }

    #[test]
    fn test_optional_files_not_required() {
        let _guard = TEST_MUTEX.lock().unwrap();
        let mut env = EnvGuard::new();

        let temp_dir = setup_config_dir(&[("default.toml", DEFAULT_CONFIG)]);
        env.set(CONFIG_DIR_ENV, temp_dir.path().to_str().unwrap());
        env.remove(CONFIG_FILE_ENV);
        env.set(AppEnvironment::ENV_VAR, "staging");

        let settings = ConfigLoader::new()
            .expect("Should create loader")
            .load()
            .expect("Should load settings");

        assert_eq!(settings.application.name, "test-app");
    }

    #[test]
    fn test_load_rejects_duplicate_tenant_queue() {
        let _guard = TEST_MUTEX.lock().unwrap();

        let duplicated = r#"
[[tenants]]
storage_locator = "postgres://localhost/Tenant_A"

[[tenants]]
storage_locator = "Database=tenant_a"
"#;
        let temp_dir = setup_config_dir(&[("dup.toml", duplicated)]);

        let result = ConfigLoader::from_file(temp_dir.path().join("dup.toml")).load();
        assert!(matches!(result, Err(ConfigError::ValidationError { .. })));
    }
}
