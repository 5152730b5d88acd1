//! Configuration merger for CLI arguments and config files
//!
//! This module handles merging CLI argument overrides with file-based configuration,
//! implementing the configuration precedence logic.

use std::path::Path;

use super::parser::{Cli, Environment};
use crate::config::error::ConfigError;
use crate::config::{ConfigLoader, settings::Settings};

/// Applies CLI overrides on top of file-based configuration
pub struct ConfigurationMerger {
    base_config: Settings,
}

impl ConfigurationMerger {
    pub fn new(base_config: Settings) -> Self {
        Self { base_config }
    }

    /// Load the base configuration
    ///
    /// With `config_path` only that file is read; otherwise the layered
    /// configuration directory is used. `env` replaces `PERPETUA_APP_ENV`.
    pub fn from_sources(
        config_path: Option<&Path>,
        env: Option<Environment>,
    ) -> Result<Self, ConfigError> {
        let loader = match config_path {
            Some(path) => ConfigLoader::from_file(path),
            None => ConfigLoader::new()?,
        };
        let loader = match env {
            Some(env) => loader.with_environment(env.into()),
            None => loader,
        };

        tracing::debug!(
            environment = %loader.environment().as_str(),
            config_file = ?config_path,
            "Loading configuration"
        );

        Ok(Self::new(loader.load()?))
    }

    /// Merge CLI arguments with the base configuration
    ///
    /// CLI arguments take precedence over file and environment values. The
    /// merged configuration is validated again.
    pub fn merge_cli_args(&self, cli: &Cli) -> Result<Settings, ConfigError> {
        let mut config = self.base_config.clone();

        if let Some(level) = cli.log_level_override() {
            config.logger.level = level.to_string();
        }

        config.validate()?;

        Ok(config)
    }

    pub fn config(&self) -> &Settings {
        &self.base_config
    }
}
