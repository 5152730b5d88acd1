//! CLI module for perpetua
//!
//! This module provides command-line interface functionality including:
//! - Argument parsing with clap
//! - Configuration merging (CLI args + config files)
//! - Command execution and validation
//! - Command handlers for run, console, once and migrate

pub mod config_merger;
pub mod executor;
pub mod handlers;
pub mod parser;
pub mod validation;

pub use config_merger::ConfigurationMerger;
pub use executor::execute_command;
pub use parser::{Cli, Commands, Environment, LogLevel};

use crate::config::settings::Settings;
use crate::logger::init_logger;

/// Load file configuration and apply CLI overrides
pub fn load_and_merge_config(cli: &Cli) -> anyhow::Result<Settings> {
    let merger = ConfigurationMerger::from_sources(cli.config.as_deref(), cli.env)
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;

    merger
        .merge_cli_args(cli)
        .map_err(|e| anyhow::anyhow!("Configuration merge error: {}", e))
}

/// Initialize logger from settings
pub fn init_logger_from_settings(settings: &Settings) -> anyhow::Result<()> {
    let logger_config = settings
        .logger
        .clone()
        .into_logger_config()
        .map_err(|e| anyhow::anyhow!("Logger configuration error: {}", e))?;

    init_logger(logger_config).map_err(|e| anyhow::anyhow!("Logger initialization error: {}", e))
}
