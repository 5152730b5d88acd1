//! Command executor for dispatching CLI commands
//!
//! This module provides the main entry point for executing CLI commands
//! after parsing and configuration loading.

use super::handlers::{
    ConsoleCommandHandler, MigrateCommandHandler, OnceCommandHandler, RunCommandHandler,
};
use super::parser::{Cli, Commands};
use crate::config::settings::Settings;
use crate::error::{AppError, AppResult};

/// Execute a CLI command with the given settings
///
/// No subcommand means `run`.
pub async fn execute_command(cli: &Cli, settings: Settings) -> AppResult<()> {
    validate_command_args(cli)?;

    match &cli.command {
        Some(Commands::Run { dry_run, .. }) => {
            RunCommandHandler::new(settings).execute(*dry_run).await
        }
        None => RunCommandHandler::new(settings).execute(false).await,
        Some(Commands::Console { duration, .. }) => {
            ConsoleCommandHandler::new(settings)
                .execute(*duration)
                .await
        }
        Some(Commands::Once) => OnceCommandHandler::new(settings).execute().await.map(|_| ()),
        Some(Commands::Migrate { dry_run, rollback }) => {
            MigrateCommandHandler::new(settings)
                .execute(*dry_run, *rollback)
                .await
        }
    }
}

/// Validate command arguments before execution
fn validate_command_args(cli: &Cli) -> AppResult<()> {
    if let Err(msg) = cli.validate() {
        return Err(AppError::Validation {
            field: "cli_arguments".to_string(),
            reason: msg,
        });
    }

    if let Some(Commands::Migrate {
        rollback: Some(steps),
        ..
    }) = cli.command
        && steps > 50
    {
        eprintln!(
            "Warning: Rolling back {} migrations is a large operation. Consider using smaller steps.",
            steps
        );
    }

    Ok(())
}
