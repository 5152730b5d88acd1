//! CLI argument parsing with clap
//!
//! This module defines the command-line interface structure using clap,
//! including all commands, arguments, and their documentation.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// A durable multi-tenant recurring job scheduler
#[derive(Parser, Debug)]
#[command(name = "perpetua")]
#[command(about = "A durable multi-tenant recurring job scheduler")]
#[command(long_about = "
Perpetua keeps one recurring job chain alive per tenant database. Each tenant
has its own queue and job store; a dispatcher per tenant claims due jobs, runs
them and schedules the next one a fixed interval after completion.

EXAMPLES:
    # Run the scheduler until Ctrl+C or SIGTERM
    perpetua run

    # Check configuration and list tenant queues without starting
    perpetua run --dry-run

    # Use custom configuration file
    perpetua --config /etc/perpetua/production.toml run

    # Watch progress in the foreground for two minutes
    perpetua console --duration 120

    # Run a single dispatch cycle per tenant
    perpetua once

    # Apply pending migrations to every tenant database
    perpetua migrate

    # Rollback the last migration on every tenant database
    perpetua migrate --rollback 1

For more information about configuration options, see the documentation.
")]
#[command(version = crate::clap_long_version())]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Configuration file path
    ///
    /// Load a single TOML file instead of the layered configuration directory.
    /// The file must exist and be readable.
    ///
    /// Example: --config /etc/perpetua/production.toml
    #[arg(short, long, value_name = "FILE", value_parser = super::validation::validate_config_file_path)]
    pub config: Option<PathBuf>,

    /// Override environment detection
    ///
    /// Selects the `{environment}.toml` overlay instead of PERPETUA_APP_ENV.
    ///
    /// Available values: development (dev), test, staging, production (prod)
    #[arg(short, long, value_enum)]
    pub env: Option<Environment>,

    /// Enable verbose logging
    ///
    /// Raises log output to debug level.
    /// Cannot be used with --quiet.
    #[arg(short, long)]
    pub verbose: bool,

    /// Suppress non-error output
    ///
    /// Lowers log output to error level only.
    /// Cannot be used with --verbose.
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the scheduler service (default)
    ///
    /// Opens every tenant store, seeds missing chains and dispatches until
    /// Ctrl+C or SIGTERM. Running dispatch cycles finish before exit.
    ///
    /// Examples:
    ///   perpetua run                   # Start with defaults
    ///   perpetua run --dry-run         # Validate config without starting
    Run {
        /// Log level override
        ///
        /// Overrides both configuration file settings and global --verbose/--quiet flags.
        ///
        /// Available levels: error, warn, info, debug, trace
        #[arg(long, value_enum)]
        log_level: Option<LogLevel>,

        /// Validate configuration, print tenants and queues, and exit
        #[arg(long)]
        dry_run: bool,
    },
    /// Run in the foreground and print progress to stdout
    ///
    /// Examples:
    ///   perpetua console                 # Until Ctrl+C
    ///   perpetua console --duration 65   # Stop after 65 seconds
    Console {
        /// Stop after this many seconds
        #[arg(short, long, value_name = "SECONDS", value_parser = super::validation::validate_duration_seconds)]
        duration: Option<u64>,

        /// Log level override
        #[arg(long, value_enum)]
        log_level: Option<LogLevel>,
    },
    /// Run one dispatch cycle per tenant and print what happened
    Once,
    /// Tenant database migration operations
    ///
    /// Applies or rolls back the embedded schema on every configured tenant
    /// database.
    ///
    /// Examples:
    ///   perpetua migrate                    # Apply all pending migrations
    ///   perpetua migrate --dry-run          # Show pending migrations without applying
    ///   perpetua migrate --rollback 1       # Rollback the last migration
    Migrate {
        /// Show pending migrations without applying
        ///
        /// Cannot be used with --rollback.
        #[arg(long, conflicts_with = "rollback")]
        dry_run: bool,

        /// Number of migrations to rollback on each tenant database
        ///
        /// Must be between 1 and 100.
        /// Cannot be used with --dry-run.
        #[arg(long, value_name = "STEPS", conflicts_with = "dry_run", value_parser = super::validation::validate_rollback_steps)]
        rollback: Option<u32>,
    },
}

/// Environment options
#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum Environment {
    #[value(name = "development", alias = "dev")]
    Development,
    #[value(name = "test")]
    Test,
    #[value(name = "staging")]
    Staging,
    #[value(name = "production", alias = "prod")]
    Production,
}

/// Log level options
#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum LogLevel {
    #[value(name = "error")]
    Error,
    #[value(name = "warn", alias = "warning")]
    Warn,
    #[value(name = "info")]
    Info,
    #[value(name = "debug")]
    Debug,
    #[value(name = "trace")]
    Trace,
}

impl Cli {
    /// Validate argument combinations clap cannot express
    pub fn validate(&self) -> Result<(), String> {
        if let Some(Commands::Migrate {
            dry_run: true,
            rollback: Some(_),
        }) = self.command
        {
            return Err("Cannot use --dry-run and --rollback together".to_string());
        }

        if self.verbose && self.quiet {
            return Err("Cannot use --verbose and --quiet together".to_string());
        }

        Ok(())
    }

    /// Log level requested on the command line, if any
    ///
    /// A command-level `--log-level` wins over the global flags.
    pub fn log_level_override(&self) -> Option<&'static str> {
        let command_level = match self.command {
            Some(Commands::Run { log_level, .. }) | Some(Commands::Console { log_level, .. }) => {
                log_level
            }
            _ => None,
        };

        match command_level {
            Some(level) => Some(level.as_str()),
            None if self.verbose => Some("debug"),
            None if self.quiet => Some("error"),
            None => None,
        }
    }
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

impl From<Environment> for crate::config::Environment {
    fn from(env: Environment) -> Self {
        match env {
            Environment::Development => crate::config::Environment::Development,
            Environment::Test => crate::config::Environment::Test,
            Environment::Staging => crate::config::Environment::Staging,
            Environment::Production => crate::config::Environment::Production,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_help_flag() {
        let err = Cli::try_parse_from(["perpetua", "--help"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayHelp);
    }

    #[test]
    fn test_version_flag() {
        let err = Cli::try_parse_from(["perpetua", "--version"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayVersion);
    }

    #[test]
    fn test_default_behavior() {
        let cli = Cli::try_parse_from(["perpetua"]).unwrap();
        assert!(cli.command.is_none());
        assert!(!cli.verbose);
        assert!(!cli.quiet);
        assert!(cli.config.is_none());
        assert!(cli.env.is_none());
        assert_eq!(cli.log_level_override(), None);
    }

    #[test]
    fn test_run_command() {
        let cli = Cli::try_parse_from(["perpetua", "run", "--dry-run", "--log-level", "warning"])
            .unwrap();
        match cli.command {
            Some(Commands::Run { log_level, dry_run }) => {
                assert!(dry_run);
                assert!(matches!(log_level, Some(LogLevel::Warn)));
            }
            other => panic!("Expected Run command, got {:?}", other),
        }
    }

    #[test]
    fn test_console_command() {
        let cli = Cli::try_parse_from(["perpetua", "console", "--duration", "65"]).unwrap();
        match cli.command {
            Some(Commands::Console { duration, .. }) => assert_eq!(duration, Some(65)),
            other => panic!("Expected Console command, got {:?}", other),
        }

        assert!(Cli::try_parse_from(["perpetua", "console", "--duration", "0"]).is_err());
    }

    #[test]
    fn test_once_command() {
        let cli = Cli::try_parse_from(["perpetua", "--env", "prod", "once"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::Once)));
        assert!(matches!(cli.env, Some(Environment::Production)));
    }

    #[test]
    fn test_migrate_command() {
        let cli = Cli::try_parse_from(["perpetua", "migrate", "--dry-run"]).unwrap();
        match cli.command {
            Some(Commands::Migrate { dry_run, rollback }) => {
                assert!(dry_run);
                assert!(rollback.is_none());
            }
            other => panic!("Expected Migrate command, got {:?}", other),
        }
    }

    #[test]
    fn test_migrate_flags_conflict() {
        let err = Cli::try_parse_from(["perpetua", "migrate", "--dry-run", "--rollback", "1"])
            .unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
    }

    #[test]
    fn test_conflicting_verbose_quiet() {
        let err = Cli::try_parse_from(["perpetua", "--verbose", "--quiet"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
    }

    #[test]
    fn test_command_log_level_overrides_global_flags() {
        let cli = Cli::try_parse_from(["perpetua", "--verbose", "run", "--log-level", "warn"])
            .unwrap();
        assert_eq!(cli.log_level_override(), Some("warn"));

        let cli = Cli::try_parse_from(["perpetua", "--quiet", "once"]).unwrap();
        assert_eq!(cli.log_level_override(), Some("error"));
    }
}
