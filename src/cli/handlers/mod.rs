//! Command handlers for CLI operations
//!
//! This module contains handlers for different CLI commands,
//! separating command execution logic from parsing and validation.

pub mod console;
pub mod migrate;
pub mod once;
pub mod run;

pub use console::ConsoleCommandHandler;
pub use migrate::MigrateCommandHandler;
pub use once::OnceCommandHandler;
pub use run::RunCommandHandler;
