//! Perpetua library
//!
//! Core modules of the multi-tenant recurring job scheduler.

use shadow_rs::shadow;
shadow!(build);

pub mod cli;
pub mod config;
pub mod db;
pub mod error;
pub mod jobs;
pub mod logger;
pub mod models;
pub mod repositories;
pub mod schema;
pub mod services;
pub mod tenants;

pub fn pkg_version() -> &'static str {
    build::PKG_VERSION
}

pub fn clap_long_version() -> &'static str {
    build::CLAP_LONG_VERSION
}
