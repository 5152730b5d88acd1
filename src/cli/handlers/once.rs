//! Once command handler
//!
//! Runs a single dispatch cycle for every tenant and prints the outcome.

use crate::cli::handlers::console::describe_cycle;
use crate::config::settings::Settings;
use crate::error::AppResult;
use crate::jobs::{CycleReport, JobResult};
use crate::services::SchedulerService;

/// Handler for the once command
pub struct OnceCommandHandler {
    config: Settings,
}

impl OnceCommandHandler {
    pub fn new(config: Settings) -> Self {
        Self { config }
    }

    /// Run one cycle per tenant, returning the reports in configuration order
    ///
    /// A tenant whose cycle failed is reported on its own line; the others
    /// still run.
    pub async fn execute(&self) -> AppResult<Vec<(String, JobResult<CycleReport>)>> {
        let mut service = SchedulerService::new(self.config.clone())?;
        let reports = service.run_once().await;

        if reports.is_empty() {
            println!("No tenants configured");
        }
        for (tenant, report) in &reports {
            match report {
                Ok(report) => println!("{}", describe_cycle(tenant, report)),
                Err(e) => println!("ERROR: cycle for {tenant} failed: {e}"),
            }
        }

        Ok(reports)
    }

    pub fn config(&self) -> &Settings {
        &self.config
    }
}
