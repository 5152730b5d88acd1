//! Console command handler
//!
//! Runs the scheduler in the foreground and prints each seed and dispatch
//! cycle to stdout.

use std::time::Duration;

use tokio::sync::mpsc;

use crate::config::settings::Settings;
use crate::error::{AppError, AppResult};
use crate::jobs::{CycleReport, JobOutcome, SchedulerEvent};
use crate::services::{SchedulerService, ServiceHost, shutdown_signal};

/// Handler for the console command
pub struct ConsoleCommandHandler {
    config: Settings,
}

impl ConsoleCommandHandler {
    pub fn new(config: Settings) -> Self {
        Self { config }
    }

    /// Run until Ctrl+C, SIGTERM or `duration_secs` elapses
    pub async fn execute(&self, duration_secs: Option<u64>) -> AppResult<()> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let service = SchedulerService::new(self.config.clone())?.with_events(tx);

        let printer = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                println!("[{}] {}", console_time(), describe_event(&event));
            }
        });

        let stop = async move {
            match duration_secs {
                Some(secs) => {
                    tokio::select! {
                        _ = tokio::time::sleep(Duration::from_secs(secs)) => {}
                        _ = shutdown_signal() => {}
                    }
                }
                None => shutdown_signal().await,
            }
        };

        println!("[{}] Scheduler starting", console_time());
        let service = ServiceHost::new(service).run_until(stop).await?;
        // dropping the service closes the last event sender
        drop(service);

        printer.await.map_err(|e| AppError::Internal {
            source: anyhow::Error::from(e),
        })?;
        println!("[{}] Scheduler stopped", console_time());

        Ok(())
    }

    pub fn config(&self) -> &Settings {
        &self.config
    }
}

fn console_time() -> String {
    jiff::Zoned::now().strftime("%Y-%m-%d %H:%M:%S").to_string()
}

/// One console line for `event`
pub fn describe_event(event: &SchedulerEvent) -> String {
    match event {
        SchedulerEvent::Seeded {
            tenant,
            queue,
            job_id,
        } => format!("Enqueued job {job_id} for {tenant} on queue {queue}"),
        SchedulerEvent::Cycle { tenant, report } => describe_cycle(tenant, report),
    }
}

/// One console line for a dispatch cycle of `tenant`
pub fn describe_cycle(tenant: &str, report: &CycleReport) -> String {
    match report {
        CycleReport::Idle => format!("No job due for {tenant}"),
        CycleReport::Completed {
            job_id,
            generation,
            outcome: JobOutcome::Succeeded,
            next_job_id,
        } => format!(
            "SUCCESS: job {job_id} (generation {generation}) ran for {tenant}; next job {next_job_id} scheduled"
        ),
        CycleReport::Completed {
            job_id,
            generation,
            outcome: JobOutcome::Failed { error },
            next_job_id,
        } => format!(
            "FAILED: job {job_id} (generation {generation}) for {tenant}: {error}; next job {next_job_id} scheduled"
        ),
        CycleReport::ClaimLost { job_id } => {
            format!("Claim on job {job_id} for {tenant} expired before completion")
        }
        CycleReport::HandlerUnresolved {
            job_id,
            handler_id,
            next_job_id,
        } => format!(
            "ERROR: no handler '{handler_id}' for {tenant}; job {job_id} failed, next job {next_job_id} kept, dispatcher stopped"
        ),
    }
}
