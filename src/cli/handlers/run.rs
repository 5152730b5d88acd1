//! Run command handler
//!
//! Handles the run command including dry-run validation and service startup.

use crate::config::settings::Settings;
use crate::config::Environment;
use crate::error::AppResult;
use crate::services::{SchedulerService, ServiceHost};

/// Handler for the run command
pub struct RunCommandHandler {
    config: Settings,
}

impl RunCommandHandler {
    pub fn new(config: Settings) -> Self {
        Self { config }
    }

    /// Run the scheduler until Ctrl+C or SIGTERM, or only validate with `dry_run`
    pub async fn execute(&self, dry_run: bool) -> AppResult<()> {
        if dry_run {
            return self.validate_only();
        }

        tracing::info!(
            app_name = %self.config.application.name,
            app_version = %self.config.application.version,
            environment = %Environment::from_env().as_str(),
            backend = %self.config.store.backend,
            tenants = self.config.tenants.len(),
            "Application starting"
        );

        let service = SchedulerService::new(self.config.clone())?;
        ServiceHost::new(service).run_until_shutdown().await?;

        tracing::info!("Application shutdown complete");
        Ok(())
    }

    /// Validate configuration and print the tenant plan without starting
    pub fn validate_only(&self) -> AppResult<()> {
        self.config.validate()?;
        let registry = self.config.tenant_registry()?;

        println!("✓ Configuration is valid");
        println!("✓ Store backend: {}", self.config.store.backend);
        println!(
            "✓ Poll interval {}ms, visibility timeout {}s, seed policy {:?}",
            self.config.scheduler.poll_interval_ms,
            self.config.scheduler.visibility_timeout,
            self.config.scheduler.seed_policy
        );

        if registry.is_empty() {
            println!("! No tenants configured; the scheduler would stay idle");
        }
        for tenant in registry.all() {
            println!(
                "✓ Tenant {} on {}: queue {}, every {}s, handler {}",
                tenant.name,
                tenant.storage_locator,
                tenant.queue,
                tenant.interval.as_secs(),
                tenant.handler_id
            );
        }

        println!("Dry run completed successfully - configuration is ready for deployment");
        Ok(())
    }

    pub fn config(&self) -> &Settings {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TenantSettings;
    use crate::error::AppError;

    #[test]
    fn test_run_handler_new() {
        let config = Settings::default();
        let handler = RunCommandHandler::new(config.clone());
        assert_eq!(handler.config(), &config);
    }

    #[tokio::test]
    async fn test_dry_run_accepts_valid_tenants() {
        let mut config = Settings::default();
        config.tenants = vec![
            TenantSettings::new("Server=.;Database=Alpha;Password=secret", 10),
            TenantSettings::new("postgres://app@localhost/beta", 30),
        ];

        let handler = RunCommandHandler::new(config);
        assert!(handler.execute(true).await.is_ok());
    }

    #[tokio::test]
    async fn test_dry_run_rejects_invalid_config() {
        let mut config = Settings::default();
        config.scheduler.poll_interval_ms = 0;

        let handler = RunCommandHandler::new(config);
        let result = handler.execute(true).await;
        assert!(matches!(result, Err(AppError::Configuration { .. })));
    }
}
