//! Migrate command handler
//!
//! Applies, previews or rolls back the embedded schema on every tenant
//! database, one tenant at a time.

use crate::config::settings::{Settings, StoreBackend};
use crate::db::{pending_migrations, revert_migrations, run_pending_migrations};
use crate::error::{AppError, AppResult};
use crate::tenants::Tenant;

/// Handler for the migrate command
pub struct MigrateCommandHandler {
    config: Settings,
}

impl MigrateCommandHandler {
    pub fn new(config: Settings) -> Self {
        Self { config }
    }

    /// Execute the migrate command with dry-run and rollback support
    ///
    /// # Errors
    /// - Zero rollback steps
    /// - Tenant configuration errors
    /// - Database connection or migration errors, naming the failing tenant
    pub async fn execute(&self, dry_run: bool, rollback: Option<u32>) -> AppResult<()> {
        if rollback == Some(0) {
            return Err(AppError::Validation {
                field: "rollback_steps".to_string(),
                reason: "Number of rollback steps must be greater than 0".to_string(),
            });
        }

        if self.config.store.backend == StoreBackend::Memory {
            println!("✓ Memory backend has no schema - nothing to migrate");
            return Ok(());
        }

        let registry = self.config.tenant_registry()?;
        if registry.is_empty() {
            println!("No tenants configured - nothing to migrate");
            return Ok(());
        }

        for tenant in registry.all() {
            println!("Tenant {} ({}):", tenant.name, tenant.storage_locator);

            let result = if dry_run {
                self.show_pending_migrations(tenant).await
            } else if let Some(steps) = rollback {
                self.rollback_migrations(tenant, steps).await
            } else {
                self.run_migrations(tenant).await
            };

            result.inspect_err(|e| {
                tracing::error!(tenant = %tenant.name, error = %e, "Migration failed");
            })?;
        }

        Ok(())
    }

    async fn show_pending_migrations(&self, tenant: &Tenant) -> AppResult<()> {
        let pending = pending_migrations(&tenant.storage_locator).await?;

        if pending.is_empty() {
            println!("  ✓ No pending migrations found - database is up to date");
        } else {
            println!("  Found {} pending migration(s):", pending.len());
            for migration in &pending {
                println!("    - {}", migration);
            }
        }

        Ok(())
    }

    async fn run_migrations(&self, tenant: &Tenant) -> AppResult<()> {
        let applied = run_pending_migrations(&tenant.storage_locator).await?;

        if applied.is_empty() {
            println!("  ✓ No migrations to apply - database is already up to date");
        } else {
            println!("  ✓ Applied {} migration(s):", applied.len());
            for migration in &applied {
                println!("    - {}", migration);
            }
        }

        tracing::info!(tenant = %tenant.name, applied = applied.len(), "Tenant migrated");
        Ok(())
    }

    async fn rollback_migrations(&self, tenant: &Tenant, steps: u32) -> AppResult<()> {
        let reverted = revert_migrations(&tenant.storage_locator, steps).await?;

        println!("  ✓ Rolled back {} migration(s):", reverted.len());
        for migration in &reverted {
            println!("    - {}", migration);
        }

        tracing::warn!(tenant = %tenant.name, reverted = reverted.len(), "Tenant migrations reverted");
        Ok(())
    }

    pub fn config(&self) -> &Settings {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrate_handler_new() {
        let config = Settings::default();
        let handler = MigrateCommandHandler::new(config.clone());
        assert_eq!(handler.config(), &config);
    }

    #[tokio::test]
    async fn test_zero_rollback_steps() {
        let handler = MigrateCommandHandler::new(Settings::default());

        match handler.execute(false, Some(0)).await {
            Err(AppError::Validation { field, reason }) => {
                assert_eq!(field, "rollback_steps");
                assert!(reason.contains("must be greater than 0"));
            }
            other => panic!("Expected validation error for zero rollback steps, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_memory_backend_skips_migrations() {
        let mut config = Settings::default();
        config.store.backend = StoreBackend::Memory;

        let handler = MigrateCommandHandler::new(config);
        assert!(handler.execute(false, None).await.is_ok());
    }

    #[tokio::test]
    async fn test_no_tenants_is_a_no_op() {
        let handler = MigrateCommandHandler::new(Settings::default());
        assert!(handler.execute(true, None).await.is_ok());
    }
}
