//! Embedded schema migrations.
//!
//! diesel's migration harness is synchronous, so every helper opens a plain
//! `PgConnection` on the blocking pool.

use diesel::Connection;
use diesel::pg::PgConnection;
use diesel_migrations::{EmbeddedMigrations, MigrationHarness, embed_migrations};

use crate::error::{AppError, AppResult};
use crate::tenants::StorageLocator;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

/// Names of migrations not yet applied to the tenant database
pub async fn pending_migrations(locator: &StorageLocator) -> AppResult<Vec<String>> {
    with_connection(locator, "check pending migrations", |conn| {
        let pending = conn.pending_migrations(MIGRATIONS).map_err(|e| AppError::Database {
            operation: "check pending migrations".to_string(),
            source: anyhow::anyhow!("Migration error: {}", e),
        })?;
        Ok(pending.iter().map(|m| m.name().to_string()).collect())
    })
    .await
}

/// Apply every pending migration, returning the applied versions
pub async fn run_pending_migrations(locator: &StorageLocator) -> AppResult<Vec<String>> {
    with_connection(locator, "run pending migrations", |conn| {
        let applied = conn.run_pending_migrations(MIGRATIONS).map_err(|e| AppError::Database {
            operation: "run pending migrations".to_string(),
            source: anyhow::anyhow!("Migration error: {}", e),
        })?;
        Ok(applied.iter().map(|m| m.to_string()).collect())
    })
    .await
}

/// Revert the last `steps` migrations, returning the reverted versions
pub async fn revert_migrations(locator: &StorageLocator, steps: u32) -> AppResult<Vec<String>> {
    if steps == 0 {
        return Err(AppError::Validation {
            field: "rollback_steps".to_string(),
            reason: "Number of rollback steps must be greater than 0".to_string(),
        });
    }

    with_connection(locator, "revert migrations", move |conn| {
        let applied = conn.applied_migrations().map_err(|e| AppError::Database {
            operation: "get applied migrations".to_string(),
            source: anyhow::anyhow!("Migration error: {}", e),
        })?;

        if applied.len() < steps as usize {
            return Err(AppError::Validation {
                field: "rollback_steps".to_string(),
                reason: format!(
                    "Cannot rollback {} migrations - only {} applied migrations available",
                    steps,
                    applied.len()
                ),
            });
        }

        let mut reverted = Vec::with_capacity(steps as usize);
        for _ in 0..steps {
            let version = conn
                .revert_last_migration(MIGRATIONS)
                .map_err(|e| AppError::Database {
                    operation: "revert migration".to_string(),
                    source: anyhow::anyhow!("Migration rollback error: {}", e),
                })?;
            reverted.push(version.to_string());
        }

        Ok(reverted)
    })
    .await
}

async fn with_connection<T, F>(locator: &StorageLocator, operation: &str, f: F) -> AppResult<T>
where
    T: Send + 'static,
    F: FnOnce(&mut PgConnection) -> AppResult<T> + Send + 'static,
{
    let conninfo = locator.to_conninfo();
    let operation = operation.to_string();

    tokio::task::spawn_blocking(move || {
        let mut conn = PgConnection::establish(&conninfo).map_err(|e| AppError::Database {
            operation: format!("establish connection to {}", operation),
            source: anyhow::anyhow!("Connection error: {}", e),
        })?;
        f(&mut conn)
    })
    .await
    .map_err(|e| AppError::Internal {
        source: anyhow::Error::from(e),
    })?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_zero_rollback_steps_rejected_before_connecting() {
        let locator = StorageLocator::new("postgres://unreachable.invalid/tenant");

        match revert_migrations(&locator, 0).await {
            Err(AppError::Validation { field, reason }) => {
                assert_eq!(field, "rollback_steps");
                assert!(reason.contains("must be greater than 0"));
            }
            other => panic!("Expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_embedded_migrations_create_both_tables() {
        use diesel::migration::MigrationSource;

        let migrations = MigrationSource::<diesel::pg::Pg>::migrations(&MIGRATIONS)
            .expect("embedded migrations load");
        let names: Vec<String> = migrations.iter().map(|m| m.name().to_string()).collect();

        assert_eq!(names.len(), 2);
        assert!(names[0].ends_with("create_jobs"));
        assert!(names[1].ends_with("create_messages"));
    }
}
