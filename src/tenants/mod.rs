//! Tenants and the registry built from configuration
//!
//! Each tenant owns one database (its storage locator) and one queue named
//! after that database. The registry is built once at startup and never
//! changes afterwards.

pub mod locator;

pub use locator::StorageLocator;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use crate::config::error::ConfigError;
use crate::config::settings::TenantSettings;
use crate::jobs::error::{JobError, JobResult};

/// Queue name prefix; the rest is the lowercased database name
pub const QUEUE_PREFIX: &str = "queue-";

/// One isolated customer of the scheduler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tenant {
    pub name: String,
    pub storage_locator: StorageLocator,
    pub queue: String,
    /// Delay between the end of one run and the next due time
    pub interval: Duration,
    pub handler_id: String,
}

impl Tenant {
    /// Build a tenant from its `[[tenants]]` entry at `index`
    pub fn from_settings(settings: &TenantSettings, index: usize) -> Result<Self, ConfigError> {
        let field = |name: &str| format!("tenants[{index}].{name}");

        let storage_locator = StorageLocator::new(settings.storage_locator.as_str());
        if storage_locator.as_str().is_empty() {
            return Err(ConfigError::validation(
                field("storage_locator"),
                "Storage locator is required.",
            ));
        }

        let database = storage_locator.database_name().ok_or_else(|| {
            ConfigError::validation(
                field("storage_locator"),
                format!(
                    "Storage locator '{}' does not name a database.",
                    storage_locator
                ),
            )
        })?;

        if settings.interval_seconds == 0 {
            return Err(ConfigError::validation(
                field("interval_seconds"),
                "Interval must be greater than 0 seconds.",
            ));
        }

        let handler_id = settings.handler.trim();
        if handler_id.is_empty() {
            return Err(ConfigError::validation(
                field("handler"),
                "Handler id cannot be empty.",
            ));
        }

        let name = match settings.name.as_deref().map(str::trim) {
            Some("") => {
                return Err(ConfigError::validation(
                    field("name"),
                    "Tenant name cannot be empty when given.",
                ));
            }
            Some(name) => name.to_string(),
            None => database.clone(),
        };

        Ok(Self {
            name,
            queue: queue_name(&database),
            storage_locator,
            interval: settings.interval(),
            handler_id: handler_id.to_string(),
        })
    }
}

/// `queue-` followed by the lowercased database name
pub fn queue_name(database: &str) -> String {
    format!("{QUEUE_PREFIX}{}", database.to_lowercase())
}

/// Immutable, ordered set of tenants
#[derive(Debug, Clone, Default)]
pub struct TenantRegistry {
    tenants: Vec<Arc<Tenant>>,
}

impl TenantRegistry {
    /// Build the registry, rejecting duplicate tenant names and queues
    pub fn from_settings(settings: &[TenantSettings]) -> Result<Self, ConfigError> {
        let mut names = HashSet::new();
        let mut queues = HashSet::new();
        let mut tenants = Vec::with_capacity(settings.len());

        for (index, entry) in settings.iter().enumerate() {
            let tenant = Tenant::from_settings(entry, index)?;

            if !names.insert(tenant.name.clone()) {
                return Err(ConfigError::validation(
                    format!("tenants[{index}].name"),
                    format!("Tenant name '{}' is used more than once.", tenant.name),
                ));
            }
            if !queues.insert(tenant.queue.clone()) {
                return Err(ConfigError::validation(
                    format!("tenants[{index}].storage_locator"),
                    format!(
                        "Queue '{}' is already used by another tenant; each tenant needs its own database.",
                        tenant.queue
                    ),
                ));
            }

            tenants.push(Arc::new(tenant));
        }

        Ok(Self { tenants })
    }

    /// Tenants in configuration order
    pub fn all(&self) -> &[Arc<Tenant>] {
        &self.tenants
    }

    pub fn get(&self, name: &str) -> JobResult<Arc<Tenant>> {
        self.tenants
            .iter()
            .find(|t| t.name == name)
            .cloned()
            .ok_or_else(|| JobError::TenantNotFound(name.to_string()))
    }

    pub fn len(&self) -> usize {
        self.tenants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tenants.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(locator: &str, interval_seconds: u64) -> TenantSettings {
        TenantSettings::new(locator, interval_seconds)
    }

    #[test]
    fn test_tenant_defaults_from_locator() {
        let tenant = Tenant::from_settings(&entry("postgres://localhost/Tenant_A", 10), 0)
            .expect("valid tenant");

        assert_eq!(tenant.name, "Tenant_A");
        assert_eq!(tenant.queue, "queue-tenant_a");
        assert_eq!(tenant.interval, Duration::from_secs(10));
        assert_eq!(tenant.handler_id, "message_log");
    }

    #[test]
    fn test_encoded_url_database_names_the_queue() {
        let tenant = Tenant::from_settings(&entry("postgres://db/Billing%2DEU", 10), 0)
            .expect("valid tenant");

        assert_eq!(tenant.name, "Billing-EU");
        assert_eq!(tenant.queue, "queue-billing-eu");
    }

    #[test]
    fn test_explicit_name_wins() {
        let mut settings = entry("Database=tenant_b", 30);
        settings.name = Some("beta".to_string());

        let tenant = Tenant::from_settings(&settings, 0).unwrap();
        assert_eq!(tenant.name, "beta");
        assert_eq!(tenant.queue, "queue-tenant_b");
    }

    #[test]
    fn test_invalid_entries_name_their_field() {
        let cases = [
            (entry("", 10), "tenants[3].storage_locator"),
            (entry("Server=db", 10), "tenants[3].storage_locator"),
            (entry("Database=a", 0), "tenants[3].interval_seconds"),
            (
                TenantSettings {
                    handler: " ".to_string(),
                    ..entry("Database=a", 10)
                },
                "tenants[3].handler",
            ),
            (
                TenantSettings {
                    name: Some(String::new()),
                    ..entry("Database=a", 10)
                },
                "tenants[3].name",
            ),
        ];

        for (settings, field) in cases {
            let err = Tenant::from_settings(&settings, 3).unwrap_err();
            assert_eq!(err.field(), Some(field));
        }
    }

    #[test]
    fn test_registry_keeps_configuration_order() {
        let registry = TenantRegistry::from_settings(&[
            entry("Database=zulu", 10),
            entry("Database=alpha", 30),
        ])
        .unwrap();

        let names: Vec<_> = registry.all().iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, ["zulu", "alpha"]);
        assert_eq!(registry.len(), 2);
        assert!(!registry.is_empty());
        assert_eq!(registry.get("alpha").unwrap().queue, "queue-alpha");
    }

    #[test]
    fn test_registry_rejects_duplicate_queue() {
        // Same database under different casing maps to one queue
        let mut second = entry("postgres://other-host/TENANT", 10);
        second.name = Some("other".to_string());

        let err = TenantRegistry::from_settings(&[entry("Database=tenant", 10), second])
            .unwrap_err();
        assert_eq!(err.field(), Some("tenants[1].storage_locator"));
    }

    #[test]
    fn test_registry_rejects_duplicate_name() {
        let mut first = entry("Database=one", 10);
        first.name = Some("shared".to_string());
        let mut second = entry("Database=two", 10);
        second.name = Some("shared".to_string());

        let err = TenantRegistry::from_settings(&[first, second]).unwrap_err();
        assert_eq!(err.field(), Some("tenants[1].name"));
    }

    #[test]
    fn test_unknown_tenant_lookup() {
        let registry = TenantRegistry::default();
        assert!(registry.is_empty());
        assert!(matches!(
            registry.get("missing"),
            Err(JobError::TenantNotFound(name)) if name == "missing"
        ));
    }
}
