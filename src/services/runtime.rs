//! Per-tenant collaborators opened at service start.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::{SeedPolicy, Settings, StoreBackend};
use crate::db::{establish_async_connection_pool, run_pending_migrations};
use crate::jobs::tasks::{MessageLogHandler, MessageSinks};
use crate::jobs::{
    Clock, HandlerRegistry, JobError, JobId, JobResult, JobStore, MemoryJobStore, NewJob,
    PgJobStore, SharedJobStore,
};
use crate::repositories::{MemoryMessageSink, MessageRepository, MessageSink};
use crate::tenants::{Tenant, TenantRegistry};

/// A tenant with its job store and workload sink
#[derive(Clone)]
pub struct TenantRuntime {
    pub tenant: Arc<Tenant>,
    pub store: SharedJobStore,
    pub sink: Arc<dyn MessageSink>,
    /// Apply pending migrations to the tenant database before seeding
    pub migrate_on_start: bool,
}

impl TenantRuntime {
    /// Get the tenant ready for dispatch: migrate when configured, then seed
    ///
    /// Migration failures are reported as store outages so the caller retries
    /// them along with an unreachable store.
    pub async fn prepare(&self, policy: SeedPolicy) -> JobResult<Option<JobId>> {
        if self.migrate_on_start {
            let applied = run_pending_migrations(&self.tenant.storage_locator)
                .await
                .map_err(|e| JobError::store("run_pending_migrations", e))?;
            tracing::info!(
                tenant = %self.tenant.name,
                applied = applied.len(),
                "Tenant database migrated"
            );
        }

        self.seed(policy).await
    }

    /// Enqueue the first link of the tenant chain according to `policy`
    ///
    /// Returns `None` when a live record already exists and the policy is
    /// `if_absent`.
    pub async fn seed(&self, policy: SeedPolicy) -> JobResult<Option<JobId>> {
        let queue = &self.tenant.queue;

        if policy == SeedPolicy::IfAbsent {
            let live = self.store.count_live(queue).await?;
            if live > 0 {
                tracing::info!(
                    tenant = %self.tenant.name,
                    queue = %queue,
                    live,
                    "Chain already scheduled, skipping seed"
                );
                return Ok(None);
            }
        }

        let now = self.store.clock().now();
        let job_id = self.store.create(NewJob::seed(&self.tenant, now)?).await?;

        tracing::info!(
            tenant = %self.tenant.name,
            queue = %queue,
            job_id,
            "Enqueued seed job"
        );

        Ok(Some(job_id))
    }
}

/// Open one store and sink per tenant of `registry`
///
/// The postgres backend configures a pool per tenant database without
/// connecting; reaching the database, migrating and seeding happen in
/// [`TenantRuntime::prepare`]. The memory backend shares one store between
/// every tenant; queues keep them apart.
pub fn open_tenants(
    settings: &Settings,
    registry: &TenantRegistry,
    clock: Arc<dyn Clock>,
) -> Vec<TenantRuntime> {
    let runtimes: Vec<TenantRuntime> = match settings.store.backend {
        StoreBackend::Memory => {
            let store: SharedJobStore = Arc::new(MemoryJobStore::new(clock));
            registry
                .all()
                .iter()
                .map(|tenant| TenantRuntime {
                    tenant: Arc::clone(tenant),
                    store: Arc::clone(&store),
                    sink: Arc::new(MemoryMessageSink::new()),
                    migrate_on_start: false,
                })
                .collect()
        }
        StoreBackend::Postgres => registry
            .all()
            .iter()
            .map(|tenant| {
                let pool = establish_async_connection_pool(&tenant.storage_locator, &settings.store);
                TenantRuntime {
                    tenant: Arc::clone(tenant),
                    store: Arc::new(PgJobStore::new(pool.clone(), Arc::clone(&clock))),
                    sink: Arc::new(MessageRepository::new(pool)),
                    migrate_on_start: settings.store.auto_migrate,
                }
            })
            .collect(),
    };

    tracing::info!(
        backend = %settings.store.backend,
        tenants = runtimes.len(),
        "Tenant stores opened"
    );

    runtimes
}

/// Handler registry wired to the sinks of `runtimes`
pub fn build_activator(runtimes: &[TenantRuntime]) -> HandlerRegistry {
    let sinks: HashMap<String, Arc<dyn MessageSink>> = runtimes
        .iter()
        .map(|r| (r.tenant.name.clone(), Arc::clone(&r.sink)))
        .collect();
    let sinks: MessageSinks = Arc::new(sinks);

    let mut registry = HandlerRegistry::new();
    MessageLogHandler::register(&mut registry, sinks);

    for runtime in runtimes {
        if !registry.contains(&runtime.tenant.handler_id) {
            tracing::warn!(
                tenant = %runtime.tenant.name,
                handler_id = %runtime.tenant.handler_id,
                registered = ?registry.handler_ids(),
                "Tenant handler is not registered; its dispatcher will stop on first run"
            );
        }
    }

    registry
}
