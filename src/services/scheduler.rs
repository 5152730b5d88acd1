//! The multi-tenant scheduler service.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::Settings;
use crate::error::{AppError, AppResult};
use crate::jobs::{
    Clock, CycleReport, Dispatcher, DispatcherExit, JobActivator, JobId, JobResult,
    SchedulerEvent, SystemClock,
};
use crate::services::RunnableService;
use crate::services::runtime::{TenantRuntime, build_activator, open_tenants};
use crate::tenants::TenantRegistry;

/// Runs one dispatcher per configured tenant
pub struct SchedulerService {
    settings: Settings,
    registry: TenantRegistry,
    clock: Arc<dyn Clock>,
    events: Option<UnboundedSender<SchedulerEvent>>,
    shutdown: CancellationToken,
    runtimes: Vec<TenantRuntime>,
    /// Tenants `run_once` already migrated and seeded
    prepared: HashSet<String>,
    dispatchers: Vec<(String, JoinHandle<DispatcherExit>)>,
}

impl SchedulerService {
    pub fn new(settings: Settings) -> AppResult<Self> {
        let registry = settings.tenant_registry()?;

        Ok(Self {
            settings,
            registry,
            clock: Arc::new(SystemClock),
            events: None,
            shutdown: CancellationToken::new(),
            runtimes: Vec::new(),
            prepared: HashSet::new(),
            dispatchers: Vec::new(),
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Receive seed and cycle notifications on `events`
    pub fn with_events(mut self, events: UnboundedSender<SchedulerEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn registry(&self) -> &TenantRegistry {
        &self.registry
    }

    /// Stores and sinks of the running tenants; empty until started
    pub fn runtimes(&self) -> &[TenantRuntime] {
        &self.runtimes
    }

    pub fn is_running(&self) -> bool {
        !self.dispatchers.is_empty()
    }

    /// Run a single dispatch cycle for every tenant, in configuration order
    ///
    /// Tenants not yet prepared are migrated and seeded first. Each tenant
    /// gets its own result, so one unreachable store does not hide the
    /// others.
    pub async fn run_once(&mut self) -> Vec<(String, JobResult<CycleReport>)> {
        if self.runtimes.is_empty() {
            self.open();
        }

        let activator: Arc<dyn JobActivator> = Arc::new(build_activator(&self.runtimes));
        let policy = self.settings.scheduler.seed_policy;
        let mut reports = Vec::with_capacity(self.runtimes.len());
        let mut newly_prepared = Vec::new();

        for runtime in &self.runtimes {
            let name = runtime.tenant.name.clone();
            let mut dispatcher = self.dispatcher_for(runtime, Arc::clone(&activator));

            let ready = if self.prepared.contains(&name) {
                Ok(())
            } else {
                runtime.prepare(policy).await.map(|seeded| {
                    if let Some(job_id) = seeded {
                        self.emit_seeded(runtime, job_id);
                    }
                    newly_prepared.push(name.clone());
                })
            };
            let report = match ready {
                Ok(()) => dispatcher.run_once().await,
                Err(e) => Err(e),
            };

            if let Err(e) = &report {
                tracing::error!(tenant = %name, error = %e, "Dispatch cycle failed");
            }
            reports.push((name, report));
        }

        self.prepared.extend(newly_prepared);
        reports
    }

    fn open(&mut self) {
        self.runtimes = open_tenants(&self.settings, &self.registry, Arc::clone(&self.clock));
        self.prepared.clear();
    }

    fn emit_seeded(&self, runtime: &TenantRuntime, job_id: JobId) {
        if let Some(events) = &self.events {
            let _ = events.send(SchedulerEvent::Seeded {
                tenant: runtime.tenant.name.clone(),
                queue: runtime.tenant.queue.clone(),
                job_id,
            });
        }
    }

    fn dispatcher_for(
        &self,
        runtime: &TenantRuntime,
        activator: Arc<dyn JobActivator>,
    ) -> Dispatcher {
        let dispatcher = Dispatcher::new(
            Arc::clone(&runtime.tenant),
            Arc::clone(&runtime.store),
            activator,
            self.settings.scheduler.clone(),
            self.shutdown.clone(),
        );

        match &self.events {
            Some(events) => dispatcher.with_events(events.clone()),
            None => dispatcher,
        }
    }
}

#[async_trait]
impl RunnableService for SchedulerService {
    fn name(&self) -> &str {
        &self.settings.application.name
    }

    async fn start(&mut self) -> AppResult<()> {
        if self.is_running() {
            tracing::warn!("Scheduler already running");
            return Ok(());
        }

        if self.registry.is_empty() {
            tracing::warn!("No tenants configured; the scheduler has nothing to do");
        }

        self.open();

        let activator: Arc<dyn JobActivator> = Arc::new(build_activator(&self.runtimes));
        let policy = self.settings.scheduler.seed_policy;
        let dispatchers: Vec<_> = self
            .runtimes
            .iter()
            .map(|runtime| {
                let dispatcher = self.dispatcher_for(runtime, Arc::clone(&activator));
                let prepared = runtime.clone();
                let prepare = move || {
                    let runtime = prepared.clone();
                    async move { runtime.prepare(policy).await }
                };
                (
                    runtime.tenant.name.clone(),
                    tokio::spawn(dispatcher.run_after(prepare)),
                )
            })
            .collect();
        self.dispatchers = dispatchers;

        tracing::info!(
            tenants = self.dispatchers.len(),
            poll_interval_ms = self.settings.scheduler.poll_interval_ms,
            visibility_timeout = self.settings.scheduler.visibility_timeout,
            seed_policy = ?self.settings.scheduler.seed_policy,
            "Scheduler started"
        );

        Ok(())
    }

    async fn stop(&mut self) -> AppResult<()> {
        self.shutdown.cancel();

        let (tenants, handles): (Vec<_>, Vec<_>) =
            std::mem::take(&mut self.dispatchers).into_iter().unzip();
        let mut panicked = Vec::new();

        for (tenant, joined) in tenants.into_iter().zip(join_all(handles).await) {
            match joined {
                Ok(exit) => tracing::debug!(tenant = %tenant, exit = ?exit, "Dispatcher joined"),
                Err(e) => {
                    tracing::error!(tenant = %tenant, error = %e, "Dispatcher task panicked");
                    panicked.push(tenant);
                }
            }
        }

        self.runtimes.clear();
        self.prepared.clear();
        self.shutdown = CancellationToken::new();

        if !panicked.is_empty() {
            return Err(AppError::Internal {
                source: anyhow::anyhow!("Dispatchers failed for tenants: {}", panicked.join(", ")),
            });
        }

        tracing::info!("Scheduler stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use jiff::Timestamp;

    use crate::config::{SeedPolicy, StoreBackend, TenantSettings};
    use crate::jobs::{JobOutcome, JobState, JobStore, TokioClock};
    use crate::repositories::MessageSink;

    fn settings(tenants: Vec<TenantSettings>) -> Settings {
        let mut settings = Settings::default();
        settings.store.backend = StoreBackend::Memory;
        settings.scheduler.poll_interval_ms = 1_000;
        settings.tenants = tenants;
        settings
    }

    fn paused_clock() -> Arc<dyn Clock> {
        Arc::new(TokioClock::new(Timestamp::from_second(1_700_000_000).unwrap()))
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_runs_every_tenant_until_stop() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let mut service = SchedulerService::new(settings(vec![
            TenantSettings::new("Database=T1", 10),
            TenantSettings::new("Database=T2", 30),
        ]))
        .unwrap()
        .with_clock(paused_clock())
        .with_events(tx);

        service.start().await.unwrap();
        assert!(service.is_running());
        let runtimes = service.runtimes().to_vec();

        tokio::time::sleep(Duration::from_secs(65)).await;
        service.stop().await.unwrap();
        assert!(!service.is_running());
        assert!(service.runtimes().is_empty());

        for (runtime, minimum) in runtimes.iter().zip([6usize, 2]) {
            let records = runtime.store.list(&runtime.tenant.queue).await.unwrap();
            let succeeded = records
                .iter()
                .filter(|r| r.state == JobState::Succeeded)
                .count();
            assert!(succeeded >= minimum, "{} ran {succeeded} times", runtime.tenant.name);
            assert_eq!(runtime.sink.count().await.unwrap(), succeeded);
        }

        let mut seeded = 0;
        let mut completed = 0;
        while let Ok(event) = rx.try_recv() {
            match event {
                SchedulerEvent::Seeded { .. } => seeded += 1,
                SchedulerEvent::Cycle {
                    report:
                        CycleReport::Completed {
                            outcome: JobOutcome::Succeeded,
                            ..
                        },
                    ..
                } => completed += 1,
                SchedulerEvent::Cycle { .. } => {}
            }
        }
        assert_eq!(seeded, 2);
        assert!(completed >= 8);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_once_seeds_and_executes_each_tenant() {
        let mut service = SchedulerService::new(settings(vec![
            TenantSettings::new("Database=T1", 10),
            TenantSettings::new("Database=T2", 30),
        ]))
        .unwrap()
        .with_clock(paused_clock());

        let reports = service.run_once().await;
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].0, "T1");
        assert_eq!(reports[1].0, "T2");
        for (_, report) in &reports {
            assert!(matches!(
                report,
                Ok(CycleReport::Completed {
                    generation: 0,
                    outcome: JobOutcome::Succeeded,
                    ..
                })
            ));
        }

        // the successors are not due yet, and no tenant is seeded twice
        let reports = service.run_once().await;
        assert!(reports.iter().all(|(_, r)| matches!(r, Ok(CycleReport::Idle))));
        for runtime in service.runtimes() {
            assert_eq!(runtime.store.count_live(&runtime.tenant.queue).await.unwrap(), 1);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_handler_stops_only_that_tenant() {
        let mut broken = TenantSettings::new("Database=T2", 10);
        broken.handler = "missing".to_string();

        let mut service = SchedulerService::new(settings(vec![
            TenantSettings::new("Database=T1", 10),
            broken,
        ]))
        .unwrap()
        .with_clock(paused_clock());

        service.start().await.unwrap();
        let runtimes = service.runtimes().to_vec();
        tokio::time::sleep(Duration::from_secs(25)).await;
        service.stop().await.unwrap();

        let healthy = runtimes[0].store.list(&runtimes[0].tenant.queue).await.unwrap();
        assert!(healthy.iter().filter(|r| r.state == JobState::Succeeded).count() >= 3);

        let stopped = runtimes[1].store.list(&runtimes[1].tenant.queue).await.unwrap();
        assert_eq!(stopped.len(), 2);
        assert_eq!(stopped[0].state, JobState::Failed);
        assert_eq!(stopped[1].state, JobState::Scheduled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_with_if_absent_keeps_a_single_chain() {
        let mut settings = settings(vec![TenantSettings::new("Database=T1", 10)]);
        settings.scheduler.seed_policy = SeedPolicy::IfAbsent;

        let mut service = SchedulerService::new(settings).unwrap().with_clock(paused_clock());
        assert!(service.run_once().await[0].1.is_ok());
        let runtime = service.runtimes()[0].clone();

        // a second seeding pass over the same store finds the live successor
        assert_eq!(runtime.seed(SeedPolicy::IfAbsent).await.unwrap(), None);
        assert_eq!(runtime.store.count_live(&runtime.tenant.queue).await.unwrap(), 1);
    }

    #[test]
    fn test_invalid_tenants_fail_construction() {
        let result = SchedulerService::new(settings(vec![TenantSettings::new("Server=.", 10)]));
        assert!(matches!(result, Err(AppError::Configuration { .. })));
    }

    fn unreachable_settings() -> Settings {
        let mut settings = settings(vec![TenantSettings::new(
            "postgres://nobody@127.0.0.1:1/alpha",
            10,
        )]);
        settings.store.backend = StoreBackend::Postgres;
        settings.store.connection_timeout = 1;
        settings
    }

    #[tokio::test]
    async fn test_unreachable_tenant_store_does_not_fail_start() {
        let mut service = SchedulerService::new(unreachable_settings()).unwrap();

        service.start().await.unwrap();
        assert!(service.is_running());

        tokio::time::sleep(Duration::from_millis(200)).await;
        let stopped = tokio::time::timeout(Duration::from_secs(10), service.stop())
            .await
            .expect("stop returns once the retrying tenant sees shutdown");
        stopped.unwrap();
        assert!(!service.is_running());
    }

    #[tokio::test]
    async fn test_run_once_reports_unreachable_tenant_on_its_own() {
        let mut service = SchedulerService::new(unreachable_settings()).unwrap();

        let reports = service.run_once().await;
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].0, "alpha");
        assert!(matches!(&reports[0].1, Err(e) if e.is_store_unavailable()));
    }
}
