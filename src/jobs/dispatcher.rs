//! Per-tenant dispatch loop
//!
//! Each tenant gets one [`Dispatcher`] running as its own task. A cycle
//! claims the earliest due record of the tenant queue, runs its handler under
//! the visibility timeout, records the outcome and enqueues the next link of
//! the chain. Store outages are retried with backoff; nothing escapes the loop.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::UnboundedSender;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::SchedulerConfig;
use crate::jobs::activator::JobActivator;
use crate::jobs::backoff::Backoff;
use crate::jobs::error::{JobError, JobResult};
use crate::jobs::reschedule::RescheduleProtocol;
use crate::jobs::store::{JobStore, SharedJobStore};
use crate::jobs::types::{JobContext, JobHandler, JobId, JobOutcome, JobRecord};
use crate::tenants::Tenant;

/// What one dispatch cycle did
#[derive(Debug, Clone, PartialEq)]
pub enum CycleReport {
    /// Nothing was due
    Idle,
    /// The handler ran and the chain moved on
    Completed {
        job_id: JobId,
        generation: i64,
        outcome: JobOutcome,
        next_job_id: JobId,
    },
    /// The claim expired and was taken over before the outcome was recorded
    ClaimLost { job_id: JobId },
    /// The record names a handler nobody registered
    HandlerUnresolved {
        job_id: JobId,
        handler_id: String,
        next_job_id: JobId,
    },
}

/// Progress notifications for foreground modes
#[derive(Debug, Clone, PartialEq)]
pub enum SchedulerEvent {
    Seeded {
        tenant: String,
        queue: String,
        job_id: JobId,
    },
    Cycle {
        tenant: String,
        report: CycleReport,
    },
}

/// Why a dispatcher loop returned
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatcherExit {
    Shutdown,
    UnresolvedHandler { handler_id: String },
    /// Tenant preparation failed with something other than a store outage
    SetupFailed { error: String },
}

pub struct Dispatcher {
    tenant: Arc<Tenant>,
    store: SharedJobStore,
    activator: Arc<dyn JobActivator>,
    reschedule: RescheduleProtocol,
    config: SchedulerConfig,
    owner: Uuid,
    shutdown: CancellationToken,
    events: Option<UnboundedSender<SchedulerEvent>>,
    next_maintenance: Instant,
}

impl Dispatcher {
    pub fn new(
        tenant: Arc<Tenant>,
        store: SharedJobStore,
        activator: Arc<dyn JobActivator>,
        config: SchedulerConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            reschedule: RescheduleProtocol::new(Arc::clone(&store)),
            tenant,
            store,
            activator,
            config,
            owner: Uuid::new_v4(),
            shutdown,
            events: None,
            next_maintenance: Instant::now(),
        }
    }

    /// Use a fixed claim owner instead of a random one
    pub fn with_owner(mut self, owner: Uuid) -> Self {
        self.owner = owner;
        self
    }

    pub fn with_events(mut self, events: UnboundedSender<SchedulerEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn owner(&self) -> Uuid {
        self.owner
    }

    pub fn tenant(&self) -> &Tenant {
        &self.tenant
    }

    /// Run `prepare` (migrations, seeding) for this tenant, then dispatch
    ///
    /// Store outages during preparation are retried with backoff inside this
    /// tenant's task, so an unreachable database never holds up the others.
    /// `prepare` returns the seeded job, if it enqueued one.
    pub async fn run_after<F, Fut>(self, prepare: F) -> DispatcherExit
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = JobResult<Option<JobId>>>,
    {
        match self.retry_store(prepare).await {
            Ok(Some(job_id)) => {
                if let Some(events) = &self.events {
                    let _ = events.send(SchedulerEvent::Seeded {
                        tenant: self.tenant.name.clone(),
                        queue: self.tenant.queue.clone(),
                        job_id,
                    });
                }
            }
            Ok(None) => {}
            Err(_) if self.shutdown.is_cancelled() => {
                tracing::info!(tenant = %self.tenant.name, "Shutdown before the tenant was ready");
                return DispatcherExit::Shutdown;
            }
            Err(e) => {
                tracing::error!(
                    tenant = %self.tenant.name,
                    error = %e,
                    "Tenant setup failed; not dispatching"
                );
                return DispatcherExit::SetupFailed {
                    error: e.to_string(),
                };
            }
        }

        self.run().await
    }

    /// Dispatch until shutdown or until the tenant's handler cannot be resolved
    pub async fn run(mut self) -> DispatcherExit {
        let mut backoff = Backoff::from_config(&self.config);

        tracing::info!(
            tenant = %self.tenant.name,
            queue = %self.tenant.queue,
            owner = %self.owner,
            "Dispatcher started"
        );

        let exit = loop {
            if self.shutdown.is_cancelled() {
                break DispatcherExit::Shutdown;
            }

            let delay = match self.run_once().await {
                Ok(report) => {
                    backoff.reset();
                    let idle = report == CycleReport::Idle;
                    let unresolved = match &report {
                        CycleReport::HandlerUnresolved { handler_id, .. } => {
                            Some(handler_id.clone())
                        }
                        _ => None,
                    };
                    self.emit(report);

                    if let Some(handler_id) = unresolved {
                        tracing::error!(
                            tenant = %self.tenant.name,
                            handler_id = %handler_id,
                            "Stopping dispatcher: handler is not registered"
                        );
                        break DispatcherExit::UnresolvedHandler { handler_id };
                    }

                    idle.then(|| self.config.poll_interval())
                }
                Err(e) if e.is_store_unavailable() => {
                    let delay = backoff.next_delay();
                    tracing::warn!(
                        tenant = %self.tenant.name,
                        attempt = backoff.attempt(),
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Job store unavailable, backing off"
                    );
                    Some(delay)
                }
                Err(e) => {
                    tracing::error!(
                        tenant = %self.tenant.name,
                        error = %e,
                        "Dispatch cycle failed"
                    );
                    Some(self.config.poll_interval())
                }
            };

            if let Some(delay) = delay {
                if !self.pause(delay).await {
                    break DispatcherExit::Shutdown;
                }
            }
        };

        tracing::info!(tenant = %self.tenant.name, exit = ?exit, "Dispatcher stopped");
        exit
    }

    /// One claim, execute and reschedule cycle
    pub async fn run_once(&mut self) -> JobResult<CycleReport> {
        self.maintain_if_due().await?;

        let claimed = self
            .store
            .claim_next(
                &self.tenant.queue,
                self.owner,
                self.config.visibility_timeout(),
            )
            .await?;

        match claimed {
            Some(record) => self.process(record).await,
            None => Ok(CycleReport::Idle),
        }
    }

    async fn maintain_if_due(&mut self) -> JobResult<()> {
        if Instant::now() < self.next_maintenance {
            return Ok(());
        }

        let queue = &self.tenant.queue;
        let released = self.store.release_expired_claims(queue).await?;
        let purged = self
            .store
            .purge_finished(queue, self.config.retention())
            .await?;

        if released > 0 {
            tracing::warn!(
                tenant = %self.tenant.name,
                released,
                "Released expired claims"
            );
        }
        if purged > 0 {
            tracing::debug!(tenant = %self.tenant.name, purged, "Purged finished jobs");
        }

        self.next_maintenance = Instant::now() + self.config.maintenance_interval();
        Ok(())
    }

    async fn process(&self, record: JobRecord) -> JobResult<CycleReport> {
        if !self.store.begin_execution(record.id, self.owner).await? {
            tracing::warn!(
                tenant = %self.tenant.name,
                job_id = record.id,
                "Claim lost before execution"
            );
            return Ok(CycleReport::ClaimLost { job_id: record.id });
        }

        let (outcome, unresolved) = match self.activator.activate(&record.handler_id) {
            Ok(handler) => (self.execute(handler.as_ref(), &record).await, None),
            Err(e @ JobError::UnresolvedHandler { .. }) => {
                (JobOutcome::failed(&e), Some(record.handler_id.clone()))
            }
            Err(e) => (JobOutcome::failed(&e), None),
        };

        let Some(next_job_id) = self.finish(&record, &outcome).await? else {
            tracing::warn!(
                tenant = %self.tenant.name,
                job_id = record.id,
                "Claim lost before completion; the new owner reschedules"
            );
            return Ok(CycleReport::ClaimLost { job_id: record.id });
        };

        Ok(match unresolved {
            Some(handler_id) => CycleReport::HandlerUnresolved {
                job_id: record.id,
                handler_id,
                next_job_id,
            },
            None => CycleReport::Completed {
                job_id: record.id,
                generation: record.generation,
                outcome,
                next_job_id,
            },
        })
    }

    async fn execute(&self, handler: &dyn JobHandler, record: &JobRecord) -> JobOutcome {
        let payload = match record.decode_payload() {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(
                    tenant = %self.tenant.name,
                    job_id = record.id,
                    error = %e,
                    "Rejected job payload"
                );
                return JobOutcome::failed(e);
            }
        };

        let ctx = JobContext {
            job_id: record.id,
            tenant: self.tenant.name.clone(),
            queue: record.queue.clone(),
            generation: record.generation,
            cancellation_token: self.shutdown.child_token(),
        };
        let timeout = self.config.visibility_timeout();
        let started = Instant::now();

        let outcome = match tokio::time::timeout(timeout, handler.execute(ctx, &payload)).await {
            Ok(Ok(())) => JobOutcome::Succeeded,
            Ok(Err(e)) => {
                let error = anyhow::Error::from(JobError::HandlerExecutionFailed {
                    job_id: record.id,
                    source: anyhow::Error::from(e),
                });
                JobOutcome::failed(format!("{error:#}"))
            }
            Err(_) => JobOutcome::failed(JobError::VisibilityTimeoutExceeded {
                job_id: record.id,
                timeout,
            }),
        };

        let duration_ms = started.elapsed().as_millis() as u64;
        match outcome.error() {
            None => tracing::info!(
                tenant = %self.tenant.name,
                job_id = record.id,
                generation = record.generation,
                handler_id = %handler.handler_id(),
                duration_ms,
                "Job succeeded"
            ),
            Some(error) => tracing::warn!(
                tenant = %self.tenant.name,
                job_id = record.id,
                generation = record.generation,
                handler_id = %handler.handler_id(),
                duration_ms,
                error = %error,
                "Job failed"
            ),
        }

        outcome
    }

    /// Record the outcome and enqueue the successor, retrying store outages
    /// until shutdown
    ///
    /// On shutdown the record stays claimed; once its visibility timeout
    /// lapses it is released and runs again, so the chain survives.
    async fn finish(&self, record: &JobRecord, outcome: &JobOutcome) -> JobResult<Option<JobId>> {
        self.retry_store(|| self.reschedule.complete(&self.tenant, record, self.owner, outcome))
            .await
    }

    /// Run `step` until it returns anything but `StoreUnavailable`
    ///
    /// Gives up with the last outage error when shutdown interrupts a backoff.
    pub async fn retry_store<T, F, Fut>(&self, mut step: F) -> JobResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = JobResult<T>>,
    {
        let mut backoff = Backoff::from_config(&self.config);
        loop {
            match step().await {
                Err(e) if e.is_store_unavailable() => self.retry_after(&mut backoff, e).await?,
                result => return result,
            }
        }
    }

    async fn retry_after(&self, backoff: &mut Backoff, error: JobError) -> JobResult<()> {
        let delay = backoff.next_delay();
        tracing::warn!(
            tenant = %self.tenant.name,
            attempt = backoff.attempt(),
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "Retrying job store call"
        );

        if self.pause(delay).await {
            Ok(())
        } else {
            Err(error)
        }
    }

    /// Sleep unless shutdown comes first; `false` on shutdown
    async fn pause(&self, delay: Duration) -> bool {
        tokio::select! {
            _ = self.shutdown.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }

    fn emit(&self, report: CycleReport) {
        if report == CycleReport::Idle {
            return;
        }
        if let Some(events) = &self.events {
            // the receiver may already be gone during shutdown
            let _ = events.send(SchedulerEvent::Cycle {
                tenant: self.tenant.name.clone(),
                report,
            });
        }
    }
}
