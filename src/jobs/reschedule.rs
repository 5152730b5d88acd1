//! Recurring chains
//!
//! A chain is a sequence of one-shot records: whenever an execution finishes
//! the dispatcher enqueues the next link `interval` after the completion time.
//! Drift accumulates across links; there is no fixed phase.

use std::sync::Arc;
use std::time::Duration;

use jiff::Timestamp;
use uuid::Uuid;

use crate::jobs::error::JobResult;
use crate::jobs::store::{JobStore, SharedJobStore};
use crate::jobs::types::{Clock, JobId, JobOutcome, JobRecord, NewJob, timestamp_after};
use crate::tenants::Tenant;

#[derive(Clone)]
pub struct RescheduleProtocol {
    store: SharedJobStore,
    clock: Arc<dyn Clock>,
}

impl RescheduleProtocol {
    pub fn new(store: SharedJobStore) -> Self {
        let clock = store.clock();
        Self { store, clock }
    }

    /// Due time of the link after one that finished at `now`
    pub fn next_due_at(now: Timestamp, interval: Duration) -> Timestamp {
        timestamp_after(now, interval)
    }

    /// Next link of the chain `finished` belongs to, due one interval from now
    pub fn successor(&self, tenant: &Tenant, finished: &JobRecord) -> NewJob {
        let due_at = Self::next_due_at(self.clock.now(), tenant.interval);
        NewJob::successor_of(finished, due_at)
    }

    /// Enqueue the successor of `finished`
    pub async fn reschedule(&self, tenant: &Tenant, finished: &JobRecord) -> JobResult<JobId> {
        let successor = self.successor(tenant, finished);
        let due_at = successor.due_at;
        let id = self.store.create(successor).await?;

        Self::trace(tenant, finished, id, due_at);
        Ok(id)
    }

    /// Record `outcome` for the claimed `finished` record and enqueue its
    /// successor in one store call
    ///
    /// `None` means the claim was lost: nothing was written and the new owner
    /// continues the chain.
    pub async fn complete(
        &self,
        tenant: &Tenant,
        finished: &JobRecord,
        owner: Uuid,
        outcome: &JobOutcome,
    ) -> JobResult<Option<JobId>> {
        let successor = self.successor(tenant, finished);
        let due_at = successor.due_at;
        let next = self
            .store
            .complete_and_reschedule(finished.id, owner, outcome, successor)
            .await?;

        if let Some(id) = next {
            Self::trace(tenant, finished, id, due_at);
        }
        Ok(next)
    }

    fn trace(tenant: &Tenant, finished: &JobRecord, id: JobId, due_at: Timestamp) {
        tracing::debug!(
            tenant = %tenant.name,
            job_id = id,
            previous_job_id = finished.id,
            generation = finished.generation + 1,
            due_at = %due_at,
            "Rescheduled job"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TenantSettings;
    use crate::jobs::store::{JobStore, MemoryJobStore};
    use crate::jobs::types::{JobState, TokioClock};

    #[test]
    fn test_next_due_at_adds_interval() {
        let now = Timestamp::from_second(1_000).unwrap();
        assert_eq!(
            RescheduleProtocol::next_due_at(now, Duration::from_secs(60)),
            Timestamp::from_second(1_060).unwrap()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_successor_is_due_one_interval_after_completion() {
        let origin = Timestamp::from_second(1_000).unwrap();
        let store = MemoryJobStore::new(Arc::new(TokioClock::new(origin)));
        let shared: SharedJobStore = Arc::new(store.clone());
        let tenant = Tenant::from_settings(&TenantSettings::new("Database=alpha", 10), 0).unwrap();

        let seed_id = store
            .create(NewJob::seed(&tenant, origin).unwrap())
            .await
            .unwrap();
        let owner = Uuid::new_v4();
        let claimed = store
            .claim_next(&tenant.queue, owner, Duration::from_secs(30))
            .await
            .unwrap()
            .unwrap();

        // completion lands 3s after the seed was due
        tokio::time::advance(Duration::from_secs(3)).await;
        assert!(store
            .complete(seed_id, owner, &JobOutcome::failed("boom"))
            .await
            .unwrap());

        let protocol = RescheduleProtocol::new(shared);
        let next_id = protocol.reschedule(&tenant, &claimed).await.unwrap();
        let next = store.get(next_id).await.unwrap().unwrap();

        assert!(next_id > seed_id);
        assert_eq!(next.generation, 1);
        assert_eq!(next.state, JobState::Scheduled);
        assert_eq!(next.due_at, Timestamp::from_second(1_013).unwrap());
        assert_eq!(next.queue, claimed.queue);
        assert_eq!(next.handler_id, claimed.handler_id);
        assert_eq!(next.payload, claimed.payload);
    }

    #[tokio::test(start_paused = true)]
    async fn test_complete_enqueues_successor_for_the_owner_only() {
        let origin = Timestamp::from_second(1_000).unwrap();
        let store = MemoryJobStore::new(Arc::new(TokioClock::new(origin)));
        let protocol = RescheduleProtocol::new(Arc::new(store.clone()));
        let tenant = Tenant::from_settings(&TenantSettings::new("Database=alpha", 10), 0).unwrap();

        store
            .create(NewJob::seed(&tenant, origin).unwrap())
            .await
            .unwrap();
        let owner = Uuid::new_v4();
        let claimed = store
            .claim_next(&tenant.queue, owner, Duration::from_secs(30))
            .await
            .unwrap()
            .unwrap();

        tokio::time::advance(Duration::from_secs(2)).await;
        let lost = protocol
            .complete(&tenant, &claimed, Uuid::new_v4(), &JobOutcome::Succeeded)
            .await
            .unwrap();
        assert_eq!(lost, None);

        let next_id = protocol
            .complete(&tenant, &claimed, owner, &JobOutcome::Succeeded)
            .await
            .unwrap()
            .expect("owner completes");
        let next = store.get(next_id).await.unwrap().unwrap();
        assert_eq!(next.due_at, Timestamp::from_second(1_012).unwrap());
        assert_eq!(next.generation, 1);
        assert_eq!(store.count_live(&tenant.queue).await.unwrap(), 1);
    }
}
