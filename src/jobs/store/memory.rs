//! In-process job store
//!
//! Every operation runs under one mutex, so the claim check-and-set is atomic
//! for all dispatchers in the process. Nothing survives a restart.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use jiff::Timestamp;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::jobs::error::JobResult;
use crate::jobs::store::JobStore;
use crate::jobs::types::{
    Clock, JobId, JobOutcome, JobRecord, JobState, NewJob, SystemClock, timestamp_after,
    timestamp_before,
};

#[derive(Debug, Default)]
struct MemoryState {
    last_id: JobId,
    records: BTreeMap<JobId, JobRecord>,
}

impl MemoryState {
    fn insert(&mut self, job: NewJob, now: Timestamp) -> JobId {
        self.last_id += 1;
        let id = self.last_id;
        let record = JobRecord {
            id,
            state: job.initial_state(now),
            queue: job.queue,
            handler_id: job.handler_id,
            payload: job.payload,
            due_at: job.due_at,
            claim_owner: None,
            claim_expires_at: None,
            created_at: now,
            generation: job.generation,
            finished_at: None,
            last_error: None,
        };
        self.records.insert(id, record);
        id
    }

    fn finish(&mut self, id: JobId, owner: Uuid, outcome: &JobOutcome, now: Timestamp) -> bool {
        match self.records.get_mut(&id) {
            Some(record) if record.state.is_claimed() && record.claim_owner == Some(owner) => {
                record.state = outcome.state();
                record.finished_at = Some(now);
                record.last_error = outcome.error().map(str::to_string);
                record.claim_owner = None;
                record.claim_expires_at = None;
                true
            }
            _ => false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MemoryJobStore {
    state: Arc<Mutex<MemoryState>>,
    clock: Arc<dyn Clock>,
}

impl MemoryJobStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryState::default())),
            clock,
        }
    }
}

impl Default for MemoryJobStore {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(&self, job: NewJob) -> JobResult<JobId> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        Ok(state.insert(job, now))
    }

    async fn claim_next(
        &self,
        queue: &str,
        owner: Uuid,
        visibility_timeout: Duration,
    ) -> JobResult<Option<JobRecord>> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;

        let candidate = state
            .records
            .values_mut()
            .filter(|r| r.queue == queue && r.is_claimable(now))
            .min_by_key(|r| (r.due_at, r.id));

        Ok(candidate.map(|record| {
            record.state = JobState::Claimed;
            record.claim_owner = Some(owner);
            record.claim_expires_at = Some(timestamp_after(now, visibility_timeout));
            record.clone()
        }))
    }

    async fn begin_execution(&self, id: JobId, owner: Uuid) -> JobResult<bool> {
        let mut state = self.state.lock().await;

        match state.records.get_mut(&id) {
            Some(record) if record.state == JobState::Claimed && record.claim_owner == Some(owner) => {
                record.state = JobState::Executing;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn complete(&self, id: JobId, owner: Uuid, outcome: &JobOutcome) -> JobResult<bool> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        Ok(state.finish(id, owner, outcome, now))
    }

    async fn complete_and_reschedule(
        &self,
        id: JobId,
        owner: Uuid,
        outcome: &JobOutcome,
        successor: NewJob,
    ) -> JobResult<Option<JobId>> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;

        if !state.finish(id, owner, outcome, now) {
            return Ok(None);
        }
        Ok(Some(state.insert(successor, now)))
    }

    async fn release_expired_claims(&self, queue: &str) -> JobResult<usize> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;

        let mut released = 0;
        for record in state
            .records
            .values_mut()
            .filter(|r| r.queue == queue && r.claim_expired(now))
        {
            record.state = JobState::Due;
            record.claim_owner = None;
            record.claim_expires_at = None;
            released += 1;
        }

        Ok(released)
    }

    async fn count_live(&self, queue: &str) -> JobResult<usize> {
        let state = self.state.lock().await;
        Ok(state
            .records
            .values()
            .filter(|r| r.queue == queue && !r.state.is_terminal())
            .count())
    }

    async fn purge_finished(&self, queue: &str, older_than: Duration) -> JobResult<usize> {
        let cutoff = timestamp_before(self.clock.now(), older_than);
        let mut state = self.state.lock().await;

        let before = state.records.len();
        state.records.retain(|_, r| {
            !(r.queue == queue
                && r.state.is_terminal()
                && r.finished_at.is_some_and(|at| at < cutoff))
        });

        Ok(before - state.records.len())
    }

    async fn get(&self, id: JobId) -> JobResult<Option<JobRecord>> {
        let state = self.state.lock().await;
        Ok(state.records.get(&id).cloned())
    }

    async fn list(&self, queue: &str) -> JobResult<Vec<JobRecord>> {
        let state = self.state.lock().await;
        Ok(state
            .records
            .values()
            .filter(|r| r.queue == queue)
            .cloned()
            .collect())
    }

    fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }
}
