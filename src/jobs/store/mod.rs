//! Durable job storage
//!
//! The claim is the only mutual-exclusion point between workers: a record is
//! handed to at most one owner until that owner completes it or its
//! visibility timeout lapses and `release_expired_claims` returns it to `Due`.

mod memory;
mod postgres;

pub use memory::MemoryJobStore;
pub use postgres::PgJobStore;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::jobs::error::JobResult;
use crate::jobs::types::{Clock, JobId, JobOutcome, JobRecord, JobState, NewJob};

/// States a worker may claim from (subject to `due_at <= now`)
pub(crate) const CLAIMABLE_STATES: [JobState; 2] = [JobState::Scheduled, JobState::Due];

/// States held under a visibility timeout
pub(crate) const CLAIMED_STATES: [JobState; 2] = [JobState::Claimed, JobState::Executing];

pub(crate) const TERMINAL_STATES: [JobState; 2] = [JobState::Succeeded, JobState::Failed];

pub type SharedJobStore = Arc<dyn JobStore>;

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new record, `Scheduled` when due in the future and `Due` otherwise
    async fn create(&self, job: NewJob) -> JobResult<JobId>;

    /// Atomically claim the earliest eligible record of `queue`
    ///
    /// Ties on `due_at` go to the lower id. Returns `None` when nothing is
    /// eligible or another worker won the race.
    async fn claim_next(
        &self,
        queue: &str,
        owner: Uuid,
        visibility_timeout: Duration,
    ) -> JobResult<Option<JobRecord>>;

    /// `Claimed -> Executing` for the owning worker
    async fn begin_execution(&self, id: JobId, owner: Uuid) -> JobResult<bool>;

    /// Record the outcome of a claimed record
    ///
    /// Returns `false` and changes nothing when the record is already
    /// terminal, was released, or belongs to another owner.
    async fn complete(&self, id: JobId, owner: Uuid, outcome: &JobOutcome) -> JobResult<bool>;

    /// Record the outcome and insert `successor` in one atomic step
    ///
    /// Returns the successor id, or `None` with nothing written when
    /// `complete` would have returned `false`. A chain is never left with a
    /// terminal record and no next link.
    async fn complete_and_reschedule(
        &self,
        id: JobId,
        owner: Uuid,
        outcome: &JobOutcome,
        successor: NewJob,
    ) -> JobResult<Option<JobId>>;

    /// Return records whose claim expired to `Due`
    async fn release_expired_claims(&self, queue: &str) -> JobResult<usize>;

    /// Non-terminal records in `queue`
    async fn count_live(&self, queue: &str) -> JobResult<usize>;

    /// Delete terminal records that finished more than `older_than` ago
    async fn purge_finished(&self, queue: &str, older_than: Duration) -> JobResult<usize>;

    async fn get(&self, id: JobId) -> JobResult<Option<JobRecord>>;

    /// Every record of `queue`, by id
    async fn list(&self, queue: &str) -> JobResult<Vec<JobRecord>>;

    fn clock(&self) -> Arc<dyn Clock>;
}
