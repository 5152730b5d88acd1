//! PostgreSQL job store
//!
//! Claims select the candidate row with `FOR UPDATE SKIP LOCKED` inside a
//! transaction, so concurrent workers on the same database never block on or
//! double-claim the same record.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::{AsyncConnection, RunQueryDsl};
use jiff_diesel::Timestamp;
use uuid::Uuid;

use crate::db::AsyncDbPool;
use crate::jobs::error::{JobError, JobResult};
use crate::jobs::models::{JobRow, NewJobRow};
use crate::jobs::store::{CLAIMABLE_STATES, CLAIMED_STATES, JobStore, TERMINAL_STATES};
use crate::jobs::types::{
    Clock, JobId, JobOutcome, JobRecord, JobState, NewJob, timestamp_after, timestamp_before,
};
use crate::schema::jobs;

type PooledConnection<'a> =
    diesel_async::pooled_connection::bb8::PooledConnection<'a, diesel_async::AsyncPgConnection>;

/// Job store over one tenant database.
///
/// Since `AsyncDbPool` (bb8::Pool) internally uses `Arc`, cloning is cheap.
#[derive(Clone)]
pub struct PgJobStore {
    pool: AsyncDbPool,
    clock: Arc<dyn Clock>,
}

impl PgJobStore {
    pub fn new(pool: AsyncDbPool, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }

    async fn connection(&self, operation: &'static str) -> JobResult<PooledConnection<'_>> {
        self.pool
            .get()
            .await
            .map_err(|e| JobError::store(operation, e))
    }
}

/// Serialization failures mean another worker won the row
fn claim_error(queue: &str, error: DieselError) -> JobError {
    match error {
        DieselError::DatabaseError(DatabaseErrorKind::SerializationFailure, _) => {
            JobError::ClaimConflict {
                queue: queue.to_string(),
            }
        }
        other => JobError::store("claim_next", other),
    }
}

fn count(total: i64) -> usize {
    usize::try_from(total).unwrap_or_default()
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn create(&self, job: NewJob) -> JobResult<JobId> {
        let row = NewJobRow::from_new_job(job, self.clock.now());
        let mut conn = self.connection("create").await?;

        diesel::insert_into(jobs::table)
            .values(&row)
            .returning(jobs::id)
            .get_result(&mut conn)
            .await
            .map_err(|e| JobError::store("create", e))
    }

    async fn claim_next(
        &self,
        queue: &str,
        owner: Uuid,
        visibility_timeout: Duration,
    ) -> JobResult<Option<JobRecord>> {
        let now = self.clock.now();
        let expires_at = Timestamp::from(timestamp_after(now, visibility_timeout));
        let now = Timestamp::from(now);
        let queue_name = queue.to_string();

        let mut conn = self.connection("claim_next").await?;
        let claimed = conn
            .transaction::<Option<JobRow>, DieselError, _>(|conn| {
                async move {
                    let candidate: Option<i64> = jobs::table
                        .filter(jobs::queue.eq(&queue_name))
                        .filter(jobs::state.eq_any(CLAIMABLE_STATES))
                        .filter(jobs::due_at.le(now))
                        .order((jobs::due_at.asc(), jobs::id.asc()))
                        .select(jobs::id)
                        .for_update()
                        .skip_locked()
                        .first(conn)
                        .await
                        .optional()?;

                    let Some(id) = candidate else {
                        return Ok(None);
                    };

                    diesel::update(jobs::table.find(id))
                        .set((
                            jobs::state.eq(JobState::Claimed),
                            jobs::claim_owner.eq(Some(owner)),
                            jobs::claim_expires_at.eq(Some(expires_at)),
                        ))
                        .returning(JobRow::as_returning())
                        .get_result(conn)
                        .await
                        .map(Some)
                }
                .scope_boxed()
            })
            .await;

        match claimed {
            Ok(row) => Ok(row.map(JobRecord::from)),
            Err(e) => match claim_error(queue, e) {
                JobError::ClaimConflict { queue } => {
                    tracing::debug!(queue = %queue, "Lost claim race");
                    Ok(None)
                }
                other => Err(other),
            },
        }
    }

    async fn begin_execution(&self, id: JobId, owner: Uuid) -> JobResult<bool> {
        let mut conn = self.connection("begin_execution").await?;

        let updated = diesel::update(
            jobs::table
                .find(id)
                .filter(jobs::state.eq(JobState::Claimed))
                .filter(jobs::claim_owner.eq(owner)),
        )
        .set(jobs::state.eq(JobState::Executing))
        .execute(&mut conn)
        .await
        .map_err(|e| JobError::store("begin_execution", e))?;

        Ok(updated == 1)
    }

    async fn complete(&self, id: JobId, owner: Uuid, outcome: &JobOutcome) -> JobResult<bool> {
        let now = Timestamp::from(self.clock.now());
        let mut conn = self.connection("complete").await?;

        let updated = diesel::update(
            jobs::table
                .find(id)
                .filter(jobs::state.eq_any(CLAIMED_STATES))
                .filter(jobs::claim_owner.eq(owner)),
        )
        .set((
            jobs::state.eq(outcome.state()),
            jobs::finished_at.eq(Some(now)),
            jobs::last_error.eq(outcome.error()),
            jobs::claim_owner.eq(None::<Uuid>),
            jobs::claim_expires_at.eq(None::<Timestamp>),
        ))
        .execute(&mut conn)
        .await
        .map_err(|e| JobError::store("complete", e))?;

        Ok(updated == 1)
    }

    async fn complete_and_reschedule(
        &self,
        id: JobId,
        owner: Uuid,
        outcome: &JobOutcome,
        successor: NewJob,
    ) -> JobResult<Option<JobId>> {
        let now = self.clock.now();
        let next = NewJobRow::from_new_job(successor, now);
        let now = Timestamp::from(now);
        let state = outcome.state();
        let last_error = outcome.error().map(str::to_string);

        let mut conn = self.connection("complete_and_reschedule").await?;
        conn.transaction::<Option<JobId>, DieselError, _>(|conn| {
            async move {
                let updated = diesel::update(
                    jobs::table
                        .find(id)
                        .filter(jobs::state.eq_any(CLAIMED_STATES))
                        .filter(jobs::claim_owner.eq(owner)),
                )
                .set((
                    jobs::state.eq(state),
                    jobs::finished_at.eq(Some(now)),
                    jobs::last_error.eq(last_error),
                    jobs::claim_owner.eq(None::<Uuid>),
                    jobs::claim_expires_at.eq(None::<Timestamp>),
                ))
                .execute(conn)
                .await?;

                if updated != 1 {
                    return Ok(None);
                }

                diesel::insert_into(jobs::table)
                    .values(&next)
                    .returning(jobs::id)
                    .get_result(conn)
                    .await
                    .map(Some)
            }
            .scope_boxed()
        })
        .await
        .map_err(|e| JobError::store("complete_and_reschedule", e))
    }

    async fn release_expired_claims(&self, queue: &str) -> JobResult<usize> {
        let now = Timestamp::from(self.clock.now());
        let mut conn = self.connection("release_expired_claims").await?;

        diesel::update(
            jobs::table
                .filter(jobs::queue.eq(queue))
                .filter(jobs::state.eq_any(CLAIMED_STATES))
                .filter(jobs::claim_expires_at.le(now)),
        )
        .set((
            jobs::state.eq(JobState::Due),
            jobs::claim_owner.eq(None::<Uuid>),
            jobs::claim_expires_at.eq(None::<Timestamp>),
        ))
        .execute(&mut conn)
        .await
        .map_err(|e| JobError::store("release_expired_claims", e))
    }

    async fn count_live(&self, queue: &str) -> JobResult<usize> {
        let mut conn = self.connection("count_live").await?;

        let total: i64 = jobs::table
            .filter(jobs::queue.eq(queue))
            .filter(jobs::state.ne_all(TERMINAL_STATES))
            .count()
            .get_result(&mut conn)
            .await
            .map_err(|e| JobError::store("count_live", e))?;

        Ok(count(total))
    }

    async fn purge_finished(&self, queue: &str, older_than: Duration) -> JobResult<usize> {
        let cutoff = Timestamp::from(timestamp_before(self.clock.now(), older_than));
        let mut conn = self.connection("purge_finished").await?;

        diesel::delete(
            jobs::table
                .filter(jobs::queue.eq(queue))
                .filter(jobs::state.eq_any(TERMINAL_STATES))
                .filter(jobs::finished_at.lt(cutoff)),
        )
        .execute(&mut conn)
        .await
        .map_err(|e| JobError::store("purge_finished", e))
    }

    async fn get(&self, id: JobId) -> JobResult<Option<JobRecord>> {
        let mut conn = self.connection("get").await?;

        jobs::table
            .find(id)
            .select(JobRow::as_select())
            .first(&mut conn)
            .await
            .optional()
            .map(|row| row.map(JobRecord::from))
            .map_err(|e| JobError::store("get", e))
    }

    async fn list(&self, queue: &str) -> JobResult<Vec<JobRecord>> {
        let mut conn = self.connection("list").await?;

        let rows: Vec<JobRow> = jobs::table
            .filter(jobs::queue.eq(queue))
            .order(jobs::id.asc())
            .select(JobRow::as_select())
            .load(&mut conn)
            .await
            .map_err(|e| JobError::store("list", e))?;

        Ok(rows.into_iter().map(JobRecord::from).collect())
    }

    fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }
}
