use diesel::prelude::*;
use jiff_diesel::Timestamp;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::jobs::types::{JobRecord, JobState, NewJob};
use crate::schema::jobs;

// ============================================================================
// Job rows
// ============================================================================

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = jobs)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct JobRow {
    pub id: i64,
    pub queue: String,
    pub handler_id: String,
    pub payload: JsonValue,
    pub state: JobState,
    pub due_at: Timestamp,
    pub claim_owner: Option<Uuid>,
    pub claim_expires_at: Option<Timestamp>,
    pub created_at: Timestamp,
    pub generation: i64,
    pub finished_at: Option<Timestamp>,
    pub last_error: Option<String>,
}

impl From<JobRow> for JobRecord {
    fn from(row: JobRow) -> Self {
        Self {
            id: row.id,
            queue: row.queue,
            handler_id: row.handler_id,
            payload: row.payload,
            state: row.state,
            due_at: row.due_at.into(),
            claim_owner: row.claim_owner,
            claim_expires_at: row.claim_expires_at.map(Into::into),
            created_at: row.created_at.into(),
            generation: row.generation,
            finished_at: row.finished_at.map(Into::into),
            last_error: row.last_error,
        }
    }
}

#[derive(Debug, Insertable)]
#[diesel(table_name = jobs)]
pub struct NewJobRow {
    pub queue: String,
    pub handler_id: String,
    pub payload: JsonValue,
    pub state: JobState,
    pub due_at: Timestamp,
    pub created_at: Timestamp,
    pub generation: i64,
}

impl NewJobRow {
    /// Row for `job` inserted at `now`
    pub fn from_new_job(job: NewJob, now: jiff::Timestamp) -> Self {
        Self {
            state: job.initial_state(now),
            due_at: job.due_at.into(),
            created_at: now.into(),
            queue: job.queue,
            handler_id: job.handler_id,
            payload: job.payload,
            generation: job.generation,
        }
    }
}
