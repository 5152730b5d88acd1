use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use diesel_derive_enum::DbEnum;
use jiff::{SignedDuration, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::AppResult;
use crate::jobs::error::JobResult;
use crate::tenants::Tenant;

/// Store-assigned, monotonically increasing record id
pub type JobId = i64;

/// Lifecycle of one job instance
///
/// `Scheduled -> Due -> Claimed -> Executing -> {Succeeded, Failed}`.
/// `Claimed` and `Executing` fall back to `Due` when their claim expires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, DbEnum)]
#[db_enum(existing_type_path = "crate::schema::sql_types::JobState")]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Scheduled,
    Due,
    Claimed,
    Executing,
    Succeeded,
    Failed,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Failed)
    }

    /// Held by a worker under a visibility timeout
    pub fn is_claimed(&self) -> bool {
        matches!(self, JobState::Claimed | JobState::Executing)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Scheduled => "scheduled",
            JobState::Due => "due",
            JobState::Claimed => "claimed",
            JobState::Executing => "executing",
            JobState::Succeeded => "succeeded",
            JobState::Failed => "failed",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one handler run, recorded by `JobStore::complete`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Succeeded,
    Failed { error: String },
}

impl JobOutcome {
    pub fn failed(error: impl fmt::Display) -> Self {
        JobOutcome::Failed {
            error: error.to_string(),
        }
    }

    pub fn state(&self) -> JobState {
        match self {
            JobOutcome::Succeeded => JobState::Succeeded,
            JobOutcome::Failed { .. } => JobState::Failed,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            JobOutcome::Succeeded => None,
            JobOutcome::Failed { error } => Some(error),
        }
    }
}

/// Arguments every scheduled job carries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobPayload {
    pub tenant: String,
    pub storage_locator: String,
    #[serde(default)]
    pub args: JsonValue,
}

impl JobPayload {
    pub fn for_tenant(tenant: &Tenant) -> Self {
        Self {
            tenant: tenant.name.clone(),
            storage_locator: tenant.storage_locator.as_str().to_string(),
            args: JsonValue::Null,
        }
    }

    pub fn from_value(value: &JsonValue) -> JobResult<Self> {
        Ok(serde_json::from_value(value.clone())?)
    }

    pub fn to_value(&self) -> JobResult<JsonValue> {
        Ok(serde_json::to_value(self)?)
    }
}

/// A persisted job instance
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobRecord {
    pub id: JobId,
    pub queue: String,
    pub handler_id: String,
    pub payload: JsonValue,
    pub state: JobState,
    pub due_at: Timestamp,
    pub claim_owner: Option<Uuid>,
    pub claim_expires_at: Option<Timestamp>,
    pub created_at: Timestamp,
    /// Position in the recurring chain; the seed is 0
    pub generation: i64,
    pub finished_at: Option<Timestamp>,
    pub last_error: Option<String>,
}

impl JobRecord {
    /// A stored `Scheduled` record whose due time has passed reads as `Due`
    pub fn effective_state(&self, now: Timestamp) -> JobState {
        match self.state {
            JobState::Scheduled if self.due_at <= now => JobState::Due,
            state => state,
        }
    }

    pub fn is_claimable(&self, now: Timestamp) -> bool {
        matches!(self.state, JobState::Scheduled | JobState::Due) && self.due_at <= now
    }

    pub fn claim_expired(&self, now: Timestamp) -> bool {
        self.state.is_claimed() && self.claim_expires_at.is_some_and(|at| at <= now)
    }

    pub fn decode_payload(&self) -> JobResult<JobPayload> {
        JobPayload::from_value(&self.payload)
    }
}

/// A job about to be enqueued
#[derive(Debug, Clone, PartialEq)]
pub struct NewJob {
    pub queue: String,
    pub handler_id: String,
    pub payload: JsonValue,
    pub due_at: Timestamp,
    pub generation: i64,
}

impl NewJob {
    /// First job of a tenant chain
    pub fn seed(tenant: &Tenant, due_at: Timestamp) -> JobResult<Self> {
        Ok(Self {
            queue: tenant.queue.clone(),
            handler_id: tenant.handler_id.clone(),
            payload: JobPayload::for_tenant(tenant).to_value()?,
            due_at,
            generation: 0,
        })
    }

    /// Next link of the chain `previous` belongs to
    pub fn successor_of(previous: &JobRecord, due_at: Timestamp) -> Self {
        Self {
            queue: previous.queue.clone(),
            handler_id: previous.handler_id.clone(),
            payload: previous.payload.clone(),
            due_at,
            generation: previous.generation + 1,
        }
    }

    /// State a record starts in when inserted at `now`
    pub fn initial_state(&self, now: Timestamp) -> JobState {
        if self.due_at <= now {
            JobState::Due
        } else {
            JobState::Scheduled
        }
    }
}

// ============================================================================
// Time
// ============================================================================

/// Source of "now" for stores and the reschedule protocol
pub trait Clock: Send + Sync + fmt::Debug {
    fn now(&self) -> Timestamp;
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Timestamp::now()
    }
}

/// Clock driven by the tokio timer, so paused-time tests advance it
#[derive(Debug, Clone, Copy)]
pub struct TokioClock {
    origin: Timestamp,
    started: tokio::time::Instant,
}

impl TokioClock {
    pub fn new(origin: Timestamp) -> Self {
        Self {
            origin,
            started: tokio::time::Instant::now(),
        }
    }
}

impl Clock for TokioClock {
    fn now(&self) -> Timestamp {
        timestamp_after(self.origin, self.started.elapsed())
    }
}

/// `base + delta`, saturating at the representable maximum
pub fn timestamp_after(base: Timestamp, delta: Duration) -> Timestamp {
    SignedDuration::try_from(delta)
        .ok()
        .and_then(|d| base.checked_add(d).ok())
        .unwrap_or(Timestamp::MAX)
}

/// `base - delta`, saturating at the representable minimum
pub fn timestamp_before(base: Timestamp, delta: Duration) -> Timestamp {
    SignedDuration::try_from(delta)
        .ok()
        .and_then(|d| base.checked_sub(d).ok())
        .unwrap_or(Timestamp::MIN)
}

// ============================================================================
// Handlers
// ============================================================================

/// Execution context passed to handlers
#[derive(Debug, Clone)]
pub struct JobContext {
    pub job_id: JobId,
    pub tenant: String,
    pub queue: String,
    pub generation: i64,
    /// Cancelled on service shutdown; long handlers may observe it
    pub cancellation_token: CancellationToken,
}

/// Work performed for a claimed job
#[async_trait]
pub trait JobHandler: Send + Sync {
    fn handler_id(&self) -> &str;

    async fn execute(&self, ctx: JobContext, payload: &JobPayload) -> AppResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(state: JobState, due_at: Timestamp) -> JobRecord {
        JobRecord {
            id: 1,
            queue: "queue-a".to_string(),
            handler_id: "message_log".to_string(),
            payload: JsonValue::Null,
            state,
            due_at,
            claim_owner: None,
            claim_expires_at: None,
            created_at: due_at,
            generation: 0,
            finished_at: None,
            last_error: None,
        }
    }

    #[test]
    fn test_scheduled_reads_as_due_once_due_at_passes() {
        let now = Timestamp::from_second(1_000).unwrap();
        let later = Timestamp::from_second(1_010).unwrap();

        let job = record(JobState::Scheduled, later);
        assert_eq!(job.effective_state(now), JobState::Scheduled);
        assert_eq!(job.effective_state(later), JobState::Due);
        assert!(!job.is_claimable(now));
        assert!(job.is_claimable(later));
    }

    #[test]
    fn test_terminal_records_are_never_claimable() {
        let now = Timestamp::from_second(1_000).unwrap();
        for state in [JobState::Succeeded, JobState::Failed, JobState::Claimed] {
            let job = record(state, now);
            assert_eq!(job.effective_state(now), state);
            assert!(!job.is_claimable(now));
        }
    }

    #[test]
    fn test_claim_expiry_requires_claimed_state() {
        let now = Timestamp::from_second(1_000).unwrap();
        let mut job = record(JobState::Executing, now);
        job.claim_expires_at = Some(now);
        assert!(job.claim_expired(now));

        job.state = JobState::Succeeded;
        assert!(!job.claim_expired(now));
    }

    #[test]
    fn test_successor_increments_generation() {
        let now = Timestamp::from_second(1_000).unwrap();
        let mut job = record(JobState::Succeeded, now);
        job.generation = 4;
        job.payload = serde_json::json!({"tenant": "a", "storage_locator": "Database=a"});

        let next = NewJob::successor_of(&job, timestamp_after(now, Duration::from_secs(10)));
        assert_eq!(next.generation, 5);
        assert_eq!(next.payload, job.payload);
        assert_eq!(next.initial_state(now), JobState::Scheduled);
        assert_eq!(next.due_at, Timestamp::from_second(1_010).unwrap());
    }

    #[test]
    fn test_timestamp_helpers_saturate() {
        assert_eq!(
            timestamp_after(Timestamp::MAX, Duration::from_secs(1)),
            Timestamp::MAX
        );
        assert_eq!(
            timestamp_before(Timestamp::MIN, Duration::from_secs(1)),
            Timestamp::MIN
        );
    }

    #[test]
    fn test_payload_args_default_to_null() {
        let value = serde_json::json!({"tenant": "a", "storage_locator": "Database=a"});
        let payload = JobPayload::from_value(&value).unwrap();
        assert_eq!(payload.args, JsonValue::Null);
        assert!(JobPayload::from_value(&serde_json::json!({"tenant": 1})).is_err());
    }

    #[test]
    fn test_outcome_maps_to_terminal_state() {
        assert_eq!(JobOutcome::Succeeded.state(), JobState::Succeeded);
        let failed = JobOutcome::failed("boom");
        assert_eq!(failed.state(), JobState::Failed);
        assert_eq!(failed.error(), Some("boom"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_tokio_clock_follows_paused_time() {
        let origin = Timestamp::from_second(1_000).unwrap();
        let clock = TokioClock::new(origin);
        assert_eq!(clock.now(), origin);

        tokio::time::advance(Duration::from_secs(65)).await;
        assert_eq!(clock.now(), Timestamp::from_second(1_065).unwrap());
    }
}
