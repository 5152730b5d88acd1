use std::time::Duration;

use thiserror::Error;

use crate::jobs::types::JobId;

#[derive(Debug, Error)]
pub enum JobError {
    /// The backing store could not be reached or rejected the statement
    #[error("Job store unavailable during {operation}: {source}")]
    StoreUnavailable {
        operation: &'static str,
        #[source]
        source: anyhow::Error,
    },

    /// Another worker took the record between selection and update
    #[error("Claim conflict on queue '{queue}'")]
    ClaimConflict { queue: String },

    #[error("No handler registered for '{handler_id}'")]
    UnresolvedHandler { handler_id: String },

    #[error("Job {job_id} handler failed")]
    HandlerExecutionFailed {
        job_id: JobId,
        #[source]
        source: anyhow::Error,
    },

    #[error("Job {job_id} exceeded its visibility timeout of {}s", timeout.as_secs())]
    VisibilityTimeoutExceeded { job_id: JobId, timeout: Duration },

    #[error("Tenant not found: {0}")]
    TenantNotFound(String),

    #[error("Invalid job payload: {0}")]
    InvalidPayload(String),

    #[error("Scheduler configuration error: {0}")]
    Configuration(String),
}

impl JobError {
    pub fn store(operation: &'static str, source: impl Into<anyhow::Error>) -> Self {
        JobError::StoreUnavailable {
            operation,
            source: source.into(),
        }
    }

    /// Store failures are transient; the dispatcher backs off and retries them
    pub fn is_store_unavailable(&self) -> bool {
        matches!(self, JobError::StoreUnavailable { .. })
    }
}

impl From<serde_json::Error> for JobError {
    fn from(e: serde_json::Error) -> Self {
        JobError::InvalidPayload(e.to_string())
    }
}

pub type JobResult<T> = Result<T, JobError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_unavailable_keeps_operation_and_source() {
        let err = JobError::store("claim_next", anyhow::anyhow!("connection refused"));
        assert!(err.is_store_unavailable());
        assert_eq!(
            err.to_string(),
            "Job store unavailable during claim_next: connection refused"
        );
    }

    #[test]
    fn test_visibility_timeout_message() {
        let err = JobError::VisibilityTimeoutExceeded {
            job_id: 42,
            timeout: Duration::from_secs(300),
        };
        assert_eq!(
            err.to_string(),
            "Job 42 exceeded its visibility timeout of 300s"
        );
        assert!(!err.is_store_unavailable());
    }

    #[test]
    fn test_payload_errors_convert() {
        let err: JobError = serde_json::from_str::<serde_json::Value>("{")
            .unwrap_err()
            .into();
        assert!(matches!(err, JobError::InvalidPayload(_)));
    }
}
