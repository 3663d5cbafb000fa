//! Job trait and definitions.

use crate::error::{JobError, JobResult};
use crate::retry::RetryPolicy;
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Unique job identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Creates a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Creates a job ID from a string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Returns the job ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Job status enumeration.
///
/// Records move `queued -> started -> (finished | failed | retrying)`, and
/// `retrying -> queued` when the backoff delay has passed. `finished` and
/// `failed` are terminal. `not_found` is never stored; it is what a status
/// query reports for unknown or expired ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting in the ready list.
    Queued,
    /// Reserved by a worker and executing.
    Started,
    /// Completed successfully.
    Finished,
    /// Failed permanently.
    Failed,
    /// Waiting out a backoff delay before the next attempt.
    Retrying,
    /// Unknown or expired id.
    NotFound,
}

impl JobStatus {
    /// Returns true for `finished` and `failed`.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Finished | JobStatus::Failed)
    }

    /// Returns true if a record may move from `self` to `next`.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Queued, Started)
                | (Started, Finished)
                | (Started, Failed)
                | (Started, Retrying)
                | (Retrying, Queued)
                // redelivery of a job whose worker vanished
                | (Started, Started)
        )
    }
}

impl Default for JobStatus {
    fn default() -> Self {
        JobStatus::Queued
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Queued => write!(f, "queued"),
            JobStatus::Started => write!(f, "started"),
            JobStatus::Finished => write!(f, "finished"),
            JobStatus::Failed => write!(f, "failed"),
            JobStatus::Retrying => write!(f, "retrying"),
            JobStatus::NotFound => write!(f, "not_found"),
        }
    }
}

/// Trait for typed job payloads.
///
/// The payload is serialized into the job record; nothing about the
/// producing process survives the trip through the broker.
pub trait Job: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Unique name for this job kind. Workers dispatch on it.
    const NAME: &'static str;

    /// Human-readable description stored with the record.
    fn description(&self) -> Option<String> {
        None
    }
}

/// Persisted unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    /// Job ID.
    pub id: JobId,

    /// Job kind name.
    pub name: String,

    /// Queue the job belongs to.
    pub queue: String,

    /// Serialized payload.
    pub payload: serde_json::Value,

    /// Retry policy.
    pub retry_policy: RetryPolicy,

    /// Current status.
    pub status: JobStatus,

    /// Executions started so far.
    pub attempts: u32,

    /// Return value, set when finished.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,

    /// Failure description of the last failed attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Free-form description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// How long the terminal record stays queryable, in seconds.
    pub result_ttl_secs: u64,

    /// Execution window override, in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,

    /// When the job was enqueued.
    pub enqueued_at: DateTime<Utc>,

    /// When the latest attempt started.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    /// When the job reached a terminal status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    /// Creates a queued record for a typed job.
    pub fn new<J: Job>(
        job: &J,
        queue: impl Into<String>,
        retry_policy: RetryPolicy,
        result_ttl: Duration,
    ) -> JobResult<Self> {
        Ok(Self {
            id: JobId::new(),
            name: J::NAME.to_string(),
            queue: queue.into(),
            payload: serde_json::to_value(job)?,
            retry_policy,
            status: JobStatus::Queued,
            attempts: 0,
            result: None,
            error: None,
            description: job.description(),
            result_ttl_secs: result_ttl.as_secs(),
            timeout_secs: None,
            enqueued_at: Utc::now(),
            started_at: None,
            ended_at: None,
        })
    }

    /// Decodes the payload.
    pub fn decode<J: Job>(&self) -> JobResult<J> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }

    /// Result TTL as a Duration.
    pub fn result_ttl(&self) -> Duration {
        Duration::from_secs(self.result_ttl_secs)
    }

    /// Returns true if no further attempt may run.
    pub fn is_exhausted(&self) -> bool {
        !self.retry_policy.allows_attempt(self.attempts + 1)
    }

    /// Delay before the next attempt.
    pub fn next_delay(&self) -> Duration {
        self.retry_policy.delay_before_attempt(self.attempts + 1)
    }

    fn transition(&mut self, next: JobStatus) -> JobResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(JobError::InvalidTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        Ok(())
    }

    /// Starts the next attempt.
    pub fn mark_started(&mut self) -> JobResult<()> {
        self.transition(JobStatus::Started)?;
        self.attempts += 1;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    /// Records a successful outcome.
    pub fn mark_finished(&mut self, result: serde_json::Value) -> JobResult<()> {
        self.transition(JobStatus::Finished)?;
        self.result = Some(result);
        self.error = None;
        self.ended_at = Some(Utc::now());
        Ok(())
    }

    /// Records a failed attempt that will be retried.
    pub fn mark_retrying(&mut self, error: &JobError) -> JobResult<()> {
        self.transition(JobStatus::Retrying)?;
        self.error = Some(error.to_string());
        Ok(())
    }

    /// Returns a retrying record to the ready state.
    pub fn mark_requeued(&mut self) -> JobResult<()> {
        self.transition(JobStatus::Queued)
    }

    /// Records a permanent failure.
    pub fn mark_failed(&mut self, error: &JobError) -> JobResult<()> {
        self.transition(JobStatus::Failed)?;
        self.result = None;
        self.error = Some(error.to_string());
        self.ended_at = Some(Utc::now());
        Ok(())
    }

    /// Creates the execution context for the current attempt.
    pub fn to_context(&self, worker_id: &str) -> JobContext {
        JobContext {
            job_id: self.id.clone(),
            attempt: self.attempts,
            max_attempts: self.retry_policy.max_attempts,
            queue: self.queue.clone(),
            enqueued_at: self.enqueued_at,
            started_at: self.started_at.unwrap_or_else(Utc::now),
            worker_id: worker_id.to_string(),
        }
    }

    /// Public view of this record.
    pub fn to_view(&self) -> JobStatusView {
        JobStatusView {
            id: self.id.clone(),
            status: self.status,
            result: self.result.clone(),
            error: self.error.clone().filter(|_| self.status == JobStatus::Failed),
            description: self.description.clone(),
            attempts: Some(self.attempts),
            enqueued_at: Some(self.enqueued_at),
            ended_at: self.ended_at,
        }
    }
}

/// Job execution context.
#[derive(Debug, Clone)]
pub struct JobContext {
    /// Job ID.
    pub job_id: JobId,

    /// Current attempt number (1-based).
    pub attempt: u32,

    /// Maximum attempts allowed.
    pub max_attempts: u32,

    /// Queue name.
    pub queue: String,

    /// When the job was enqueued.
    pub enqueued_at: DateTime<Utc>,

    /// When this attempt started.
    pub started_at: DateTime<Utc>,

    /// Worker processing this job.
    pub worker_id: String,
}

/// Status query answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatusView {
    /// Job ID as queried.
    pub id: JobId,

    /// Current status, `not_found` for unknown or expired ids.
    pub status: JobStatus,

    /// Return value, present when finished.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,

    /// Failure description, present when failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Description given at enqueue time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Executions started so far.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempts: Option<u32>,

    /// Enqueue timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enqueued_at: Option<DateTime<Utc>>,

    /// Completion timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
}

impl JobStatusView {
    /// View for an id the queue does not know.
    pub fn not_found(id: JobId) -> Self {
        Self {
            id,
            status: JobStatus::NotFound,
            result: None,
            error: None,
            description: None,
            attempts: None,
            enqueued_at: None,
            ended_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct TestJob {
        message: String,
    }

    impl Job for TestJob {
        const NAME: &'static str = "test_job";

        fn description(&self) -> Option<String> {
            Some(format!("Test: {}", self.message))
        }
    }

    fn record() -> JobRecord {
        let job = TestJob {
            message: "Hello".to_string(),
        };
        JobRecord::new(&job, "test", RetryPolicy::default(), Duration::from_secs(60)).unwrap()
    }

    #[test]
    fn test_job_id_generation() {
        let id1 = JobId::new();
        let id2 = JobId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_new_record_is_queued() {
        let record = record();
        assert_eq!(record.name, "test_job");
        assert_eq!(record.queue, "test");
        assert_eq!(record.status, JobStatus::Queued);
        assert_eq!(record.attempts, 0);
        assert_eq!(record.description.as_deref(), Some("Test: Hello"));
        assert_eq!(
            record.decode::<TestJob>().unwrap(),
            TestJob {
                message: "Hello".to_string()
            }
        );
    }

    #[test]
    fn test_retry_cycle() {
        let mut record = record();
        record.mark_started().unwrap();
        assert_eq!(record.attempts, 1);
        assert_eq!(record.next_delay(), Duration::from_secs(10));

        record.mark_retrying(&JobError::execution("boom")).unwrap();
        record.mark_requeued().unwrap();
        record.mark_started().unwrap();
        record.mark_finished(serde_json::json!("ok")).unwrap();

        assert_eq!(record.attempts, 2);
        assert!(record.status.is_terminal());
        let view = record.to_view();
        assert_eq!(view.result, Some(serde_json::json!("ok")));
        assert_eq!(view.error, None);
    }

    #[test]
    fn test_terminal_states_reject_transitions() {
        let mut record = record();
        record.mark_started().unwrap();
        record.mark_failed(&JobError::Timeout(120)).unwrap();

        assert!(record.mark_started().is_err());
        assert!(record.mark_finished(serde_json::Value::Null).is_err());
        assert_eq!(record.to_view().error.as_deref(), Some("Job timed out after 120 seconds"));
    }

    #[test]
    fn test_queued_cannot_finish_without_starting() {
        let mut record = record();
        let err = record.mark_finished(serde_json::Value::Null).unwrap_err();
        assert!(matches!(err, JobError::InvalidTransition { .. }));
    }

    #[test]
    fn test_exhaustion() {
        let mut record = record();
        for _ in 0..3 {
            record.mark_started().unwrap();
            assert!(!record.is_exhausted());
            record.mark_retrying(&JobError::execution("boom")).unwrap();
            record.mark_requeued().unwrap();
        }
        record.mark_started().unwrap();
        assert!(record.is_exhausted());
    }

    #[test]
    fn test_context() {
        let mut record = record();
        record.mark_started().unwrap();
        let ctx = record.to_context("worker-1");

        assert_eq!(ctx.attempt, 1);
        assert_eq!(ctx.max_attempts, 4);
    }

    #[test]
    fn test_not_found_view_serialization() {
        let view = JobStatusView::not_found(JobId::from("missing"));
        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json, serde_json::json!({"id": "missing", "status": "not_found"}));
    }
}
