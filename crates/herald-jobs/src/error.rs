//! Job error types.

use thiserror::Error;

/// Result type for job operations.
pub type JobResult<T> = Result<T, JobError>;

/// Job-related errors.
#[derive(Debug, Error)]
pub enum JobError {
    /// The broker could not be reached or rejected the command.
    #[error("Queue unavailable: {0}")]
    QueueUnavailable(String),

    /// Job body reported a failure.
    #[error("Job execution failed: {0}")]
    ExecutionFailed(String),

    /// Job body exceeded its execution window.
    #[error("Job timed out after {0} seconds")]
    Timeout(u64),

    /// Payload or record could not be (de)serialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// No handler is registered for the job kind.
    #[error("No handler registered for job kind '{0}'")]
    UnknownJob(String),

    /// The worker executing the final attempt disappeared.
    #[error("Worker lost during final attempt {attempt} of {max_attempts}")]
    WorkerLost { attempt: u32, max_attempts: u32 },

    /// Record was asked to make a transition its status does not allow.
    #[error("Invalid job state: cannot move from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl JobError {
    /// Creates an execution failure.
    pub fn execution<T: Into<String>>(message: T) -> Self {
        Self::ExecutionFailed(message.into())
    }

    /// Returns true if this failure consumes a retry slot rather than
    /// ending the job.
    pub fn is_retryable(&self) -> bool {
        matches!(self, JobError::ExecutionFailed(_) | JobError::QueueUnavailable(_))
    }

    /// Returns a short label used in metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            JobError::QueueUnavailable(_) => "queue_unavailable",
            JobError::ExecutionFailed(_) => "execution_failed",
            JobError::Timeout(_) => "timeout",
            JobError::Serialization(_) => "serialization",
            JobError::UnknownJob(_) => "unknown_job",
            JobError::WorkerLost { .. } => "worker_lost",
            JobError::InvalidTransition { .. } => "invalid_transition",
            JobError::Configuration(_) => "configuration",
        }
    }
}

impl From<redis::RedisError> for JobError {
    fn from(err: redis::RedisError) -> Self {
        JobError::QueueUnavailable(err.to_string())
    }
}

impl From<deadpool_redis::PoolError> for JobError {
    fn from(err: deadpool_redis::PoolError) -> Self {
        JobError::QueueUnavailable(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execution_failure_is_retryable() {
        assert!(JobError::execution("smtp refused").is_retryable());
    }

    #[test]
    fn test_timeout_is_terminal() {
        let err = JobError::Timeout(120);
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("120"));
    }

    #[test]
    fn test_unknown_job_and_bad_payload_are_terminal() {
        assert!(!JobError::UnknownJob("resize_image".into()).is_retryable());

        let bad = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        assert!(!JobError::from(bad).is_retryable());
    }

    #[test]
    fn test_worker_lost_display() {
        let err = JobError::WorkerLost {
            attempt: 4,
            max_attempts: 4,
        };
        assert_eq!(err.to_string(), "Worker lost during final attempt 4 of 4");
        assert_eq!(err.kind(), "worker_lost");
    }

    #[test]
    fn test_redis_error_maps_to_unavailable() {
        let err: JobError =
            redis::RedisError::from((redis::ErrorKind::IoError, "connection refused")).into();
        assert!(matches!(err, JobError::QueueUnavailable(_)));
    }
}
