//! Retry policies for failed jobs.

use herald_config::QueueConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Retry policy attached to every job record.
///
/// `max_attempts` counts executions, the first one included. Attempt `k`
/// (`k > 1`) waits `backoff_schedule[min(k - 2, len - 1)]` after the previous
/// failure, so the last delay repeats when attempts outnumber delays.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total executions allowed.
    pub max_attempts: u32,

    /// Waits between attempts.
    #[serde(with = "duration_secs")]
    pub backoff_schedule: Vec<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(
            4,
            vec![
                Duration::from_secs(10),
                Duration::from_secs(30),
                Duration::from_secs(60),
            ],
        )
    }
}

impl RetryPolicy {
    /// Creates a policy. `max_attempts` is clamped to at least one.
    pub fn new(max_attempts: u32, backoff_schedule: Vec<Duration>) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff_schedule,
        }
    }

    /// Creates a policy with a single attempt.
    pub fn no_retry() -> Self {
        Self::new(1, Vec::new())
    }

    /// Number of retries this policy allows.
    pub fn max_retries(&self) -> u32 {
        self.max_attempts - 1
    }

    /// Returns true if attempt `attempt` (1-based) may run.
    pub fn allows_attempt(&self, attempt: u32) -> bool {
        attempt <= self.max_attempts
    }

    /// Wait applied before attempt `attempt` (1-based).
    pub fn delay_before_attempt(&self, attempt: u32) -> Duration {
        if attempt < 2 || self.backoff_schedule.is_empty() {
            return Duration::ZERO;
        }
        let index = ((attempt - 2) as usize).min(self.backoff_schedule.len() - 1);
        self.backoff_schedule[index]
    }
}

impl From<&QueueConfig> for RetryPolicy {
    fn from(config: &QueueConfig) -> Self {
        Self::new(config.max_attempts, config.backoff_schedule())
    }
}

/// Stores the schedule as fractional seconds.
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(delays: &[Duration], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(delays.iter().map(Duration::as_secs_f64))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<Duration>, D::Error> {
        let secs = Vec::<f64>::deserialize(deserializer)?;
        Ok(secs
            .into_iter()
            .map(|s| Duration::from_secs_f64(s.max(0.0)))
            .collect())
    }
}
