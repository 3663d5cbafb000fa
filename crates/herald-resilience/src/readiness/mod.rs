//! Readiness gate implementation.

mod probe;

pub use probe::*;

use herald_core::{Dependency, HeraldError};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Why a dependency never became ready.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReadinessError {
    /// Every attempt failed transiently.
    #[error("{target} not reachable after {attempts} attempts: {last_error}")]
    Exhausted {
        target: String,
        attempts: u32,
        last_error: String,
    },

    /// An attempt failed with an error that retrying cannot fix.
    #[error("{target} rejected attempt {attempt}: {error}")]
    Fatal {
        target: String,
        attempt: u32,
        error: String,
    },
}

impl ReadinessError {
    /// Number of attempts made before giving up.
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        match self {
            Self::Exhausted { attempts, .. } => *attempts,
            Self::Fatal { attempt, .. } => *attempt,
        }
    }

    /// Converts into the bootstrap error for the given dependency.
    #[must_use]
    pub fn into_herald_error(self, dependency: Dependency) -> HeraldError {
        HeraldError::unavailable(dependency, self.to_string())
    }
}

/// Successful readiness outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadinessReport {
    /// Probed target.
    pub target: String,
    /// Attempt that succeeded (1-based).
    pub attempts: u32,
    /// Time spent waiting, sleeps included.
    pub elapsed: Duration,
}

/// Retrying connectivity gate.
///
/// Attempt `i` (1-based) that fails is followed by a sleep of
/// `base_delay * 2^(i-1)`. No sleep follows the final attempt.
#[derive(Debug, Clone)]
pub struct ReadinessGate {
    retries: u32,
    base_delay: Duration,
}

impl Default for ReadinessGate {
    fn default() -> Self {
        Self::new(5, Duration::from_secs(1))
    }
}

impl ReadinessGate {
    /// Creates a gate making up to `retries` attempts (at least one).
    #[must_use]
    pub fn new(retries: u32, base_delay: Duration) -> Self {
        Self {
            retries: retries.max(1),
            base_delay,
        }
    }

    /// Returns the attempt budget.
    #[must_use]
    pub const fn retries(&self) -> u32 {
        self.retries
    }

    /// Calculates the sleep after failed attempt `attempt` (1-based).
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let factor = 2u32.saturating_pow(attempt - 1);
        self.base_delay.saturating_mul(factor)
    }

    /// Probes `target` until it answers, the budget is spent, or a fatal
    /// error comes back.
    pub async fn wait_until_ready(
        &self,
        target: &str,
        probe: &dyn Probe,
    ) -> Result<ReadinessReport, ReadinessError> {
        let started = Instant::now();
        let mut last_error = String::new();

        for attempt in 1..=self.retries {
            match probe.probe().await {
                Ok(()) => {
                    info!(target_name = %target, attempt, "Dependency is ready");
                    return Ok(ReadinessReport {
                        target: target.to_string(),
                        attempts: attempt,
                        elapsed: started.elapsed(),
                    });
                }
                Err(ProbeError::Fatal(error)) => {
                    warn!(target_name = %target, attempt, error = %error, "Dependency rejected probe");
                    return Err(ReadinessError::Fatal {
                        target: target.to_string(),
                        attempt,
                        error,
                    });
                }
                Err(ProbeError::Transient(error)) => {
                    last_error = error;
                    if attempt == self.retries {
                        break;
                    }
                    let delay = self.delay_for_attempt(attempt);
                    warn!(
                        target_name = %target,
                        attempt,
                        retries = self.retries,
                        error = %last_error,
                        "Dependency not reachable, retrying in {:?}",
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }

        debug!(target_name = %target, "Readiness budget exhausted");
        Err(ReadinessError::Exhausted {
            target: target.to_string(),
            attempts: self.retries,
            last_error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Probe recording attempt instants.
    struct Recorder {
        succeed_on: Option<u32>,
        fatal_on: Option<u32>,
        calls: Mutex<Vec<Instant>>,
    }

    impl Recorder {
        fn failing() -> Self {
            Self {
                succeed_on: None,
                fatal_on: None,
                calls: Mutex::new(Vec::new()),
            }
        }

        fn succeeding_on(attempt: u32) -> Self {
            Self {
                succeed_on: Some(attempt),
                ..Self::failing()
            }
        }

        fn fatal_on(attempt: u32) -> Self {
            Self {
                fatal_on: Some(attempt),
                ..Self::failing()
            }
        }

        fn gaps(&self) -> Vec<Duration> {
            let calls = self.calls.lock().unwrap();
            calls.windows(2).map(|w| w[1] - w[0]).collect()
        }

        fn count(&self) -> u32 {
            self.calls.lock().unwrap().len() as u32
        }
    }

    #[async_trait]
    impl Probe for Recorder {
        async fn probe(&self) -> Result<(), ProbeError> {
            let attempt = {
                let mut calls = self.calls.lock().unwrap();
                calls.push(Instant::now());
                calls.len() as u32
            };
            if self.fatal_on == Some(attempt) {
                return Err(ProbeError::fatal("password authentication failed"));
            }
            match self.succeed_on {
                Some(n) if attempt >= n => Ok(()),
                _ => Err(ProbeError::transient("connection refused")),
            }
        }
    }

    #[test]
    fn test_delay_doubles_per_attempt() {
        let gate = ReadinessGate::new(5, Duration::from_millis(100));
        assert_eq!(gate.delay_for_attempt(0), Duration::ZERO);
        assert_eq!(gate.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(gate.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(gate.delay_for_attempt(3), Duration::from_millis(400));
        assert_eq!(gate.delay_for_attempt(4), Duration::from_millis(800));
    }

    #[test]
    fn test_zero_retries_still_probes_once() {
        assert_eq!(ReadinessGate::new(0, Duration::from_secs(1)).retries(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_target_exhausts_budget() {
        let gate = ReadinessGate::new(4, Duration::from_secs(1));
        let probe = Recorder::failing();

        let err = gate.wait_until_ready("postgres", &probe).await.unwrap_err();

        assert_eq!(probe.count(), 4);
        assert_eq!(err.attempts(), 4);
        assert!(matches!(err, ReadinessError::Exhausted { ref last_error, .. } if last_error == "connection refused"));
        assert_eq!(
            probe.gaps(),
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4)
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_target_ready_on_third_attempt() {
        let gate = ReadinessGate::new(5, Duration::from_millis(500));
        let probe = Recorder::succeeding_on(3);

        let report = gate.wait_until_ready("redis", &probe).await.unwrap();

        assert_eq!(report.attempts, 3);
        assert_eq!(probe.count(), 3);
        assert_eq!(report.elapsed, Duration::from_millis(1500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_error_stops_immediately() {
        let gate = ReadinessGate::new(5, Duration::from_secs(1));
        let probe = Recorder::fatal_on(2);

        let err = gate.wait_until_ready("postgres", &probe).await.unwrap_err();

        assert_eq!(probe.count(), 2);
        assert!(matches!(err, ReadinessError::Fatal { attempt: 2, .. }));
    }

    #[tokio::test]
    async fn test_check_reports_last_error() {
        let check = ReadinessCheck::run(&Recorder::failing()).await;
        assert!(!check.reachable);
        assert_eq!(check.last_error.as_deref(), Some("connection refused"));

        let check = ReadinessCheck::run(&Recorder::succeeding_on(1)).await;
        assert!(check.reachable);
    }

    #[test]
    fn test_into_herald_error_keeps_dependency() {
        let err = ReadinessError::Exhausted {
            target: "redis".to_string(),
            attempts: 5,
            last_error: "refused".to_string(),
        };
        let herald = err.into_herald_error(Dependency::Broker);
        assert_eq!(herald.exit_code(), herald_core::exit_codes::BROKER_UNAVAILABLE);
    }
}
