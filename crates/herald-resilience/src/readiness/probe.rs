//! Connectivity probes.

use async_trait::async_trait;
use thiserror::Error;

/// Outcome of a failed probe attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProbeError {
    /// The target could not be reached; another attempt may succeed.
    #[error("{0}")]
    Transient(String),

    /// The target answered with an error retrying will not fix
    /// (bad credentials, malformed target name).
    #[error("{0}")]
    Fatal(String),
}

impl ProbeError {
    /// Creates a transient probe error.
    #[must_use]
    pub fn transient<T: Into<String>>(message: T) -> Self {
        Self::Transient(message.into())
    }

    /// Creates a fatal probe error.
    #[must_use]
    pub fn fatal<T: Into<String>>(message: T) -> Self {
        Self::Fatal(message.into())
    }

    /// Returns true if the gate may try again.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// A single connectivity check against one dependency.
#[async_trait]
pub trait Probe: Send + Sync {
    /// Performs one attempt. Must not retry internally.
    async fn probe(&self) -> Result<(), ProbeError>;
}

#[async_trait]
impl<P: Probe + ?Sized> Probe for std::sync::Arc<P> {
    async fn probe(&self) -> Result<(), ProbeError> {
        (**self).probe().await
    }
}

/// Result of a single probe attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadinessCheck {
    /// Whether the target answered.
    pub reachable: bool,
    /// Error reported by the failed attempt.
    pub last_error: Option<String>,
}

impl ReadinessCheck {
    /// Runs the probe once.
    pub async fn run(probe: &dyn Probe) -> Self {
        match probe.probe().await {
            Ok(()) => Self {
                reachable: true,
                last_error: None,
            },
            Err(e) => Self {
                reachable: false,
                last_error: Some(e.to_string()),
            },
        }
    }
}
