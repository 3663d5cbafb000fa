//! Unified error types for Herald processes.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Process exit codes reported by the orchestrator and its children.
///
/// Bootstrap failures get distinct codes so operators can tell an
/// unreachable database from an unreachable broker or a bad migration.
pub mod exit_codes {
    /// Clean stop: every child exited voluntarily.
    pub const CLEAN: i32 = 0;
    /// Generic failure, or a shutdown that had to force-kill a child.
    pub const FAILURE: i32 = 1;
    /// Configuration could not be loaded or failed validation.
    pub const CONFIGURATION: i32 = 2;
    /// The relational store was unreachable after the retry budget.
    pub const DATABASE_UNAVAILABLE: i32 = 3;
    /// Schema migrations failed.
    pub const MIGRATION_FAILED: i32 = 4;
    /// The message broker was unreachable after the retry budget.
    pub const BROKER_UNAVAILABLE: i32 = 5;
    /// A supervised child exited on its own.
    pub const CHILD_EXITED: i32 = 6;
}

/// External dependency guarded by the readiness gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dependency {
    /// The relational store.
    Database,
    /// The message broker backing the job queue.
    Broker,
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Database => write!(f, "database"),
            Self::Broker => write!(f, "broker"),
        }
    }
}

/// Unified error type for Herald.
#[derive(Error, Debug)]
pub enum HeraldError {
    // ============ Bootstrap Errors ============
    /// A dependency stayed unreachable for the whole retry budget.
    #[error("{dependency} unavailable: {message}")]
    DependencyUnavailable {
        dependency: Dependency,
        message: String,
    },

    /// Schema migration failed.
    #[error("Migration failed: {0}")]
    Migration(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Database error that is not a connectivity problem.
    #[error("Database error: {0}")]
    Database(String),

    // ============ Supervision Errors ============
    /// Spawning or signalling a child process failed.
    #[error("Process error: {0}")]
    Process(String),

    /// A supervised child exited without being asked to.
    #[error("Child process '{name}' exited unexpectedly (code {code:?})")]
    ChildExited { name: String, code: Option<i32> },

    // ============ Internal Errors ============
    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl HeraldError {
    /// Returns the process exit code for this error.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::DependencyUnavailable {
                dependency: Dependency::Database,
                ..
            }
            | Self::Database(_) => exit_codes::DATABASE_UNAVAILABLE,
            Self::DependencyUnavailable {
                dependency: Dependency::Broker,
                ..
            } => exit_codes::BROKER_UNAVAILABLE,
            Self::Migration(_) => exit_codes::MIGRATION_FAILED,
            Self::Configuration(_) => exit_codes::CONFIGURATION,
            Self::ChildExited { .. } => exit_codes::CHILD_EXITED,
            Self::Process(_) | Self::Internal(_) => exit_codes::FAILURE,
        }
    }

    /// Returns a machine-readable error code.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::DependencyUnavailable { .. } => "DEPENDENCY_UNAVAILABLE",
            Self::Migration(_) => "MIGRATION_FAILURE",
            Self::Configuration(_) => "CONFIGURATION_ERROR",
            Self::Database(_) => "DATABASE_ERROR",
            Self::Process(_) => "PROCESS_ERROR",
            Self::ChildExited { .. } => "CHILD_EXITED",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Creates a dependency-unavailable error.
    #[must_use]
    pub fn unavailable<T: Into<String>>(dependency: Dependency, message: T) -> Self {
        Self::DependencyUnavailable {
            dependency,
            message: message.into(),
        }
    }

    /// Creates a configuration error.
    #[must_use]
    pub fn configuration<T: Into<String>>(message: T) -> Self {
        Self::Configuration(message.into())
    }

    /// Creates a migration error.
    #[must_use]
    pub fn migration<T: Into<String>>(message: T) -> Self {
        Self::Migration(message.into())
    }

    /// Creates an internal error.
    #[must_use]
    pub fn internal<T: Into<String>>(message: T) -> Self {
        Self::Internal(message.into())
    }

    /// Returns true if this error should abort startup.
    #[must_use]
    pub const fn is_fatal_at_bootstrap(&self) -> bool {
        !matches!(self, Self::ChildExited { .. })
    }
}

impl From<std::io::Error> for HeraldError {
    fn from(err: std::io::Error) -> Self {
        Self::Process(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes_are_distinct_per_bootstrap_failure() {
        let db = HeraldError::unavailable(Dependency::Database, "refused");
        let broker = HeraldError::unavailable(Dependency::Broker, "refused");
        let migration = HeraldError::migration("bad sql");

        assert_eq!(db.exit_code(), exit_codes::DATABASE_UNAVAILABLE);
        assert_eq!(broker.exit_code(), exit_codes::BROKER_UNAVAILABLE);
        assert_eq!(migration.exit_code(), exit_codes::MIGRATION_FAILED);
        assert_ne!(db.exit_code(), broker.exit_code());
        assert_ne!(broker.exit_code(), migration.exit_code());
    }

    #[test]
    fn test_configuration_exit_code() {
        let err = HeraldError::configuration("missing url");
        assert_eq!(err.exit_code(), exit_codes::CONFIGURATION);
        assert_eq!(err.error_code(), "CONFIGURATION_ERROR");
    }

    #[test]
    fn test_child_exited_display() {
        let err = HeraldError::ChildExited {
            name: "worker".to_string(),
            code: Some(3),
        };
        let msg = err.to_string();
        assert!(msg.contains("worker") && msg.contains('3'));
        assert_eq!(err.exit_code(), exit_codes::CHILD_EXITED);
        assert!(!err.is_fatal_at_bootstrap());
    }

    #[test]
    fn test_dependency_display() {
        let err = HeraldError::unavailable(Dependency::Broker, "connection refused");
        assert_eq!(err.to_string(), "broker unavailable: connection refused");
    }

    #[test]
    fn test_io_error_maps_to_process() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "no such file");
        let err = HeraldError::from(io);
        assert!(matches!(err, HeraldError::Process(_)));
        assert_eq!(err.exit_code(), exit_codes::FAILURE);
    }
}
