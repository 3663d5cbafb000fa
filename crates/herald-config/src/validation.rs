//! Configuration validation module.
//!
//! Validates all configuration values up front and reports every problem
//! at once, rather than failing on the first one at runtime.

use crate::AppConfig;
use std::fmt;
use url::Url;

/// Configuration validation error variants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigValidationError {
    /// Port number is invalid (must be 1-65535).
    InvalidPort { name: String, value: u16 },
    /// URL format is invalid.
    InvalidUrl { url_type: String, message: String },
    /// A value that must be positive is zero.
    NonPositive { name: String },
    /// Queue name is empty.
    EmptyQueueName,
    /// Retries are allowed but no backoff delays were configured.
    EmptyBackoffSchedule { max_attempts: u32 },
    /// Heartbeat would expire between two refreshes.
    HeartbeatTtlTooShort { interval_secs: u64, ttl_secs: u64 },
    /// Migration command is configured but empty.
    EmptyMigrationCommand,
}

impl fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidPort { name, value } => {
                write!(f, "Invalid port for {}: {} (must be 1-65535)", name, value)
            }
            Self::InvalidUrl { url_type, message } => {
                write!(f, "Invalid {} URL: {}", url_type, message)
            }
            Self::NonPositive { name } => {
                write!(f, "'{}' must be positive", name)
            }
            Self::EmptyQueueName => write!(f, "Queue name cannot be empty"),
            Self::EmptyBackoffSchedule { max_attempts } => {
                write!(
                    f,
                    "Backoff schedule is empty but max_attempts is {} (retries need at least one delay)",
                    max_attempts
                )
            }
            Self::HeartbeatTtlTooShort {
                interval_secs,
                ttl_secs,
            } => {
                write!(
                    f,
                    "Heartbeat TTL ({}s) must exceed the heartbeat interval ({}s)",
                    ttl_secs, interval_secs
                )
            }
            Self::EmptyMigrationCommand => {
                write!(f, "database.migration_command is set but empty")
            }
        }
    }
}

impl std::error::Error for ConfigValidationError {}

/// Result of configuration validation containing all errors found.
#[derive(Debug, Default)]
struct ValidationResult {
    errors: Vec<ConfigValidationError>,
}

impl ValidationResult {
    fn add_error(&mut self, error: ConfigValidationError) {
        self.errors.push(error);
    }

    fn require_positive(&mut self, name: &str, value: u64) {
        if value == 0 {
            self.add_error(ConfigValidationError::NonPositive {
                name: name.to_string(),
            });
        }
    }

    fn into_result(self) -> Result<(), Vec<ConfigValidationError>> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(self.errors)
        }
    }
}

/// Configuration validator.
pub struct ConfigValidator;

impl ConfigValidator {
    /// Accepted relational store schemes.
    const DATABASE_SCHEMES: &'static [&'static str] =
        &["postgres", "postgresql", "postgresql+asyncpg"];
    /// Accepted broker schemes.
    const REDIS_SCHEMES: &'static [&'static str] = &["redis", "rediss"];

    /// Validates the entire application configuration.
    ///
    /// Returns Ok(()) if valid, or Err with all validation errors found.
    pub fn validate(config: &AppConfig) -> Result<(), Vec<ConfigValidationError>> {
        let mut result = ValidationResult::default();

        Self::validate_server(config, &mut result);
        Self::validate_database(config, &mut result);
        Self::validate_redis(config, &mut result);
        Self::validate_queue(config, &mut result);
        Self::validate_worker(config, &mut result);
        Self::validate_lifecycle(config, &mut result);

        result.into_result()
    }

    fn validate_server(config: &AppConfig, result: &mut ValidationResult) {
        if config.server.port == 0 {
            result.add_error(ConfigValidationError::InvalidPort {
                name: "server.port".to_string(),
                value: config.server.port,
            });
        }
        result.require_positive("server.request_timeout_secs", config.server.request_timeout_secs);
    }

    fn validate_database(config: &AppConfig, result: &mut ValidationResult) {
        Self::validate_url("database", &config.database.url, Self::DATABASE_SCHEMES, result);
        result.require_positive(
            "database.connect_timeout_secs",
            config.database.connect_timeout_secs,
        );

        if let Some(command) = &config.database.migration_command {
            if command.iter().all(|part| part.trim().is_empty()) {
                result.add_error(ConfigValidationError::EmptyMigrationCommand);
            }
        }
    }

    fn validate_redis(config: &AppConfig, result: &mut ValidationResult) {
        Self::validate_url("redis", &config.redis.url, Self::REDIS_SCHEMES, result);
        result.require_positive("redis.pool_size", config.redis.pool_size as u64);
    }

    fn validate_queue(config: &AppConfig, result: &mut ValidationResult) {
        let queue = &config.queue;

        if queue.name.trim().is_empty() {
            result.add_error(ConfigValidationError::EmptyQueueName);
        }
        result.require_positive("queue.max_attempts", u64::from(queue.max_attempts));
        if queue.max_attempts > 1 && queue.backoff_schedule_secs.is_empty() {
            result.add_error(ConfigValidationError::EmptyBackoffSchedule {
                max_attempts: queue.max_attempts,
            });
        }
        result.require_positive("queue.result_ttl_secs", queue.result_ttl_secs);
        result.require_positive("queue.job_timeout_secs", queue.job_timeout_secs);
        result.require_positive("queue.dedupe_ttl_secs", queue.dedupe_ttl_secs);
    }

    fn validate_worker(config: &AppConfig, result: &mut ValidationResult) {
        let worker = &config.worker;

        result.require_positive("worker.poll_interval_ms", worker.poll_interval_ms);
        result.require_positive("worker.heartbeat_interval_secs", worker.heartbeat_interval_secs);
        if worker.heartbeat_ttl_secs <= worker.heartbeat_interval_secs {
            result.add_error(ConfigValidationError::HeartbeatTtlTooShort {
                interval_secs: worker.heartbeat_interval_secs,
                ttl_secs: worker.heartbeat_ttl_secs,
            });
        }
    }

    fn validate_lifecycle(config: &AppConfig, result: &mut ValidationResult) {
        result.require_positive("readiness.retries", u64::from(config.readiness.retries));
        result.require_positive("supervisor.poll_interval_ms", config.supervisor.poll_interval_ms);
        result.require_positive(
            "supervisor.shutdown_timeout_secs",
            config.supervisor.shutdown_timeout_secs,
        );
    }

    fn validate_url(url_type: &str, value: &str, schemes: &[&str], result: &mut ValidationResult) {
        if value.is_empty() {
            result.add_error(ConfigValidationError::InvalidUrl {
                url_type: url_type.to_string(),
                message: "URL cannot be empty".to_string(),
            });
            return;
        }

        match Url::parse(value) {
            Ok(url) if schemes.contains(&url.scheme()) => {}
            Ok(url) => result.add_error(ConfigValidationError::InvalidUrl {
                url_type: url_type.to_string(),
                message: format!(
                    "unsupported scheme '{}' (expected one of: {})",
                    url.scheme(),
                    schemes.join(", ")
                ),
            }),
            Err(e) => result.add_error(ConfigValidationError::InvalidUrl {
                url_type: url_type.to_string(),
                message: e.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(ConfigValidator::validate(&AppConfig::default()).is_ok());
    }

    #[test]
    fn test_reports_all_errors_at_once() {
        let mut config = AppConfig::default();
        config.server.port = 0;
        config.queue.name = String::new();
        config.readiness.retries = 0;

        let errors = ConfigValidator::validate(&config).unwrap_err();
        assert_eq!(errors.len(), 3);
        assert!(errors.contains(&ConfigValidationError::EmptyQueueName));
    }

    #[test]
    fn test_rejects_wrong_broker_scheme() {
        let mut config = AppConfig::default();
        config.redis.url = "http://localhost:6379".to_string();

        let errors = ConfigValidator::validate(&config).unwrap_err();
        assert!(matches!(
            &errors[0],
            ConfigValidationError::InvalidUrl { url_type, .. } if url_type == "redis"
        ));
    }

    #[test]
    fn test_accepts_driver_suffixed_database_url() {
        let mut config = AppConfig::default();
        config.database.url = "postgresql+asyncpg://app:secret@db:5432/wishlist".to_string();
        assert!(ConfigValidator::validate(&config).is_ok());
    }

    #[test]
    fn test_retries_need_backoff_schedule() {
        let mut config = AppConfig::default();
        config.queue.backoff_schedule_secs.clear();

        let errors = ConfigValidator::validate(&config).unwrap_err();
        assert_eq!(
            errors,
            vec![ConfigValidationError::EmptyBackoffSchedule { max_attempts: 4 }]
        );

        config.queue.max_attempts = 1;
        assert!(ConfigValidator::validate(&config).is_ok());
    }

    #[test]
    fn test_heartbeat_ttl_must_exceed_interval() {
        let mut config = AppConfig::default();
        config.worker.heartbeat_ttl_secs = config.worker.heartbeat_interval_secs;

        let errors = ConfigValidator::validate(&config).unwrap_err();
        assert!(errors[0].to_string().contains("Heartbeat TTL"));
    }

    #[test]
    fn test_empty_migration_command_rejected() {
        let mut config = AppConfig::default();
        config.database.migration_command = Some(vec![" ".to_string()]);

        let errors = ConfigValidator::validate(&config).unwrap_err();
        assert_eq!(errors, vec![ConfigValidationError::EmptyMigrationCommand]);
    }
}
