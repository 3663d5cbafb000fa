//! Redis-backed broker implementation.

mod broker;

pub use broker::RedisBroker;

use crate::error::{JobError, JobResult};
use async_trait::async_trait;
use deadpool_redis::{Config, Pool, Runtime};
use herald_config::RedisConfig;
use herald_resilience::{Probe, ProbeError};
use std::time::Duration;
use tracing::info;

/// Create a Redis connection pool.
///
/// No connection is opened here; the first command does that.
pub fn create_pool(config: &RedisConfig) -> JobResult<Pool> {
    info!("Creating Redis connection pool for job queue...");

    let cfg = Config::from_url(&config.url);

    cfg.builder()
        .map_err(|e| JobError::Configuration(format!("Invalid Redis config: {}", e)))?
        .max_size(config.pool_size)
        .wait_timeout(Some(config.connect_timeout()))
        .create_timeout(Some(config.connect_timeout()))
        .runtime(Runtime::Tokio1)
        .build()
        .map_err(|e| JobError::Configuration(format!("Failed to create pool: {}", e)))
}

/// Redis key builder for job queues.
#[derive(Debug, Clone)]
pub struct RedisKeys {
    prefix: String,
}

impl RedisKeys {
    /// Create a new key builder with the given prefix.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Job record key (string: JSON record).
    pub fn job(&self, job_id: &str) -> String {
        format!("{}:job:{}", self.prefix, job_id)
    }

    /// Ready list key (list of job ids, LPUSH in, RPOP out).
    pub fn ready(&self, queue: &str) -> String {
        format!("{}:queue:{}", self.prefix, queue)
    }

    /// In-flight list of one consumer.
    pub fn processing(&self, queue: &str, consumer: &str) -> String {
        format!("{}:processing:{}:{}", self.prefix, queue, consumer)
    }

    /// Delayed set key (sorted set scored by due time in ms).
    pub fn delayed(&self, queue: &str) -> String {
        format!("{}:delayed:{}", self.prefix, queue)
    }

    /// Registered consumers of a queue (set).
    pub fn consumers(&self, queue: &str) -> String {
        format!("{}:consumers:{}", self.prefix, queue)
    }

    /// Consumer liveness key.
    pub fn heartbeat(&self, consumer: &str) -> String {
        format!("{}:heartbeat:{}", self.prefix, consumer)
    }

    /// Marker key.
    pub fn marker(&self, key: &str) -> String {
        format!("{}:{}", self.prefix, key)
    }
}

impl Default for RedisKeys {
    fn default() -> Self {
        Self::new("herald:jobs")
    }
}

/// Readiness probe sending `PING` over a fresh connection.
pub struct RedisProbe {
    url: String,
    timeout: Duration,
}

impl RedisProbe {
    /// Creates a probe for the configured broker.
    pub fn new(config: &RedisConfig) -> Self {
        Self {
            url: config.url.clone(),
            timeout: config.connect_timeout(),
        }
    }
}

#[async_trait]
impl Probe for RedisProbe {
    async fn probe(&self) -> Result<(), ProbeError> {
        let client = redis::Client::open(self.url.as_str())
            .map_err(|e| ProbeError::fatal(format!("invalid broker URL: {e}")))?;

        let ping = async {
            let mut conn = client.get_multiplexed_async_connection().await?;
            redis::cmd("PING").query_async::<String>(&mut conn).await
        };

        match tokio::time::timeout(self.timeout, ping).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) if e.kind() == redis::ErrorKind::AuthenticationFailed => {
                Err(ProbeError::fatal(e.to_string()))
            }
            Ok(Err(e)) => Err(ProbeError::transient(e.to_string())),
            Err(_) => Err(ProbeError::transient(format!(
                "no answer within {:?}",
                self.timeout
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redis_keys() {
        let keys = RedisKeys::new("test");

        assert_eq!(keys.job("123"), "test:job:123");
        assert_eq!(keys.ready("emails"), "test:queue:emails");
        assert_eq!(keys.processing("emails", "w1"), "test:processing:emails:w1");
        assert_eq!(keys.delayed("emails"), "test:delayed:emails");
        assert_eq!(keys.consumers("emails"), "test:consumers:emails");
        assert_eq!(keys.heartbeat("w1"), "test:heartbeat:w1");
        assert_eq!(keys.marker("sent:abc"), "test:sent:abc");
    }

    #[tokio::test]
    async fn test_probe_with_invalid_url_is_fatal() {
        let config = RedisConfig {
            url: "http://localhost".to_string(),
            ..RedisConfig::default()
        };
        let err = RedisProbe::new(&config).probe().await.unwrap_err();
        assert!(!err.is_transient());
    }
}
