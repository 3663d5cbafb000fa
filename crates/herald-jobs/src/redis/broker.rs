//! Redis broker.

use super::{create_pool, RedisKeys};
use crate::broker::Broker;
use crate::error::JobResult;
use crate::job::{JobId, JobRecord};
use async_trait::async_trait;
use chrono::Utc;
use deadpool_redis::Pool;
use herald_config::RedisConfig;
use redis::AsyncCommands;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Moves a delayed id to the ready list together with its record, but only
/// for the caller whose `ZREM` removed it.
const PROMOTE_SCRIPT: &str = r#"
    if redis.call('ZREM', KEYS[1], ARGV[1]) == 1 then
        redis.call('SET', KEYS[2], ARGV[2])
        redis.call('LPUSH', KEYS[3], ARGV[1])
        return 1
    end
    return 0
"#;

/// Returns one in-flight id to the consumer end of the ready list.
const RELEASE_SCRIPT: &str = r#"
    if redis.call('LREM', KEYS[1], 1, ARGV[1]) == 1 then
        redis.call('RPUSH', KEYS[2], ARGV[1])
        return 1
    end
    return 0
"#;

/// Broker backed by Redis lists and sorted sets.
///
/// Reservation uses `BRPOPLPUSH` into a per-consumer in-flight list, so a
/// reserved id stays in Redis until the outcome is stored. Writes that touch
/// a record and a list together run as `MULTI`/`EXEC` or a script.
pub struct RedisBroker {
    pool: Pool,
    keys: RedisKeys,
    promote: redis::Script,
    release: redis::Script,
}

impl RedisBroker {
    /// Create a broker over an existing pool.
    pub fn new(pool: Pool, key_prefix: impl Into<String>) -> Self {
        Self {
            pool,
            keys: RedisKeys::new(key_prefix),
            promote: redis::Script::new(PROMOTE_SCRIPT),
            release: redis::Script::new(RELEASE_SCRIPT),
        }
    }

    /// Create a broker with its own pool.
    pub fn connect(config: &RedisConfig) -> JobResult<Self> {
        let pool = create_pool(config)?;
        Ok(Self::new(pool, config.key_prefix.clone()))
    }

    /// Get a connection from the pool.
    async fn conn(&self) -> JobResult<deadpool_redis::Connection> {
        Ok(self.pool.get().await?)
    }

    /// Adds the record write to a pipeline.
    fn set_record(
        &self,
        pipe: &mut redis::Pipeline,
        record: &JobRecord,
        ttl: Option<Duration>,
    ) -> JobResult<()> {
        let key = self.keys.job(record.id.as_str());
        let json = serde_json::to_string(record)?;
        match ttl {
            Some(ttl) => pipe.set_ex(key, json, ttl.as_secs().max(1)).ignore(),
            None => pipe.set(key, json).ignore(),
        };
        Ok(())
    }

    /// Drains one in-flight list back into the ready list.
    async fn drain_in_flight(
        &self,
        conn: &mut deadpool_redis::Connection,
        queue: &str,
        consumer: &str,
    ) -> JobResult<usize> {
        let processing = self.keys.processing(queue, consumer);
        let ready = self.keys.ready(queue);
        let mut moved = 0;

        loop {
            let id: Option<String> = conn.rpoplpush(&processing, &ready).await?;
            match id {
                Some(id) => {
                    debug!(job_id = %id, consumer = %consumer, "Returned in-flight job to queue");
                    moved += 1;
                }
                None => break,
            }
        }

        Ok(moved)
    }
}

#[async_trait]
impl Broker for RedisBroker {
    async fn ping(&self) -> JobResult<()> {
        let mut conn = self.conn().await?;
        let _: String = redis::cmd("PING").query_async(&mut *conn).await?;
        Ok(())
    }

    async fn save(&self, record: &JobRecord, ttl: Option<Duration>) -> JobResult<()> {
        let mut conn = self.conn().await?;
        let mut pipe = redis::pipe();
        self.set_record(&mut pipe, record, ttl)?;
        let _: () = pipe.query_async(&mut *conn).await?;
        Ok(())
    }

    async fn load(&self, id: &JobId) -> JobResult<Option<JobRecord>> {
        let mut conn = self.conn().await?;
        let json: Option<String> = conn.get(self.keys.job(id.as_str())).await?;
        json.map(|json| serde_json::from_str(&json).map_err(Into::into))
            .transpose()
    }

    async fn enqueue(&self, queue: &str, record: &JobRecord) -> JobResult<()> {
        let mut conn = self.conn().await?;
        let mut pipe = redis::pipe();
        pipe.atomic();
        self.set_record(&mut pipe, record, None)?;
        pipe.lpush(self.keys.ready(queue), record.id.as_str()).ignore();
        let _: () = pipe.query_async(&mut *conn).await?;
        Ok(())
    }

    async fn due(&self, queue: &str, limit: usize) -> JobResult<Vec<JobId>> {
        let mut conn = self.conn().await?;
        let now = Utc::now().timestamp_millis();
        let due: Vec<String> = conn
            .zrangebyscore_limit(self.keys.delayed(queue), "-inf", now, 0, limit as isize)
            .await?;
        Ok(due.into_iter().map(JobId::from).collect())
    }

    async fn promote(&self, queue: &str, record: &JobRecord) -> JobResult<bool> {
        let mut conn = self.conn().await?;
        let json = serde_json::to_string(record)?;
        let promoted: i64 = self
            .promote
            .key(self.keys.delayed(queue))
            .key(self.keys.job(record.id.as_str()))
            .key(self.keys.ready(queue))
            .arg(record.id.as_str())
            .arg(json)
            .invoke_async(&mut *conn)
            .await?;
        Ok(promoted == 1)
    }

    async fn unschedule(&self, queue: &str, id: &JobId) -> JobResult<()> {
        let mut conn = self.conn().await?;
        let _: i64 = conn.zrem(self.keys.delayed(queue), id.as_str()).await?;
        Ok(())
    }

    async fn reserve(
        &self,
        queue: &str,
        consumer: &str,
        wait: Duration,
    ) -> JobResult<Option<JobId>> {
        let mut conn = self.conn().await?;
        let ready = self.keys.ready(queue);
        let processing = self.keys.processing(queue, consumer);

        // A zero timeout would block forever
        let id: Option<String> = if wait.is_zero() {
            conn.rpoplpush(&ready, &processing).await?
        } else {
            conn.brpoplpush(&ready, &processing, wait.as_secs_f64())
                .await?
        };
        Ok(id.map(JobId::from))
    }

    async fn ack(&self, queue: &str, consumer: &str, id: &JobId) -> JobResult<()> {
        let mut conn = self.conn().await?;
        let _: i64 = conn
            .lrem(self.keys.processing(queue, consumer), 1, id.as_str())
            .await?;
        Ok(())
    }

    async fn settle(
        &self,
        queue: &str,
        consumer: &str,
        record: &JobRecord,
        ttl: Option<Duration>,
    ) -> JobResult<()> {
        let mut conn = self.conn().await?;
        let mut pipe = redis::pipe();
        pipe.atomic();
        self.set_record(&mut pipe, record, ttl)?;
        pipe.lrem(self.keys.processing(queue, consumer), 1, record.id.as_str())
            .ignore();
        let _: () = pipe.query_async(&mut *conn).await?;
        Ok(())
    }

    async fn retry_later(
        &self,
        queue: &str,
        consumer: &str,
        record: &JobRecord,
        delay: Duration,
    ) -> JobResult<()> {
        let mut conn = self.conn().await?;
        let delay_ms = i64::try_from(delay.as_millis()).unwrap_or(i64::MAX / 2);
        let due = Utc::now().timestamp_millis() + delay_ms;

        let mut pipe = redis::pipe();
        pipe.atomic();
        self.set_record(&mut pipe, record, None)?;
        pipe.zadd(self.keys.delayed(queue), record.id.as_str(), due)
            .ignore()
            .lrem(self.keys.processing(queue, consumer), 1, record.id.as_str())
            .ignore();
        let _: () = pipe.query_async(&mut *conn).await?;
        Ok(())
    }

    async fn release(&self, queue: &str, consumer: &str, id: &JobId) -> JobResult<()> {
        let mut conn = self.conn().await?;
        let _: i64 = self
            .release
            .key(self.keys.processing(queue, consumer))
            .key(self.keys.ready(queue))
            .arg(id.as_str())
            .invoke_async(&mut *conn)
            .await?;
        Ok(())
    }

    async fn heartbeat(&self, queue: &str, consumer: &str, ttl: Duration) -> JobResult<()> {
        let mut conn = self.conn().await?;
        let _: () = redis::pipe()
            .sadd(self.keys.consumers(queue), consumer)
            .ignore()
            .set_ex(
                self.keys.heartbeat(consumer),
                Utc::now().timestamp(),
                ttl.as_secs().max(1),
            )
            .ignore()
            .query_async(&mut *conn)
            .await?;
        Ok(())
    }

    async fn requeue_orphans(&self, queue: &str) -> JobResult<usize> {
        let mut conn = self.conn().await?;
        let consumers: Vec<String> = conn.smembers(self.keys.consumers(queue)).await?;
        let mut recovered = 0;

        for consumer in consumers {
            let alive: bool = conn.exists(self.keys.heartbeat(&consumer)).await?;
            if alive {
                continue;
            }

            let moved = self.drain_in_flight(&mut conn, queue, &consumer).await?;
            let _: () = conn.srem(self.keys.consumers(queue), &consumer).await?;

            if moved > 0 {
                warn!(consumer = %consumer, queue = %queue, count = moved, "Recovered jobs from dead worker");
            }
            recovered += moved;
        }

        Ok(recovered)
    }

    async fn deregister(&self, queue: &str, consumer: &str) -> JobResult<()> {
        let mut conn = self.conn().await?;
        let moved = self.drain_in_flight(&mut conn, queue, consumer).await?;
        let _: () = redis::pipe()
            .srem(self.keys.consumers(queue), consumer)
            .ignore()
            .del(self.keys.heartbeat(consumer))
            .ignore()
            .query_async(&mut *conn)
            .await?;

        info!(consumer = %consumer, queue = %queue, returned = moved, "Deregistered worker");
        Ok(())
    }

    async fn set_marker(&self, key: &str, ttl: Duration) -> JobResult<bool> {
        let mut conn = self.conn().await?;
        let reply: Option<String> = redis::cmd("SET")
            .arg(self.keys.marker(key))
            .arg(Utc::now().timestamp())
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut *conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn has_marker(&self, key: &str) -> JobResult<bool> {
        let mut conn = self.conn().await?;
        Ok(conn.exists(self.keys.marker(key)).await?)
    }
}
