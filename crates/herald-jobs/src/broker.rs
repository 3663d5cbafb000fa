//! Broker abstraction.
//!
//! A broker stores job records and moves job ids between three places per
//! queue: the ready list, one in-flight list per consumer, and the delayed
//! set. Workers take ids with [`Broker::reserve`] and only release them in
//! the same step that stores the outcome, so an id is never lost when a
//! worker or the connection dies mid-way.
//!
//! Every operation that writes a record and moves its id is atomic: either
//! both happen or neither does.

use crate::error::JobResult;
use crate::job::{JobId, JobRecord};
use async_trait::async_trait;
use std::time::Duration;

/// Storage and delivery backend for job queues.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Checks connectivity.
    async fn ping(&self) -> JobResult<()>;

    /// Writes a record, replacing any previous version. With a TTL the
    /// record disappears after it elapses.
    async fn save(&self, record: &JobRecord, ttl: Option<Duration>) -> JobResult<()>;

    /// Reads a record. Missing and expired records are `None`.
    async fn load(&self, id: &JobId) -> JobResult<Option<JobRecord>>;

    /// Stores a new record and appends its id to the ready list.
    async fn enqueue(&self, queue: &str, record: &JobRecord) -> JobResult<()>;

    /// Returns up to `limit` ids from the delayed set whose delay has
    /// passed, without removing them.
    async fn due(&self, queue: &str, limit: usize) -> JobResult<Vec<JobId>>;

    /// If the record's id is still in the delayed set, removes it, stores
    /// the record and appends the id to the ready list. Returns false when
    /// another caller promoted it first.
    async fn promote(&self, queue: &str, record: &JobRecord) -> JobResult<bool>;

    /// Drops an id from the delayed set.
    async fn unschedule(&self, queue: &str, id: &JobId) -> JobResult<()>;

    /// Moves the oldest ready id into the consumer's in-flight list,
    /// waiting up to `wait` for one to arrive.
    async fn reserve(&self, queue: &str, consumer: &str, wait: Duration)
        -> JobResult<Option<JobId>>;

    /// Removes an id from the consumer's in-flight list.
    async fn ack(&self, queue: &str, consumer: &str, id: &JobId) -> JobResult<()>;

    /// Stores a record and removes its id from the consumer's in-flight
    /// list.
    async fn settle(
        &self,
        queue: &str,
        consumer: &str,
        record: &JobRecord,
        ttl: Option<Duration>,
    ) -> JobResult<()>;

    /// Stores a record, adds its id to the delayed set due after `delay`
    /// and removes it from the consumer's in-flight list. Scheduling an id
    /// that is already delayed moves its due time.
    async fn retry_later(
        &self,
        queue: &str,
        consumer: &str,
        record: &JobRecord,
        delay: Duration,
    ) -> JobResult<()>;

    /// Moves one id from the consumer's in-flight list to the front of the
    /// ready list.
    async fn release(&self, queue: &str, consumer: &str, id: &JobId) -> JobResult<()>;

    /// Registers the consumer and refreshes its liveness marker.
    async fn heartbeat(&self, queue: &str, consumer: &str, ttl: Duration) -> JobResult<()>;

    /// Moves in-flight ids of consumers without a live heartbeat back to
    /// the ready list. Returns how many ids moved.
    async fn requeue_orphans(&self, queue: &str) -> JobResult<usize>;

    /// Returns the consumer's in-flight ids to the ready list and forgets
    /// the consumer.
    async fn deregister(&self, queue: &str, consumer: &str) -> JobResult<()>;

    /// Sets a marker if absent. Returns true if this call set it.
    async fn set_marker(&self, key: &str, ttl: Duration) -> JobResult<bool>;

    /// Returns true if the marker exists.
    async fn has_marker(&self, key: &str) -> JobResult<bool>;
}
