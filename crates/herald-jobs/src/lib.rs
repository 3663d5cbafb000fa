//! Herald Jobs - durable notification job queue
//!
//! A Redis-backed job queue with:
//! - Typed job payloads stored as JSON records
//! - Ack-after-completion delivery, so a crashed worker's job is redelivered
//! - Retries on a fixed backoff schedule through a delayed set
//! - Status lookup with a result TTL after completion
//! - Worker heartbeats and recovery of orphaned jobs
//!
//! # Architecture
//!
//! ```text
//!  Producer ──enqueue──► ready list ──reserve──► in-flight list (per worker)
//!                            ▲                         │
//!                            │ promote_due             │ complete / fail
//!                            │                         ▼
//!                       delayed set ◄──retrying── job record (status, result, TTL)
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use herald_jobs::{JobQueue, MemoryBroker, RetryPolicy, Worker, WorkerSettings};
//! use herald_jobs::notification::{notification_handler, NotificationJob};
//!
//! let queue = Arc::new(JobQueue::new(broker, "notifications", RetryPolicy::default(), ttl));
//! let worker = Worker::new(queue.clone(), WorkerSettings::default());
//! worker.register::<NotificationJob, _>(notification_handler(broker, sender, settings));
//!
//! queue.enqueue(NotificationJob::new("user@example.com", "Welcome!", "Hello...")).await?;
//! worker.run().await?;
//! ```

pub mod broker;
pub mod error;
pub mod job;
pub mod memory;
pub mod metrics;
pub mod notification;
pub mod queue;
pub mod redis;
pub mod retry;
pub mod worker;

pub use broker::Broker;
pub use error::{JobError, JobResult};
pub use job::{Job, JobContext, JobId, JobRecord, JobStatus, JobStatusView};
pub use memory::MemoryBroker;
pub use metrics::{register_metrics, JobMetrics};
pub use notification::{
    notification_handler, LogSender, NotificationJob, NotificationSender, NotificationService,
    NotificationSettings,
};
pub use queue::{FailureOutcome, JobQueue, QueuedJob};
pub use crate::redis::{RedisBroker, RedisProbe};
pub use retry::RetryPolicy;
pub use worker::{HandlerResult, JobOutcome, Worker, WorkerSettings, WorkerStats};

/// Re-export commonly used traits
pub mod prelude {
    pub use crate::broker::Broker;
    pub use crate::job::{Job, JobStatus};
    pub use crate::queue::JobQueue;
    pub use crate::retry::RetryPolicy;
    pub use crate::worker::Worker;
    pub use crate::{JobContext, JobError, JobId, JobResult};
}
