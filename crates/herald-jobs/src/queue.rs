//! Job queue over a broker.

use crate::broker::Broker;
use crate::error::{JobError, JobResult};
use crate::job::{Job, JobId, JobRecord, JobStatus, JobStatusView};
use crate::metrics::JobMetrics;
use crate::retry::RetryPolicy;
use herald_config::QueueConfig;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Delayed ids promoted per call.
const PROMOTE_BATCH: usize = 100;

/// Builder for enqueuing jobs with options.
pub struct QueuedJob<J: Job> {
    job: J,
    retry_policy: Option<RetryPolicy>,
    result_ttl: Option<Duration>,
    description: Option<String>,
    timeout: Option<Duration>,
}

impl<J: Job> QueuedJob<J> {
    /// Create a new queued job builder.
    pub fn new(job: J) -> Self {
        Self {
            job,
            retry_policy: None,
            result_ttl: None,
            description: None,
            timeout: None,
        }
    }

    /// Override the retry policy.
    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    /// Override how long the finished record stays queryable.
    pub fn result_ttl(mut self, ttl: Duration) -> Self {
        self.result_ttl = Some(ttl);
        self
    }

    /// Set the description shown in status queries.
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Override the execution window.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Build the job record.
    fn build(self, queue: &str, defaults: &QueueDefaults) -> JobResult<JobRecord> {
        let policy = self
            .retry_policy
            .unwrap_or_else(|| defaults.retry_policy.clone());
        let ttl = self.result_ttl.unwrap_or(defaults.result_ttl);

        let mut record = JobRecord::new(&self.job, queue, policy, ttl)?;
        if self.description.is_some() {
            record.description = self.description;
        }
        record.timeout_secs = self.timeout.map(|t| t.as_secs().max(1));
        Ok(record)
    }
}

/// Policy applied when an enqueue does not override it.
#[derive(Debug, Clone)]
struct QueueDefaults {
    retry_policy: RetryPolicy,
    result_ttl: Duration,
}

/// What happened to a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Another attempt is scheduled.
    Retrying {
        /// Attempt that will run next (1-based).
        next_attempt: u32,
        /// Wait before it becomes ready.
        delay: Duration,
    },
    /// The job failed permanently.
    Failed,
}

/// A named durable queue.
///
/// Records are written before their id is pushed, and an id leaves a
/// consumer's in-flight list only after the outcome is stored.
pub struct JobQueue {
    name: String,
    broker: Arc<dyn Broker>,
    defaults: QueueDefaults,
}

impl JobQueue {
    /// Create a queue with explicit defaults.
    pub fn new(
        broker: Arc<dyn Broker>,
        name: impl Into<String>,
        retry_policy: RetryPolicy,
        result_ttl: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            broker,
            defaults: QueueDefaults {
                retry_policy,
                result_ttl,
            },
        }
    }

    /// Create a queue from configuration.
    pub fn from_config(broker: Arc<dyn Broker>, config: &QueueConfig) -> Self {
        Self::new(
            broker,
            config.name.clone(),
            RetryPolicy::from(config),
            config.result_ttl(),
        )
    }

    /// Queue name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Checks broker connectivity.
    pub async fn ping(&self) -> JobResult<()> {
        self.broker.ping().await
    }

    /// Enqueue a job with the queue defaults.
    pub async fn enqueue<J: Job>(&self, job: J) -> JobResult<JobId> {
        self.enqueue_with(QueuedJob::new(job)).await
    }

    /// Enqueue a job with options.
    ///
    /// Returns once the record is stored and its id is on the ready list.
    /// Both happen in one broker step, so a failed enqueue leaves nothing
    /// behind.
    pub async fn enqueue_with<J: Job>(&self, queued: QueuedJob<J>) -> JobResult<JobId> {
        let record = queued.build(&self.name, &self.defaults)?;

        if let Err(e) = self.broker.enqueue(&self.name, &record).await {
            JobMetrics::enqueue_failed(&self.name, &record.name);
            return Err(e);
        }

        JobMetrics::job_enqueued(&self.name, &record.name);
        info!(
            job_id = %record.id,
            queue = %self.name,
            job_name = %record.name,
            max_attempts = record.retry_policy.max_attempts,
            "Enqueued job"
        );
        Ok(record.id)
    }

    /// Reports a job's status. Unknown and expired ids are `not_found`.
    pub async fn status(&self, id: &JobId) -> JobResult<JobStatusView> {
        Ok(match self.broker.load(id).await? {
            Some(record) => record.to_view(),
            None => JobStatusView::not_found(id.clone()),
        })
    }

    /// Moves retrying jobs whose delay has passed back to the ready list.
    ///
    /// A due id leaves the delayed set only in the step that marks its
    /// record queued and pushes it, so an error here leaves it delayed for
    /// the next call.
    pub async fn promote_due(&self) -> JobResult<usize> {
        let due = self.broker.due(&self.name, PROMOTE_BATCH).await?;
        let mut promoted = 0;

        for id in due {
            match self.broker.load(&id).await? {
                Some(mut record) if record.status == JobStatus::Retrying => {
                    record.mark_requeued()?;
                    if self.broker.promote(&self.name, &record).await? {
                        promoted += 1;
                        debug!(job_id = %id, attempt = record.attempts + 1, "Promoted delayed job");
                    }
                }
                Some(record) => {
                    debug!(job_id = %id, status = %record.status, "Dropping stale delayed entry");
                    self.broker.unschedule(&self.name, &id).await?;
                }
                None => {
                    warn!(job_id = %id, "Delayed job has no record");
                    self.broker.unschedule(&self.name, &id).await?;
                }
            }
        }

        Ok(promoted)
    }

    /// Reserves the next job for `consumer` and marks it started.
    ///
    /// Waits up to `wait` for a job. Deliveries that cannot run (missing
    /// record, terminal record, or a lost final attempt) are settled here
    /// and reported as `None`.
    pub async fn reserve(&self, consumer: &str, wait: Duration) -> JobResult<Option<JobRecord>> {
        let Some(id) = self.broker.reserve(&self.name, consumer, wait).await? else {
            return Ok(None);
        };

        match self.start(consumer, id.clone()).await {
            Ok(started) => Ok(started),
            Err(e) => {
                if let Err(release_err) = self.broker.release(&self.name, consumer, &id).await {
                    warn!(job_id = %id, error = %release_err, "Failed to release job after reserve error");
                }
                Err(e)
            }
        }
    }

    /// Settles or starts a freshly reserved id.
    async fn start(&self, consumer: &str, id: JobId) -> JobResult<Option<JobRecord>> {
        let Some(mut record) = self.broker.load(&id).await? else {
            warn!(job_id = %id, "Reserved job has no record, dropping it");
            self.broker.ack(&self.name, consumer, &id).await?;
            return Ok(None);
        };

        match record.status {
            JobStatus::Queued => {}
            JobStatus::Retrying => {
                // Delivered before its promotion settled; it is due either way
                debug!(job_id = %id, "Reserved a retrying job");
                self.broker.unschedule(&self.name, &id).await?;
                record.mark_requeued()?;
            }
            JobStatus::Started if record.is_exhausted() => {
                let error = JobError::WorkerLost {
                    attempt: record.attempts,
                    max_attempts: record.retry_policy.max_attempts,
                };
                warn!(job_id = %id, attempt = record.attempts, "Worker lost during final attempt");
                record.mark_failed(&error)?;
                self.broker
                    .settle(&self.name, consumer, &record, Some(record.result_ttl()))
                    .await?;
                JobMetrics::job_failed(&self.name, &record.name, error.kind(), Duration::ZERO);
                return Ok(None);
            }
            JobStatus::Started => {
                warn!(
                    job_id = %id,
                    lost_attempt = record.attempts,
                    "Redelivering interrupted job"
                );
            }
            status => {
                debug!(job_id = %id, status = %status, "Dropping stale delivery");
                self.broker.ack(&self.name, consumer, &id).await?;
                return Ok(None);
            }
        }

        record.mark_started()?;
        self.broker.save(&record, None).await?;
        Ok(Some(record))
    }

    /// Stores a successful outcome and releases the reservation.
    pub async fn complete(
        &self,
        consumer: &str,
        record: &mut JobRecord,
        result: serde_json::Value,
    ) -> JobResult<()> {
        record.mark_finished(result)?;
        self.broker
            .settle(&self.name, consumer, record, Some(record.result_ttl()))
            .await
    }

    /// Stores a failed attempt, scheduling a retry when the error allows it
    /// and attempts remain, and releases the reservation in the same step.
    pub async fn fail(
        &self,
        consumer: &str,
        record: &mut JobRecord,
        error: &JobError,
    ) -> JobResult<FailureOutcome> {
        if error.is_retryable() && !record.is_exhausted() {
            let delay = record.next_delay();
            record.mark_retrying(error)?;
            self.broker
                .retry_later(&self.name, consumer, record, delay)
                .await?;
            Ok(FailureOutcome::Retrying {
                next_attempt: record.attempts + 1,
                delay,
            })
        } else {
            record.mark_failed(error)?;
            self.broker
                .settle(&self.name, consumer, record, Some(record.result_ttl()))
                .await?;
            Ok(FailureOutcome::Failed)
        }
    }

    /// Puts one reserved job back at the front of the ready list without
    /// touching its record. The next reservation counts the interrupted
    /// attempt.
    pub async fn release(&self, consumer: &str, id: &JobId) -> JobResult<()> {
        self.broker.release(&self.name, consumer, id).await?;
        warn!(job_id = %id, queue = %self.name, "Released job back to the queue");
        Ok(())
    }

    /// Refreshes the consumer's liveness marker.
    pub async fn heartbeat(&self, consumer: &str, ttl: Duration) -> JobResult<()> {
        self.broker.heartbeat(&self.name, consumer, ttl).await
    }

    /// Returns jobs held by dead consumers to the ready list.
    pub async fn recover_orphans(&self) -> JobResult<usize> {
        let recovered = self.broker.requeue_orphans(&self.name).await?;
        if recovered > 0 {
            JobMetrics::jobs_recovered(&self.name, recovered);
            info!(queue = %self.name, count = recovered, "Recovered orphaned jobs");
        }
        Ok(recovered)
    }

    /// Releases everything the consumer holds and forgets it.
    pub async fn deregister(&self, consumer: &str) -> JobResult<()> {
        self.broker.deregister(&self.name, consumer).await
    }
}
