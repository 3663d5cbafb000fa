//! Worker for processing jobs.

use crate::error::{JobError, JobResult};
use crate::job::{Job, JobContext, JobId, JobRecord};
use crate::metrics::JobMetrics;
use crate::queue::{FailureOutcome, JobQueue};
use futures::future::BoxFuture;
use futures::FutureExt;
use herald_config::{QueueConfig, WorkerConfig};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{timeout, Instant};
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Tries at storing one outcome before the job is handed back.
const SETTLE_ATTEMPTS: u32 = 3;

/// Worker settings.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    /// Longest single wait for the next job.
    pub poll_interval: Duration,

    /// Heartbeat refresh interval.
    pub heartbeat_interval: Duration,

    /// Heartbeat expiry.
    pub heartbeat_ttl: Duration,

    /// Execution window for jobs that do not set their own.
    pub job_timeout: Duration,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            heartbeat_interval: Duration::from_secs(10),
            heartbeat_ttl: Duration::from_secs(30),
            job_timeout: Duration::from_secs(120),
        }
    }
}

impl WorkerSettings {
    /// Build settings from the worker and queue sections.
    pub fn from_config(worker: &WorkerConfig, queue: &QueueConfig) -> Self {
        Self {
            poll_interval: worker.poll_interval(),
            heartbeat_interval: worker.heartbeat_interval(),
            heartbeat_ttl: worker.heartbeat_ttl(),
            job_timeout: queue.job_timeout(),
        }
    }
}

/// What a job handler resolves to.
pub type HandlerResult = Result<serde_json::Value, JobError>;

/// Job handler function type.
pub type JobHandler =
    Box<dyn Fn(&JobRecord, JobContext) -> BoxFuture<'static, HandlerResult> + Send + Sync>;

/// Result of processing one job.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    /// The job finished.
    Finished {
        /// Job ID.
        job_id: JobId,
        /// Value returned by the handler.
        result: serde_json::Value,
    },
    /// The attempt failed and another one is scheduled.
    Retrying {
        /// Job ID.
        job_id: JobId,
        /// Attempt that will run next.
        next_attempt: u32,
        /// Wait before it runs.
        delay: Duration,
    },
    /// The job failed permanently.
    Failed {
        /// Job ID.
        job_id: JobId,
        /// Failure description.
        error: String,
    },
}

impl JobOutcome {
    /// Job this outcome belongs to.
    pub fn job_id(&self) -> &JobId {
        match self {
            Self::Finished { job_id, .. }
            | Self::Retrying { job_id, .. }
            | Self::Failed { job_id, .. } => job_id,
        }
    }
}

/// Worker statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerStats {
    /// Jobs finished.
    pub finished: u64,
    /// Attempts scheduled for retry.
    pub retried: u64,
    /// Jobs failed permanently.
    pub failed: u64,
}

/// Sequential job worker.
///
/// Takes one job at a time from its queue, runs the registered handler and
/// stores the outcome before acknowledging. Several workers may share a
/// queue; the broker hands each job to exactly one of them.
pub struct Worker {
    /// Unique worker ID, also the broker consumer name.
    id: String,

    /// Job queue.
    queue: Arc<JobQueue>,

    /// Worker settings.
    settings: WorkerSettings,

    /// Registered job handlers.
    handlers: RwLock<HashMap<String, JobHandler>>,

    /// Shutdown signal.
    shutdown_tx: watch::Sender<bool>,

    /// Reserved jobs whose release failed; retried before the next reserve.
    unreleased: Mutex<Vec<JobId>>,

    finished: AtomicU64,
    retried: AtomicU64,
    failed: AtomicU64,
}

impl Worker {
    /// Create a new worker.
    pub fn new(queue: Arc<JobQueue>, settings: WorkerSettings) -> Self {
        let (shutdown_tx, _) = watch::channel(false);

        Self {
            id: format!("worker-{}", Uuid::new_v4()),
            queue,
            settings,
            handlers: RwLock::new(HashMap::new()),
            shutdown_tx,
            unreleased: Mutex::new(Vec::new()),
            finished: AtomicU64::new(0),
            retried: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    /// Get the worker ID.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Register a handler for a job kind.
    pub fn register<J, F>(&self, handler: F)
    where
        J: Job,
        F: Fn(J, JobContext) -> BoxFuture<'static, HandlerResult> + Send + Sync + 'static,
    {
        let handler_fn: JobHandler = Box::new(
            move |record: &JobRecord, ctx: JobContext| -> BoxFuture<'static, HandlerResult> {
                match record.decode::<J>() {
                    Ok(job) => handler(job, ctx),
                    Err(e) => Box::pin(async move { Err(e) }),
                }
            },
        );

        self.handlers.write().insert(J::NAME.to_string(), handler_fn);
        info!(job_type = J::NAME, "Registered job handler");
    }

    /// Ask the worker to stop after the job in progress.
    pub fn stop(&self) {
        info!(worker_id = %self.id, "Stopping worker...");
        self.shutdown_tx.send_replace(true);
    }

    /// Get statistics.
    pub fn stats(&self) -> WorkerStats {
        WorkerStats {
            finished: self.finished.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }

    /// Promotes due retries, then waits up to the poll interval for one job
    /// and processes it.
    pub async fn run_once(&self) -> JobResult<Option<JobOutcome>> {
        self.retry_releases().await;
        self.queue.promote_due().await?;

        match self
            .queue
            .reserve(&self.id, self.settings.poll_interval)
            .await?
        {
            Some(record) => self.process(record).await.map(Some),
            None => Ok(None),
        }
    }

    /// Run until [`Worker::stop`] is called.
    ///
    /// Broker errors are logged and retried after the poll interval. On exit
    /// the worker's reserved jobs go back to the ready list.
    pub async fn run(&self) -> JobResult<WorkerStats> {
        info!(
            worker_id = %self.id,
            queue = %self.queue.name(),
            "Starting worker"
        );

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        if let Err(e) = self
            .queue
            .heartbeat(&self.id, self.settings.heartbeat_ttl)
            .await
        {
            warn!(worker_id = %self.id, error = %e, "Initial heartbeat failed");
        }
        if let Err(e) = self.queue.recover_orphans().await {
            warn!(worker_id = %self.id, error = %e, "Orphan recovery failed");
        }

        let heartbeat = tokio::spawn(
            heartbeat_loop(self.queue.clone(), self.id.clone(), self.settings.clone())
                .instrument(info_span!("heartbeat", worker_id = %self.id)),
        );

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            self.retry_releases().await;
            if let Err(e) = self.queue.promote_due().await {
                warn!(worker_id = %self.id, error = %e, "Failed to promote delayed jobs");
            }

            // Waiting for a job is the only point where shutdown interrupts
            let reserved = tokio::select! {
                _ = shutdown_rx.changed() => break,
                reserved = self.queue.reserve(&self.id, self.settings.poll_interval) => reserved,
            };

            match reserved {
                Ok(Some(record)) => {
                    if let Err(e) = self.process(record).await {
                        error!(worker_id = %self.id, error = %e, "Job outcome was not stored");
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    error!(worker_id = %self.id, error = %e, "Failed to reserve job");
                    tokio::select! {
                        _ = shutdown_rx.changed() => break,
                        () = tokio::time::sleep(self.settings.poll_interval) => {}
                    }
                }
            }
        }

        heartbeat.abort();
        if let Err(e) = self.queue.deregister(&self.id).await {
            warn!(worker_id = %self.id, error = %e, "Failed to deregister worker");
        }

        let stats = self.stats();
        info!(
            worker_id = %self.id,
            finished = stats.finished,
            retried = stats.retried,
            failed = stats.failed,
            "Worker stopped"
        );
        Ok(stats)
    }

    /// Execute a reserved job and store the outcome.
    async fn process(&self, record: JobRecord) -> JobResult<JobOutcome> {
        let queue_name = self.queue.name().to_string();
        let window = record
            .timeout_secs
            .map_or(self.settings.job_timeout, Duration::from_secs);
        let span = info_span!(
            "job",
            job_id = %record.id,
            job_name = %record.name,
            attempt = record.attempts
        );

        debug!(parent: &span, worker_id = %self.id, "Processing job");
        JobMetrics::job_started(&queue_name, &record.name);
        let started = Instant::now();

        let handler_future = {
            let handlers = self.handlers.read();
            handlers
                .get(&record.name)
                .map(|handler| handler(&record, record.to_context(&self.id)))
        };

        let result = match handler_future {
            None => Err(JobError::UnknownJob(record.name.clone())),
            Some(future) => {
                let guarded = AssertUnwindSafe(future).catch_unwind();
                match timeout(window, guarded).instrument(span.clone()).await {
                    Ok(Ok(result)) => result,
                    Ok(Err(_)) => Err(JobError::execution("job handler panicked")),
                    Err(_) => {
                        JobMetrics::job_timed_out(&queue_name, &record.name);
                        Err(JobError::Timeout(window.as_secs()))
                    }
                }
            }
        };
        let elapsed = started.elapsed();

        self.settle(record, result, elapsed)
            .instrument(span)
            .await
    }

    /// Store the outcome of an attempt, retrying with backoff. If it still
    /// cannot be stored the job goes back to the ready list, so it never
    /// stays reserved by a live worker.
    async fn settle(
        &self,
        record: JobRecord,
        result: HandlerResult,
        elapsed: Duration,
    ) -> JobResult<JobOutcome> {
        let mut backoff = self.settings.poll_interval;
        let mut attempt = 1;

        loop {
            // Each try starts from the started record, so repeats write the same outcome
            match self.store_outcome(record.clone(), &result, elapsed).await {
                Ok(outcome) => return Ok(outcome),
                Err(e) if attempt < SETTLE_ATTEMPTS => {
                    warn!(error = %e, attempt, "Failed to store job outcome, retrying");
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                    attempt += 1;
                }
                Err(e) => {
                    error!(error = %e, attempts = attempt, "Failed to store job outcome");
                    self.release(&record.id).await;
                    return Err(e);
                }
            }
        }
    }

    /// Hands a reserved job back to the queue, remembering it on failure.
    async fn release(&self, id: &JobId) {
        if let Err(e) = self.queue.release(&self.id, id).await {
            warn!(job_id = %id, error = %e, "Failed to release job");
            self.unreleased.lock().push(id.clone());
        }
    }

    async fn retry_releases(&self) {
        let pending = std::mem::take(&mut *self.unreleased.lock());
        for id in pending {
            self.release(&id).await;
        }
    }

    /// Store the outcome of an attempt and release the reservation.
    async fn store_outcome(
        &self,
        mut record: JobRecord,
        result: &HandlerResult,
        elapsed: Duration,
    ) -> JobResult<JobOutcome> {
        let queue_name = self.queue.name();
        match result {
            Ok(value) => {
                self.queue
                    .complete(&self.id, &mut record, value.clone())
                    .await?;
                JobMetrics::job_finished(queue_name, &record.name, elapsed);
                self.finished.fetch_add(1, Ordering::Relaxed);
                info!(elapsed_ms = elapsed.as_millis() as u64, "Job finished");

                Ok(JobOutcome::Finished {
                    job_id: record.id,
                    result: value.clone(),
                })
            }
            Err(error) => match self.queue.fail(&self.id, &mut record, error).await? {
                FailureOutcome::Retrying {
                    next_attempt,
                    delay,
                } => {
                    JobMetrics::job_retried(queue_name, &record.name, record.attempts, elapsed);
                    self.retried.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        error = %error,
                        next_attempt,
                        delay_secs = delay.as_secs_f64(),
                        "Job attempt failed, retry scheduled"
                    );

                    Ok(JobOutcome::Retrying {
                        job_id: record.id,
                        next_attempt,
                        delay,
                    })
                }
                FailureOutcome::Failed => {
                    JobMetrics::job_failed(queue_name, &record.name, error.kind(), elapsed);
                    self.failed.fetch_add(1, Ordering::Relaxed);
                    error!(error = %error, attempts = record.attempts, "Job failed");

                    Ok(JobOutcome::Failed {
                        job_id: record.id,
                        error: error.to_string(),
                    })
                }
            },
        }
    }
}

/// Keeps the worker's heartbeat alive and recovers jobs from dead workers.
async fn heartbeat_loop(queue: Arc<JobQueue>, consumer: String, settings: WorkerSettings) {
    let mut ticker = tokio::time::interval(settings.heartbeat_interval);
    ticker.tick().await;

    loop {
        ticker.tick().await;

        if let Err(e) = queue.heartbeat(&consumer, settings.heartbeat_ttl).await {
            warn!(error = %e, "Heartbeat failed");
            continue;
        }
        if let Err(e) = queue.recover_orphans().await {
            warn!(error = %e, "Orphan recovery failed");
        }
    }
}
