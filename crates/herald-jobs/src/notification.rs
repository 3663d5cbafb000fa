//! Notification job kind and the enqueue surface used by business code.

use crate::broker::Broker;
use crate::error::{JobError, JobResult};
use crate::job::{Job, JobContext, JobId, JobStatusView};
use crate::queue::{JobQueue, QueuedJob};
use crate::retry::RetryPolicy;
use crate::worker::HandlerResult;
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

/// Returned when a delivery marker shows the message already went out.
pub const DUPLICATE_SUPPRESSED: &str = "duplicate_suppressed";

/// Returned after a message was handed to the sender.
pub const SENT: &str = "success";

/// Payload of a notification job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationJob {
    /// Stable key identifying this message across redeliveries.
    pub request_key: String,
    /// Recipient address.
    pub to: String,
    /// Subject line.
    pub subject: String,
    /// Message text.
    pub body: String,
    /// Sender address; the configured default when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
}

impl NotificationJob {
    /// Create a notification with a fresh request key.
    pub fn new(to: impl Into<String>, subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            request_key: Uuid::new_v4().to_string(),
            to: to.into(),
            subject: subject.into(),
            body: body.into(),
            from: None,
        }
    }

    /// Override the sender address.
    pub fn from_address(mut self, from: impl Into<String>) -> Self {
        self.from = Some(from.into());
        self
    }

    /// Marker key recorded after a successful send.
    pub fn sent_marker(&self) -> String {
        format!("sent:{}", self.request_key)
    }
}

impl Job for NotificationJob {
    const NAME: &'static str = "send_notification";

    fn description(&self) -> Option<String> {
        Some(format!("Notification to {}", self.to))
    }
}

/// Delivers a notification to its recipient.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NotificationSender: Send + Sync {
    /// Send one message. Errors are retried by the queue.
    async fn send(&self, from: &str, notification: &NotificationJob) -> Result<(), JobError>;
}

/// Sender that writes messages to the log.
#[derive(Debug, Clone, Default)]
pub struct LogSender;

#[async_trait]
impl NotificationSender for LogSender {
    async fn send(&self, from: &str, notification: &NotificationJob) -> Result<(), JobError> {
        info!(
            from = %from,
            to = %notification.to,
            subject = %notification.subject,
            request_key = %notification.request_key,
            "Delivering notification"
        );
        Ok(())
    }
}

/// Settings for [`notification_handler`].
#[derive(Debug, Clone)]
pub struct NotificationSettings {
    /// Sender used when a message names none.
    pub from_address: String,
    /// How long a delivery marker is kept.
    pub dedupe_ttl: Duration,
}

/// Builds the worker handler for [`NotificationJob`].
///
/// A message whose delivery marker exists is not sent again; this keeps
/// redeliveries after a worker crash from producing duplicates.
pub fn notification_handler(
    broker: Arc<dyn Broker>,
    sender: Arc<dyn NotificationSender>,
    settings: NotificationSettings,
) -> impl Fn(NotificationJob, JobContext) -> BoxFuture<'static, HandlerResult> + Send + Sync + 'static
{
    move |job: NotificationJob, ctx: JobContext| -> BoxFuture<'static, HandlerResult> {
        let broker = broker.clone();
        let sender = sender.clone();
        let settings = settings.clone();

        Box::pin(async move {
            let marker = job.sent_marker();
            if broker.has_marker(&marker).await? {
                info!(
                    job_id = %ctx.job_id,
                    request_key = %job.request_key,
                    "Notification already delivered, skipping send"
                );
                return Ok(json!(DUPLICATE_SUPPRESSED));
            }

            let from = job.from.as_deref().unwrap_or(&settings.from_address);
            sender.send(from, &job).await?;

            // The message is out; failing here would only resend it
            if let Err(e) = broker.set_marker(&marker, settings.dedupe_ttl).await {
                warn!(
                    job_id = %ctx.job_id,
                    error = %e,
                    "Could not record delivery marker"
                );
            }

            Ok(json!(SENT))
        })
    }
}

/// Enqueue and status surface for notifications.
///
/// Enqueue failures are logged and reported as `None` so the calling
/// operation can carry on without its notification.
pub struct NotificationService {
    queue: Arc<JobQueue>,
}

impl NotificationService {
    /// Subject of the welcome message.
    pub const WELCOME_SUBJECT: &'static str = "Your wishlist was created successfully!";

    /// Create a new service.
    pub fn new(queue: Arc<JobQueue>) -> Self {
        Self { queue }
    }

    /// Queue a notification with the queue defaults.
    pub async fn enqueue_notification(
        &self,
        to: &str,
        subject: &str,
        body: &str,
    ) -> Option<JobId> {
        self.submit(QueuedJob::new(NotificationJob::new(to, subject, body)))
            .await
    }

    /// Queue a prepared notification with options.
    pub async fn enqueue(&self, queued: QueuedJob<NotificationJob>) -> Option<JobId> {
        self.submit(queued).await
    }

    /// Queue the message sent after a wishlist is created.
    pub async fn enqueue_welcome_notification(&self, to: &str, list_name: &str) -> Option<JobId> {
        let job = NotificationJob::new(
            to,
            Self::WELCOME_SUBJECT,
            format!("Wishlist '{list_name}' created."),
        );

        self.submit(
            QueuedJob::new(job)
                .with_retry(RetryPolicy::new(
                    4,
                    vec![
                        Duration::from_secs(10),
                        Duration::from_secs(30),
                        Duration::from_secs(60),
                    ],
                ))
                .result_ttl(Duration::from_secs(24 * 60 * 60))
                .description(format!("Welcome email to {to}")),
        )
        .await
    }

    /// Look up a job.
    pub async fn get_job_status(&self, id: &JobId) -> JobResult<JobStatusView> {
        self.queue.status(id).await
    }

    /// Checks that the queue's broker answers.
    pub async fn ping(&self) -> JobResult<()> {
        self.queue.ping().await
    }

    async fn submit(&self, queued: QueuedJob<NotificationJob>) -> Option<JobId> {
        match self.queue.enqueue_with(queued).await {
            Ok(id) => Some(id),
            Err(e) => {
                warn!(
                    queue = %self.queue.name(),
                    error = %e,
                    "Failed to enqueue notification, continuing without it"
                );
                None
            }
        }
    }
}
