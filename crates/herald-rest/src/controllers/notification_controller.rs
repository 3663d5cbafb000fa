//! Notification enqueue controller.

use crate::responses::{ApiResult, AppError};
use crate::state::AppState;
use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use herald_jobs::{JobId, NotificationJob, QueuedJob};
use serde::{Deserialize, Serialize};
use tracing::info;
use validator::Validate;

/// Create the notifications router.
pub fn router() -> Router<AppState> {
    Router::new().route("/notifications", post(enqueue_notification))
}

/// Request body for a new notification.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct NotificationRequest {
    #[validate(email(message = "Recipient must be an email address"))]
    pub to: String,

    #[validate(length(min = 1, message = "Subject must not be empty"))]
    pub subject: String,

    pub body: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(email(message = "Sender must be an email address"))]
    pub from: Option<String>,
}

/// Answer to an enqueue request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnqueueResponse {
    /// Job ID, `null` when the queue was unavailable.
    pub job_id: Option<JobId>,
}

/// Accepts a notification for delivery.
///
/// Always `202` for a valid body: a queue outage leaves `job_id` empty
/// instead of failing the request.
async fn enqueue_notification(
    State(state): State<AppState>,
    Json(request): Json<NotificationRequest>,
) -> ApiResult<(StatusCode, Json<EnqueueResponse>)> {
    request.validate()?;

    let mut job = NotificationJob::new(request.to, request.subject, request.body);
    if let Some(from) = request.from {
        job = job.from_address(from);
    }

    let job_id = state.notifications.enqueue(QueuedJob::new(job)).await;
    if let Some(id) = &job_id {
        info!(job_id = %id, "Notification accepted");
    }

    Ok((StatusCode::ACCEPTED, Json(EnqueueResponse { job_id })))
}
