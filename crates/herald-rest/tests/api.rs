//! Endpoint behaviour against the in-memory broker.

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use herald_jobs::{JobQueue, JobStatus, JobStatusView, MemoryBroker, NotificationService, RetryPolicy};
use herald_rest::{create_router, AppState};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

fn app() -> (Arc<MemoryBroker>, Router) {
    let broker = Arc::new(MemoryBroker::new());
    let queue = Arc::new(JobQueue::new(
        broker.clone(),
        "notifications",
        RetryPolicy::default(),
        Duration::from_secs(3600),
    ));
    let state = AppState::new(Arc::new(NotificationService::new(queue)));
    (broker, create_router(state))
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn notification() -> Value {
    json!({ "to": "a@example.com", "subject": "Hi", "body": "Hello" })
}

#[tokio::test]
async fn test_health_endpoints_answer() {
    let (broker, app) = app();

    let (status, body) = send(&app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");

    assert_eq!(send(&app, get("/live")).await.0, StatusCode::OK);
    assert_eq!(send(&app, get("/ready")).await.0, StatusCode::OK);

    broker.set_available(false);
    assert_eq!(send(&app, get("/ready")).await.0, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(send(&app, get("/live")).await.0, StatusCode::OK);
}

#[tokio::test]
async fn test_enqueued_notification_is_queryable() {
    let (_broker, app) = app();

    let (status, body) = send(&app, post_json("/api/v1/notifications", &notification())).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let job_id = body["job_id"].as_str().unwrap().to_string();

    let (status, body) = send(&app, get(&format!("/api/v1/jobs/{job_id}"))).await;
    assert_eq!(status, StatusCode::OK);
    let view: JobStatusView = serde_json::from_value(body).unwrap();
    assert_eq!(view.status, JobStatus::Queued);
    assert_eq!(view.description.as_deref(), Some("Notification to a@example.com"));
}

#[tokio::test]
async fn test_enqueue_during_outage_still_accepts() {
    let (broker, app) = app();
    broker.set_available(false);

    let (status, body) = send(&app, post_json("/api/v1/notifications", &notification())).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body, json!({ "job_id": null }));
}

#[tokio::test]
async fn test_unknown_job_is_not_found_status() {
    let (_broker, app) = app();

    let (status, body) = send(&app, get("/api/v1/jobs/never-issued")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "id": "never-issued", "status": "not_found" }));
}

#[tokio::test]
async fn test_status_during_outage_is_503() {
    let (broker, app) = app();
    broker.set_available(false);

    let (status, body) = send(&app, get("/api/v1/jobs/anything")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["code"], "QUEUE_UNAVAILABLE");
}

#[tokio::test]
async fn test_invalid_recipient_is_rejected() {
    let (broker, app) = app();

    let body = json!({ "to": "not-an-address", "subject": "Hi", "body": "Hello" });
    let (status, body) = send(&app, post_json("/api/v1/notifications", &body)).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "BAD_REQUEST");
    assert_eq!(broker.ready_len("notifications"), 0);
}

#[tokio::test]
async fn test_empty_subject_and_bad_sender_are_reported_together() {
    let (broker, app) = app();

    let body = json!({
        "to": "a@example.com",
        "subject": "",
        "body": "Hello",
        "from": "nobody"
    });
    let (status, body) = send(&app, post_json("/api/v1/notifications", &body)).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    let message = body["error"].as_str().unwrap();
    assert!(message.contains("subject: Subject must not be empty"), "{message}");
    assert!(message.contains("from: Sender must be an email address"), "{message}");
    assert_eq!(broker.ready_len("notifications"), 0);
}
