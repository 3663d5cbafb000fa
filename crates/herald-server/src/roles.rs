//! Worker and API process roles.

use crate::signal::shutdown_signal;
use axum::Router;
use herald_config::AppConfig;
use herald_core::{Dependency, HeraldError, HeraldResult};
use herald_jobs::{
    notification_handler, register_metrics, Broker, JobError, JobQueue, LogSender,
    NotificationJob, NotificationService, NotificationSettings, RedisBroker, Worker,
    WorkerSettings,
};
use herald_rest::{create_router, AppState};
use std::future::Future;
use std::sync::Arc;
use tower_http::timeout::TimeoutLayer;
use tracing::info;

fn job_error(err: JobError) -> HeraldError {
    match err {
        JobError::QueueUnavailable(message) => HeraldError::unavailable(Dependency::Broker, message),
        JobError::Configuration(message) => HeraldError::configuration(message),
        other => HeraldError::internal(other.to_string()),
    }
}

fn queue(config: &AppConfig) -> HeraldResult<(Arc<dyn Broker>, Arc<JobQueue>)> {
    let broker: Arc<dyn Broker> = Arc::new(RedisBroker::connect(&config.redis).map_err(job_error)?);
    let queue = Arc::new(JobQueue::from_config(broker.clone(), &config.queue));
    Ok((broker, queue))
}

/// Runs the worker process until a termination signal arrives.
pub async fn run_worker(config: &AppConfig) -> HeraldResult<()> {
    run_worker_until(config, shutdown_signal()).await
}

/// Runs the worker process until `shutdown` resolves.
///
/// The job in progress when `shutdown` fires is finished and its outcome
/// stored before this returns.
pub async fn run_worker_until<F>(config: &AppConfig, shutdown: F) -> HeraldResult<()>
where
    F: Future<Output = ()>,
{
    let (broker, queue) = queue(config)?;
    queue.ping().await.map_err(job_error)?;
    register_metrics();

    let worker = Worker::new(
        queue.clone(),
        WorkerSettings::from_config(&config.worker, &config.queue),
    );
    worker.register::<NotificationJob, _>(notification_handler(
        broker,
        Arc::new(LogSender),
        NotificationSettings {
            from_address: config.notification.from_address.clone(),
            dedupe_ttl: config.queue.dedupe_ttl(),
        },
    ));

    info!(worker_id = %worker.id(), queue = %queue.name(), "Worker listening");

    let run = worker.run();
    tokio::pin!(run);

    tokio::select! {
        result = &mut run => {
            result.map_err(job_error)?;
            return Ok(());
        }
        () = shutdown => {
            info!(worker_id = %worker.id(), "Stopping worker after the current job");
            worker.stop();
        }
    }

    run.await.map_err(job_error)?;
    Ok(())
}

/// Builds the API router over the configured broker.
///
/// Connections are opened lazily, so this succeeds with the broker down.
pub fn api_router(config: &AppConfig) -> HeraldResult<Router> {
    let (_broker, queue) = queue(config)?;
    let state = AppState::new(Arc::new(NotificationService::new(queue)));

    Ok(create_router(state).layer(TimeoutLayer::new(config.server.request_timeout())))
}

/// Serves the API until a termination signal arrives, then drains
/// open connections.
pub async fn run_api(config: &AppConfig) -> HeraldResult<()> {
    let router = api_router(config)?;

    let addr = config.server.addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| HeraldError::internal(format!("Failed to bind {addr}: {e}")))?;

    info!("Starting REST server on http://{}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| HeraldError::internal(format!("REST server error: {e}")))?;

    info!("API server shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use herald_core::exit_codes;
    use tower::ServiceExt;

    fn offline_config() -> AppConfig {
        let mut config = AppConfig::default();
        // Nothing listens on port 1
        config.redis.url = "redis://127.0.0.1:1".to_string();
        config.redis.connect_timeout_secs = 1;
        config
    }

    async fn get(router: &Router, uri: &str) -> StatusCode {
        router
            .clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
            .status()
    }

    #[test]
    fn test_job_errors_map_to_exit_codes() {
        let err = job_error(JobError::QueueUnavailable("refused".into()));
        assert_eq!(err.exit_code(), exit_codes::BROKER_UNAVAILABLE);

        let err = job_error(JobError::Configuration("bad url".into()));
        assert_eq!(err.exit_code(), exit_codes::CONFIGURATION);

        let err = job_error(JobError::execution("boom"));
        assert_eq!(err.exit_code(), exit_codes::FAILURE);
    }

    #[tokio::test]
    async fn test_api_router_builds_with_broker_down() {
        let router = api_router(&offline_config()).unwrap();

        assert_eq!(get(&router, "/live").await, StatusCode::OK);
        assert_eq!(get(&router, "/ready").await, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_worker_without_broker_reports_it() {
        let err = run_worker_until(&offline_config(), std::future::pending())
            .await
            .unwrap_err();
        assert_eq!(err.exit_code(), exit_codes::BROKER_UNAVAILABLE);
    }
}
