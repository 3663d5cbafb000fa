//! Main application router.

use crate::{
    controllers::{health_controller, jobs_controller, notification_controller},
    middleware::logging_middleware,
    state::AppState,
};
use axum::{middleware, routing::get, Router};
use tower_http::trace::TraceLayer;
use tracing::info;

/// Creates the main application router.
pub fn create_router(state: AppState) -> Router {
    let api_router = Router::new()
        .merge(notification_controller::router())
        .merge(jobs_controller::router());

    let router = Router::new()
        // Health endpoints
        .merge(health_controller::router())
        // API v1
        .nest("/api/v1", api_router)
        // Root endpoint
        .route("/", get(root))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(logging_middleware));

    info!("Router created with notification and job status endpoints");
    router
}

/// Root endpoint handler.
async fn root() -> &'static str {
    "Herald API v1"
}
