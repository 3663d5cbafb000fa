//! Application state for Axum handlers.

use herald_jobs::NotificationService;
use std::sync::Arc;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub notifications: Arc<NotificationService>,
}

impl AppState {
    /// Creates a new application state.
    pub fn new(notifications: Arc<NotificationService>) -> Self {
        Self { notifications }
    }
}
