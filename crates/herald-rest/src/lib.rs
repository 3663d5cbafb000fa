//! # Herald REST
//!
//! API process for Herald.
//! Provides health endpoints, a notification enqueue endpoint and job status
//! lookup on top of the notification queue.

pub mod controllers;
pub mod middleware;
pub mod responses;
pub mod router;
pub mod state;

pub use router::*;
pub use state::*;
