//! # Herald Resilience
//!
//! Readiness gating for Herald processes.
//! A [`ReadinessGate`] probes a dependency with exponential backoff until it
//! answers or the retry budget runs out.

pub mod readiness;

pub use readiness::*;
