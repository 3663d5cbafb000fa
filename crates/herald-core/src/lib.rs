//! # Herald Core
//!
//! Foundational types shared by every Herald crate: the unified error
//! taxonomy, the process exit codes derived from it, and logging setup.

pub mod error;
pub mod result;
pub mod telemetry;

pub use error::*;
pub use result::*;
