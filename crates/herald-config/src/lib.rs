//! # Herald Config
//!
//! Configuration management for Herald.
//! Configuration is loaded once at process start from files and environment
//! variables, validated, and then handed to each component's constructor.

mod app_config;
mod loader;
mod validation;

pub use app_config::*;
pub use loader::*;
pub use validation::*;
