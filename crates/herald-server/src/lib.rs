//! # Herald Server Library
//!
//! Process roles of the `herald` binary.
//!
//! - [`Orchestrator`]: gates on the database and broker, applies migrations,
//!   then starts and supervises the worker and API children.
//! - [`run_worker`]: the worker process draining the notification queue.
//! - [`run_api`]: the HTTP API process.

pub mod orchestrator;
pub mod roles;
pub mod signal;
pub mod supervisor;

pub use orchestrator::{run_orchestrator, ChildSpec, Orchestrator, OrchestratorPhase};
pub use roles::{api_router, run_api, run_worker, run_worker_until};
pub use signal::shutdown_signal;
pub use supervisor::{ShutdownReport, StoppedProcess, SupervisedProcess, SupervisionEnd, Supervisor};
