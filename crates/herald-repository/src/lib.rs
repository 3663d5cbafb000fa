//! # Herald Repository
//!
//! Relational store collaborators used while bootstrapping:
//!
//! ```text
//! Orchestrator
//!   ↓  ReadinessGate + PostgresProbe   (server reachable, database created)
//!   ↓  Box<dyn MigrationRunner>        (sqlx migrator or external command)
//! PostgreSQL
//! ```

pub mod database;
pub mod migration;
pub mod pool;
pub mod target;

pub use database::{ensure_database_exists, DatabaseStatus, PostgresProbe};
#[cfg(any(test, feature = "mocks"))]
pub use migration::MockMigrationRunner;
pub use migration::{
    migration_runner, CommandMigrationRunner, MigrationReport, MigrationRunner,
    SqlxMigrationRunner,
};
pub use pool::DatabasePool;
pub use target::DatabaseTarget;
