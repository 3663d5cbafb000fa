//! Schema migration runners.

use crate::pool::DatabasePool;
use async_trait::async_trait;
use herald_config::DatabaseConfig;
use herald_core::{HeraldError, HeraldResult};
use sqlx::migrate::Migrator;
use std::path::PathBuf;
use tracing::{error, info};

/// Outcome of a successful migration run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    /// Migrations known to the runner, when it can tell.
    pub migrations: Option<usize>,
    /// Captured output of the runner.
    pub output: String,
}

/// Applies pending schema migrations.
#[cfg_attr(any(test, feature = "mocks"), mockall::automock)]
#[async_trait]
pub trait MigrationRunner: Send + Sync {
    /// Apply every pending migration. Any error aborts startup.
    async fn run(&self) -> HeraldResult<MigrationReport>;

    /// Short description for logs.
    fn describe(&self) -> String;
}

/// Applies the SQL files of a directory with the sqlx migrator.
pub struct SqlxMigrationRunner {
    config: DatabaseConfig,
    dir: PathBuf,
}

impl SqlxMigrationRunner {
    /// Creates a runner for the configured migrations directory.
    #[must_use]
    pub fn new(config: &DatabaseConfig) -> Self {
        Self {
            config: config.clone(),
            dir: config.migrations_dir.clone(),
        }
    }
}

#[async_trait]
impl MigrationRunner for SqlxMigrationRunner {
    async fn run(&self) -> HeraldResult<MigrationReport> {
        if !self.dir.is_dir() {
            return Err(HeraldError::migration(format!(
                "migrations directory not found: {}",
                self.dir.display()
            )));
        }

        let migrator = Migrator::new(self.dir.as_path())
            .await
            .map_err(|e| HeraldError::migration(format!("Failed to load migrations: {e}")))?;
        let count = migrator.iter().count();

        info!(dir = %self.dir.display(), migrations = count, "Running database migrations...");
        let pool = DatabasePool::connect(&self.config).await?;
        let result = migrator.run(pool.inner()).await;
        pool.close().await;

        result.map_err(|e| HeraldError::migration(e.to_string()))?;
        info!("Database migrations completed");

        Ok(MigrationReport {
            migrations: Some(count),
            output: String::new(),
        })
    }

    fn describe(&self) -> String {
        format!("sqlx migrations in {}", self.dir.display())
    }
}

/// Runs an external migration tool as a child process.
pub struct CommandMigrationRunner {
    program: String,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
}

impl CommandMigrationRunner {
    /// Creates a runner from a command line (program followed by arguments).
    pub fn new(command: &[String]) -> HeraldResult<Self> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| HeraldError::configuration("migration command is empty"))?;

        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
            working_dir: None,
        })
    }

    /// Runs the command from this directory.
    #[must_use]
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }
}

#[async_trait]
impl MigrationRunner for CommandMigrationRunner {
    async fn run(&self) -> HeraldResult<MigrationReport> {
        info!(command = %self.describe(), "Running migration command...");

        let mut command = tokio::process::Command::new(&self.program);
        command.args(&self.args).kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }

        let output = command.output().await.map_err(|e| {
            HeraldError::migration(format!("Failed to start '{}': {e}", self.program))
        })?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if !output.status.success() {
            error!(status = %output.status, stderr = %stderr.trim(), "Migration command failed");
            return Err(HeraldError::migration(format!(
                "'{}' exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }

        info!("Migration command completed");
        if !stdout.trim().is_empty() {
            info!(output = %stdout.trim(), "Migration command output");
        }

        Ok(MigrationReport {
            migrations: None,
            output: stdout,
        })
    }

    fn describe(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Picks the runner the configuration asks for.
///
/// A configured migration command wins over the SQL directory.
pub fn migration_runner(config: &DatabaseConfig) -> HeraldResult<Box<dyn MigrationRunner>> {
    match &config.migration_command {
        Some(command) if !command.is_empty() => Ok(Box::new(CommandMigrationRunner::new(command)?)),
        _ => Ok(Box::new(SqlxMigrationRunner::new(config))),
    }
}
