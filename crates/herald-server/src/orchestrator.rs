//! Bootstrap and supervision of the worker and API processes.

use crate::supervisor::{SupervisionEnd, Supervisor};
use herald_config::AppConfig;
use herald_core::{Dependency, HeraldError, HeraldResult};
use herald_jobs::RedisProbe;
use herald_repository::{migration_runner, MigrationRunner, PostgresProbe};
use herald_resilience::{Probe, ReadinessGate};
use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{error, info, warn};

/// Orchestrator lifecycle. Phases only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum OrchestratorPhase {
    Init,
    DbReady,
    Migrated,
    BrokerReady,
    WorkersStarted,
    Supervising,
    ShuttingDown,
    Stopped,
}

impl fmt::Display for OrchestratorPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Init => "INIT",
            Self::DbReady => "DB_READY",
            Self::Migrated => "MIGRATED",
            Self::BrokerReady => "BROKER_READY",
            Self::WorkersStarted => "WORKERS_STARTED",
            Self::Supervising => "SUPERVISING",
            Self::ShuttingDown => "SHUTTING_DOWN",
            Self::Stopped => "STOPPED",
        };
        f.write_str(name)
    }
}

/// A child process the orchestrator starts after bootstrap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildSpec {
    /// Role name used in logs.
    pub name: String,
    /// Executable.
    pub program: PathBuf,
    /// Arguments.
    pub args: Vec<String>,
}

impl ChildSpec {
    /// Creates a child spec.
    pub fn new(name: impl Into<String>, program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            args,
        }
    }

    /// The worker and API roles of the running executable, in start order.
    pub fn herald_roles(config_dir: &Path) -> HeraldResult<Vec<Self>> {
        let exe = std::env::current_exe()?;
        let role = |name: &str| {
            Self::new(
                name,
                exe.clone(),
                vec![
                    "--config-dir".to_string(),
                    config_dir.display().to_string(),
                    name.to_string(),
                ],
            )
        };
        Ok(vec![role("worker"), role("api")])
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args);
        command
    }
}

/// Top-level process: readiness, migrations, then child supervision.
///
/// Any bootstrap failure ends the run before a child is started, with an
/// exit code naming the failed step.
pub struct Orchestrator {
    config: AppConfig,
    children: Vec<ChildSpec>,
    database_probe: Box<dyn Probe>,
    broker_probe: Box<dyn Probe>,
    migrations: Box<dyn MigrationRunner>,
    phase: OrchestratorPhase,
}

impl Orchestrator {
    /// Creates an orchestrator probing the configured PostgreSQL and Redis.
    pub fn new(config: AppConfig, children: Vec<ChildSpec>) -> HeraldResult<Self> {
        let migrations = migration_runner(&config.database)?;
        Ok(Self {
            database_probe: Box::new(PostgresProbe::new(&config.database)),
            broker_probe: Box::new(RedisProbe::new(&config.redis)),
            migrations,
            children,
            config,
            phase: OrchestratorPhase::Init,
        })
    }

    /// Replaces the database readiness probe.
    #[must_use]
    pub fn with_database_probe(mut self, probe: impl Probe + 'static) -> Self {
        self.database_probe = Box::new(probe);
        self
    }

    /// Replaces the broker readiness probe.
    #[must_use]
    pub fn with_broker_probe(mut self, probe: impl Probe + 'static) -> Self {
        self.broker_probe = Box::new(probe);
        self
    }

    /// Replaces the migration runner.
    #[must_use]
    pub fn with_migration_runner(mut self, runner: impl MigrationRunner + 'static) -> Self {
        self.migrations = Box::new(runner);
        self
    }

    /// Current phase.
    #[must_use]
    pub const fn phase(&self) -> OrchestratorPhase {
        self.phase
    }

    /// Runs to completion and returns the process exit code.
    ///
    /// `shutdown` is the external termination request; it is only watched
    /// once the children are running.
    pub async fn run<F>(&mut self, shutdown: F) -> i32
    where
        F: Future<Output = ()>,
    {
        info!(phase = %self.phase, app = %self.config.app.name, "Orchestrator starting");

        if let Err(e) = self.bootstrap().await {
            error!(phase = %self.phase, error = %e, code = e.error_code(), "Bootstrap failed");
            return e.exit_code();
        }

        let mut supervisor = Supervisor::from_config(&self.config.supervisor);
        let code = match self.start_children(&mut supervisor) {
            Ok(()) => {
                self.enter(OrchestratorPhase::Supervising);
                match supervisor.supervise(shutdown).await.into_error() {
                    Some(e) => {
                        error!(error = %e, "A supervised process is gone, stopping the rest");
                        Some(e.exit_code())
                    }
                    None => None,
                }
            }
            Err(e) => {
                error!(error = %e, "Could not start children");
                Some(e.exit_code())
            }
        };

        self.enter(OrchestratorPhase::ShuttingDown);
        let report = supervisor.shutdown().await;
        self.enter(OrchestratorPhase::Stopped);

        let code = code.unwrap_or_else(|| report.exit_code());
        info!(exit_code = code, forced = report.forced(), "Orchestrator stopped");
        code
    }

    /// Readiness gates and migrations, in order.
    pub async fn bootstrap(&mut self) -> HeraldResult<()> {
        let gate = ReadinessGate::new(self.config.readiness.retries, self.config.readiness.base_delay());

        gate.wait_until_ready("database", self.database_probe.as_ref())
            .await
            .map_err(|e| e.into_herald_error(Dependency::Database))?;
        self.enter(OrchestratorPhase::DbReady);

        info!(runner = %self.migrations.describe(), "Applying migrations");
        let report = self.migrations.run().await?;
        if let Some(count) = report.migrations {
            info!(migrations = count, "Schema is up to date");
        }
        self.enter(OrchestratorPhase::Migrated);

        gate.wait_until_ready("broker", self.broker_probe.as_ref())
            .await
            .map_err(|e| e.into_herald_error(Dependency::Broker))?;
        self.enter(OrchestratorPhase::BrokerReady);

        Ok(())
    }

    fn start_children(&mut self, supervisor: &mut Supervisor) -> HeraldResult<()> {
        if self.children.is_empty() {
            warn!("No child processes configured");
        }
        for spec in &self.children {
            supervisor.spawn(spec.name.clone(), spec.command())?;
        }
        self.enter(OrchestratorPhase::WorkersStarted);
        Ok(())
    }

    fn enter(&mut self, phase: OrchestratorPhase) {
        debug_assert!(phase > self.phase, "phase moved backwards");
        self.phase = phase;
        info!(phase = %phase, "Orchestrator phase changed");
    }
}

/// Runs the orchestrator role until it stops.
pub async fn run_orchestrator<F>(config: AppConfig, config_dir: &Path, shutdown: F) -> i32
where
    F: Future<Output = ()>,
{
    let orchestrator = ChildSpec::herald_roles(config_dir)
        .and_then(|children| Orchestrator::new(config, children));

    match orchestrator {
        Ok(mut orchestrator) => orchestrator.run(shutdown).await,
        Err(e) => {
            error!(error = %e, "Could not set up orchestrator");
            e.exit_code()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use herald_core::exit_codes;
    use herald_repository::{MigrationReport, MockMigrationRunner};
    use herald_resilience::ProbeError;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    /// Probe that fails `failures` times, then answers.
    #[derive(Clone)]
    struct ScriptedProbe {
        failures: u32,
        fatal: bool,
        calls: Arc<AtomicU32>,
    }

    impl ScriptedProbe {
        fn up() -> Self {
            Self::down_for(0)
        }

        fn down_for(failures: u32) -> Self {
            Self {
                failures,
                fatal: false,
                calls: Arc::default(),
            }
        }

        fn rejecting() -> Self {
            Self {
                failures: u32::MAX,
                fatal: true,
                calls: Arc::default(),
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Probe for ScriptedProbe {
        async fn probe(&self) -> Result<(), ProbeError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                if self.fatal {
                    return Err(ProbeError::fatal("password authentication failed"));
                }
                return Err(ProbeError::transient("connection refused"));
            }
            Ok(())
        }
    }

    fn config() -> AppConfig {
        let mut config = AppConfig::default();
        config.readiness.retries = 3;
        config.readiness.base_delay_ms = 1;
        config.supervisor.poll_interval_ms = 20;
        config.supervisor.shutdown_timeout_secs = 2;
        config
    }

    fn migrations_ok() -> MockMigrationRunner {
        let mut runner = MockMigrationRunner::new();
        runner.expect_describe().return_const("test migrations".to_string());
        runner.expect_run().times(1).returning(|| {
            Ok(MigrationReport {
                migrations: Some(2),
                output: String::new(),
            })
        });
        runner
    }

    fn sh(name: &str, script: &str) -> ChildSpec {
        ChildSpec::new(name, "sh", vec!["-c".to_string(), script.to_string()])
    }

    fn orchestrator(children: Vec<ChildSpec>) -> Orchestrator {
        Orchestrator::new(config(), children)
            .unwrap()
            .with_database_probe(ScriptedProbe::up())
            .with_broker_probe(ScriptedProbe::up())
    }

    #[test]
    fn test_phase_names() {
        assert_eq!(OrchestratorPhase::DbReady.to_string(), "DB_READY");
        assert_eq!(OrchestratorPhase::WorkersStarted.to_string(), "WORKERS_STARTED");
        assert!(OrchestratorPhase::Init < OrchestratorPhase::Stopped);
    }

    #[test]
    fn test_herald_roles_start_worker_before_api() {
        let roles = ChildSpec::herald_roles(Path::new("/etc/herald")).unwrap();
        let names: Vec<_> = roles.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, ["worker", "api"]);
        assert_eq!(roles[1].args, ["--config-dir", "/etc/herald", "api"]);
    }

    #[tokio::test]
    async fn test_unreachable_database_stops_before_migrations() {
        let database = ScriptedProbe::down_for(u32::MAX);
        let broker = ScriptedProbe::up();
        let mut runner = MockMigrationRunner::new();
        runner.expect_describe().return_const(String::new());
        runner.expect_run().times(0);

        let mut orchestrator = orchestrator(Vec::new())
            .with_database_probe(database.clone())
            .with_broker_probe(broker.clone())
            .with_migration_runner(runner);

        let code = orchestrator.run(std::future::pending()).await;

        assert_eq!(code, exit_codes::DATABASE_UNAVAILABLE);
        assert_eq!(orchestrator.phase(), OrchestratorPhase::Init);
        assert_eq!(database.calls(), 3);
        assert_eq!(broker.calls(), 0);
    }

    #[tokio::test]
    async fn test_database_coming_up_late_is_waited_for() {
        let database = ScriptedProbe::down_for(2);
        let mut orchestrator = orchestrator(Vec::new())
            .with_database_probe(database.clone())
            .with_migration_runner(migrations_ok());

        orchestrator.bootstrap().await.unwrap();

        assert_eq!(orchestrator.phase(), OrchestratorPhase::BrokerReady);
        assert_eq!(database.calls(), 3);
    }

    #[tokio::test]
    async fn test_migration_failure_is_fatal() {
        let broker = ScriptedProbe::up();
        let mut runner = MockMigrationRunner::new();
        runner.expect_describe().return_const("broken".to_string());
        runner
            .expect_run()
            .times(1)
            .returning(|| Err(HeraldError::migration("relation already exists")));

        let mut orchestrator = orchestrator(Vec::new())
            .with_broker_probe(broker.clone())
            .with_migration_runner(runner);

        let code = orchestrator.run(std::future::pending()).await;

        assert_eq!(code, exit_codes::MIGRATION_FAILED);
        assert_eq!(orchestrator.phase(), OrchestratorPhase::DbReady);
        assert_eq!(broker.calls(), 0);
    }

    #[tokio::test]
    async fn test_rejecting_broker_is_fatal_without_retries() {
        let broker = ScriptedProbe::rejecting();
        let mut orchestrator = orchestrator(Vec::new())
            .with_broker_probe(broker.clone())
            .with_migration_runner(migrations_ok());

        let code = orchestrator.run(std::future::pending()).await;

        assert_eq!(code, exit_codes::BROKER_UNAVAILABLE);
        assert_eq!(orchestrator.phase(), OrchestratorPhase::Migrated);
        assert_eq!(broker.calls(), 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_termination_request_stops_children_cleanly() {
        let mut orchestrator = orchestrator(vec![
            sh("worker", "exec sleep 30"),
            sh("api", "exec sleep 30"),
        ])
        .with_migration_runner(migrations_ok());

        let code = orchestrator
            .run(tokio::time::sleep(Duration::from_millis(200)))
            .await;

        assert_eq!(code, exit_codes::CLEAN);
        assert_eq!(orchestrator.phase(), OrchestratorPhase::Stopped);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_child_exit_ends_supervision() {
        let mut orchestrator = orchestrator(vec![
            sh("worker", "sleep 0.1; exit 3"),
            sh("api", "exec sleep 30"),
        ])
        .with_migration_runner(migrations_ok());

        let code = orchestrator.run(std::future::pending()).await;

        assert_eq!(code, exit_codes::CHILD_EXITED);
        assert_eq!(orchestrator.phase(), OrchestratorPhase::Stopped);
    }

    #[tokio::test]
    async fn test_unspawnable_child_still_shuts_down() {
        let mut orchestrator = orchestrator(vec![ChildSpec::new(
            "worker",
            "/nonexistent/herald-worker",
            Vec::new(),
        )])
        .with_migration_runner(migrations_ok());

        let code = orchestrator.run(std::future::pending()).await;

        assert_eq!(code, exit_codes::FAILURE);
        assert_eq!(orchestrator.phase(), OrchestratorPhase::Stopped);
    }
}
