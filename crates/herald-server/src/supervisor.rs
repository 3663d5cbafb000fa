//! Child process supervision.
//!
//! The supervisor owns its children exclusively: nothing else signals or
//! waits on them. It waits for exit events rather than polling, with a
//! periodic liveness tick as a backstop, and stops children in reverse
//! start order with a per-child grace window before `SIGKILL`.

use futures::future::select_all;
use herald_config::SupervisorConfig;
use herald_core::{exit_codes, HeraldError, HeraldResult};
use std::future::Future;
use std::io;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// A running child owned by the [`Supervisor`].
#[derive(Debug)]
pub struct SupervisedProcess {
    name: String,
    child: Child,
    started_at: Instant,
}

impl SupervisedProcess {
    /// Role name of the child.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// OS process id, `None` once the child has been reaped.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    /// Time since the child was spawned.
    #[must_use]
    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }
}

/// Why [`Supervisor::supervise`] returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisionEnd {
    /// A termination request arrived.
    ShutdownRequested,
    /// A child exited on its own.
    ChildExited {
        /// Role name of the child.
        name: String,
        /// Exit code, `None` when killed by a signal.
        code: Option<i32>,
    },
}

impl SupervisionEnd {
    /// Converts an unexpected child exit into an error.
    #[must_use]
    pub fn into_error(self) -> Option<HeraldError> {
        match self {
            Self::ShutdownRequested => None,
            Self::ChildExited { name, code } => Some(HeraldError::ChildExited { name, code }),
        }
    }
}

/// How one child ended during shutdown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoppedProcess {
    /// Role name of the child.
    pub name: String,
    /// Exit code, `None` when it ended by a signal.
    pub code: Option<i32>,
    /// Whether it had to be killed after the grace window.
    pub forced: bool,
}

/// Result of [`Supervisor::shutdown`], in stop order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Children in the order they were stopped.
    pub stopped: Vec<StoppedProcess>,
}

impl ShutdownReport {
    /// True if any child had to be killed.
    #[must_use]
    pub fn forced(&self) -> bool {
        self.stopped.iter().any(|p| p.forced)
    }

    /// Exit code reflecting a clean or forced shutdown.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        if self.forced() {
            exit_codes::FAILURE
        } else {
            exit_codes::CLEAN
        }
    }
}

/// Spawns, watches and stops child processes.
#[derive(Debug)]
pub struct Supervisor {
    processes: Vec<SupervisedProcess>,
    poll_interval: Duration,
    shutdown_timeout: Duration,
}

impl Supervisor {
    /// Creates a supervisor with the given liveness tick and grace window.
    #[must_use]
    pub fn new(poll_interval: Duration, shutdown_timeout: Duration) -> Self {
        Self {
            processes: Vec::new(),
            poll_interval: poll_interval.max(Duration::from_millis(1)),
            shutdown_timeout,
        }
    }

    /// Creates a supervisor from configuration.
    #[must_use]
    pub fn from_config(config: &SupervisorConfig) -> Self {
        Self::new(config.poll_interval(), config.shutdown_timeout())
    }

    /// Supervised children in start order.
    #[must_use]
    pub fn processes(&self) -> &[SupervisedProcess] {
        &self.processes
    }

    /// Starts a child and takes ownership of it. Returns its pid.
    ///
    /// Children inherit stdout and stderr, so their logs interleave with
    /// ours. On Unix each child gets its own process group: a terminal
    /// Ctrl+C reaches only the supervisor, which then stops the children
    /// in order.
    pub fn spawn(&mut self, name: impl Into<String>, mut command: Command) -> HeraldResult<u32> {
        let name = name.into();

        command.stdin(Stdio::null()).kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        let child = command
            .spawn()
            .map_err(|e| HeraldError::Process(format!("Failed to spawn {name}: {e}")))?;
        let pid = child.id().unwrap_or_default();

        info!(child = %name, pid, "Started child process");
        self.processes.push(SupervisedProcess {
            name,
            child,
            started_at: Instant::now(),
        });
        Ok(pid)
    }

    /// Waits until a child exits or `shutdown` resolves.
    ///
    /// Children are never restarted: the first exit ends supervision.
    pub async fn supervise<F>(&mut self, shutdown: F) -> SupervisionEnd
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                () = &mut shutdown => {
                    info!("Termination requested");
                    return SupervisionEnd::ShutdownRequested;
                }
                (index, result) = wait_any(&mut self.processes) => {
                    return self.exited(index, result);
                }
                _ = ticker.tick() => {
                    if let Some(end) = self.check_liveness() {
                        return end;
                    }
                }
            }
        }
    }

    /// Stops every child still running, last started first.
    ///
    /// Each child gets `SIGTERM` and the grace window to exit; a child
    /// still alive afterwards is killed.
    pub async fn shutdown(&mut self) -> ShutdownReport {
        let mut report = ShutdownReport::default();

        while let Some(mut process) = self.processes.pop() {
            let stopped = stop(&mut process, self.shutdown_timeout).await;
            report.stopped.push(stopped);
        }

        if report.forced() {
            warn!("Shutdown finished, some children had to be killed");
        } else {
            info!("All children stopped");
        }
        report
    }

    fn exited(&self, index: usize, result: io::Result<ExitStatus>) -> SupervisionEnd {
        let process = &self.processes[index];
        let code = match result {
            Ok(status) => {
                error!(
                    child = %process.name,
                    status = %status,
                    uptime = ?process.uptime(),
                    "Child process exited unexpectedly"
                );
                status.code()
            }
            Err(e) => {
                error!(child = %process.name, error = %e, "Lost track of child process");
                None
            }
        };

        SupervisionEnd::ChildExited {
            name: process.name.clone(),
            code,
        }
    }

    fn check_liveness(&mut self) -> Option<SupervisionEnd> {
        for index in 0..self.processes.len() {
            let result = match self.processes[index].child.try_wait() {
                Ok(None) => continue,
                Ok(Some(status)) => Ok(status),
                Err(e) => Err(e),
            };
            return Some(self.exited(index, result));
        }
        debug!(children = self.processes.len(), "Children alive");
        None
    }
}

/// Resolves with the first child to exit. Pending forever with no children.
async fn wait_any(processes: &mut [SupervisedProcess]) -> (usize, io::Result<ExitStatus>) {
    if processes.is_empty() {
        return std::future::pending().await;
    }

    let waits = processes.iter_mut().map(|p| Box::pin(p.child.wait()));
    let (result, index, _) = select_all(waits).await;
    (index, result)
}

async fn stop(process: &mut SupervisedProcess, grace: Duration) -> StoppedProcess {
    let name = process.name.clone();

    if let Ok(Some(status)) = process.child.try_wait() {
        info!(child = %name, status = %status, "Child already exited");
        return StoppedProcess {
            name,
            code: status.code(),
            forced: false,
        };
    }

    info!(child = %name, pid = ?process.pid(), timeout = ?grace, "Stopping child process");
    if let Err(e) = request_stop(&mut process.child) {
        warn!(child = %name, error = %e, "Could not signal child");
    }

    match tokio::time::timeout(grace, process.child.wait()).await {
        Ok(Ok(status)) => {
            info!(child = %name, status = %status, "Child stopped");
            StoppedProcess {
                name,
                code: status.code(),
                forced: false,
            }
        }
        Ok(Err(e)) => {
            warn!(child = %name, error = %e, "Waiting on child failed, killing it");
            kill(process).await
        }
        Err(_) => {
            warn!(child = %name, timeout = ?grace, "Child did not stop in time, killing it");
            kill(process).await
        }
    }
}

async fn kill(process: &mut SupervisedProcess) -> StoppedProcess {
    if let Err(e) = process.child.kill().await {
        error!(child = %process.name, error = %e, "Failed to kill child");
    }
    let code = process
        .child
        .try_wait()
        .ok()
        .flatten()
        .and_then(|status| status.code());

    StoppedProcess {
        name: process.name.clone(),
        code,
        forced: true,
    }
}

/// Asks a child to exit gracefully.
#[cfg(unix)]
#[allow(unsafe_code)]
fn request_stop(child: &mut Child) -> io::Result<()> {
    let Some(pid) = child.id() else {
        return Ok(());
    };
    let pid = libc::pid_t::try_from(pid)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pid out of range"))?;

    // SAFETY: kill(2) takes plain integers; the pid belongs to our unreaped child.
    let rc = unsafe { libc::kill(pid, libc::SIGTERM) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
fn request_stop(child: &mut Child) -> io::Result<()> {
    child.start_kill()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_exit_code() {
        let mut report = ShutdownReport::default();
        assert_eq!(report.exit_code(), exit_codes::CLEAN);

        report.stopped.push(StoppedProcess {
            name: "api".into(),
            code: None,
            forced: false,
        });
        assert_eq!(report.exit_code(), exit_codes::CLEAN);

        report.stopped.push(StoppedProcess {
            name: "worker".into(),
            code: None,
            forced: true,
        });
        assert!(report.forced());
        assert_eq!(report.exit_code(), exit_codes::FAILURE);
    }

    #[test]
    fn test_child_exit_becomes_error() {
        assert!(SupervisionEnd::ShutdownRequested.into_error().is_none());

        let err = SupervisionEnd::ChildExited {
            name: "worker".into(),
            code: Some(3),
        }
        .into_error()
        .unwrap();
        assert_eq!(err.exit_code(), exit_codes::CHILD_EXITED);
    }

    #[test]
    fn test_config_is_applied() {
        let supervisor = Supervisor::from_config(&SupervisorConfig::default());
        assert_eq!(supervisor.poll_interval, Duration::from_secs(1));
        assert_eq!(supervisor.shutdown_timeout, Duration::from_secs(5));
        assert!(supervisor.processes().is_empty());
    }

    #[tokio::test]
    async fn test_supervise_without_children_waits_for_shutdown() {
        let mut supervisor = Supervisor::new(Duration::from_millis(10), Duration::from_secs(1));
        let end = supervisor
            .supervise(tokio::time::sleep(Duration::from_millis(50)))
            .await;
        assert_eq!(end, SupervisionEnd::ShutdownRequested);
    }
}
