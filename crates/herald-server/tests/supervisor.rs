//! Supervisor behaviour against real child processes.
#![cfg(unix)]

use herald_core::{exit_codes, HeraldError};
use herald_server::{SupervisionEnd, Supervisor};
use std::time::Duration;
use tokio::process::Command;
use tokio::time::Instant;

const GRACE: Duration = Duration::from_millis(500);

/// Time for a shell to install its traps before it is signalled.
const SETTLE: Duration = Duration::from_millis(300);

fn sh(script: &str) -> Command {
    let mut command = Command::new("sh");
    command.arg("-c").arg(script);
    command
}

fn supervisor() -> Supervisor {
    Supervisor::new(Duration::from_millis(50), GRACE)
}

#[tokio::test]
async fn test_graceful_children_stop_in_reverse_start_order() {
    let mut supervisor = supervisor();
    supervisor.spawn("worker", sh("exec sleep 30")).unwrap();
    supervisor.spawn("api", sh("exec sleep 30")).unwrap();
    tokio::time::sleep(SETTLE).await;

    let started = Instant::now();
    let report = supervisor.shutdown().await;

    let order: Vec<_> = report.stopped.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(order, ["api", "worker"]);
    assert!(!report.forced());
    assert_eq!(report.exit_code(), exit_codes::CLEAN);
    assert!(started.elapsed() < GRACE, "took {:?}", started.elapsed());
    assert!(supervisor.processes().is_empty());
}

#[tokio::test]
async fn test_child_ignoring_sigterm_is_killed_after_grace_window() {
    let mut supervisor = supervisor();
    supervisor.spawn("worker", sh("exec sleep 30")).unwrap();
    supervisor
        .spawn("api", sh("trap '' TERM; exec sleep 30"))
        .unwrap();
    tokio::time::sleep(SETTLE).await;

    let started = Instant::now();
    let report = supervisor.shutdown().await;
    let elapsed = started.elapsed();

    assert!(elapsed >= GRACE, "killed too early: {elapsed:?}");
    assert!(elapsed < GRACE * 2 + Duration::from_secs(1), "took {elapsed:?}");

    let api = &report.stopped[0];
    assert_eq!(api.name, "api");
    assert!(api.forced);
    assert!(!report.stopped[1].forced);
    assert_eq!(report.exit_code(), exit_codes::FAILURE);
}

#[tokio::test]
async fn test_child_exit_ends_supervision() {
    let mut supervisor = supervisor();
    supervisor.spawn("worker", sh("sleep 0.2; exit 3")).unwrap();
    supervisor.spawn("api", sh("exec sleep 30")).unwrap();

    let end = tokio::time::timeout(
        Duration::from_secs(5),
        supervisor.supervise(std::future::pending()),
    )
    .await
    .expect("supervision did not notice the exit");

    assert_eq!(
        end,
        SupervisionEnd::ChildExited {
            name: "worker".to_string(),
            code: Some(3),
        }
    );

    let report = supervisor.shutdown().await;
    assert_eq!(report.stopped.len(), 2);
    assert_eq!(report.stopped[1].name, "worker");
    assert_eq!(report.stopped[1].code, Some(3));
    assert!(!report.forced());
}

#[tokio::test]
async fn test_termination_request_ends_supervision() {
    let mut supervisor = supervisor();
    supervisor.spawn("worker", sh("exec sleep 30")).unwrap();

    let end = supervisor
        .supervise(tokio::time::sleep(Duration::from_millis(100)))
        .await;
    assert_eq!(end, SupervisionEnd::ShutdownRequested);
    assert!(supervisor.processes()[0].pid().is_some());

    supervisor.shutdown().await;
}

#[tokio::test]
async fn test_missing_program_is_a_process_error() {
    let mut supervisor = supervisor();
    let err = supervisor
        .spawn("worker", Command::new("/nonexistent/herald"))
        .unwrap_err();

    assert!(matches!(err, HeraldError::Process(_)));
    assert!(supervisor.processes().is_empty());
}
