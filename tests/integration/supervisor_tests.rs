//! Integration tests for the background process supervisor.
//!
//! Covers first-output delivery, the bounded observation window,
//! pre-output cancellation, id uniqueness, and spawn failures.
#![cfg(unix)]

use std::time::Duration;

use openperouter_mcp::orchestrator::command::LaunchOptions;
use openperouter_mcp::orchestrator::registry::ActiveCallRegistry;
use openperouter_mcp::orchestrator::supervisor::{launch, StartOutcome};
use openperouter_mcp::orchestrator::termination::stop_all;

use super::test_helpers::{policy, sh, wait_until_empty, window};

/// A command that prints a line and idles yields that exact line, and it
/// keeps running (registered) after the start returns.
#[tokio::test]
async fn first_line_is_delivered_and_command_keeps_running() {
    let registry = ActiveCallRegistry::new();
    let pending = launch(
        &registry,
        "1",
        &sh("echo ready; exec sleep 30"),
        &LaunchOptions::default(),
        window(Duration::from_secs(5)),
    )
    .await
    .expect("launch");

    assert_eq!(pending.call_id(), "1");
    assert!(pending.pid().is_some());
    assert_eq!(
        pending.first_output().await,
        StartOutcome::FirstOutput("ready".into())
    );
    assert!(registry.contains("1").await, "capture must outlive the start");

    let report = stop_all(&registry, policy(Duration::from_secs(5))).await;
    assert_eq!(report.signaled, 1);
    assert!(registry.is_empty().await);
}

/// Output written to stderr counts as first output.
#[tokio::test]
async fn stderr_line_is_observed() {
    let registry = ActiveCallRegistry::new();
    let pending = launch(
        &registry,
        "stderr",
        &sh("echo 'tshark: permission denied' >&2; exec sleep 30"),
        &LaunchOptions::default(),
        window(Duration::from_secs(5)),
    )
    .await
    .expect("launch");

    assert_eq!(
        pending.first_output().await,
        StartOutcome::FirstOutput("tshark: permission denied".into())
    );
    stop_all(&registry, policy(Duration::from_secs(5))).await;
}

/// A silent command hits the deadline; the result is not an error and the
/// command is still running afterwards.
#[tokio::test]
async fn silent_command_times_out() {
    let registry = ActiveCallRegistry::new();
    let started = tokio::time::Instant::now();
    let pending = launch(
        &registry,
        "quiet",
        &sh("exec sleep 30"),
        &LaunchOptions::default(),
        window(Duration::from_millis(300)),
    )
    .await
    .expect("launch");

    assert_eq!(pending.first_output().await, StartOutcome::TimedOut);
    assert!(started.elapsed() < Duration::from_secs(3));
    assert!(registry.contains("quiet").await);

    stop_all(&registry, policy(Duration::from_secs(5))).await;
    assert!(registry.is_empty().await);
}

/// A command that exits without writing anything reports "no output yet"
/// and removes itself from the registry.
#[tokio::test]
async fn exit_without_output_reports_no_output() {
    let registry = ActiveCallRegistry::new();
    let pending = launch(
        &registry,
        "silent-exit",
        &sh("exit 0"),
        &LaunchOptions::default(),
        window(Duration::from_secs(5)),
    )
    .await
    .expect("launch");

    assert_eq!(pending.first_output().await, StartOutcome::NoOutputYet);
    assert!(wait_until_empty(&registry, Duration::from_secs(5)).await);
}

/// Cancelling after registration but before any output yields the
/// cancelled outcome; the process is untouched until a stop removes it.
#[tokio::test]
async fn cancellation_before_output_is_reported() {
    let registry = ActiveCallRegistry::new();
    let pending = launch(
        &registry,
        "cancel-me",
        &sh("exec sleep 30"),
        &LaunchOptions::default(),
        window(Duration::from_secs(10)),
    )
    .await
    .expect("launch");

    let waiter = tokio::spawn(pending.first_output());
    assert!(registry.cancel("cancel-me").await);

    let outcome = tokio::time::timeout(Duration::from_secs(2), waiter)
        .await
        .expect("cancel releases the waiter promptly")
        .expect("task joined");
    assert_eq!(outcome, StartOutcome::Cancelled);
    assert!(registry.contains("cancel-me").await, "cancel does not kill");

    let report = stop_all(&registry, policy(Duration::from_secs(5))).await;
    assert_eq!(report.signaled, 1);
    assert!(registry.is_empty().await);
}

/// A second start under an active id is rejected and leaves one entry.
#[tokio::test]
async fn duplicate_id_is_rejected() {
    let registry = ActiveCallRegistry::new();
    let first = launch(
        &registry,
        "dup",
        &sh("exec sleep 30"),
        &LaunchOptions::default(),
        window(Duration::from_millis(100)),
    )
    .await
    .expect("first launch");

    let second = launch(
        &registry,
        "dup",
        &sh("exec sleep 30"),
        &LaunchOptions::default(),
        window(Duration::from_millis(100)),
    )
    .await;

    assert!(second.is_err());
    assert_eq!(registry.len().await, 1);
    assert_eq!(
        registry.snapshot().await[0].control.pid(),
        first.pid(),
        "original call must stay registered"
    );

    let report = stop_all(&registry, policy(Duration::from_secs(5))).await;
    assert_eq!(report.found, 1);
}

/// A command that cannot be spawned is never registered.
#[tokio::test]
async fn spawn_failure_registers_nothing() {
    let registry = ActiveCallRegistry::new();
    let result = launch(
        &registry,
        "missing",
        &openperouter_mcp::config::CommandSpec::new(
            "/nonexistent/capture-traffic",
            Vec::<String>::new(),
        ),
        &LaunchOptions::default(),
        window(Duration::from_secs(1)),
    )
    .await;

    assert!(result.is_err());
    assert!(registry.is_empty().await);
}

/// Output well past the pipe buffer is drained, so the command finishes
/// on its own and releases its entry.
#[tokio::test]
async fn heavy_output_is_drained_until_exit() {
    let registry = ActiveCallRegistry::new();
    let pending = launch(
        &registry,
        "chatty",
        &sh("echo start; seq 1 200000; seq 1 200000 >&2"),
        &LaunchOptions::default(),
        window(Duration::from_secs(5)),
    )
    .await
    .expect("launch");

    assert_eq!(
        pending.first_output().await,
        StartOutcome::FirstOutput("start".into())
    );
    assert!(
        wait_until_empty(&registry, Duration::from_secs(20)).await,
        "command stalled on a full pipe"
    );
}

/// An effectively unbounded observation window still delivers a line
/// written after a short delay.
#[tokio::test]
async fn unbounded_window_still_reports_late_line() {
    let registry = ActiveCallRegistry::new();
    let pending = launch(
        &registry,
        "patient",
        &sh("sleep 0.2; echo late; exec sleep 30"),
        &LaunchOptions::default(),
        window(Duration::MAX),
    )
    .await
    .expect("launch");

    let outcome = tokio::time::timeout(Duration::from_secs(5), pending.first_output())
        .await
        .expect("line arrives well before the test timeout");
    assert_eq!(outcome, StartOutcome::FirstOutput("late".into()));

    stop_all(&registry, policy(Duration::from_secs(5))).await;
    assert!(registry.is_empty().await);
}
