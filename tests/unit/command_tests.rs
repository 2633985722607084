//! Unit tests for the external command handle.
//!
//! Uses `/bin/sh` one-liners as stand-in diagnostic commands.
#![cfg(unix)]

use std::time::Duration;

use openperouter_mcp::config::CommandSpec;
use openperouter_mcp::orchestrator::command::{
    run_to_completion, CommandHandle, LaunchOptions, Lifecycle,
};

fn sh(script: &str) -> CommandSpec {
    CommandSpec::new("sh", ["-c", script])
}

#[tokio::test]
async fn run_to_completion_merges_stdout_and_stderr() {
    let run = run_to_completion(&sh("echo out; echo err >&2"), &LaunchOptions::default())
        .await
        .expect("command runs");

    assert!(run.status.success());
    let mut lines: Vec<&str> = run.output.lines().collect();
    lines.sort_unstable();
    assert_eq!(lines, ["err", "out"]);
}

#[tokio::test]
async fn non_zero_exit_is_reported_in_status() {
    let run = run_to_completion(&sh("echo failing; exit 3"), &LaunchOptions::default())
        .await
        .expect("command runs");

    assert_eq!(run.status.code(), Some(3));
    assert_eq!(run.output, "failing\n");
}

#[tokio::test]
async fn launch_options_append_args_and_env() {
    let options = LaunchOptions {
        args: vec!["/tmp/captures".into()],
        env: vec![("CAPTURE_FILTER".into(), "arp or icmp".into())],
    };
    let run = run_to_completion(&sh("echo \"$0|$CAPTURE_FILTER\""), &options)
        .await
        .expect("command runs");

    assert_eq!(run.output, "/tmp/captures|arp or icmp\n");
}

#[tokio::test]
async fn spec_env_and_working_dir_are_applied() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut spec = sh("echo \"$LAB_NAME\"; pwd");
    spec.env.insert("LAB_NAME".into(), "kind".into());
    spec.working_dir = Some(dir.path().to_path_buf());

    let run = run_to_completion(&spec, &LaunchOptions::default())
        .await
        .expect("command runs");

    let canonical = dir.path().canonicalize().expect("canonical tempdir");
    let mut lines = run.output.lines();
    assert_eq!(lines.next(), Some("kind"));
    assert_eq!(
        lines.next().map(std::path::PathBuf::from),
        Some(canonical)
    );
}

#[tokio::test]
async fn invalid_utf8_is_decoded_lossily() {
    let run = run_to_completion(&sh("printf 'a\\377b\\n'"), &LaunchOptions::default())
        .await
        .expect("command runs");

    assert_eq!(run.output, "a\u{FFFD}b\n");
}

#[tokio::test]
async fn missing_program_fails_to_spawn() {
    let spec = CommandSpec::new("/nonexistent/openperouter-diag", Vec::<String>::new());
    let err = run_to_completion(&spec, &LaunchOptions::default())
        .await
        .unwrap_err();

    assert!(err.to_string().starts_with("process: failed to spawn"));
}

#[tokio::test]
async fn output_stream_can_only_be_taken_once() {
    let mut handle =
        CommandHandle::spawn(&sh("echo once"), &LaunchOptions::default()).expect("spawn");

    let mut lines = handle.take_lines().expect("first take");
    assert!(handle.take_lines().is_none());
    assert_eq!(lines.recv().await.as_deref(), Some("once"));

    let status = handle.wait().await.expect("reaped");
    assert!(status.success());
}

#[tokio::test]
async fn terminate_moves_lifecycle_and_stops_process() {
    let mut handle =
        CommandHandle::spawn(&sh("exec sleep 30"), &LaunchOptions::default()).expect("spawn");
    let _lines = handle.take_lines();
    let control = handle.control().clone();

    assert_eq!(control.lifecycle(), Lifecycle::Running);
    control.terminate().expect("signal delivered");
    assert_eq!(control.lifecycle(), Lifecycle::Signaled);

    let status = tokio::time::timeout(Duration::from_secs(5), handle.wait())
        .await
        .expect("exits after SIGTERM")
        .expect("reaped");
    assert!(!status.success());
    assert_eq!(control.lifecycle(), Lifecycle::Exited);
    assert!(control.terminate().is_err(), "reaped process must not be signaled");
}

#[tokio::test]
async fn force_kill_overrides_ignored_sigterm() {
    let mut handle = CommandHandle::spawn(
        &sh("trap '' TERM; echo armed; exec sleep 30"),
        &LaunchOptions::default(),
    )
    .expect("spawn");
    let mut lines = handle.take_lines().expect("lines");
    assert_eq!(lines.recv().await.as_deref(), Some("armed"));

    let control = handle.control().clone();
    control.terminate().expect("signal delivered");
    let wait = tokio::spawn(handle.wait());

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(!control.has_exited(), "SIGTERM should be ignored");

    control.force_kill();
    let status = tokio::time::timeout(Duration::from_secs(5), wait)
        .await
        .expect("killed in time")
        .expect("task joined")
        .expect("reaped");
    assert!(!status.success());
    assert!(control.has_exited());
}

/// The pid stays signalable until the handle reaps the process, and is
/// refused from then on.
#[tokio::test]
async fn pid_is_released_only_when_reaped() {
    let mut handle = CommandHandle::spawn(&sh("exit 0"), &LaunchOptions::default()).expect("spawn");
    let _lines = handle.take_lines();
    let control = handle.control().clone();

    // Exited but not yet reaped: the pid still belongs to our zombie.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!control.has_exited());
    control.terminate().expect("unreaped child can still be signaled");

    let status = tokio::time::timeout(Duration::from_secs(5), handle.wait())
        .await
        .expect("reaped in time")
        .expect("reaped");
    assert!(status.success());
    assert_eq!(control.lifecycle(), Lifecycle::Exited);
    assert!(control.terminate().is_err());
}
