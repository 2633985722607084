//! Process supervisor for background commands.
//!
//! [`launch`] spawns a command, registers it, and hands it to a detached
//! watcher task that outlives the request. The watcher reports the first
//! line of output, keeps draining the pipes for the life of the process,
//! reaps it, and releases the registry entry. [`PendingStart::first_output`]
//! is the bounded wait a start request blocks on.

use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use super::command::{CommandHandle, LaunchOptions, Lifecycle};
use super::registry::ActiveCallRegistry;
use crate::config::{CommandSpec, TimeoutConfig};
use crate::{AppError, Result};

/// Time and line budget for surfacing early output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObservationWindow {
    /// How long the start request waits for a first line.
    pub deadline: Duration,
    /// Lines written to the debug log before output is silently discarded.
    pub max_lines: usize,
}

impl From<&TimeoutConfig> for ObservationWindow {
    fn from(timeouts: &TimeoutConfig) -> Self {
        Self {
            deadline: timeouts.observation(),
            max_lines: timeouts.observation_max_lines,
        }
    }
}

/// How a start request's bounded wait ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    /// The command wrote this line first.
    FirstOutput(String),
    /// The command closed its output without writing anything.
    NoOutputYet,
    /// Nothing arrived before the deadline.
    TimedOut,
    /// The call was cancelled before any output appeared.
    Cancelled,
}

/// What the watcher saw during the observation window.
#[derive(Debug)]
enum Observation {
    Line(String),
    Silent,
    Pending,
}

/// A registered call whose first output has not been collected yet.
#[derive(Debug)]
pub struct PendingStart {
    call_id: String,
    pid: Option<u32>,
    first_output: oneshot::Receiver<Observation>,
    cancel: CancellationToken,
    deadline: Duration,
}

impl PendingStart {
    /// Invocation identifier the call was registered under.
    #[must_use]
    pub fn call_id(&self) -> &str {
        &self.call_id
    }

    /// Process id of the launched command.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Wait for the first line, the deadline, or cancellation.
    ///
    /// The command keeps running regardless of which one wins.
    pub async fn first_output(self) -> StartOutcome {
        let Self {
            mut first_output,
            cancel,
            deadline,
            ..
        } = self;

        tokio::select! {
            biased;
            observed = &mut first_output => match observed {
                Ok(Observation::Line(line)) => StartOutcome::FirstOutput(line),
                Ok(Observation::Silent) => StartOutcome::NoOutputYet,
                Ok(Observation::Pending) | Err(_) => StartOutcome::TimedOut,
            },
            () = tokio::time::sleep(deadline) => StartOutcome::TimedOut,
            () = cancel.cancelled() => StartOutcome::Cancelled,
        }
    }
}

/// Spawn `spec` as a background call registered under `call_id`.
///
/// The entry is in the registry before this returns, so a stop issued at
/// any later point will find it. If spawning fails nothing is registered.
///
/// # Errors
///
/// Returns `AppError::Process` if `call_id` is already active or the
/// command cannot be started.
pub async fn launch(
    registry: &ActiveCallRegistry,
    call_id: &str,
    spec: &CommandSpec,
    options: &LaunchOptions,
    window: ObservationWindow,
) -> Result<PendingStart> {
    if registry.contains(call_id).await {
        return Err(AppError::Process(format!(
            "a call with id {call_id} is already active"
        )));
    }

    let cancel = CancellationToken::new();
    let mut handle = CommandHandle::spawn(spec, options)?;
    let lines = handle
        .take_lines()
        .ok_or_else(|| AppError::Process("command output already taken".into()))?;
    let control = handle.control().clone();

    let serial = match registry
        .register(call_id, cancel.clone(), control.clone())
        .await
    {
        Ok(serial) => serial,
        Err(err) => {
            // Lost a race for the id; this process was never visible to stop.
            control.force_kill();
            if let Err(wait_err) = handle.wait().await {
                warn!(call_id, %wait_err, "failed to reap rejected command");
            }
            return Err(err);
        }
    };

    info!(call_id, pid = ?control.pid(), program = %spec.program, "background call registered");

    let (first_tx, first_rx) = oneshot::channel();
    let span = info_span!("active_call", call_id = %call_id, pid = ?control.pid());
    tokio::spawn(
        watch_call(
            registry.clone(),
            call_id.to_owned(),
            serial,
            cancel.clone(),
            handle,
            lines,
            first_tx,
            window,
        )
        .instrument(span),
    );

    Ok(PendingStart {
        call_id: call_id.to_owned(),
        pid: control.pid(),
        first_output: first_rx,
        cancel,
        deadline: window.deadline,
    })
}

/// Own the process until it exits, then release its registry entry.
#[allow(clippy::too_many_arguments)]
async fn watch_call(
    registry: ActiveCallRegistry,
    call_id: String,
    serial: u64,
    cancel: CancellationToken,
    handle: CommandHandle,
    lines: mpsc::Receiver<String>,
    first_tx: oneshot::Sender<Observation>,
    window: ObservationWindow,
) {
    let control = handle.control().clone();
    let (observed_tx, observed_rx) = oneshot::channel();
    tokio::spawn(observe_and_drain(lines, window, first_tx, observed_tx).in_current_span());

    match handle.wait().await {
        Ok(status) => info!(%status, "background call exited"),
        Err(err) => warn!(%err, "background call could not be reaped"),
    }

    // The first report must be settled before the waiter can see cancellation.
    let _ = observed_rx.await;

    if !registry.remove(&call_id, serial).await {
        debug!("registry entry already gone");
    }
    cancel.cancel();
    control.advance(Lifecycle::Released);
}

/// Report the first line within the window, then discard output until EOF.
async fn observe_and_drain(
    mut lines: mpsc::Receiver<String>,
    window: ObservationWindow,
    first_tx: oneshot::Sender<Observation>,
    observed_tx: oneshot::Sender<()>,
) {
    let observation = match tokio::time::timeout(window.deadline, lines.recv()).await {
        Ok(Some(line)) => Observation::Line(line),
        Ok(None) => Observation::Silent,
        Err(_) => Observation::Pending,
    };

    let mut logged = 0;
    if let Observation::Line(line) = &observation {
        debug!(line = %line, "observed output");
        logged += 1;
    }

    // The waiter may already have timed out.
    let _ = first_tx.send(observation);
    let _ = observed_tx.send(());

    while let Some(line) = lines.recv().await {
        if logged < window.max_lines {
            debug!(line = %line, "observed output");
            logged += 1;
        }
    }
    debug!("command output closed");
}
