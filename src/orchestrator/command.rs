//! External command handle.
//!
//! Wraps a spawned OS process behind a narrow surface: spawn it, read its
//! merged stdout/stderr as lines, signal it, and wait for it to be reaped.
//! The [`ProcessControl`] half is cheap to clone so the registry can keep
//! one while the owning watcher task holds the [`CommandHandle`] itself.

use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::CommandSpec;
use crate::{AppError, Result};

/// Capacity of the merged output line channel.
const LINE_BUFFER: usize = 64;

/// Fallback exit check interval when no `SIGCHLD` arrives.
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Lifecycle of a supervised process. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Lifecycle {
    /// Spawned and not yet asked to stop.
    Running,
    /// Graceful termination signal delivered.
    Signaled,
    /// Forced kill requested after the grace period elapsed.
    ForceKilled,
    /// Process exited and was reaped.
    Exited,
    /// Owning watcher removed the call from the registry.
    Released,
}

/// Per-call additions to a [`CommandSpec`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaunchOptions {
    /// Positional arguments appended after the command's fixed arguments.
    pub args: Vec<String>,
    /// Environment overrides applied after the command's own `env`.
    pub env: Vec<(String, String)>,
}

/// Shared control surface for a spawned process.
#[derive(Debug, Clone)]
pub struct ProcessControl {
    pid: Option<u32>,
    /// Signalable pid. Cleared in the same critical section that reaps the
    /// child, so a signal never reaches a recycled pid.
    live_pid: Arc<Mutex<Option<u32>>>,
    state: Arc<watch::Sender<Lifecycle>>,
    kill: CancellationToken,
}

impl ProcessControl {
    pub(crate) fn new(pid: Option<u32>) -> Self {
        let (state, _) = watch::channel(Lifecycle::Running);
        Self {
            pid,
            live_pid: Arc::new(Mutex::new(pid)),
            state: Arc::new(state),
            kill: CancellationToken::new(),
        }
    }

    /// OS process identifier, if the platform reported one.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn lifecycle(&self) -> Lifecycle {
        *self.state.borrow()
    }

    /// Whether the process has already been reaped.
    #[must_use]
    pub fn has_exited(&self) -> bool {
        self.lifecycle() >= Lifecycle::Exited
    }

    /// Deliver a graceful termination signal (`SIGTERM`).
    ///
    /// # Errors
    ///
    /// Returns `AppError::Process` if the process was already reaped, has no
    /// pid, or the signal could not be delivered.
    pub fn terminate(&self) -> Result<()> {
        let live_pid = self.lock_live_pid();
        if self.has_exited() {
            return Err(AppError::Process("process already exited".into()));
        }
        let pid = live_pid.ok_or_else(|| {
            if self.pid.is_some() {
                AppError::Process("process already reaped".into())
            } else {
                AppError::Process("process id unavailable".into())
            }
        })?;
        send_sigterm(pid)?;
        drop(live_pid);
        self.advance(Lifecycle::Signaled);
        Ok(())
    }

    /// Request a forced kill. The owning [`CommandHandle::wait`] performs it.
    pub fn force_kill(&self) {
        self.kill.cancel();
        self.advance(Lifecycle::ForceKilled);
    }

    /// Resolve once the call has been reaped and released from the registry.
    pub async fn released(&self) {
        let mut rx = self.state.subscribe();
        // The sender is owned by `self`, so this only returns on release.
        let _ = rx.wait_for(|state| *state == Lifecycle::Released).await;
    }

    fn lock_live_pid(&self) -> MutexGuard<'_, Option<u32>> {
        self.live_pid.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn advance(&self, next: Lifecycle) {
        self.state.send_if_modified(|current| {
            if next > *current {
                *current = next;
                true
            } else {
                false
            }
        });
    }
}

#[cfg(unix)]
fn send_sigterm(pid: u32) -> Result<()> {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let raw = i32::try_from(pid)
        .map_err(|_| AppError::Process(format!("pid {pid} out of range")))?;
    kill(Pid::from_raw(raw), Signal::SIGTERM)
        .map_err(|err| AppError::Process(format!("failed to send SIGTERM to pid {pid}: {err}")))
}

#[cfg(not(unix))]
fn send_sigterm(pid: u32) -> Result<()> {
    Err(AppError::Process(format!(
        "graceful termination of pid {pid} is not supported on this platform"
    )))
}

/// Owned handle to a spawned external command.
#[derive(Debug)]
pub struct CommandHandle {
    child: Child,
    control: ProcessControl,
    lines: Option<mpsc::Receiver<String>>,
}

impl CommandHandle {
    /// Spawn `spec` with `options` layered on top.
    ///
    /// stdin is closed, stdout and stderr are piped and merged line-wise.
    /// The child is killed if the handle is dropped without being waited on.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Process` if the OS refuses to start the process or
    /// its pipes cannot be captured.
    pub fn spawn(spec: &CommandSpec, options: &LaunchOptions) -> Result<Self> {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .args(&options.args)
            .envs(&spec.env)
            .envs(options.env.iter().map(|(key, value)| (key, value)));
        if let Some(dir) = &spec.working_dir {
            cmd.current_dir(dir);
        }
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|err| AppError::Process(format!("failed to spawn {}: {err}", spec.program)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AppError::Process("failed to capture stdout".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| AppError::Process("failed to capture stderr".into()))?;

        let (tx, rx) = mpsc::channel(LINE_BUFFER);
        tokio::spawn(forward_lines(stdout, tx.clone()));
        tokio::spawn(forward_lines(stderr, tx));

        let control = ProcessControl::new(child.id());
        debug!(program = %spec.program, pid = ?control.pid(), "command spawned");

        Ok(Self {
            child,
            control,
            lines: Some(rx),
        })
    }

    /// Control surface shared with the registry.
    #[must_use]
    pub fn control(&self) -> &ProcessControl {
        &self.control
    }

    /// Take the merged output stream. Yields `None` after the first call.
    pub fn take_lines(&mut self) -> Option<mpsc::Receiver<String>> {
        self.lines.take()
    }

    /// Wait for the process to exit, honoring forced-kill requests.
    ///
    /// Consumes the handle so the process is reaped exactly once. Reaping
    /// happens under the control's pid lock, so [`ProcessControl::terminate`]
    /// never signals a pid that has already been released to the OS.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Process` if polling the child fails.
    pub async fn wait(mut self) -> Result<ExitStatus> {
        let kill = self.control.kill.clone();
        let mut exits = ExitNotifier::new();
        let mut kill_sent = false;

        loop {
            if let Some(status) = self.try_reap()? {
                return Ok(status);
            }

            tokio::select! {
                () = kill.cancelled(), if !kill_sent => {
                    kill_sent = true;
                    if let Err(err) = self.child.start_kill() {
                        warn!(pid = ?self.control.pid(), %err, "failed to kill command");
                    }
                }
                () = exits.next() => {}
            }
        }
    }

    fn try_reap(&mut self) -> Result<Option<ExitStatus>> {
        let mut live_pid = self.control.lock_live_pid();
        let status = self
            .child
            .try_wait()
            .map_err(|err| AppError::Process(format!("failed to wait for command: {err}")))?;
        if status.is_some() {
            *live_pid = None;
            self.control.advance(Lifecycle::Exited);
        }
        Ok(status)
    }
}

/// Wakes the reaper when a child may have exited.
struct ExitNotifier {
    #[cfg(unix)]
    sigchld: Option<tokio::signal::unix::Signal>,
    poll: tokio::time::Interval,
}

impl ExitNotifier {
    fn new() -> Self {
        let mut poll = tokio::time::interval(EXIT_POLL_INTERVAL);
        poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        Self {
            #[cfg(unix)]
            sigchld: tokio::signal::unix::signal(tokio::signal::unix::SignalKind::child())
                .map_err(|err| debug!(%err, "SIGCHLD unavailable, polling for exit"))
                .ok(),
            poll,
        }
    }

    #[cfg(unix)]
    async fn next(&mut self) {
        match self.sigchld.as_mut() {
            Some(sigchld) => {
                tokio::select! {
                    _ = sigchld.recv() => {}
                    _ = self.poll.tick() => {}
                }
            }
            None => {
                self.poll.tick().await;
            }
        }
    }

    #[cfg(not(unix))]
    async fn next(&mut self) {
        self.poll.tick().await;
    }
}

/// Result of a command that ran to completion.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Exit status of the process.
    pub status: ExitStatus,
    /// Merged stdout/stderr, one `\n`-terminated line per output line.
    pub output: String,
}

/// Run `spec` to completion, collecting its merged output.
///
/// # Errors
///
/// Returns `AppError::Process` if the command cannot be spawned or reaped.
pub async fn run_to_completion(spec: &CommandSpec, options: &LaunchOptions) -> Result<CommandOutput> {
    let mut handle = CommandHandle::spawn(spec, options)?;
    let mut lines = handle
        .take_lines()
        .ok_or_else(|| AppError::Process("command output already taken".into()))?;

    let collect = async move {
        let mut output = String::new();
        while let Some(line) = lines.recv().await {
            output.push_str(&line);
            output.push('\n');
        }
        output
    };

    let (output, status) = tokio::join!(collect, handle.wait());
    Ok(CommandOutput {
        status: status?,
        output,
    })
}

/// Forward `stream` into `tx` line by line, decoding lossily.
///
/// Once the receiver is gone the rest of the stream is discarded rather than
/// left unread, so the child never blocks on a full pipe.
async fn forward_lines<R>(stream: R, tx: mpsc::Sender<String>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf)
                    .trim_end_matches(&['\n', '\r'][..])
                    .to_owned();
                if tx.send(line).await.is_err() {
                    if let Err(err) = tokio::io::copy(&mut reader, &mut tokio::io::sink()).await {
                        debug!(%err, "output discard stopped");
                    }
                    break;
                }
            }
            Err(err) => {
                warn!(%err, "failed to read command output");
                break;
            }
        }
    }
}
