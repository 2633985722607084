//! Stop-all termination protocol.
//!
//! Snapshots the registry, sends `SIGTERM` to every call, waits up to the
//! grace period, and force-kills whatever is still alive. The watcher tasks
//! own reaping and registry removal; this module only waits for them.

use std::time::Duration;

use futures_util::future::join_all;
use tracing::{error, info, warn};

use super::registry::{ActiveCallRegistry, ActiveCallSnapshot};
use crate::config::TimeoutConfig;

/// Time budgets for a stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopPolicy {
    /// How long signaled calls get to exit on their own.
    pub grace: Duration,
    /// How long to wait for force-killed calls to be reaped.
    pub reap_bound: Duration,
}

impl From<&TimeoutConfig> for StopPolicy {
    fn from(timeouts: &TimeoutConfig) -> Self {
        Self {
            grace: timeouts.stop_grace(),
            reap_bound: timeouts.kill_reap(),
        }
    }
}

/// Counts gathered while stopping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StopReport {
    /// Calls present in the snapshot.
    pub found: usize,
    /// Calls that accepted the graceful signal.
    pub signaled: usize,
    /// Calls still alive after the grace period.
    pub force_killed: usize,
}

/// Stop every active call.
///
/// Never fails: signal errors and timeouts are logged and reflected in the
/// report. Returns once every snapshotted call has been released or the
/// reap bound after a forced kill has elapsed.
pub async fn stop_all(registry: &ActiveCallRegistry, policy: StopPolicy) -> StopReport {
    let calls = registry.snapshot().await;
    let mut report = StopReport {
        found: calls.len(),
        ..StopReport::default()
    };

    if calls.is_empty() {
        info!("no active calls to stop");
        return report;
    }

    for call in &calls {
        match call.control.terminate() {
            Ok(()) => {
                info!(call_id = %call.call_id, pid = ?call.control.pid(), "sent SIGTERM");
                report.signaled += 1;
            }
            Err(err) => {
                warn!(call_id = %call.call_id, pid = ?call.control.pid(), %err, "failed to signal call");
            }
        }
    }

    info!(signaled = report.signaled, "waiting for calls to clean up and exit");

    if tokio::time::timeout(policy.grace, all_released(&calls))
        .await
        .is_ok()
    {
        info!("all calls stopped");
        return report;
    }

    warn!(grace = ?policy.grace, "timed out waiting for calls to stop, forcing kill");
    for call in &calls {
        if !call.control.has_exited() {
            warn!(call_id = %call.call_id, pid = ?call.control.pid(), "force killing call");
            call.control.force_kill();
            report.force_killed += 1;
        }
    }

    if tokio::time::timeout(policy.reap_bound, all_released(&calls))
        .await
        .is_err()
    {
        error!(reap_bound = ?policy.reap_bound, "force-killed calls were not released in time");
    }

    report
}

async fn all_released(calls: &[ActiveCallSnapshot]) {
    join_all(calls.iter().map(|call| call.control.released())).await;
}
