//! Active-call registry.
//!
//! Maps an invocation identifier to the background command started for it.
//! Every insert, removal, and snapshot happens under one mutex; callers get
//! copies out of the map and never hold the lock across process I/O.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::command::ProcessControl;
use crate::{AppError, Result};

/// One in-flight background command.
#[derive(Debug)]
struct ActiveCall {
    serial: u64,
    cancel: CancellationToken,
    control: ProcessControl,
}

/// Copy of a registry entry taken under the lock.
#[derive(Debug, Clone)]
pub struct ActiveCallSnapshot {
    /// Invocation identifier the call was started under.
    pub call_id: String,
    /// Control surface of the running process.
    pub control: ProcessControl,
}

/// Thread-safe map of active calls keyed by invocation identifier.
#[derive(Debug, Clone, Default)]
pub struct ActiveCallRegistry {
    calls: Arc<Mutex<HashMap<String, ActiveCall>>>,
    next_serial: Arc<AtomicU64>,
}

impl ActiveCallRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a running command under `call_id`.
    ///
    /// Returns the serial that must be presented to [`Self::remove`].
    ///
    /// # Errors
    ///
    /// Returns `AppError::Process` if `call_id` is already active.
    pub async fn register(
        &self,
        call_id: &str,
        cancel: CancellationToken,
        control: ProcessControl,
    ) -> Result<u64> {
        let mut calls = self.calls.lock().await;
        if calls.contains_key(call_id) {
            return Err(AppError::Process(format!(
                "a call with id {call_id} is already active"
            )));
        }
        let serial = self.next_serial.fetch_add(1, Ordering::Relaxed);
        calls.insert(
            call_id.to_owned(),
            ActiveCall {
                serial,
                cancel,
                control,
            },
        );
        debug!(call_id, serial, active = calls.len(), "call registered");
        Ok(serial)
    }

    /// Remove `call_id` if it is still the entry registered with `serial`.
    ///
    /// Returns `true` when an entry was removed.
    pub async fn remove(&self, call_id: &str, serial: u64) -> bool {
        let mut calls = self.calls.lock().await;
        let matches = calls.get(call_id).is_some_and(|call| call.serial == serial);
        if matches {
            calls.remove(call_id);
            debug!(call_id, serial, active = calls.len(), "call removed");
        }
        matches
    }

    /// Copy out every active call.
    pub async fn snapshot(&self) -> Vec<ActiveCallSnapshot> {
        let calls = self.calls.lock().await;
        calls
            .iter()
            .map(|(call_id, call)| ActiveCallSnapshot {
                call_id: call_id.clone(),
                control: call.control.clone(),
            })
            .collect()
    }

    /// Fire the cooperative cancellation token of `call_id`.
    ///
    /// Does not touch the process. Returns `false` if the call is unknown.
    pub async fn cancel(&self, call_id: &str) -> bool {
        let calls = self.calls.lock().await;
        match calls.get(call_id) {
            Some(call) => {
                call.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Fire every active call's cancellation token. Returns how many fired.
    pub async fn cancel_all(&self) -> usize {
        let calls = self.calls.lock().await;
        for call in calls.values() {
            call.cancel.cancel();
        }
        calls.len()
    }

    /// Whether `call_id` is currently active.
    pub async fn contains(&self, call_id: &str) -> bool {
        self.calls.lock().await.contains_key(call_id)
    }

    /// Number of active calls.
    pub async fn len(&self) -> usize {
        self.calls.lock().await.len()
    }

    /// Whether no calls are active.
    pub async fn is_empty(&self) -> bool {
        self.calls.lock().await.is_empty()
    }
}
