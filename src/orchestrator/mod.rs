//! Process supervision.
//!
//! Covers the external command handle, the active-call registry, the
//! background supervisor for long-running commands, and the stop-all
//! termination protocol.

pub mod command;
pub mod registry;
pub mod supervisor;
pub mod termination;
