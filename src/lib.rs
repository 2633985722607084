#![forbid(unsafe_code)]

pub mod config;
pub mod errors;
pub mod mcp;
pub mod orchestrator;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
