//! Global configuration parsing and validation.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::{AppError, Result};

/// Identity reported to clients during the `initialize` handshake.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", default)]
pub struct ServerConfig {
    /// Server name advertised in `serverInfo`.
    pub name: String,
    /// Server version advertised in `serverInfo`.
    pub version: String,
    /// MCP protocol revision returned from `initialize`.
    pub protocol_version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: "openperouter-mcp".into(),
            version: env!("CARGO_PKG_VERSION").into(),
            protocol_version: "2024-11-05".into(),
        }
    }
}

/// How to launch one external diagnostic command.
///
/// The command is treated as a black box: it receives `args` (plus any
/// per-call positional arguments), `env` on top of the inherited
/// environment, and is judged only by its output and exit status.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct CommandSpec {
    /// Executable to run (resolved through `PATH`).
    pub program: String,
    /// Fixed arguments passed before any per-call arguments.
    #[serde(default)]
    pub args: Vec<String>,
    /// Extra environment variables layered on the server's environment.
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Working directory; inherits the server's when unset.
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
}

impl CommandSpec {
    /// Build a command for `program` with fixed `args` and no extra environment.
    #[must_use]
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            env: HashMap::new(),
            working_dir: None,
        }
    }
}

/// Commands backing each tool.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct CommandsConfig {
    /// Synchronous FRR configuration dump from every leaf node.
    #[serde(default = "default_extract_leaf_configs")]
    pub extract_leaf_configs: CommandSpec,
    /// Long-running packet capture, stopped with `SIGTERM`.
    #[serde(default = "default_capture_traffic")]
    pub capture_traffic: CommandSpec,
}

impl Default for CommandsConfig {
    fn default() -> Self {
        Self {
            extract_leaf_configs: default_extract_leaf_configs(),
            capture_traffic: default_capture_traffic(),
        }
    }
}

fn default_extract_leaf_configs() -> CommandSpec {
    CommandSpec::new("bash", ["scripts/extract-leaf-configs.sh"])
}

fn default_capture_traffic() -> CommandSpec {
    CommandSpec::new("bash", ["scripts/capture-traffic.sh"])
}

/// Timing budgets for the supervision layer.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct TimeoutConfig {
    /// How long a start request waits for the first line of output.
    #[serde(default = "default_observation_seconds")]
    pub observation_seconds: u64,
    /// Lines surfaced to the debug log before output is discarded.
    #[serde(default = "default_observation_max_lines")]
    pub observation_max_lines: usize,
    /// Grace period between `SIGTERM` and forced kill during a stop.
    #[serde(default = "default_stop_grace_seconds")]
    pub stop_grace_seconds: u64,
    /// Upper bound on waiting for a force-killed process to be reaped.
    #[serde(default = "default_kill_reap_seconds")]
    pub kill_reap_seconds: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            observation_seconds: default_observation_seconds(),
            observation_max_lines: default_observation_max_lines(),
            stop_grace_seconds: default_stop_grace_seconds(),
            kill_reap_seconds: default_kill_reap_seconds(),
        }
    }
}

fn default_observation_seconds() -> u64 {
    5
}

fn default_observation_max_lines() -> usize {
    20
}

fn default_stop_grace_seconds() -> u64 {
    15
}

fn default_kill_reap_seconds() -> u64 {
    5
}

impl TimeoutConfig {
    /// Observation window as a [`Duration`].
    #[must_use]
    pub fn observation(&self) -> Duration {
        Duration::from_secs(self.observation_seconds)
    }

    /// Graceful-stop window as a [`Duration`].
    #[must_use]
    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_seconds)
    }

    /// Forced-kill reap bound as a [`Duration`].
    #[must_use]
    pub fn kill_reap(&self) -> Duration {
        Duration::from_secs(self.kill_reap_seconds)
    }
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Handshake identity.
    #[serde(default)]
    pub server: ServerConfig,
    /// External commands behind each tool.
    #[serde(default)]
    pub commands: CommandsConfig,
    /// Supervision timing budgets.
    #[serde(default)]
    pub timeouts: TimeoutConfig,
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string and validate it.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Check invariants that serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        for (name, spec) in [
            ("extract_leaf_configs", &self.commands.extract_leaf_configs),
            ("capture_traffic", &self.commands.capture_traffic),
        ] {
            if spec.program.trim().is_empty() {
                return Err(AppError::Config(format!(
                    "commands.{name}.program must not be empty"
                )));
            }
        }

        let timeouts = &self.timeouts;
        if timeouts.observation_seconds == 0 {
            return Err(AppError::Config(
                "timeouts.observation_seconds must be greater than zero".into(),
            ));
        }
        if timeouts.observation_max_lines == 0 {
            return Err(AppError::Config(
                "timeouts.observation_max_lines must be greater than zero".into(),
            ));
        }
        if timeouts.stop_grace_seconds == 0 {
            return Err(AppError::Config(
                "timeouts.stop_grace_seconds must be greater than zero".into(),
            ));
        }
        if timeouts.kill_reap_seconds == 0 {
            return Err(AppError::Config(
                "timeouts.kill_reap_seconds must be greater than zero".into(),
            ));
        }

        Ok(())
    }
}
