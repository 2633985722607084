#![forbid(unsafe_code)]

//! `openperouter-mcp` — MCP diagnostic tool server binary.
//!
//! Loads configuration, serves line-delimited JSON-RPC over stdio, and on
//! exit stops every traffic capture still running so none outlives the
//! server.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use openperouter_mcp::config::GlobalConfig;
use openperouter_mcp::mcp::handler::{AppState, PerouterServer};
use openperouter_mcp::mcp::transport;
use openperouter_mcp::orchestrator::termination::{self, StopPolicy};
use openperouter_mcp::{AppError, Result};

/// How long runtime shutdown waits on the blocking stdin reader.
const RUNTIME_SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "openperouter-mcp", about = "MCP diagnostic tool server", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file. Built-in defaults when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log output format (text or json). Logs always go to stderr.
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("openperouter-mcp server bootstrap");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?;
    let result = runtime.block_on(run(args));
    runtime.shutdown_timeout(RUNTIME_SHUTDOWN_GRACE);
    result
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let config = match args.config {
        Some(path) => GlobalConfig::load_from_path(&path)?,
        None => GlobalConfig::default(),
    };
    info!(
        capture = %config.commands.capture_traffic.program,
        extract = %config.commands.extract_leaf_configs.program,
        "configuration loaded"
    );

    let state = Arc::new(AppState::new(config));
    let server = PerouterServer::new(Arc::clone(&state));

    // ── Start transport ─────────────────────────────────
    let ct = CancellationToken::new();
    let mut stdio_handle = tokio::spawn(transport::serve_stdio(server, ct.clone()));
    info!("MCP server ready");

    // ── Wait for EOF or shutdown signal ─────────────────
    tokio::select! {
        joined = &mut stdio_handle => match joined {
            Ok(Ok(())) => info!("client disconnected"),
            Ok(Err(err)) => error!(%err, "stdio transport failed"),
            Err(err) => error!(%err, "stdio transport task failed"),
        },
        () = shutdown_signal() => {
            info!("shutdown signal received");
            ct.cancel();
            let released = state.registry.cancel_all().await;
            info!(released, "released pending start requests");
        }
    }

    // ── Stop captures that are still running ────────────
    let policy = StopPolicy::from(&state.config.timeouts);
    let report = termination::stop_all(&state.registry, policy).await;
    info!(
        found = report.found,
        signaled = report.signaled,
        force_killed = report.force_killed,
        "openperouter-mcp shut down"
    );

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
