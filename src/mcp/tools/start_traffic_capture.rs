//! `start_traffic_capture` tool handler.
//!
//! Launches the capture command as a background call keyed by the request
//! id and answers with its first line of output. The capture keeps running
//! after the response is sent.

use rmcp::model::{CallToolResult, Content};
use serde::Deserialize;
use tracing::{info, info_span, warn, Instrument};

use crate::mcp::handler::AppState;
use crate::mcp::protocol::invalid_params;
use crate::orchestrator::command::LaunchOptions;
use crate::orchestrator::supervisor::{self, ObservationWindow, StartOutcome};

/// Environment variable carrying the capture filter to the command.
pub const CAPTURE_FILTER_ENV: &str = "CAPTURE_FILTER";

/// Input parameters for `start_traffic_capture`.
#[derive(Debug, Default, Deserialize)]
struct StartCaptureInput {
    /// Destination directory, passed as the first positional argument.
    output_dir: Option<String>,
    /// tshark capture filter, passed through the environment.
    capture_filter: Option<String>,
}

/// Handle the `start_traffic_capture` tool call.
///
/// # Errors
///
/// Returns `rmcp::ErrorData` if the arguments do not decode. Spawn failures
/// are returned as an error result, not a protocol error.
pub async fn handle(
    state: &AppState,
    call_id: &str,
    arguments: serde_json::Map<String, serde_json::Value>,
) -> Result<CallToolResult, rmcp::ErrorData> {
    let input: StartCaptureInput = serde_json::from_value(serde_json::Value::Object(arguments))
        .map_err(|err| invalid_params(format!("invalid start_traffic_capture parameters: {err}")))?;

    let options = launch_options(&input);
    let window = ObservationWindow::from(&state.config.timeouts);
    let span = info_span!(
        "start_traffic_capture",
        call_id,
        has_output_dir = !options.args.is_empty(),
        has_filter = !options.env.is_empty(),
    );

    async move {
        let pending = match supervisor::launch(
            &state.registry,
            call_id,
            &state.config.commands.capture_traffic,
            &options,
            window,
        )
        .await
        {
            Ok(pending) => pending,
            Err(err) => {
                warn!(%err, "traffic capture did not start");
                return Ok(CallToolResult::error(vec![Content::text(format!(
                    "Error starting traffic capture: {err}"
                ))]));
            }
        };

        let outcome = pending.first_output().await;
        info!(?outcome, "traffic capture start acknowledged");

        let text = match outcome {
            StartOutcome::Cancelled => "Traffic capture was cancelled before starting.".to_owned(),
            StartOutcome::FirstOutput(line) => started_message(call_id, &line),
            StartOutcome::NoOutputYet => {
                started_message(call_id, "Capture started (no initial output yet)")
            }
            StartOutcome::TimedOut => started_message(
                call_id,
                &format!(
                    "Capture process started (waiting for initial output timed out after {}s)",
                    window.deadline.as_secs()
                ),
            ),
        };

        Ok(CallToolResult::success(vec![Content::text(text)]))
    }
    .instrument(span)
    .await
}

/// Blank values fall back to the command's own defaults.
fn launch_options(input: &StartCaptureInput) -> LaunchOptions {
    let mut options = LaunchOptions::default();
    if let Some(dir) = non_blank(input.output_dir.as_deref()) {
        options.args.push(dir.to_owned());
    }
    if let Some(filter) = non_blank(input.capture_filter.as_deref()) {
        options
            .env
            .push((CAPTURE_FILTER_ENV.to_owned(), filter.to_owned()));
    }
    options
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|text| !text.trim().is_empty())
}

fn started_message(call_id: &str, initial_output: &str) -> String {
    format!(
        "Traffic capture started successfully and is running in the background \
         (Request ID: {call_id}).\n\nInitial output:\n{initial_output}\n\n\
         The capture will continue running. Use the stop_traffic_capture tool to stop \
         all captures and retrieve the files."
    )
}
