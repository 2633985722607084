//! `extract_leaf_configs` tool handler.
//!
//! Runs the leaf configuration dump to completion and returns its merged
//! output. A non-zero exit is reported as a tool error, not a protocol error.

use rmcp::model::{CallToolResult, Content};
use tracing::{info, info_span, warn, Instrument};

use crate::mcp::handler::AppState;
use crate::orchestrator::command::{run_to_completion, LaunchOptions};

/// Handle the `extract_leaf_configs` tool call.
pub async fn handle(state: &AppState) -> CallToolResult {
    let spec = &state.config.commands.extract_leaf_configs;
    let span = info_span!("extract_leaf_configs", program = %spec.program);

    async move {
        match run_to_completion(spec, &LaunchOptions::default()).await {
            Ok(run) if run.status.success() => {
                info!(bytes = run.output.len(), "leaf configs extracted");
                CallToolResult::success(vec![Content::text(run.output)])
            }
            Ok(run) => {
                warn!(status = %run.status, "leaf config extraction failed");
                CallToolResult::error(vec![Content::text(format!(
                    "Error executing {}: {}\nOutput: {}",
                    spec.program, run.status, run.output
                ))])
            }
            Err(err) => {
                warn!(%err, "leaf config extraction could not run");
                CallToolResult::error(vec![Content::text(format!(
                    "Error executing {}: {err}",
                    spec.program
                ))])
            }
        }
    }
    .instrument(span)
    .await
}
