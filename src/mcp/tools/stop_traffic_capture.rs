//! `stop_traffic_capture` tool handler.
//!
//! Stops every active capture regardless of which request started it.
//! Always succeeds; the text reports how many captures were signaled.

use rmcp::model::{CallToolResult, Content};
use tracing::{info, info_span, Instrument};

use crate::mcp::handler::AppState;
use crate::orchestrator::termination::{self, StopPolicy, StopReport};

/// Handle the `stop_traffic_capture` tool call.
pub async fn handle(state: &AppState) -> CallToolResult {
    let policy = StopPolicy::from(&state.config.timeouts);

    async move {
        let report = termination::stop_all(&state.registry, policy).await;
        info!(
            found = report.found,
            signaled = report.signaled,
            force_killed = report.force_killed,
            "traffic captures stopped"
        );
        CallToolResult::success(vec![Content::text(stop_message(&report, policy))])
    }
    .instrument(info_span!("stop_traffic_capture"))
    .await
}

fn stop_message(report: &StopReport, policy: StopPolicy) -> String {
    if report.found == 0 {
        return "No active traffic captures found. Successfully stopped 0 traffic capture(s)."
            .to_owned();
    }

    let mut text = format!(
        "Successfully stopped {} traffic capture(s).\n\n\
         The cleanup process has:\n\
         - Terminated all tshark processes in containers\n\
         - Copied pcap files from containers to the host\n\n\
         Check the output directory for the capture files.",
        report.signaled
    );
    if report.force_killed > 0 {
        text.push_str(&format!(
            "\n\n{} capture(s) did not exit within {}s and were forcibly killed.",
            report.force_killed,
            policy.grace.as_secs()
        ));
    }
    text
}
