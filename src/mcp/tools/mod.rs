//! MCP tool catalog and handlers.
//!
//! Every tool belongs to one behavior class, picked by name:
//! a synchronous run-to-completion command, an async start that leaves a
//! command running in the background, or an async stop that tears down
//! all background commands at once.

use std::sync::Arc;

use rmcp::model::Tool;

pub mod extract_leaf_configs;
pub mod start_traffic_capture;
pub mod stop_traffic_capture;

/// Name of the synchronous leaf configuration dump.
pub const EXTRACT_LEAF_CONFIGS: &str = "extract_leaf_configs";
/// Name of the background capture start tool.
pub const START_TRAFFIC_CAPTURE: &str = "start_traffic_capture";
/// Name of the stop-all capture tool.
pub const STOP_TRAFFIC_CAPTURE: &str = "stop_traffic_capture";

/// Behavior class of a tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolKind {
    /// Runs a command to completion and returns its full output.
    Synchronous,
    /// Starts a command in the background and returns early output.
    AsyncStart,
    /// Stops every background command.
    AsyncStop,
}

impl ToolKind {
    /// Resolve a tool name, or `None` if the tool does not exist.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            EXTRACT_LEAF_CONFIGS => Some(Self::Synchronous),
            START_TRAFFIC_CAPTURE => Some(Self::AsyncStart),
            STOP_TRAFFIC_CAPTURE => Some(Self::AsyncStop),
            _ => None,
        }
    }
}

/// Convert a `serde_json::Value::Object` into the `Arc<Map>` expected by `Tool`.
fn schema(value: serde_json::Value) -> Arc<serde_json::Map<String, serde_json::Value>> {
    match value {
        serde_json::Value::Object(map) => Arc::new(map),
        _ => Arc::new(serde_json::Map::default()),
    }
}

/// Every tool exposed through `tools/list`.
#[must_use]
pub fn all_tools() -> Vec<Tool> {
    vec![
        Tool::new(
            EXTRACT_LEAF_CONFIGS,
            "Extracts FRR running configurations from all leaf nodes in the CLAB \
             topology. The configurations are saved to a timestamped directory.",
            schema(serde_json::json!({
                "type": "object",
                "properties": {}
            })),
        ),
        Tool::new(
            START_TRAFFIC_CAPTURE,
            "Starts capturing network traffic from Kubernetes cluster nodes and the \
             spine router using tshark. The capture runs in the background and this \
             call returns after its first output. Use stop_traffic_capture to stop \
             the capture and retrieve the files.",
            schema(serde_json::json!({
                "type": "object",
                "properties": {
                    "output_dir": {
                        "type": "string",
                        "description": "Directory where capture files will be saved. \
                                        Optional, defaults to './captures/capture_<timestamp>'."
                    },
                    "capture_filter": {
                        "type": "string",
                        "description": "Tshark capture filter (e.g., 'arp or icmp'). \
                                        Optional, defaults to capturing all traffic."
                    }
                },
                "required": []
            })),
        ),
        Tool::new(
            STOP_TRAFFIC_CAPTURE,
            "Stops all running traffic captures, retrieves the pcap files from the \
             containers, and saves them to the host directory. Captures get a grace \
             period to copy their files before they are killed.",
            schema(serde_json::json!({
                "type": "object",
                "properties": {}
            })),
        ),
    ]
}
