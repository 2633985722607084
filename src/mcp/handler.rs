//! MCP request dispatcher and shared application state.

use std::sync::Arc;

use rmcp::model::ListToolsResult;
use rmcp::ErrorData;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{info_span, warn, Instrument};

use super::protocol::{
    invalid_params, invocation_key, method_not_found, parse_error, unknown_tool, JsonRpcRequest,
    JsonRpcResponse,
};
use super::tools::{self, ToolKind};
use crate::config::GlobalConfig;
use crate::orchestrator::registry::ActiveCallRegistry;

/// Shared application state accessible by all tool handlers.
#[derive(Debug)]
pub struct AppState {
    /// Global configuration.
    pub config: Arc<GlobalConfig>,
    /// Background calls currently running.
    pub registry: ActiveCallRegistry,
}

impl AppState {
    /// Build state around `config` with an empty registry.
    #[must_use]
    pub fn new(config: GlobalConfig) -> Self {
        Self {
            config: Arc::new(config),
            registry: ActiveCallRegistry::new(),
        }
    }
}

/// `tools/call` parameters.
#[derive(Debug, Deserialize)]
struct CallToolParams {
    name: String,
    #[serde(default)]
    arguments: Option<Map<String, Value>>,
}

/// Request dispatcher exposing the diagnostic tools.
#[derive(Debug, Clone)]
pub struct PerouterServer {
    state: Arc<AppState>,
}

impl PerouterServer {
    /// Create a dispatcher bound to shared application state.
    #[must_use]
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    /// Access the shared application state.
    #[must_use]
    pub fn state(&self) -> &Arc<AppState> {
        &self.state
    }

    /// Handle one transport line. Blank lines produce no response.
    pub async fn handle_line(&self, line: &str) -> Option<JsonRpcResponse> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return None;
        }

        match serde_json::from_str::<JsonRpcRequest>(trimmed) {
            Ok(request) => Some(self.handle_request(request).await),
            Err(err) => {
                warn!(%err, "failed to parse request");
                Some(JsonRpcResponse::failure(None, parse_error()))
            }
        }
    }

    /// Route a decoded request to its method handler.
    pub async fn handle_request(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        let span = info_span!("request", method = %request.method, id = ?request.id);

        async move {
            let JsonRpcRequest {
                id, method, params, ..
            } = request;

            let outcome = match method.as_str() {
                "initialize" => self.initialize(params),
                "ping" => Ok(json!({})),
                "tools/list" => Self::list_tools(),
                "tools/call" => self.call_tool(id.as_ref(), params).await,
                _ => Err(method_not_found()),
            };

            match outcome {
                Ok(result) => JsonRpcResponse::success(id, result),
                Err(error) => {
                    warn!(code = error.code.0, message = %error.message, "request failed");
                    JsonRpcResponse::failure(id, error)
                }
            }
        }
        .instrument(span)
        .await
    }

    fn initialize(&self, params: Option<Value>) -> Result<Value, ErrorData> {
        object_params(params)?;

        let server = &self.state.config.server;
        Ok(json!({
            "protocolVersion": server.protocol_version,
            "capabilities": {
                "tools": { "listChanged": true }
            },
            "serverInfo": {
                "name": server.name,
                "version": server.version,
            }
        }))
    }

    fn list_tools() -> Result<Value, ErrorData> {
        serde_json::to_value(ListToolsResult::with_all_items(tools::all_tools())).map_err(|err| {
            ErrorData::internal_error(format!("failed to serialize tool list: {err}"), None)
        })
    }

    async fn call_tool(&self, id: Option<&Value>, params: Option<Value>) -> Result<Value, ErrorData> {
        let params = object_params(params)?;
        let CallToolParams { name, arguments } = serde_json::from_value(Value::Object(params))
            .map_err(|_| invalid_params("Invalid params"))?;

        let kind = ToolKind::from_name(&name).ok_or_else(|| unknown_tool(&name))?;
        let span = info_span!("call_tool", tool = %name);

        let result = async {
            match kind {
                ToolKind::Synchronous => Ok(tools::extract_leaf_configs::handle(&self.state).await),
                ToolKind::AsyncStart => {
                    let call_id = invocation_key(id);
                    tools::start_traffic_capture::handle(
                        &self.state,
                        &call_id,
                        arguments.unwrap_or_default(),
                    )
                    .await
                }
                ToolKind::AsyncStop => Ok(tools::stop_traffic_capture::handle(&self.state).await),
            }
        }
        .instrument(span)
        .await?;

        serde_json::to_value(result).map_err(|err| {
            ErrorData::internal_error(format!("failed to serialize tool result: {err}"), None)
        })
    }
}

/// Require `params` to be a JSON object.
///
/// Derived deserializers also accept arrays by position, so the shape is
/// checked before decoding.
fn object_params(params: Option<Value>) -> Result<Map<String, Value>, ErrorData> {
    match params {
        Some(Value::Object(map)) => Ok(map),
        _ => Err(invalid_params("Invalid params")),
    }
}
