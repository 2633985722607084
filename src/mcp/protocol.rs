//! JSON-RPC 2.0 envelope used on the line transport.
//!
//! Payload types (`Tool`, `CallToolResult`, `ErrorData`) come from `rmcp`;
//! the envelope is kept local because a request that fails to parse still
//! has to produce a response, with no id.

use rmcp::model::ErrorCode;
use rmcp::ErrorData;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{AppError, Result};

/// Protocol tag carried on every response.
pub const JSONRPC_VERSION: &str = "2.0";

/// Server-defined code for a `tools/call` naming a tool that does not exist.
pub const UNKNOWN_TOOL: ErrorCode = ErrorCode(-32001);

/// Inbound request envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcRequest {
    /// Protocol tag; not enforced.
    #[serde(default)]
    pub jsonrpc: String,
    /// Caller correlation id. `null` and absent are equivalent.
    #[serde(default)]
    pub id: Option<Value>,
    /// Method name.
    pub method: String,
    /// Method parameters.
    #[serde(default)]
    pub params: Option<Value>,
}

/// Outbound response envelope. Exactly one of `result` / `error` is set.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcResponse {
    /// Always [`JSONRPC_VERSION`].
    pub jsonrpc: &'static str,
    /// Echoed request id; omitted for parse errors.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    /// Success payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Failure payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorData>,
}

impl JsonRpcResponse {
    /// Successful response carrying `result`.
    #[must_use]
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Error response carrying `error`.
    #[must_use]
    pub fn failure(id: Option<Value>, error: ErrorData) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            result: None,
            error: Some(error),
        }
    }

    /// Serialize as one newline-terminated line.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Mcp` if the payload cannot be serialized.
    pub fn to_line(&self) -> Result<String> {
        let mut line = serde_json::to_string(self)
            .map_err(|err| AppError::Mcp(format!("failed to serialize response: {err}")))?;
        line.push('\n');
        Ok(line)
    }
}

/// Error for input that is not a request envelope.
#[must_use]
pub fn parse_error() -> ErrorData {
    ErrorData::new(ErrorCode::PARSE_ERROR, "Parse error", None)
}

/// Error for malformed or missing method parameters.
#[must_use]
pub fn invalid_params(message: impl Into<String>) -> ErrorData {
    ErrorData::new(ErrorCode::INVALID_PARAMS, message.into(), None)
}

/// Error for a method the server does not implement.
#[must_use]
pub fn method_not_found() -> ErrorData {
    ErrorData::new(ErrorCode::METHOD_NOT_FOUND, "Method not found", None)
}

/// Error for a `tools/call` naming an unknown tool.
#[must_use]
pub fn unknown_tool(name: &str) -> ErrorData {
    ErrorData::new(UNKNOWN_TOOL, format!("Unknown tool: {name}"), None)
}

/// Registry key for a request id.
///
/// Strings are used verbatim, other ids as their JSON text. Requests
/// without an id get a fresh UUID so they can still be tracked.
#[must_use]
pub fn invocation_key(id: Option<&Value>) -> String {
    match id {
        Some(Value::String(text)) => text.clone(),
        Some(other) => other.to_string(),
        None => uuid::Uuid::new_v4().to_string(),
    }
}
