//! JSON-RPC 2.0 message shapes exchanged over stdio (§4.13).

use crate::error::RpcError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// MCP protocol version this dispatcher speaks, matching the sibling
/// example's `mcp::server` handshake string.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// One incoming request or notification line.
#[derive(Debug, Clone, Deserialize)]
pub struct RpcRequest {
    /// Always `"2.0"`; not validated strictly, only carried through.
    #[serde(default)]
    pub jsonrpc: Option<String>,
    /// Absent or `null` for a notification.
    #[serde(default)]
    pub id: Option<Value>,
    /// The method name, e.g. `"tools/call"`.
    pub method: String,
    /// Method-specific arguments; defaults to an empty object.
    #[serde(default)]
    pub params: Value,
}

impl RpcRequest {
    /// A request with no `id` (or an explicit `null`) is a notification:
    /// it must never produce a response line.
    #[must_use]
    pub fn is_notification(&self) -> bool {
        matches!(&self.id, None | Some(Value::Null))
    }
}

/// The body of a JSON-RPC error response.
#[derive(Debug, Clone, Serialize)]
pub struct RpcErrorBody {
    /// JSON-RPC 2.0 numeric error code.
    pub code: i64,
    /// Human-readable error message.
    pub message: String,
}

impl RpcErrorBody {
    /// Builds an error body from the dispatcher's own [`RpcError`] variants.
    #[must_use]
    pub fn from_rpc_error(err: &RpcError) -> Self {
        Self { code: err.code(), message: err.to_string() }
    }

    /// Builds the dispatcher-default timeout error body.
    #[must_use]
    pub fn timeout() -> Self {
        Self { code: -32000, message: "Request timeout".to_string() }
    }
}

/// One outgoing response line, success or failure.
#[derive(Debug, Clone, Serialize)]
pub struct RpcResponse {
    /// Always `"2.0"`.
    pub jsonrpc: &'static str,
    /// Echoes the request's `id`.
    pub id: Value,
    /// Present on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Present on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcErrorBody>,
}

impl RpcResponse {
    /// Builds a successful response.
    #[must_use]
    pub fn success(id: Value, result: Value) -> Self {
        Self { jsonrpc: "2.0", id, result: Some(result), error: None }
    }

    /// Builds a failure response.
    #[must_use]
    pub fn failure(id: Value, error: RpcErrorBody) -> Self {
        Self { jsonrpc: "2.0", id, result: None, error: Some(error) }
    }
}

/// One entry of `tools/list`'s `tools` array.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDescriptor {
    /// Stable tool name, e.g. `"fork-detect"`.
    pub name: String,
    /// One-line human-readable description.
    pub description: String,
    /// JSON Schema for the tool's `arguments` object.
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notification_has_no_id() {
        let req: RpcRequest = serde_json::from_str(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#).unwrap();
        assert!(req.is_notification());
    }

    #[test]
    fn test_request_with_id_is_not_notification() {
        let req: RpcRequest = serde_json::from_str(r#"{"jsonrpc":"2.0","id":1,"method":"tools/list","params":{}}"#).unwrap();
        assert!(!req.is_notification());
    }

    #[test]
    fn test_success_response_omits_error_field() {
        let resp = RpcResponse::success(Value::from(1), serde_json::json!({"ok": true}));
        let json = serde_json::to_value(&resp).unwrap();
        assert!(json.get("error").is_none());
        assert!(json.get("result").is_some());
    }

    #[test]
    fn test_failure_response_omits_result_field() {
        let resp = RpcResponse::failure(Value::from(1), RpcErrorBody::timeout());
        let json = serde_json::to_value(&resp).unwrap();
        assert!(json.get("result").is_none());
        assert_eq!(json["error"]["code"], -32000);
    }
}
