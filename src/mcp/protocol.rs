//! MCP protocol types and message definitions.
//!
//! Based on the Model Context Protocol specification (Streamable HTTP
//! revision).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::error::{Error, Result};

/// JSON-RPC version.
pub const JSONRPC_VERSION: &str = "2.0";

/// Latest MCP protocol version.
pub const MCP_VERSION: &str = "2025-03-26";

/// Protocol versions this server can speak, newest first.
pub const SUPPORTED_PROTOCOL_VERSIONS: &[&str] = &["2025-06-18", "2025-03-26", "2024-11-05"];

// ===== JSON-RPC Base Types =====

/// A JSON-RPC request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: RequestId,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// A JSON-RPC response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: RequestId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    pub fn success(id: RequestId, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: RequestId, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }
}

/// A JSON-RPC notification (no id, no response expected).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcNotification {
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
        }
    }
}

/// A JSON-RPC error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Request ID (can be string or number).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(untagged)]
pub enum RequestId {
    String(String),
    Number(i64),
}

/// Any JSON-RPC message.
///
/// Variant order matters for untagged decoding: a request carries both `id`
/// and `method`, a response only `id`, a notification only `method`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JsonRpcMessage {
    Request(JsonRpcRequest),
    Response(JsonRpcResponse),
    Notification(JsonRpcNotification),
}

impl JsonRpcMessage {
    pub fn is_request(&self) -> bool {
        matches!(self, JsonRpcMessage::Request(_))
    }

    /// Whether this is an `initialize` request.
    pub fn is_initialize_request(&self) -> bool {
        matches!(self, JsonRpcMessage::Request(req) if req.method == "initialize")
    }
}

impl From<JsonRpcResponse> for JsonRpcMessage {
    fn from(response: JsonRpcResponse) -> Self {
        JsonRpcMessage::Response(response)
    }
}

impl From<JsonRpcNotification> for JsonRpcMessage {
    fn from(notification: JsonRpcNotification) -> Self {
        JsonRpcMessage::Notification(notification)
    }
}

/// A decoded POST body: one message or a batch.
#[derive(Debug, Clone)]
pub struct MessageBatch {
    pub messages: Vec<JsonRpcMessage>,
    pub is_batch: bool,
}

impl MessageBatch {
    /// Decode a JSON value holding a single message or an array of them.
    pub fn from_value(value: Value) -> Result<Self> {
        let is_batch = value.is_array();
        let messages = if is_batch {
            serde_json::from_value::<Vec<JsonRpcMessage>>(value)
        } else {
            serde_json::from_value::<JsonRpcMessage>(value).map(|m| vec![m])
        }
        .map_err(|e| Error::McpProtocol(format!("Invalid JSON-RPC message: {}", e)))?;

        if messages.is_empty() {
            return Err(Error::McpProtocol("Empty batch".to_string()));
        }

        Ok(Self { messages, is_batch })
    }

    pub fn has_requests(&self) -> bool {
        self.messages.iter().any(JsonRpcMessage::is_request)
    }

    pub fn contains_initialize(&self) -> bool {
        self.messages.iter().any(JsonRpcMessage::is_initialize_request)
    }

    /// True when the body is exactly one `initialize` request.
    pub fn is_initialize(&self) -> bool {
        self.messages.len() == 1 && self.messages[0].is_initialize_request()
    }
}

// ===== MCP-Specific Types =====

/// Server capabilities.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerCapabilities {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<ToolsCapability>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourcesCapability>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompts: Option<PromptsCapability>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingCapability>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolsCapability {
    #[serde(default)]
    pub list_changed: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourcesCapability {
    #[serde(default)]
    pub subscribe: bool,
    #[serde(default)]
    pub list_changed: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptsCapability {
    #[serde(default)]
    pub list_changed: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingCapability {}

/// Server info.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
}

/// Initialize result.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    pub protocol_version: String,
    pub capabilities: ServerCapabilities,
    pub server_info: ServerInfo,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

/// Pick the protocol version to answer an initialize with.
pub fn negotiate_protocol_version(requested: Option<&str>) -> &'static str {
    requested
        .and_then(|v| SUPPORTED_PROTOCOL_VERSIONS.iter().find(|s| **s == v))
        .copied()
        .unwrap_or(MCP_VERSION)
}

/// Tool definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tool {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// Tool call result.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResult {
    pub content: Vec<ContentBlock>,
    #[serde(default)]
    pub is_error: bool,
}

/// Content block in a tool result.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentBlock {
    Text { text: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListToolsResult {
    pub tools: Vec<Tool>,
}

/// Call tool params.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallToolParams {
    pub name: String,
    #[serde(default)]
    pub arguments: HashMap<String, Value>,
    #[serde(default, rename = "_meta", skip_serializing_if = "Option::is_none")]
    pub meta: Option<RequestMeta>,
}

/// The `_meta` object a client may attach to a request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress_token: Option<crate::mcp::progress::ProgressToken>,
}

// ===== Error Codes =====

/// Standard JSON-RPC error codes.
pub mod error_codes {
    pub const PARSE_ERROR: i32 = -32700;
    pub const INVALID_REQUEST: i32 = -32600;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INTERNAL_ERROR: i32 = -32603;
    /// Implementation-defined server error used for transport failures.
    pub const SERVER_ERROR: i32 = -32000;
}

/// JSON-RPC error code for an error raised while handling a request.
pub fn error_code_for(error: &Error) -> i32 {
    match error.root() {
        Error::MethodNotFound(_) => error_codes::METHOD_NOT_FOUND,
        Error::ToolNotFound(_) | Error::InvalidToolArguments(_) => error_codes::INVALID_PARAMS,
        Error::McpProtocol(_) | Error::AlreadyInitialized | Error::BatchedInitialize => {
            error_codes::INVALID_REQUEST
        }
        Error::Json(_) => error_codes::PARSE_ERROR,
        e if e.is_client_error() => error_codes::SERVER_ERROR,
        _ => error_codes::INTERNAL_ERROR,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_jsonrpc_request_serialization() {
        let request = JsonRpcRequest {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: RequestId::Number(1),
            method: "tools/call".to_string(),
            params: Some(json!({"name": "get-accounts"})),
        };

        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("\"jsonrpc\":\"2.0\""));
        assert!(json.contains("\"method\":\"tools/call\""));

        let parsed: JsonRpcRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.method, "tools/call");
    }

    #[test]
    fn test_jsonrpc_response_error_omits_result() {
        let response =
            JsonRpcResponse::failure(RequestId::String("abc".to_string()), -32601, "nope");

        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("\"error\""));
        assert!(json.contains("-32601"));
        assert!(!json.contains("\"result\""));
    }

    #[test]
    fn test_message_variants_decode() {
        let req: JsonRpcMessage =
            serde_json::from_value(json!({"jsonrpc": "2.0", "id": 1, "method": "ping"})).unwrap();
        assert!(req.is_request());

        let resp: JsonRpcMessage =
            serde_json::from_value(json!({"jsonrpc": "2.0", "id": 1, "result": {}})).unwrap();
        assert!(matches!(resp, JsonRpcMessage::Response(_)));

        let notif: JsonRpcMessage = serde_json::from_value(
            json!({"jsonrpc": "2.0", "method": "notifications/initialized"}),
        )
        .unwrap();
        assert!(matches!(notif, JsonRpcMessage::Notification(_)));
    }

    #[test]
    fn test_batch_initialize_detection() {
        let single = MessageBatch::from_value(json!({
            "jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {}
        }))
        .unwrap();
        assert!(single.is_initialize());
        assert!(!single.is_batch);

        let batch = MessageBatch::from_value(json!([
            {"jsonrpc": "2.0", "id": 1, "method": "initialize"},
            {"jsonrpc": "2.0", "id": 2, "method": "ping"}
        ]))
        .unwrap();
        assert!(batch.is_batch);
        assert!(batch.contains_initialize());
        assert!(!batch.is_initialize());
    }

    #[test]
    fn test_batch_rejects_garbage() {
        assert!(MessageBatch::from_value(json!({"hello": "world"})).is_err());
        assert!(MessageBatch::from_value(json!([])).is_err());
    }

    #[test]
    fn test_notifications_only_batch_has_no_requests() {
        let batch = MessageBatch::from_value(json!([
            {"jsonrpc": "2.0", "method": "notifications/initialized"}
        ]))
        .unwrap();
        assert!(!batch.has_requests());
    }

    #[test]
    fn test_request_id_variants() {
        assert_eq!(serde_json::to_string(&RequestId::Number(42)).unwrap(), "42");
        assert_eq!(
            serde_json::to_string(&RequestId::String("request-1".to_string())).unwrap(),
            "\"request-1\""
        );
    }

    #[test]
    fn test_tool_result_uses_is_error_camel_case() {
        let result = ToolResult {
            content: vec![ContentBlock::Text {
                text: "Error occurred".to_string(),
            }],
            is_error: true,
        };

        let json = serde_json::to_string(&result).unwrap();
        assert!(json.contains("\"type\":\"text\""));
        assert!(json.contains("\"isError\":true"));
    }

    #[test]
    fn test_capabilities_camel_case() {
        let caps = ServerCapabilities {
            tools: Some(ToolsCapability { list_changed: true }),
            ..Default::default()
        };

        let json = serde_json::to_string(&caps).unwrap();
        assert!(json.contains("\"listChanged\":true"));
        assert!(!json.contains("\"resources\""));
    }

    #[test]
    fn test_negotiate_protocol_version() {
        assert_eq!(negotiate_protocol_version(Some("2024-11-05")), "2024-11-05");
        assert_eq!(negotiate_protocol_version(Some("1999-01-01")), MCP_VERSION);
        assert_eq!(negotiate_protocol_version(None), MCP_VERSION);
    }

    #[test]
    fn test_call_tool_params_progress_token() {
        let params: CallToolParams = serde_json::from_value(json!({
            "name": "spending-by-category",
            "arguments": {"startDate": "2024-01-01"},
            "_meta": {"progressToken": "tok-1"}
        }))
        .unwrap();

        assert_eq!(params.name, "spending-by-category");
        assert!(params.meta.and_then(|m| m.progress_token).is_some());
    }

    #[test]
    fn test_error_code_mapping() {
        assert_eq!(
            error_code_for(&Error::ToolNotFound("x".into())),
            error_codes::INVALID_PARAMS
        );
        assert_eq!(
            error_code_for(&Error::MethodNotFound("x".into())),
            error_codes::METHOD_NOT_FOUND
        );
        assert_eq!(
            error_code_for(&Error::Backend("down".into())),
            error_codes::INTERNAL_ERROR
        );
    }
}
