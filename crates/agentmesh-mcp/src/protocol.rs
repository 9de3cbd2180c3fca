//! JSON-RPC protocol envelope and request dispatch
//!
//! Stateless mapping from RPC method names to the tool and resource
//! handlers. No business logic lives here beyond parameter presence
//! checks.

use crate::{error::McpError, resources::MeshResources, tools::MeshTools};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

/// Standard JSON-RPC error codes
pub const PARSE_ERROR: i32 = -32700;
pub const INVALID_REQUEST: i32 = -32600;
pub const METHOD_NOT_FOUND: i32 = -32601;
pub const INVALID_PARAMS: i32 = -32602;
pub const INTERNAL_ERROR: i32 = -32603;

/// JSON-RPC request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub method: String,
    pub params: Option<Value>,
    pub id: Option<Value>,
}

/// JSON-RPC response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
    pub id: Option<Value>,
}

/// JSON-RPC error
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcResponse {
    /// Successful response
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }

    /// Error response
    pub fn error(id: Option<Value>, code: i32, message: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
                data,
            }),
            id,
        }
    }
}

/// Protocol handler dispatching requests to tools and resources
pub struct ProtocolHandler {
    tools: Arc<MeshTools>,
    resources: Arc<MeshResources>,
}

impl ProtocolHandler {
    /// Create a new protocol handler
    pub fn new(tools: Arc<MeshTools>, resources: Arc<MeshResources>) -> Self {
        Self { tools, resources }
    }

    /// Handle a JSON-RPC request
    pub async fn handle_request(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        if request.jsonrpc != "2.0" {
            return JsonRpcResponse::error(
                request.id,
                INVALID_REQUEST,
                "unsupported jsonrpc version",
                None,
            );
        }

        debug!("Dispatching {}", request.method);
        match request.method.as_str() {
            "initialize" => JsonRpcResponse::success(
                request.id,
                json!({
                    "protocol_version": "2.0",
                    "server_info": {
                        "name": crate::SERVER_NAME,
                        "version": crate::SERVER_VERSION,
                        "description": crate::SERVER_DESCRIPTION,
                    },
                    "capabilities": {
                        "tools": {},
                        "resources": {},
                    },
                }),
            ),
            "tools/list" => JsonRpcResponse::success(
                request.id,
                json!({ "tools": self.tools.list_tools() }),
            ),
            "tools/call" => self.handle_tools_call(request).await,
            "resources/list" => JsonRpcResponse::success(
                request.id,
                json!({ "resources": self.resources.list() }),
            ),
            "resources/read" => self.handle_resources_read(request).await,
            _ => JsonRpcResponse::error(request.id, METHOD_NOT_FOUND, "Method not found", None),
        }
    }

    async fn handle_tools_call(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        let Some(params) = request.params else {
            return JsonRpcResponse::error(request.id, INVALID_PARAMS, "missing params", None);
        };
        let Some(name) = params.get("name").and_then(Value::as_str) else {
            return JsonRpcResponse::error(request.id, INVALID_PARAMS, "missing tool name", None);
        };
        let arguments = params
            .get("arguments")
            .cloned()
            .unwrap_or_else(|| json!({}));

        match self.tools.call_tool(name, arguments).await {
            Ok(result) => JsonRpcResponse::success(request.id, result),
            Err(McpError::ToolNotFound(name)) => JsonRpcResponse::error(
                request.id,
                METHOD_NOT_FOUND,
                format!("Tool not found: {}", name),
                None,
            ),
            Err(McpError::InvalidParams(message)) => {
                JsonRpcResponse::error(request.id, INVALID_PARAMS, message, None)
            }
            Err(e) => JsonRpcResponse::error(
                request.id,
                INTERNAL_ERROR,
                "Internal error",
                Some(json!({ "message": e.to_string() })),
            ),
        }
    }

    async fn handle_resources_read(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        let uri = request
            .params
            .as_ref()
            .and_then(|p| p.get("uri"))
            .and_then(Value::as_str);
        let Some(uri) = uri else {
            return JsonRpcResponse::error(request.id, INVALID_PARAMS, "missing resource uri", None);
        };

        match self.resources.read(uri).await {
            Ok(contents) => JsonRpcResponse::success(request.id, contents),
            Err(McpError::InvalidParams(message)) => {
                JsonRpcResponse::error(request.id, INVALID_PARAMS, message, None)
            }
            Err(e) => JsonRpcResponse::error(
                request.id,
                INTERNAL_ERROR,
                "Internal error",
                Some(json!({ "message": e.to_string() })),
            ),
        }
    }
}
