// JSON-RPC tool protocol
//
// Translates the tool catalogue to and from the MCP tool-listing format and
// serves `initialize`, `tools/list` and `tools/call` over JSON-RPC 2.0. The
// wire format is independent of the loop's internal ToolCall shape.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use strand_schemas::{ToolCall, ToolPolicy, ToolSchema};
use tracing::debug;

use crate::error::{Result, RuntimeError};
use crate::tools::ToolRegistry;

pub const JSONRPC_VERSION: &str = "2.0";
pub const PROTOCOL_VERSION: &str = "2024-11-05";

// Standard JSON-RPC error codes
pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;

// ============================================================================
// Wire types
// ============================================================================

/// Tool as listed by `tools/list`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McpTool {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

impl From<&ToolSchema> for McpTool {
    fn from(schema: &ToolSchema) -> Self {
        Self {
            name: schema.name.clone(),
            description: Some(schema.description.clone()),
            input_schema: schema.parameters.clone(),
        }
    }
}

impl From<McpTool> for ToolSchema {
    fn from(tool: McpTool) -> Self {
        ToolSchema::new(tool.name, tool.description.unwrap_or_default(), tool.input_schema)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// JSON-RPC 2.0 request (a notification when `id` is absent)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn new(id: impl Into<Value>, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(id.into()),
            method: method.into(),
            params,
        }
    }

    /// `tools/call` request for a loop tool call
    pub fn tool_call(id: impl Into<Value>, call: &ToolCall) -> Self {
        Self::new(
            id,
            "tools/call",
            Some(json!({ "name": call.name, "arguments": call.arguments })),
        )
    }
}

/// JSON-RPC 2.0 response carrying either `result` or `error`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: Value, code: i64, message: impl Into<String>) -> Self {
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

/// Parse a `tools/list` result into catalogue schemas
pub fn schemas_from_list_result(result: &Value) -> Result<Vec<ToolSchema>> {
    let tools = result
        .get("tools")
        .cloned()
        .ok_or_else(|| RuntimeError::invalid_request("tools/list result has no 'tools' field"))?;
    let tools: Vec<McpTool> = serde_json::from_value(tools)
        .map_err(|e| RuntimeError::invalid_request(format!("malformed tools/list result: {e}")))?;
    Ok(tools.into_iter().map(ToolSchema::from).collect())
}

// ============================================================================
// McpServer - serves a ToolRegistry
// ============================================================================

#[derive(Debug, Deserialize)]
struct CallParams {
    name: String,
    #[serde(default)]
    arguments: Value,
}

/// Serves a tool catalogue over JSON-RPC
#[derive(Debug, Clone)]
pub struct McpServer {
    name: String,
    version: String,
    registry: Arc<ToolRegistry>,
}

impl McpServer {
    pub fn new(name: impl Into<String>, version: impl Into<String>, registry: Arc<ToolRegistry>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            registry,
        }
    }

    /// Handle one raw JSON-RPC message. Notifications produce no response.
    pub async fn handle_json(&self, raw: &str) -> Option<String> {
        let value = match serde_json::from_str::<Value>(raw) {
            Ok(value) => value,
            Err(e) => {
                let response =
                    JsonRpcResponse::failure(Value::Null, PARSE_ERROR, format!("Parse error: {e}"));
                return serde_json::to_string(&response).ok();
            }
        };
        // Well-formed JSON that is not a request object is an invalid request
        let id = value.get("id").cloned().unwrap_or(Value::Null);
        let response = match serde_json::from_value::<JsonRpcRequest>(value) {
            Ok(request) => self.handle(request).await?,
            Err(e) => JsonRpcResponse::failure(id, INVALID_REQUEST, format!("Invalid request: {e}")),
        };
        // JsonRpcResponse contains only JSON-native fields
        serde_json::to_string(&response).ok()
    }

    pub async fn handle(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        let Some(id) = request.id.clone() else {
            debug!(method = %request.method, "Ignoring JSON-RPC notification");
            return None;
        };
        if request.jsonrpc != JSONRPC_VERSION {
            return Some(JsonRpcResponse::failure(
                id,
                INVALID_REQUEST,
                format!("Unsupported jsonrpc version '{}'", request.jsonrpc),
            ));
        }

        let response = match request.method.as_str() {
            "initialize" => JsonRpcResponse::success(
                id,
                json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": { "tools": {} },
                    "serverInfo": { "name": self.name, "version": self.version }
                }),
            ),
            "tools/list" => {
                let tools: Vec<McpTool> = self.registry.tool_schemas().iter().map(McpTool::from).collect();
                JsonRpcResponse::success(id, json!({ "tools": tools }))
            }
            "tools/call" => self.call_tool(id, request.params).await,
            method => JsonRpcResponse::failure(id, METHOD_NOT_FOUND, format!("Method not found: {method}")),
        };
        Some(response)
    }

    async fn call_tool(&self, id: Value, params: Option<Value>) -> JsonRpcResponse {
        let params: CallParams = match params.map(serde_json::from_value).transpose() {
            Ok(Some(params)) => params,
            Ok(None) => return JsonRpcResponse::failure(id, INVALID_PARAMS, "Missing params"),
            Err(e) => return JsonRpcResponse::failure(id, INVALID_PARAMS, format!("Invalid params: {e}")),
        };

        let Some(tool) = self.registry.get(&params.name) else {
            return JsonRpcResponse::failure(id, INVALID_PARAMS, format!("Unknown tool: {}", params.name));
        };
        // there is no human on the other end of this channel
        if tool.policy() == ToolPolicy::RequiresApproval {
            return JsonRpcResponse::success(
                id,
                tool_content(&format!("Tool '{}' requires approval", params.name), true),
            );
        }

        let call = ToolCall::new(id.to_string(), params.name, params.arguments);
        let result = self.registry.execute(&call).await;
        let text = result.observation().to_string();
        JsonRpcResponse::success(id, tool_content(&text, result.is_error()))
    }
}

fn tool_content(text: &str, is_error: bool) -> Value {
    json!({
        "content": [{ "type": "text", "text": text }],
        "isError": is_error
    })
}
