//! JSON-RPC envelope and MCP method routing shared by every transport.

use rmcp::model::ErrorCode;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Value};

use crate::error::ToolError;
use crate::mcp::server::McpSshService;

/// JSON-RPC request structure.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct JsonRpcRequest {
    #[serde(default = "default_version")]
    pub jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
    /// Absent for notifications. An explicit `null` is a request id.
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
}

fn default_version() -> String {
    "2.0".to_string()
}

/// Map any present value, `null` included, to `Some`.
fn present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

impl JsonRpcRequest {
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

/// JSON-RPC response structure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
    pub id: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl From<&ToolError> for JsonRpcError {
    fn from(err: &ToolError) -> Self {
        Self {
            code: err.code().0,
            message: err.message().to_string(),
            data: Some(err.data()),
        }
    }
}

impl JsonRpcResponse {
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: Some(result),
            error: None,
            id: id.unwrap_or(Value::Null),
        }
    }

    pub fn error(id: Option<Value>, code: ErrorCode, message: &str, data: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: None,
            error: Some(JsonRpcError {
                code: code.0,
                message: message.to_string(),
                data,
            }),
            id: id.unwrap_or(Value::Null),
        }
    }

    pub fn from_tool_error(id: Option<Value>, err: &ToolError) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: None,
            error: Some(err.into()),
            id: id.unwrap_or(Value::Null),
        }
    }
}

/// Decode one message. Malformed input yields the error response to send back.
pub fn parse_message(text: &str) -> Result<JsonRpcRequest, JsonRpcResponse> {
    let value: Value = serde_json::from_str(text).map_err(|e| {
        JsonRpcResponse::error(
            None,
            ErrorCode::PARSE_ERROR,
            "Parse error",
            Some(Value::String(e.to_string())),
        )
    })?;

    let id = value.get("id").cloned();
    serde_json::from_value(value).map_err(|e| {
        JsonRpcResponse::error(
            id,
            ErrorCode::INVALID_REQUEST,
            "Invalid Request",
            Some(Value::String(e.to_string())),
        )
    })
}

/// Route one request to the service. Returns `None` for notifications.
pub async fn handle_request(
    service: &McpSshService,
    request: JsonRpcRequest,
) -> Option<JsonRpcResponse> {
    if request.is_notification() {
        tracing::debug!("Notification {}", request.method);
        return None;
    }

    let id = request.id;
    let response = match request.method.as_str() {
        "initialize" => JsonRpcResponse::success(id, service.initialize_result()),

        "tools/list" => JsonRpcResponse::success(id, service.tools_list_result()),

        "tools/call" => {
            let params = request.params.unwrap_or(json!({}));
            let tool_name = params.get("name").and_then(|v| v.as_str()).unwrap_or("");
            if tool_name.is_empty() {
                return Some(JsonRpcResponse::from_tool_error(
                    id,
                    &ToolError::InvalidParams("Tool name is required".to_string()),
                ));
            }
            let arguments = params.get("arguments").cloned().unwrap_or(Value::Null);

            match service.call_tool(tool_name, arguments).await {
                Ok(result) => match serde_json::to_value(&result) {
                    Ok(value) => JsonRpcResponse::success(id, value),
                    Err(e) => JsonRpcResponse::from_tool_error(
                        id,
                        &ToolError::Internal(e.to_string()),
                    ),
                },
                Err(e) => JsonRpcResponse::from_tool_error(id, &e),
            }
        }

        "resources/list" => JsonRpcResponse::success(id, json!({ "resources": [] })),

        "prompts/list" => JsonRpcResponse::success(id, json!({ "prompts": [] })),

        "ping" => JsonRpcResponse::success(id, json!({})),

        method if method.starts_with("notifications/") => JsonRpcResponse::success(id, json!({})),

        _ => JsonRpcResponse::error(
            id,
            ErrorCode::METHOD_NOT_FOUND,
            "Method not found",
            Some(Value::String(format!("Method not found: {}", request.method))),
        ),
    };

    Some(response)
}

/// Handle one framed text message end to end. Returns the serialized reply,
/// or `None` when nothing should be sent back.
pub async fn handle_text(service: &McpSshService, text: &str) -> Option<String> {
    let response = match parse_message(text) {
        Ok(request) => handle_request(service, request).await?,
        Err(response) => response,
    };

    match serde_json::to_string(&response) {
        Ok(json) => Some(json),
        Err(e) => {
            tracing::error!("Failed to serialize response: {}", e);
            None
        }
    }
}
