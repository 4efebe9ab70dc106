//! HTTP transport for the MCP server.
//!
//! `POST /mcp` takes JSON-RPC envelopes. The discrete `/mcp/<method>` routes
//! return bare result bodies for clients that do not speak JSON-RPC.

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::any::Any;
use std::sync::Arc;
use tower_http::{catch_panic::CatchPanicLayer, cors::CorsLayer, trace::TraceLayer};

use crate::auth::{require_bearer_for_mcp, BearerToken};
use crate::error::ToolError;
use crate::mcp::protocol;
use crate::mcp::server::McpSshService;

/// Build the HTTP router over one shared service.
pub fn router(service: Arc<McpSshService>, token: BearerToken) -> Router {
    Router::new()
        .route("/health", get(health_handler).fallback(not_found_handler))
        .route("/mcp", post(mcp_handler).fallback(not_found_handler))
        .route("/mcp/initialize", post(initialize_handler).fallback(not_found_handler))
        .route("/mcp/tools/list", post(tools_list_handler).fallback(not_found_handler))
        .route("/mcp/tools/call", post(tools_call_handler).fallback(not_found_handler))
        .route(
            "/mcp/resources/list",
            post(resources_list_handler).fallback(not_found_handler),
        )
        .route(
            "/mcp/prompts/list",
            post(prompts_list_handler).fallback(not_found_handler),
        )
        .fallback(not_found_handler)
        .with_state(service)
        .layer(middleware::from_fn_with_state(token, require_bearer_for_mcp))
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Errors returned by the discrete endpoints.
#[derive(Debug)]
pub enum ApiError {
    InvalidRequest(String),
    InvalidParams(String),
    ToolNotFound(String),
    Execution(String),
}

impl From<ToolError> for ApiError {
    fn from(err: ToolError) -> Self {
        match err {
            ToolError::InvalidParams(detail) => ApiError::InvalidParams(detail),
            ToolError::UnknownTool(name) => ApiError::ToolNotFound(name),
            other => ApiError::Execution(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::InvalidRequest(message) => (
                StatusCode::BAD_REQUEST,
                json!({ "error": "Invalid request", "message": message }),
            ),
            ApiError::InvalidParams(message) => (
                StatusCode::BAD_REQUEST,
                json!({ "error": "Invalid parameters", "message": message }),
            ),
            ApiError::ToolNotFound(name) => (
                StatusCode::BAD_REQUEST,
                json!({ "error": "Tool not found", "message": format!("Unknown tool: {}", name) }),
            ),
            ApiError::Execution(message) => {
                tracing::error!("Tool execution failed: {}", message);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "error": "Execution error", "message": message }),
                )
            }
        };
        (status, Json(body)).into_response()
    }
}

/// GET /health
async fn health_handler(State(service): State<Arc<McpSshService>>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION"),
        "connections": service.registry().len().await
    }))
}

/// Handle MCP JSON-RPC requests.
///
/// POST /mcp
async fn mcp_handler(State(service): State<Arc<McpSshService>>, body: Bytes) -> Response {
    let text = String::from_utf8_lossy(&body);
    let request = match protocol::parse_message(&text) {
        Ok(request) => request,
        Err(response) => return Json(response).into_response(),
    };

    tracing::debug!("MCP request: {}", request.method);
    match protocol::handle_request(&service, request).await {
        Some(response) => Json(response).into_response(),
        None => StatusCode::ACCEPTED.into_response(),
    }
}

/// POST /mcp/initialize
async fn initialize_handler(State(service): State<Arc<McpSshService>>) -> Json<Value> {
    Json(service.initialize_result())
}

/// POST /mcp/tools/list
async fn tools_list_handler(State(service): State<Arc<McpSshService>>) -> Json<Value> {
    Json(service.tools_list_result())
}

/// POST /mcp/tools/call
async fn tools_call_handler(
    State(service): State<Arc<McpSshService>>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let body: Value = if body.is_empty() {
        json!({})
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::InvalidRequest(format!("Malformed JSON body: {}", e)))?
    };

    let name = body
        .get("name")
        .and_then(|v| v.as_str())
        .filter(|name| !name.is_empty())
        .ok_or_else(|| ApiError::InvalidRequest("Tool name is required".to_string()))?;
    let arguments = body.get("arguments").cloned().unwrap_or(Value::Null);

    let result = service.call_tool(name, arguments).await?;
    let value =
        serde_json::to_value(&result).map_err(|e| ApiError::Execution(e.to_string()))?;
    Ok(Json(value))
}

/// POST /mcp/resources/list
async fn resources_list_handler() -> Json<Value> {
    Json(json!({ "resources": [] }))
}

/// POST /mcp/prompts/list
async fn prompts_list_handler() -> Json<Value> {
    Json(json!({ "prompts": [] }))
}

async fn not_found_handler(uri: axum::http::Uri) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "error": "Not found",
            "message": format!("Route {} not found", uri.path())
        })),
    )
        .into_response()
}

fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown panic".to_string()
    };
    tracing::error!("Handler panicked: {}", detail);

    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({
            "error": "Internal server error",
            "message": "An unexpected error occurred"
        })),
    )
        .into_response()
}
