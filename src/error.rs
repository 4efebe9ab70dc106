//! Error taxonomy shared by the registry, the SSH layer and the tool dispatcher.

use rmcp::model::ErrorCode;
use serde_json::Value;
use thiserror::Error;

/// Failure of a tool call, classified by where it originated.
///
/// Validation errors are produced by the dispatcher before the registry is
/// touched. Everything else comes from the registry or a remote session and
/// carries the lower-level cause in its message.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ToolError {
    /// The client supplied incomplete or malformed arguments.
    #[error("Invalid params: {0}")]
    InvalidParams(String),

    /// No tool with this name exists in the catalog.
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    /// The connection identifier is not present in the registry.
    #[error("Connection {0} not found")]
    ConnectionNotFound(String),

    #[error("SSH connection failed: {0}")]
    Connect(String),

    #[error("Command execution failed: {0}")]
    Exec(String),

    #[error("Upload failed: {0}")]
    Upload(String),

    #[error("Download failed: {0}")]
    Download(String),

    /// Closing one of the channels failed during an explicit disconnect.
    /// The connection is already gone from the registry when this is returned.
    #[error("Disconnect failed: {0}")]
    Disconnect(String),

    #[error("{0}")]
    Internal(String),
}

impl ToolError {
    /// JSON-RPC error code for this failure.
    pub fn code(&self) -> ErrorCode {
        match self {
            ToolError::InvalidParams(_) => ErrorCode::INVALID_PARAMS,
            ToolError::UnknownTool(_) => ErrorCode::METHOD_NOT_FOUND,
            _ => ErrorCode::INTERNAL_ERROR,
        }
    }

    /// Short JSON-RPC error message; the detail goes into `data`.
    pub fn message(&self) -> &'static str {
        match self {
            ToolError::InvalidParams(_) => "Invalid params",
            ToolError::UnknownTool(_) => "Method not found",
            _ => "Internal error",
        }
    }

    /// Detail attached to the JSON-RPC error object.
    pub fn data(&self) -> Value {
        match self {
            ToolError::InvalidParams(detail) => Value::String(detail.clone()),
            other => Value::String(other.to_string()),
        }
    }

    /// True for errors raised by argument validation, which never reach the registry.
    pub fn is_validation(&self) -> bool {
        matches!(self, ToolError::InvalidParams(_) | ToolError::UnknownTool(_))
    }
}
