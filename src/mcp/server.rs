//! MCP server implementation for SSH tools.
//!
//! Validates tool calls against the catalog and runs them against a
//! connection registry. Uses rmcp model types for MCP-compliant results.

use rmcp::model::{CallToolResult, Content, Tool};
use serde_json::{json, Value};

use crate::error::ToolError;
use crate::mcp::tools::{
    parse_arguments, tool_catalog, ConnectParams, DisconnectParams, DownloadParams,
    ExecuteParams, ListConnectionsParams, ToolKind, UploadParams,
};
use crate::ssh::SshConfig;
use crate::state::{ConnectionInfo, ConnectionRegistry};

pub const PROTOCOL_VERSION: &str = "2024-11-05";
pub const SERVER_NAME: &str = "mcp-ssh";

/// MCP service providing SSH tools over one connection registry.
pub struct McpSshService {
    registry: ConnectionRegistry,
}

impl McpSshService {
    pub fn new(registry: ConnectionRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Get server info for MCP initialization.
    pub fn get_server_info(&self) -> Value {
        json!({
            "name": SERVER_NAME,
            "version": env!("CARGO_PKG_VERSION")
        })
    }

    /// Result body of the `initialize` method.
    pub fn initialize_result(&self) -> Value {
        json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {
                "tools": {},
                "resources": {},
                "prompts": {}
            },
            "serverInfo": self.get_server_info()
        })
    }

    /// List available tools with their schemas.
    pub fn list_tools(&self) -> Vec<Tool> {
        tool_catalog()
    }

    /// Result body of the `tools/list` method.
    pub fn tools_list_result(&self) -> Value {
        json!({ "tools": self.list_tools() })
    }

    /// Call a tool by name with the given arguments.
    ///
    /// Arguments are validated before the registry is touched. Failures from
    /// the registry or the remote session keep their kind and message.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<CallToolResult, ToolError> {
        let kind =
            ToolKind::from_name(name).ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;

        let result = match kind {
            ToolKind::Connect => self.tool_ssh_connect(parse_arguments(arguments)?).await,
            ToolKind::Execute => self.tool_ssh_execute(parse_arguments(arguments)?).await,
            ToolKind::Upload => self.tool_ssh_upload(parse_arguments(arguments)?).await,
            ToolKind::Download => self.tool_ssh_download(parse_arguments(arguments)?).await,
            ToolKind::Disconnect => self.tool_ssh_disconnect(parse_arguments(arguments)?).await,
            ToolKind::ListConnections => {
                let _: ListConnectionsParams = parse_arguments(arguments)?;
                Ok(self.tool_ssh_list_connections().await)
            }
        };

        match result {
            Ok(text) => Ok(CallToolResult::success(vec![Content::text(text)])),
            Err(e) if e.is_validation() => {
                tracing::debug!("Rejected {} call: {}", kind.name(), e);
                Err(e)
            }
            Err(e) => {
                tracing::warn!("Tool {} failed: {}", kind.name(), e);
                Err(e)
            }
        }
    }

    async fn tool_ssh_connect(&self, params: ConnectParams) -> Result<String, ToolError> {
        let config = SshConfig {
            host: params.host.clone(),
            port: params.port,
            username: params.username,
            password: params.password,
        };

        let id = self.registry.create(config).await?;
        Ok(format!(
            "Successfully connected to {}:{}. Connection ID: {}",
            params.host, params.port, id
        ))
    }

    async fn tool_ssh_execute(&self, params: ExecuteParams) -> Result<String, ToolError> {
        let session = self.registry.lookup(&params.connection_id).await?;
        session.exec(&params.command).await
    }

    async fn tool_ssh_upload(&self, params: UploadParams) -> Result<String, ToolError> {
        let session = self.registry.lookup(&params.connection_id).await?;
        session
            .upload(&params.local_path, &params.remote_path)
            .await?;
        Ok(format!(
            "Successfully uploaded {} to {}",
            params.local_path, params.remote_path
        ))
    }

    async fn tool_ssh_download(&self, params: DownloadParams) -> Result<String, ToolError> {
        let session = self.registry.lookup(&params.connection_id).await?;
        session
            .download(&params.remote_path, &params.local_path)
            .await?;
        Ok(format!(
            "Successfully downloaded {} to {}",
            params.remote_path, params.local_path
        ))
    }

    async fn tool_ssh_disconnect(&self, params: DisconnectParams) -> Result<String, ToolError> {
        self.registry.remove(&params.connection_id).await?;
        Ok(format!("Disconnected from connection {}", params.connection_id))
    }

    async fn tool_ssh_list_connections(&self) -> String {
        format_connection_list(&self.registry.list().await)
    }

    /// Close every connection owned by this service.
    pub async fn shutdown(&self) -> usize {
        self.registry.remove_all().await
    }
}

pub fn format_connection_list(connections: &[ConnectionInfo]) -> String {
    if connections.is_empty() {
        return "No active connections".to_string();
    }

    let lines: Vec<String> = connections
        .iter()
        .map(|c| format!("- {}: {}:{} ({})", c.id, c.host, c.port, c.username))
        .collect();
    format!("Active connections:\n{}", lines.join("\n"))
}
