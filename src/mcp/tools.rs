//! Tool catalog: names, parameter schemas and argument validation shared by
//! every transport.

use rmcp::model::Tool;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;

use crate::error::ToolError;

/// Parameters for the ssh_connect tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ConnectParams {
    /// SSH server hostname or IP address.
    pub host: String,
    /// SSH server port (default: 22).
    #[serde(default = "default_port")]
    pub port: u16,
    /// SSH username.
    pub username: String,
    /// SSH password.
    pub password: String,
}

fn default_port() -> u16 {
    22
}

/// Parameters for the ssh_execute tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteParams {
    /// Connection ID from ssh_connect.
    pub connection_id: String,
    /// Command to execute.
    pub command: String,
}

/// Parameters for the ssh_upload tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct UploadParams {
    /// Connection ID from ssh_connect.
    pub connection_id: String,
    /// Local file path.
    pub local_path: String,
    /// Remote file path.
    pub remote_path: String,
}

/// Parameters for the ssh_download tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DownloadParams {
    /// Connection ID from ssh_connect.
    pub connection_id: String,
    /// Remote file path.
    pub remote_path: String,
    /// Local file path.
    pub local_path: String,
}

/// Parameters for the ssh_disconnect tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DisconnectParams {
    /// Connection ID to disconnect.
    pub connection_id: String,
}

/// The ssh_list_connections tool takes no parameters.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct ListConnectionsParams {}

/// Parameter types that carry string fields which must not be empty.
pub trait RequiredStrings {
    fn required_strings(&self) -> Vec<(&'static str, &str)>;
}

impl RequiredStrings for ConnectParams {
    fn required_strings(&self) -> Vec<(&'static str, &str)> {
        vec![
            ("host", &self.host),
            ("username", &self.username),
            ("password", &self.password),
        ]
    }
}

impl RequiredStrings for ExecuteParams {
    fn required_strings(&self) -> Vec<(&'static str, &str)> {
        vec![("connectionId", &self.connection_id), ("command", &self.command)]
    }
}

impl RequiredStrings for UploadParams {
    fn required_strings(&self) -> Vec<(&'static str, &str)> {
        vec![
            ("connectionId", &self.connection_id),
            ("localPath", &self.local_path),
            ("remotePath", &self.remote_path),
        ]
    }
}

impl RequiredStrings for DownloadParams {
    fn required_strings(&self) -> Vec<(&'static str, &str)> {
        vec![
            ("connectionId", &self.connection_id),
            ("remotePath", &self.remote_path),
            ("localPath", &self.local_path),
        ]
    }
}

impl RequiredStrings for DisconnectParams {
    fn required_strings(&self) -> Vec<(&'static str, &str)> {
        vec![("connectionId", &self.connection_id)]
    }
}

impl RequiredStrings for ListConnectionsParams {
    fn required_strings(&self) -> Vec<(&'static str, &str)> {
        Vec::new()
    }
}

/// Decode and validate tool arguments.
///
/// Absent or null arguments are treated as an empty object. Missing fields,
/// wrong types and empty required strings all fail with `InvalidParams`.
pub fn parse_arguments<T>(arguments: Value) -> Result<T, ToolError>
where
    T: DeserializeOwned + RequiredStrings,
{
    let arguments = match arguments {
        Value::Null => Value::Object(Map::new()),
        Value::Object(map) => Value::Object(map),
        other => {
            return Err(ToolError::InvalidParams(format!(
                "arguments must be an object, got {}",
                json_type_name(&other)
            )))
        }
    };

    let params: T = serde_json::from_value(arguments)
        .map_err(|e| ToolError::InvalidParams(e.to_string()))?;

    let empty: Vec<&str> = params
        .required_strings()
        .into_iter()
        .filter(|(_, value)| value.is_empty())
        .map(|(name, _)| name)
        .collect();

    if !empty.is_empty() {
        return Err(ToolError::InvalidParams(format!(
            "{} must not be empty",
            empty.join(", ")
        )));
    }

    Ok(params)
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// The six operations exposed as tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolKind {
    Connect,
    Execute,
    Upload,
    Download,
    Disconnect,
    ListConnections,
}

impl ToolKind {
    pub const ALL: [ToolKind; 6] = [
        ToolKind::Connect,
        ToolKind::Execute,
        ToolKind::Upload,
        ToolKind::Download,
        ToolKind::Disconnect,
        ToolKind::ListConnections,
    ];

    /// Name advertised in tools/list.
    pub fn name(self) -> &'static str {
        match self {
            ToolKind::Connect => "ssh_connect",
            ToolKind::Execute => "ssh_execute",
            ToolKind::Upload => "ssh_upload",
            ToolKind::Download => "ssh_download",
            ToolKind::Disconnect => "ssh_disconnect",
            ToolKind::ListConnections => "ssh_list_connections",
        }
    }

    /// Resolve a tool name. The unprefixed form (`execute`, `list_connections`, ...)
    /// is accepted as well.
    pub fn from_name(name: &str) -> Option<Self> {
        let bare = name.strip_prefix("ssh_").unwrap_or(name);
        match bare {
            "connect" => Some(ToolKind::Connect),
            "execute" => Some(ToolKind::Execute),
            "upload" => Some(ToolKind::Upload),
            "download" => Some(ToolKind::Download),
            "disconnect" => Some(ToolKind::Disconnect),
            "list_connections" => Some(ToolKind::ListConnections),
            _ => None,
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            ToolKind::Connect => "Connect to a remote server via SSH",
            ToolKind::Execute => "Execute a command on the connected SSH server",
            ToolKind::Upload => "Upload a file to the remote server",
            ToolKind::Download => "Download a file from the remote server",
            ToolKind::Disconnect => "Disconnect from the SSH server",
            ToolKind::ListConnections => "List all active SSH connections",
        }
    }

    pub fn input_schema(self) -> Arc<Map<String, Value>> {
        match self {
            ToolKind::Connect => schema_to_arc_map::<ConnectParams>(),
            ToolKind::Execute => schema_to_arc_map::<ExecuteParams>(),
            ToolKind::Upload => schema_to_arc_map::<UploadParams>(),
            ToolKind::Download => schema_to_arc_map::<DownloadParams>(),
            ToolKind::Disconnect => schema_to_arc_map::<DisconnectParams>(),
            ToolKind::ListConnections => schema_to_arc_map::<ListConnectionsParams>(),
        }
    }

    pub fn definition(self) -> Tool {
        Tool {
            name: self.name().into(),
            description: Some(self.description().into()),
            input_schema: self.input_schema(),
            annotations: None,
            output_schema: None,
            meta: None,
            icons: None,
            title: None,
        }
    }
}

/// Convert a schemars schema to the Arc<Map<String, Value>> format expected by rmcp.
fn schema_to_arc_map<T: JsonSchema>() -> Arc<Map<String, Value>> {
    let schema = schemars::schema_for!(T);
    let value = serde_json::to_value(schema).unwrap_or_default();
    if let Value::Object(mut map) = value {
        // Schema metadata is noise for tool clients
        map.remove("$schema");
        map.remove("title");
        map.entry("properties")
            .or_insert_with(|| Value::Object(Map::new()));
        Arc::new(map)
    } else {
        Arc::new(Map::new())
    }
}

/// Tool definitions in catalog order.
pub fn tool_catalog() -> Vec<Tool> {
    ToolKind::ALL.iter().map(|kind| kind.definition()).collect()
}
