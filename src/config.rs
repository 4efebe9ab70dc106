use clap::{Args, Parser, Subcommand};
use thiserror::Error;

use crate::auth::BearerToken;

#[derive(Parser, Debug)]
#[command(name = "mcp-ssh", version, about = "MCP server exposing SSH and SFTP tools", long_about = None)]
pub struct Cli {
    /// Transport to serve. Defaults to stdio.
    #[command(subcommand)]
    pub command: Option<Command>,
}

impl Cli {
    pub fn command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Stdio)
    }
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Serve line-delimited JSON-RPC on stdin/stdout
    Stdio,
    /// Serve JSON-RPC over WebSocket, one registry per client
    Ws(ServerArgs),
    /// Serve JSON-RPC over HTTP
    Http(ServerArgs),
    /// Bridge stdin/stdout to a remote WebSocket server
    Proxy(ProxyArgs),
}

#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct ServerArgs {
    /// Address to bind
    #[arg(long, env = "MCP_BIND_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to listen on
    #[arg(long, short, env = "MCP_PORT", default_value_t = 3000)]
    pub port: u16,

    /// Bearer token clients must present
    #[arg(long, env = "MCP_AUTH_TOKEN", hide_env_values = true)]
    pub token: Option<String>,
}

impl ServerArgs {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn auth_token(&self) -> Result<BearerToken, ConfigError> {
        require_token(self.token.as_deref())
    }
}

#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct ProxyArgs {
    /// WebSocket URL of the remote server
    #[arg(long, env = "MCP_REMOTE_URL", default_value = "ws://localhost:3000")]
    pub url: String,

    /// Bearer token sent to the remote server
    #[arg(long, env = "MCP_AUTH_TOKEN", hide_env_values = true)]
    pub token: Option<String>,
}

impl ProxyArgs {
    pub fn auth_token(&self) -> Result<BearerToken, ConfigError> {
        require_token(self.token.as_deref())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("MCP_AUTH_TOKEN environment variable must be set")]
    MissingToken,
}

fn require_token(token: Option<&str>) -> Result<BearerToken, ConfigError> {
    match token.map(str::trim) {
        Some(token) if !token.is_empty() => Ok(BearerToken::new(token)),
        _ => Err(ConfigError::MissingToken),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_subcommand_means_stdio() {
        let cli = Cli::try_parse_from(["mcp-ssh"]).unwrap();
        assert_eq!(cli.command(), Command::Stdio);
    }

    #[test]
    fn test_server_flags() {
        let cli = Cli::try_parse_from([
            "mcp-ssh", "ws", "--host", "127.0.0.1", "--port", "4000", "--token", "abc",
        ])
        .unwrap();
        let Command::Ws(args) = cli.command() else {
            panic!("expected ws subcommand");
        };
        assert_eq!(args.bind_address(), "127.0.0.1:4000");
        assert_eq!(args.auth_token().unwrap().as_str(), "abc");
    }

    #[test]
    fn test_proxy_flags() {
        let cli = Cli::try_parse_from([
            "mcp-ssh", "proxy", "--url", "wss://remote.example:443", "--token", "t",
        ])
        .unwrap();
        let Command::Proxy(args) = cli.command() else {
            panic!("expected proxy subcommand");
        };
        assert_eq!(args.url, "wss://remote.example:443");
        assert!(args.auth_token().is_ok());
    }

    #[test]
    fn test_invalid_port_is_rejected() {
        assert!(Cli::try_parse_from(["mcp-ssh", "http", "--port", "70000"]).is_err());
    }

    #[test]
    fn test_token_is_required() {
        assert_eq!(require_token(None).err(), Some(ConfigError::MissingToken));
        assert_eq!(require_token(Some("  ")).err(), Some(ConfigError::MissingToken));
        assert_eq!(require_token(Some("s3cret")).unwrap().as_str(), "s3cret");
    }
}
