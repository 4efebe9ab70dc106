//! MCP (Model Context Protocol) layer: tool catalog, dispatcher and the
//! JSON-RPC routing shared by the stdio, WebSocket and HTTP transports.

pub mod http;
pub mod protocol;
mod server;
mod tools;

pub use server::McpSshService;
