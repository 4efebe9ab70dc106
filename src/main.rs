//! mcp-ssh: an MCP server that lets clients open SSH connections, run
//! commands and move files over SFTP.
//!
//! ## Modes
//!
//! **stdio** (default): line-delimited JSON-RPC on stdin/stdout, one registry
//! for the process.
//!
//! **ws**: WebSocket server. Every client gets its own registry, torn down when
//! the client goes away.
//!
//! **http**: JSON-RPC over HTTP with a process-wide registry.
//!
//! **proxy**: bridge a local stdio client to a remote `ws` server.

mod auth;
mod config;
mod error;
mod mcp;
mod proxy;
mod shutdown;
mod ssh;
mod state;
mod stdio;
mod websocket;

#[cfg(test)]
mod test_support;

use anyhow::Context;
use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::BufReader;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{Cli, Command, ProxyArgs, ServerArgs};
use crate::mcp::McpSshService;
use crate::shutdown::ShutdownCoordinator;
use crate::ssh::SshConnector;
use crate::state::ConnectionRegistry;

/// How long in-flight requests and WebSocket handlers get to finish on shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> ExitCode {
    // Load environment variables before RUST_LOG is read
    dotenvy::dotenv().ok();

    // Logs go to stderr so stdout stays clean for stdio framing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mcp_ssh=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let result = match cli.command() {
        Command::Stdio => run_stdio().await,
        Command::Ws(args) => run_ws(args).await,
        Command::Http(args) => run_http(args).await,
        Command::Proxy(args) => run_proxy(args).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn shared_service() -> Arc<McpSshService> {
    Arc::new(McpSshService::new(ConnectionRegistry::new(Arc::new(
        SshConnector,
    ))))
}

async fn run_stdio() -> anyhow::Result<()> {
    let service = shared_service();
    tracing::info!("MCP SSH server running on stdio");

    let served = stdio::serve(
        service.clone(),
        BufReader::new(tokio::io::stdin()),
        tokio::io::stdout(),
        shutdown::signal_received(),
    )
    .await;

    let closed = service.shutdown().await;
    tracing::info!("Closed {} SSH connection(s)", closed);
    served.context("stdio transport failed")
}

async fn run_ws(args: ServerArgs) -> anyhow::Result<()> {
    let token = args.auth_token()?;
    let coordinator = ShutdownCoordinator::new();

    let app = websocket::router(websocket::WsState {
        token,
        connector: Arc::new(SshConnector),
        shutdown: coordinator.handle(),
    });

    let addr = args.bind_address();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!("MCP SSH WebSocket server listening on ws://{}", addr);

    let served =
        shutdown::serve_until(listener, app, shutdown::signal_received(), SHUTDOWN_GRACE).await;

    if !coordinator.shutdown(SHUTDOWN_GRACE).await {
        tracing::warn!("Some WebSocket clients did not finish teardown in time");
    }
    served.context("WebSocket server failed")
}

async fn run_http(args: ServerArgs) -> anyhow::Result<()> {
    let token = args.auth_token()?;
    let service = shared_service();
    let app = mcp::http::router(service.clone(), token);

    let addr = args.bind_address();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!("MCP SSH HTTP server listening on http://{}", addr);
    tracing::info!("MCP endpoint available at http://{}/mcp", addr);

    let served =
        shutdown::serve_until(listener, app, shutdown::signal_received(), SHUTDOWN_GRACE).await;

    let closed = service.shutdown().await;
    tracing::info!("Closed {} SSH connection(s)", closed);
    served.context("HTTP server failed")
}

async fn run_proxy(args: ProxyArgs) -> anyhow::Result<()> {
    let token = args.auth_token()?;

    tokio::select! {
        result = proxy::run(
            &args.url,
            &token,
            BufReader::new(tokio::io::stdin()),
            tokio::io::stdout(),
        ) => result,
        _ = shutdown::signal_received() => Ok(()),
    }
}
