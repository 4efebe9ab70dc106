use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket},
        State, WebSocketUpgrade,
    },
    http::HeaderMap,
    response::Response,
    Router,
};
use futures::{sink::SinkExt, stream::StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tower_http::trace::TraceLayer;

use crate::auth::BearerToken;
use crate::mcp::{protocol, McpSshService};
use crate::shutdown::ShutdownHandle;
use crate::ssh::Connector;
use crate::state::ConnectionRegistry;

/// Shared by every upgrade request. Each accepted socket builds its own
/// registry on top of `connector`.
#[derive(Clone)]
pub struct WsState {
    pub token: BearerToken,
    pub connector: Arc<dyn Connector>,
    pub shutdown: ShutdownHandle,
}

/// Accept WebSocket upgrades on any path.
pub fn router(state: WsState) -> Router {
    Router::new()
        .fallback(ws_handler)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    State(state): State<WsState>,
) -> Response {
    match state.token.authorize(&headers) {
        Ok(()) => {
            let shutdown = state.shutdown.clone();
            ws.on_upgrade(move |socket| shutdown.track(handle_connection(socket, state)))
        }
        Err(e) => {
            tracing::warn!("Rejecting WebSocket client: {}", e.message());
            ws.on_upgrade(reject_connection)
        }
    }
}

async fn reject_connection(mut socket: WebSocket) {
    let frame = CloseFrame {
        code: close_code::POLICY,
        reason: "Unauthorized".into(),
    };
    if let Err(e) = socket.send(Message::Close(Some(frame))).await {
        tracing::debug!("Failed to send close frame: {}", e);
    }
}

async fn handle_connection(socket: WebSocket, state: WsState) {
    let service = Arc::new(McpSshService::new(ConnectionRegistry::new(
        state.connector.clone(),
    )));
    let shutdown = state.shutdown.clone();
    drop(state);

    tracing::info!("WebSocket client connected");

    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Replies from concurrent requests funnel through one writer
    let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<Message>();
    let send_task = tokio::spawn(async move {
        while let Some(msg) = reply_rx.recv().await {
            if ws_sender.send(msg).await.is_err() {
                tracing::warn!("WebSocket closed, dropping pending replies");
                break;
            }
        }
        let _ = ws_sender.close().await;
    });

    let mut requests = JoinSet::new();

    loop {
        tokio::select! {
            msg = ws_receiver.next() => {
                let text = match msg {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Binary(bytes))) => String::from_utf8_lossy(&bytes).into_owned(),
                    Some(Ok(Message::Close(_))) | None => {
                        tracing::info!("WebSocket client disconnected");
                        break;
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        tracing::error!("WebSocket error: {}", e);
                        break;
                    }
                };

                let service = service.clone();
                let reply_tx = reply_tx.clone();
                requests.spawn(async move {
                    if let Some(reply) = protocol::handle_text(&service, &text).await {
                        let _ = reply_tx.send(Message::Text(reply));
                    }
                });
            }
            Some(_) = requests.join_next(), if !requests.is_empty() => {}
            _ = shutdown.requested() => {
                tracing::info!("Server shutting down, closing WebSocket client");
                let _ = reply_tx.send(Message::Close(Some(CloseFrame {
                    code: close_code::AWAY,
                    reason: "Server shutting down".into(),
                })));
                break;
            }
        }
    }

    // Abort in-flight calls first so none of them can register a connection
    // after the registry has been drained.
    requests.shutdown().await;
    let closed = service.shutdown().await;
    if closed > 0 {
        tracing::info!("Closed {} SSH connection(s) for WebSocket client", closed);
    }

    drop(reply_tx);
    let _ = send_task.await;
}
