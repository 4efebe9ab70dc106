//! Bridge a local stdio MCP client to a remote WebSocket server.

use anyhow::{Context, Result};
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio_stream::wrappers::LinesStream;
use tokio_tungstenite::tungstenite::{
    client::IntoClientRequest,
    http::{header::AUTHORIZATION, HeaderValue},
    Message,
};

use crate::auth::BearerToken;

/// Forward `input` lines to the server at `url` and server messages to
/// `output`, one JSON document per line.
///
/// Returns `Ok` when the server closes the connection, including after the
/// close that follows end of input. Connection and socket failures are errors.
pub async fn run<R, W>(url: &str, token: &BearerToken, input: R, mut output: W) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut request = url
        .into_client_request()
        .with_context(|| format!("Invalid remote URL {}", url))?;
    let auth = HeaderValue::from_str(&format!("Bearer {}", token.as_str()))
        .context("Auth token is not a valid header value")?;
    request.headers_mut().insert(AUTHORIZATION, auth);

    let (ws_stream, _) = tokio_tungstenite::connect_async(request)
        .await
        .with_context(|| format!("Failed to connect to {}", url))?;
    tracing::info!("Connected to remote MCP server at {}", url);

    let (mut sink, mut stream) = ws_stream.split();
    let mut lines = LinesStream::new(input.lines());
    let mut input_open = true;

    loop {
        tokio::select! {
            line = lines.next(), if input_open => match line {
                Some(Ok(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<Value>(&line) {
                        Ok(message) => sink
                            .send(Message::Text(message.to_string().into()))
                            .await
                            .context("Failed to send message to remote server")?,
                        Err(e) => tracing::error!("Failed to parse message from stdin: {}", e),
                    }
                }
                Some(Err(e)) => return Err(e).context("Failed to read stdin"),
                None => {
                    tracing::info!("stdin closed, closing remote connection");
                    input_open = false;
                    if let Err(e) = sink.send(Message::Close(None)).await {
                        tracing::debug!("Failed to send close frame: {}", e);
                        return Ok(());
                    }
                }
            },
            msg = stream.next() => match msg {
                Some(Ok(Message::Text(text))) => forward(&mut output, text.as_str()).await?,
                Some(Ok(Message::Binary(bytes))) => {
                    forward(&mut output, &String::from_utf8_lossy(&bytes)).await?
                }
                Some(Ok(Message::Close(frame))) => {
                    match frame {
                        Some(frame) => tracing::info!("WebSocket closed: {} {}", frame.code, frame.reason.as_str()),
                        None => tracing::info!("WebSocket closed"),
                    }
                    return Ok(());
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e).context("WebSocket error"),
                None => return Ok(()),
            }
        }
    }
}

/// Re-encode a server message as a single line. Non-JSON payloads are dropped.
async fn forward<W: AsyncWrite + Unpin>(output: &mut W, text: &str) -> Result<()> {
    let message: Value = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(e) => {
            tracing::error!("Failed to parse message from server: {}", e);
            return Ok(());
        }
    };

    let mut line = message.to_string();
    line.push('\n');
    output
        .write_all(line.as_bytes())
        .await
        .context("Failed to write to stdout")?;
    output.flush().await.context("Failed to flush stdout")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shutdown::ShutdownCoordinator;
    use crate::test_support::FakeConnector;
    use crate::websocket::{self, WsState};
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::io::{duplex, BufReader};

    const TOKEN: &str = "proxy-secret";

    async fn spawn_server() -> (String, ShutdownCoordinator) {
        let coordinator = ShutdownCoordinator::new();
        let app = websocket::router(WsState {
            token: BearerToken::new(TOKEN),
            connector: Arc::new(FakeConnector::new()),
            shutdown: coordinator.handle(),
        });
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("ws://{}", addr), coordinator)
    }

    #[tokio::test]
    async fn test_forwards_both_directions() {
        let (url, _coordinator) = spawn_server().await;
        let (mut stdin_w, stdin_r) = duplex(4096);
        let (stdout_r, stdout_w) = duplex(4096);

        let proxy = tokio::spawn(async move {
            run(&url, &BearerToken::new(TOKEN), BufReader::new(stdin_r), stdout_w).await
        });

        stdin_w.write_all(b"not json\n").await.unwrap();
        stdin_w
            .write_all(b"{\"jsonrpc\":\"2.0\",\"id\":7,\"method\":\"ping\"}\n")
            .await
            .unwrap();

        let mut lines = BufReader::new(stdout_r).lines();
        let line = tokio::time::timeout(Duration::from_secs(5), lines.next_line())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        let reply: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(reply["id"], json!(7));
        assert_eq!(reply["result"], json!({}));

        drop(stdin_w);
        let result = tokio::time::timeout(Duration::from_secs(5), proxy)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_server_rejection_ends_cleanly() {
        let (url, _coordinator) = spawn_server().await;
        let (_stdin_w, stdin_r) = duplex(64);
        let (_stdout_r, stdout_w) = duplex(64);

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            run(&url, &BearerToken::new("wrong"), BufReader::new(stdin_r), stdout_w),
        )
        .await
        .unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_unreachable_server_is_an_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let (_stdin_w, stdin_r) = duplex(64);
        let (_stdout_r, stdout_w) = duplex(64);
        let result = run(
            &format!("ws://{}", addr),
            &BearerToken::new(TOKEN),
            BufReader::new(stdin_r),
            stdout_w,
        )
        .await;
        assert!(result.is_err());
    }
}
