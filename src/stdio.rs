//! Line-delimited JSON-RPC over stdin/stdout.
//!
//! Each input line is one request; each reply is written as one line. Requests
//! are handled concurrently, so replies may come back out of order and are
//! matched by id. Diagnostics never go to stdout.

use futures::StreamExt;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_stream::wrappers::LinesStream;

use crate::mcp::{protocol, McpSshService};

/// Serve until `input` reaches EOF or `stop` resolves, then wait for in-flight
/// requests and flush their replies.
pub async fn serve<R, W, F>(
    service: Arc<McpSshService>,
    input: R,
    mut output: W,
    stop: F,
) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
    F: std::future::Future<Output = ()>,
{
    let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<String>();

    let writer = tokio::spawn(async move {
        while let Some(line) = reply_rx.recv().await {
            output.write_all(line.as_bytes()).await?;
            output.write_all(b"\n").await?;
            output.flush().await?;
        }
        Ok::<_, std::io::Error>(())
    });

    let mut lines = LinesStream::new(input.lines());
    let mut in_flight = JoinSet::new();
    let mut stopped = false;
    tokio::pin!(stop);

    loop {
        tokio::select! {
            line = lines.next() => match line {
                Some(Ok(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    let service = service.clone();
                    let reply_tx = reply_tx.clone();
                    in_flight.spawn(async move {
                        if let Some(reply) = protocol::handle_text(&service, &line).await {
                            let _ = reply_tx.send(reply);
                        }
                    });
                }
                Some(Err(e)) => {
                    tracing::error!("Failed to read from stdin: {}", e);
                    break;
                }
                None => {
                    tracing::info!("stdin closed");
                    break;
                }
            },
            Some(_) = in_flight.join_next(), if !in_flight.is_empty() => {}
            _ = &mut stop => {
                tracing::info!("Stopping stdio server");
                in_flight.abort_all();
                stopped = true;
                break;
            }
        }
    }

    // A stop that arrives while draining still cancels whatever is left
    loop {
        tokio::select! {
            joined = in_flight.join_next() => {
                if joined.is_none() {
                    break;
                }
            }
            _ = &mut stop, if !stopped => {
                tracing::info!("Stopping stdio server, abandoning {} request(s)", in_flight.len());
                in_flight.abort_all();
                stopped = true;
            }
        }
    }
    drop(reply_tx);

    match writer.await {
        Ok(result) => result,
        Err(e) => Err(std::io::Error::new(std::io::ErrorKind::Other, e)),
    }
}
