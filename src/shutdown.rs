//! Process shutdown: cancel long-lived connection handlers, then wait until
//! every one of them has finished its teardown.

use axum::Router;
use std::future::{Future, IntoFuture};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Handed to connection handlers so they can observe shutdown and register
/// themselves for the final wait.
#[derive(Clone)]
pub struct ShutdownHandle {
    cancel: CancellationToken,
    tracker: TaskTracker,
}

impl ShutdownHandle {
    /// Resolves once shutdown has been requested.
    pub async fn requested(&self) {
        self.cancel.cancelled().await
    }

    /// Wrap a handler future so the coordinator waits for it.
    pub fn track<F: Future>(&self, fut: F) -> tokio_util::task::task_tracker::TrackedFuture<F> {
        self.tracker.track_future(fut)
    }
}

#[derive(Default)]
pub struct ShutdownCoordinator {
    cancel: CancellationToken,
    tracker: TaskTracker,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            cancel: self.cancel.clone(),
            tracker: self.tracker.clone(),
        }
    }

    /// Cancel all handlers and wait for the tracked ones to finish, up to `grace`.
    /// Returns false if some handlers were still running when the grace period ran out.
    pub async fn shutdown(self, grace: Duration) -> bool {
        self.cancel.cancel();
        self.tracker.close();
        tokio::time::timeout(grace, self.tracker.wait()).await.is_ok()
    }
}

/// Serve `app` until `stop` resolves, then drain in-flight requests for at
/// most `grace`. Requests still running after that are dropped.
pub async fn serve_until<F>(
    listener: TcpListener,
    app: Router,
    stop: F,
    grace: Duration,
) -> std::io::Result<()>
where
    F: Future<Output = ()>,
{
    let drain = CancellationToken::new();
    let mut server = tokio::spawn(
        axum::serve(listener, app)
            .with_graceful_shutdown(drain.clone().cancelled_owned())
            .into_future(),
    );

    let joined = tokio::select! {
        joined = &mut server => joined,
        _ = stop => {
            drain.cancel();
            match tokio::time::timeout(grace, &mut server).await {
                Ok(joined) => joined,
                Err(_) => {
                    tracing::warn!("In-flight requests did not finish within {:?}, dropping them", grace);
                    server.abort();
                    return Ok(());
                }
            }
        }
    };

    match joined {
        Ok(result) => result,
        Err(e) => Err(std::io::Error::new(std::io::ErrorKind::Other, e)),
    }
}

/// Resolves on Ctrl+C or, on Unix, SIGTERM.
pub async fn signal_received() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C"),
        _ = terminate => tracing::info!("Received SIGTERM"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::get;

    #[tokio::test]
    async fn test_shutdown_waits_for_tracked_handlers() {
        let coordinator = ShutdownCoordinator::new();
        let handle = coordinator.handle();

        let handler = tokio::spawn(handle.clone().track(async move {
            handle.requested().await;
            tokio::time::sleep(Duration::from_millis(20)).await;
        }));

        assert!(coordinator.shutdown(Duration::from_secs(5)).await);
        handler.await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_without_handlers_is_immediate() {
        let coordinator = ShutdownCoordinator::new();
        let _unused = coordinator.handle();
        assert!(coordinator.shutdown(Duration::from_millis(10)).await);
    }

    #[tokio::test]
    async fn test_shutdown_times_out_on_stuck_handler() {
        let coordinator = ShutdownCoordinator::new();
        let handle = coordinator.handle();
        let _stuck = tokio::spawn(handle.track(std::future::pending::<()>()));
        assert!(!coordinator.shutdown(Duration::from_millis(20)).await);
    }

    #[tokio::test]
    async fn test_serve_until_returns_despite_hung_request() {
        let app = Router::new().route("/hang", get(|| std::future::pending::<&'static str>()));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let server = tokio::spawn(serve_until(
            listener,
            app,
            async {
                let _ = stop_rx.await;
            },
            Duration::from_millis(100),
        ));

        // Park one request inside the hung handler
        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        tokio::io::AsyncWriteExt::write_all(
            &mut stream,
            b"GET /hang HTTP/1.1\r\nhost: localhost\r\n\r\n",
        )
        .await
        .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        stop_tx.send(()).unwrap();
        let result = tokio::time::timeout(Duration::from_secs(3), server)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }
}
