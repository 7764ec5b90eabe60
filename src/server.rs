//! HTTP serving with a bounded graceful shutdown.

use axum::Router;
use std::future::{Future, IntoFuture};
use std::io;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinError;

/// Serve `app` until `signal` resolves, then stop accepting connections and
/// give in-flight requests up to `drain_timeout` to finish.
///
/// Requests still running when the drain window closes are dropped.
pub async fn serve_with_shutdown<F>(
    listener: TcpListener,
    app: Router,
    signal: F,
    drain_timeout: Duration,
) -> io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let mut server = tokio::spawn(
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = stop_rx.await;
            })
            .into_future(),
    );

    tokio::select! {
        joined = &mut server => return flatten(joined),
        _ = signal => {}
    }

    tracing::info!(
        drain_timeout_ms = drain_timeout.as_millis() as u64,
        "Draining in-flight requests"
    );
    let _ = stop_tx.send(());

    match tokio::time::timeout(drain_timeout, &mut server).await {
        Ok(joined) => flatten(joined),
        Err(_) => {
            tracing::warn!(
                drain_timeout_ms = drain_timeout.as_millis() as u64,
                "Drain timeout elapsed, dropping remaining connections"
            );
            server.abort();
            Ok(())
        }
    }
}

fn flatten(joined: std::result::Result<io::Result<()>, JoinError>) -> io::Result<()> {
    joined.map_err(io::Error::other)?
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::get;
    use std::net::SocketAddr;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpStream;

    async fn start(
        drain_timeout: Duration,
    ) -> (SocketAddr, oneshot::Sender<()>, tokio::task::JoinHandle<io::Result<()>>) {
        let app = Router::new()
            .route("/health", get(|| async { "ok" }))
            .route(
                "/slow",
                get(|| async {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    "done"
                }),
            );
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(serve_with_shutdown(
            listener,
            app,
            async move {
                let _ = rx.await;
            },
            drain_timeout,
        ));
        (addr, tx, handle)
    }

    #[tokio::test]
    async fn test_idle_server_stops_without_waiting_out_drain_window() {
        let (addr, tx, handle) = start(Duration::from_secs(30)).await;
        TcpStream::connect(addr).await.unwrap();

        tx.send(()).unwrap();
        let finished = tokio::time::timeout(Duration::from_secs(5), handle).await;
        assert!(finished.unwrap().unwrap().is_ok());

        // The listener is gone once serving returns.
        assert!(TcpStream::connect(addr).await.is_err());
    }

    #[tokio::test]
    async fn test_stuck_request_is_cut_off_at_drain_timeout() {
        let (addr, tx, handle) = start(Duration::from_millis(100)).await;

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET /slow HTTP/1.1\r\nHost: localhost\r\n\r\n")
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        tx.send(()).unwrap();
        let finished = tokio::time::timeout(Duration::from_secs(5), handle).await;
        assert!(finished.unwrap().unwrap().is_ok());
    }
}
