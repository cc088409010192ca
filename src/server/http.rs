//! Stateless HTTP/REST server built on axum.
//!
//! Three routes mirror the RPC operations: `GET /ping`, `POST /upload`
//! (body in, byte count back as text), and `GET /download/{len}`.

use super::ServerHandle;
use anyhow::{Context, Result};
use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Path};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::Router;
use tokio::sync::oneshot;
use tracing::{info, warn};

/// Body and download ceiling, matching the RPC frame limit.
const MAX_TRANSFER: usize = 1024 * 1024 * 1024;

pub struct HttpServer;

impl HttpServer {
    /// Bind and start serving on the current tokio runtime. The socket
    /// is bound before this returns. Pass port 0 for an ephemeral port.
    pub async fn start(host: &str, port: u16) -> Result<ServerHandle> {
        let listener = tokio::net::TcpListener::bind((host, port))
            .await
            .with_context(|| format!("failed to bind HTTP server to {host}:{port}"))?;
        let addr = listener.local_addr()?;
        info!("HTTP server listening on {addr}");

        let app = Router::new()
            .route("/ping", get(|| async { "pong" }))
            .route("/upload", post(upload))
            .route("/download/{len}", get(download))
            .layer(DefaultBodyLimit::max(MAX_TRANSFER));

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let served = axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await;
            if let Err(e) = served {
                warn!("HTTP server exited with error: {e}");
            }
        });

        let stop = Box::new(move || {
            let _ = shutdown_tx.send(());
            // Graceful shutdown drains in-flight requests; the task is
            // not awaited because stop may run outside the runtime.
            drop(task);
        });

        Ok(ServerHandle::new(addr, "HTTP", stop))
    }
}

async fn upload(body: Bytes) -> String {
    body.len().to_string()
}

async fn download(Path(len): Path<usize>) -> Result<Bytes, StatusCode> {
    if len > MAX_TRANSFER {
        return Err(StatusCode::PAYLOAD_TOO_LARGE);
    }
    Ok(Bytes::from(vec![0x78u8; len]))
}
