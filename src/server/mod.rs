//! In-process benchmark servers.
//!
//! Servers start on demand and hand back a [`ServerHandle`]; dropping
//! the handle (or calling [`ServerHandle::stop`]) shuts the server
//! down. A successful `start` means the listening socket is bound, so
//! callers can connect immediately without polling.

use serde::Serialize;
use std::fmt;
use std::net::SocketAddr;
use tracing::info;

pub mod http;
pub mod rpc;

pub use http::HttpServer;
pub use rpc::RpcServer;

/// Concurrency model of the RPC server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerMode {
    /// One OS thread per accepted connection, living as long as the
    /// connection does.
    ThreadPerConnection,
    /// Connections share a fixed worker pool; each request is handed to
    /// a pool worker.
    ThreadPerRequest,
    /// One forked child process per accepted connection (unix only).
    ProcessPerConnection,
}

impl fmt::Display for ServerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ServerMode::ThreadPerConnection => "thread-per-connection",
            ServerMode::ThreadPerRequest => "thread-per-request",
            ServerMode::ProcessPerConnection => "process-per-connection",
        };
        write!(f, "{name}")
    }
}

/// Running server. Stops on drop.
pub struct ServerHandle {
    addr: SocketAddr,
    label: &'static str,
    stop: Option<Box<dyn FnOnce() + Send>>,
}

impl ServerHandle {
    pub(crate) fn new(
        addr: SocketAddr,
        label: &'static str,
        stop: Box<dyn FnOnce() + Send>,
    ) -> Self {
        Self {
            addr,
            label,
            stop: Some(stop),
        }
    }

    /// The bound listening address, with the real port even when the
    /// server was started on port 0.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stop the server and wait for its listener to wind down.
    /// Idempotent.
    pub fn stop(&mut self) {
        if let Some(stop) = self.stop.take() {
            info!("stopping {} server on {}", self.label, self.addr);
            stop();
        }
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
