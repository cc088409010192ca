//! Persistent framed-TCP RPC client.

use super::{read_frame, write_frame, RpcOperation, RpcReply, RpcRequest, RpcResponse};
use crate::bench::{Connection, ConnectionFactory};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::net::SocketAddr;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::debug;

/// One persistent RPC session over a TCP stream.
///
/// Requests carry a client-assigned id; the session is strictly
/// request-response, so a mismatched response id means the stream is
/// corrupt and the call fails.
pub struct RpcConnection {
    stream: TcpStream,
    next_id: u64,
}

impl RpcConnection {
    pub async fn connect(addr: SocketAddr) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .with_context(|| format!("failed to connect to RPC server at {addr}"))?;
        stream.set_nodelay(true)?;
        debug!("established RPC session to {addr}");
        Ok(Self { stream, next_id: 0 })
    }

    async fn invoke(&mut self, op: RpcOperation) -> Result<RpcReply> {
        self.next_id += 1;
        let request = RpcRequest {
            id: self.next_id,
            op,
        };
        write_frame(&mut self.stream, &request).await?;
        let response: RpcResponse = read_frame(&mut self.stream).await?;

        if response.id != request.id {
            bail!(
                "response id {} does not match request id {}",
                response.id,
                request.id
            );
        }
        match response.reply {
            RpcReply::Error(message) => bail!("server error: {message}"),
            reply => Ok(reply),
        }
    }
}

#[async_trait]
impl Connection for RpcConnection {
    async fn request(&mut self) -> Result<()> {
        match self.invoke(RpcOperation::Ping).await? {
            RpcReply::Pong => Ok(()),
            other => bail!("unexpected reply to ping: {other:?}"),
        }
    }

    async fn upload(&mut self, payload: &[u8]) -> Result<usize> {
        match self.invoke(RpcOperation::Upload(payload.to_vec())).await? {
            RpcReply::Uploaded(n) => Ok(n),
            other => bail!("unexpected reply to upload: {other:?}"),
        }
    }

    async fn download(&mut self, len: usize) -> Result<Vec<u8>> {
        match self.invoke(RpcOperation::Download(len)).await? {
            RpcReply::Payload(body) => {
                if body.len() != len {
                    bail!("requested {len} bytes but received {}", body.len());
                }
                Ok(body)
            }
            other => bail!("unexpected reply to download: {other:?}"),
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.stream.shutdown().await.ok();
        Ok(())
    }
}

/// Produces [`RpcConnection`]s to a fixed server address.
pub struct RpcConnectionFactory {
    addr: SocketAddr,
}

impl RpcConnectionFactory {
    pub fn new(addr: SocketAddr) -> Self {
        Self { addr }
    }
}

#[async_trait]
impl ConnectionFactory for RpcConnectionFactory {
    async fn connect(&self) -> Result<Box<dyn Connection>> {
        Ok(Box::new(RpcConnection::connect(self.addr).await?))
    }
}
