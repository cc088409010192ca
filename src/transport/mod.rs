//! Client transports and the RPC wire format.
//!
//! Two client implementations of [`crate::bench::Connection`] live
//! here: a persistent framed-TCP RPC client ([`rpc`]) and a stateless
//! HTTP client ([`http`]). The RPC wire format is a 4-byte
//! little-endian length prefix followed by a bincode-encoded message;
//! both the async client side and the blocking server side use the
//! codec defined in this module.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub mod http;
pub mod rpc;

pub use http::{HttpConnection, HttpConnectionFactory};
pub use rpc::{RpcConnection, RpcConnectionFactory};

/// Frame size ceiling. Large enough for the biggest binary transfer
/// payload plus encoding overhead, small enough to reject a corrupted
/// length prefix before allocating.
pub const MAX_FRAME_LEN: usize = 1024 * 1024 * 1024;

/// Operations a client can ask the RPC server to perform.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum RpcOperation {
    /// No-payload round trip.
    Ping,
    /// Send bytes back unchanged.
    Echo(Vec<u8>),
    /// Deliver bytes to the server; acknowledged with the byte count.
    Upload(Vec<u8>),
    /// Ask the server for this many bytes.
    Download(usize),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RpcRequest {
    pub id: u64,
    pub op: RpcOperation,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum RpcReply {
    Pong,
    Echoed(Vec<u8>),
    Uploaded(usize),
    Payload(Vec<u8>),
    Error(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RpcResponse {
    pub id: u64,
    pub reply: RpcReply,
}

/// Write one length-prefixed message to an async stream.
pub async fn write_frame<W, T>(writer: &mut W, message: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let encoded = bincode::serialize(message).context("failed to encode frame")?;
    if encoded.len() > MAX_FRAME_LEN {
        bail!("frame of {} bytes exceeds the {MAX_FRAME_LEN} byte limit", encoded.len());
    }
    writer.write_all(&(encoded.len() as u32).to_le_bytes()).await?;
    writer.write_all(&encoded).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one length-prefixed message from an async stream.
pub async fn read_frame<R, T>(reader: &mut R) -> Result<T>
where
    R: AsyncRead + Unpin,
    T: for<'de> Deserialize<'de>,
{
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await?;
    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        bail!("incoming frame of {len} bytes exceeds the {MAX_FRAME_LEN} byte limit");
    }
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;
    bincode::deserialize(&buf).context("failed to decode frame")
}

/// Blocking counterpart of [`write_frame`] for the threaded server.
pub fn write_frame_sync<W, T>(writer: &mut W, message: &T) -> Result<()>
where
    W: Write,
    T: Serialize,
{
    let encoded = bincode::serialize(message).context("failed to encode frame")?;
    if encoded.len() > MAX_FRAME_LEN {
        bail!("frame of {} bytes exceeds the {MAX_FRAME_LEN} byte limit", encoded.len());
    }
    writer.write_all(&(encoded.len() as u32).to_le_bytes())?;
    writer.write_all(&encoded)?;
    writer.flush()?;
    Ok(())
}

/// Blocking counterpart of [`read_frame`].
pub fn read_frame_sync<R, T>(reader: &mut R) -> Result<T>
where
    R: Read,
    T: for<'de> Deserialize<'de>,
{
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf)?;
    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        bail!("incoming frame of {len} bytes exceeds the {MAX_FRAME_LEN} byte limit");
    }
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf)?;
    bincode::deserialize(&buf).context("failed to decode frame")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn test_async_frame_round_trip() {
        let request = RpcRequest {
            id: 7,
            op: RpcOperation::Upload(vec![1, 2, 3, 4]),
        };

        let mut buf = Vec::new();
        write_frame(&mut buf, &request).await.unwrap();

        let mut cursor = Cursor::new(buf);
        let decoded: RpcRequest = read_frame(&mut cursor).await.unwrap();
        assert_eq!(decoded, request);
    }

    #[test]
    fn test_sync_and_async_framing_are_identical() {
        let response = RpcResponse {
            id: 3,
            reply: RpcReply::Payload(vec![0x78; 64]),
        };

        let mut sync_buf = Vec::new();
        write_frame_sync(&mut sync_buf, &response).unwrap();

        let rt = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        let mut async_buf = Vec::new();
        rt.block_on(write_frame(&mut async_buf, &response)).unwrap();

        assert_eq!(sync_buf, async_buf);

        let decoded: RpcResponse = read_frame_sync(&mut Cursor::new(sync_buf)).unwrap();
        assert_eq!(decoded, response);
    }

    #[test]
    fn test_oversized_length_prefix_is_rejected() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&(u32::MAX).to_le_bytes());
        buf.extend_from_slice(&[0u8; 16]);

        let result: Result<RpcRequest> = read_frame_sync(&mut Cursor::new(buf));
        let err = result.unwrap_err().to_string();
        assert!(err.contains("exceeds"), "unexpected error: {err}");
    }

    #[test]
    fn test_truncated_frame_is_an_error() {
        let request = RpcRequest {
            id: 1,
            op: RpcOperation::Ping,
        };
        let mut buf = Vec::new();
        write_frame_sync(&mut buf, &request).unwrap();
        buf.truncate(buf.len() - 1);

        let result: Result<RpcRequest> = read_frame_sync(&mut Cursor::new(buf));
        assert!(result.is_err());
    }
}
