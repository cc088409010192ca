//! Stateless HTTP/REST client.
//!
//! Each benchmark "connection" is its own [`reqwest::Client`] with its
//! own pool, so two concurrent clients never share sockets and
//! connection-establishment timing measures a real TCP (and pool)
//! setup rather than a pool hit.

use crate::bench::{Connection, ConnectionFactory};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tracing::debug;

pub struct HttpConnection {
    client: reqwest::Client,
    base_url: String,
}

impl HttpConnection {
    pub async fn connect(base_url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .context("failed to build HTTP client")?;

        // An initial ping both verifies reachability and performs the
        // TCP handshake being timed.
        let conn = Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        };
        conn.ping().await?;
        debug!("established HTTP session to {}", conn.base_url);
        Ok(conn)
    }

    async fn ping(&self) -> Result<()> {
        let response = self
            .client
            .get(format!("{}/ping", self.base_url))
            .send()
            .await
            .context("ping request failed")?;
        if !response.status().is_success() {
            bail!("ping returned HTTP {}", response.status());
        }
        Ok(())
    }
}

#[async_trait]
impl Connection for HttpConnection {
    async fn request(&mut self) -> Result<()> {
        self.ping().await
    }

    async fn upload(&mut self, payload: &[u8]) -> Result<usize> {
        let response = self
            .client
            .post(format!("{}/upload", self.base_url))
            .body(payload.to_vec())
            .send()
            .await
            .context("upload request failed")?;
        if !response.status().is_success() {
            bail!("upload returned HTTP {}", response.status());
        }
        let ack = response.text().await.context("upload ack unreadable")?;
        ack.trim()
            .parse::<usize>()
            .with_context(|| format!("upload ack was not a byte count: {ack:?}"))
    }

    async fn download(&mut self, len: usize) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(format!("{}/download/{len}", self.base_url))
            .send()
            .await
            .context("download request failed")?;
        if !response.status().is_success() {
            bail!("download returned HTTP {}", response.status());
        }
        let body = response.bytes().await.context("download body unreadable")?;
        if body.len() != len {
            bail!("requested {len} bytes but received {}", body.len());
        }
        Ok(body.to_vec())
    }

    async fn close(&mut self) -> Result<()> {
        // reqwest pools close on drop.
        Ok(())
    }
}

/// Produces [`HttpConnection`]s to a fixed base URL, one client pool
/// per connection.
pub struct HttpConnectionFactory {
    base_url: String,
}

impl HttpConnectionFactory {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl ConnectionFactory for HttpConnectionFactory {
    async fn connect(&self) -> Result<Box<dyn Connection>> {
        Ok(Box::new(HttpConnection::connect(&self.base_url).await?))
    }
}
