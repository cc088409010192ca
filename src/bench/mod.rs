//! Benchmark primitives.
//!
//! Every primitive follows the same contract: it is handed a
//! [`ConnectionFactory`], owns exactly one [`BenchmarkMetrics`]
//! record for its run, and returns that record on completion.
//!
//! Failure policy, shared by all primitives:
//! - a setup failure (the factory failing while establishing the
//!   primitive's working connection) is fatal to the run and propagates to
//!   the orchestrator after any already-open connections are released;
//! - a failure during a timed request is recovered locally: it increments
//!   `failed_requests`, records no sample, and the trial loop continues.
//!
//! No primitive retries anything. This is a measurement tool; retrying
//! would corrupt the failure and latency signal being measured.

use anyhow::Result;
use async_trait::async_trait;

pub mod bandwidth;
pub mod binary;
pub mod concurrent;
pub mod connection;
pub mod latency;

pub use bandwidth::BandwidthBenchmark;
pub use binary::{BinaryTransferBenchmark, BinaryTransferOutcome};
pub use concurrent::{ConcurrentBenchmark, ConcurrentOutcome};
pub use connection::ConnectionBenchmark;
pub use latency::LatencyBenchmark;

/// One ready-to-use client connection or session.
///
/// This is the entire surface the benchmarks depend on: one logical
/// no-payload request (the latency probe), a payload upload returning the
/// acknowledged byte count, a sized download, and close. Protocol clients
/// and in-memory test fakes implement the same trait.
#[async_trait]
pub trait Connection: Send {
    /// Perform one logical no-payload operation (ping).
    async fn request(&mut self) -> Result<()>;

    /// Send `payload` to the server; returns the acknowledged byte count.
    async fn upload(&mut self, payload: &[u8]) -> Result<usize>;

    /// Fetch `len` bytes from the server.
    async fn download(&mut self, len: usize) -> Result<Vec<u8>>;

    /// Release the connection. Safe to call once; errors are reportable
    /// but never fatal to a benchmark run.
    async fn close(&mut self) -> Result<()>;
}

/// Producer of ready-to-use connections.
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn Connection>>;
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory fakes shared by the primitive tests.

    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    /// Fake connection with an injected fixed per-call delay and an
    /// optional deterministic failure pattern (fail every Nth call).
    pub struct FakeConnection {
        pub delay: Duration,
        pub fail_every: Option<u64>,
        pub calls: Arc<AtomicU64>,
    }

    #[async_trait]
    impl Connection for FakeConnection {
        async fn request(&mut self) -> Result<()> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            match self.fail_every {
                Some(n) if call % n == 0 => Err(anyhow::anyhow!("injected failure")),
                _ => Ok(()),
            }
        }

        async fn upload(&mut self, payload: &[u8]) -> Result<usize> {
            self.request().await?;
            Ok(payload.len())
        }

        async fn download(&mut self, len: usize) -> Result<Vec<u8>> {
            self.request().await?;
            Ok(vec![0u8; len])
        }

        async fn close(&mut self) -> Result<()> {
            Ok(())
        }
    }

    /// Factory producing [`FakeConnection`]s; counts calls across all of
    /// them so failure patterns are deterministic per run.
    pub struct FakeFactory {
        pub delay: Duration,
        pub fail_every: Option<u64>,
        pub fail_connect: bool,
        pub calls: Arc<AtomicU64>,
        pub connects: Arc<AtomicU64>,
    }

    impl FakeFactory {
        pub fn new(delay: Duration) -> Self {
            Self {
                delay,
                fail_every: None,
                fail_connect: false,
                calls: Arc::new(AtomicU64::new(0)),
                connects: Arc::new(AtomicU64::new(0)),
            }
        }
    }

    #[async_trait]
    impl ConnectionFactory for FakeFactory {
        async fn connect(&self) -> Result<Box<dyn Connection>> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            if self.fail_connect {
                anyhow::bail!("injected connect failure");
            }
            Ok(Box::new(FakeConnection {
                delay: self.delay,
                fail_every: self.fail_every,
                calls: Arc::clone(&self.calls),
            }))
        }
    }
}
