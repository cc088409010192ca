use super::{Connection, ConnectionFactory};
use crate::metrics::BenchmarkMetrics;
use crate::utils::fill_payload;
use anyhow::{Context, Result};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Results of a binary transfer run, one metrics record per enabled
/// transfer strategy.
pub struct BinaryTransferOutcome {
    pub whole: Option<BenchmarkMetrics>,
    pub chunked: Option<BenchmarkMetrics>,
}

/// Measures large binary payload transfers using two strategies:
///
/// - **whole**: the full payload crosses the connection in a single
///   upload and a single download call;
/// - **chunked**: the payload is streamed in `chunk_size` pieces, timed
///   end to end, so the per-call overhead of the protocol is amortized
///   differently.
///
/// Each logical transfer contributes exactly one bandwidth sample
/// (`total bytes / total duration`), regardless of how many chunks it
/// took. A failure mid-transfer aborts that transfer, counts one failed
/// request, and stores no sample.
pub struct BinaryTransferBenchmark {
    name: String,
    file_sizes: Vec<usize>,
    chunk_size: usize,
    iterations: usize,
    test_whole: bool,
    test_chunked: bool,
}

impl BinaryTransferBenchmark {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            file_sizes: crate::defaults::BINARY_SIZES.to_vec(),
            chunk_size: crate::defaults::CHUNK_SIZE,
            iterations: crate::defaults::BINARY_ITERATIONS,
            test_whole: true,
            test_chunked: true,
        }
    }

    pub fn with_file_sizes(mut self, file_sizes: Vec<usize>) -> Self {
        self.file_sizes = file_sizes;
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn with_iterations(mut self, iterations: usize) -> Self {
        self.iterations = iterations;
        self
    }

    pub fn with_strategies(mut self, whole: bool, chunked: bool) -> Self {
        self.test_whole = whole;
        self.test_chunked = chunked;
        self
    }

    pub async fn run(&self, factory: &dyn ConnectionFactory) -> Result<BinaryTransferOutcome> {
        let whole = if self.test_whole {
            Some(self.run_strategy(factory, Strategy::Whole).await?)
        } else {
            None
        };
        let chunked = if self.test_chunked {
            Some(self.run_strategy(factory, Strategy::Chunked).await?)
        } else {
            None
        };
        Ok(BinaryTransferOutcome { whole, chunked })
    }

    async fn run_strategy(
        &self,
        factory: &dyn ConnectionFactory,
        strategy: Strategy,
    ) -> Result<BenchmarkMetrics> {
        let mut metrics = BenchmarkMetrics::new(format!("{}_{}", self.name, strategy.suffix()));

        let mut conn = factory
            .connect()
            .await
            .context("binary transfer setup: connection factory failed")?;

        metrics.start();
        for &size in &self.file_sizes {
            info!(
                "binary transfer: {} strategy, {} bytes, {} iterations",
                strategy.suffix(),
                size,
                self.iterations
            );
            let payload = fill_payload(size);

            for _ in 0..self.iterations {
                self.transfer_up(conn.as_mut(), strategy, &payload, &mut metrics)
                    .await;
                self.transfer_down(conn.as_mut(), strategy, size, &mut metrics)
                    .await;
            }
        }
        metrics.end();

        if let Err(e) = conn.close().await {
            warn!("failed to close binary transfer connection: {e:#}");
        }

        Ok(metrics)
    }

    async fn transfer_up(
        &self,
        conn: &mut dyn Connection,
        strategy: Strategy,
        payload: &[u8],
        metrics: &mut BenchmarkMetrics,
    ) {
        let started = Instant::now();
        let sent = match strategy {
            Strategy::Whole => conn.upload(payload).await,
            Strategy::Chunked => {
                let mut sent = 0usize;
                let mut result = Ok(0);
                for chunk in payload.chunks(self.chunk_size) {
                    match conn.upload(chunk).await {
                        Ok(n) => sent += n,
                        Err(e) => {
                            result = Err(e);
                            break;
                        }
                    }
                }
                result.map(|_| sent)
            }
        };

        match sent {
            Ok(n) => {
                metrics.record_request(true);
                if let Err(e) = metrics.record_upload(n, started.elapsed()) {
                    warn!("discarding upload sample for {} bytes: {e}", payload.len());
                }
            }
            Err(e) => {
                debug!("binary upload of {} bytes failed: {e:#}", payload.len());
                metrics.record_request(false);
            }
        }
    }

    async fn transfer_down(
        &self,
        conn: &mut dyn Connection,
        strategy: Strategy,
        size: usize,
        metrics: &mut BenchmarkMetrics,
    ) {
        let started = Instant::now();
        let received = match strategy {
            Strategy::Whole => conn.download(size).await.map(|b| b.len()),
            Strategy::Chunked => {
                let mut received = 0usize;
                let mut result = Ok(());
                while received < size {
                    let want = self.chunk_size.min(size - received);
                    match conn.download(want).await {
                        Ok(b) => received += b.len(),
                        Err(e) => {
                            result = Err(e);
                            break;
                        }
                    }
                }
                result.map(|()| received)
            }
        };

        match received {
            Ok(n) => {
                metrics.record_request(true);
                if let Err(e) = metrics.record_download(n, started.elapsed()) {
                    warn!("discarding download sample for {size} bytes: {e}");
                }
            }
            Err(e) => {
                debug!("binary download of {size} bytes failed: {e:#}");
                metrics.record_request(false);
            }
        }
    }
}

#[derive(Clone, Copy)]
enum Strategy {
    Whole,
    Chunked,
}

impl Strategy {
    fn suffix(self) -> &'static str {
        match self {
            Strategy::Whole => "whole",
            Strategy::Chunked => "chunked",
        }
    }
}
