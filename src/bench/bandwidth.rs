use super::ConnectionFactory;
use crate::metrics::BenchmarkMetrics;
use crate::utils::fill_payload;
use anyhow::{Context, Result};
use std::time::Instant;
use tracing::{debug, warn};

/// Measures sustained upload and download bandwidth across a range of
/// payload sizes.
///
/// For each configured payload size, repeats an upload and a download
/// `iterations` times over one persistent connection. Each stored sample is
/// `bytes / duration` in bytes per second.
pub struct BandwidthBenchmark {
    name: String,
    payload_sizes: Vec<usize>,
    iterations: usize,
}

impl BandwidthBenchmark {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            payload_sizes: crate::defaults::BANDWIDTH_SIZES.to_vec(),
            iterations: crate::defaults::BANDWIDTH_ITERATIONS,
        }
    }

    pub fn with_payload_sizes(mut self, payload_sizes: Vec<usize>) -> Self {
        self.payload_sizes = payload_sizes;
        self
    }

    pub fn with_iterations(mut self, iterations: usize) -> Self {
        self.iterations = iterations;
        self
    }

    pub async fn run(&self, factory: &dyn ConnectionFactory) -> Result<BenchmarkMetrics> {
        let mut metrics = BenchmarkMetrics::new(&self.name);

        let mut conn = factory
            .connect()
            .await
            .context("bandwidth benchmark setup: connection factory failed")?;

        metrics.start();
        for &size in &self.payload_sizes {
            let payload = fill_payload(size);

            for _ in 0..self.iterations {
                let started = Instant::now();
                match conn.upload(&payload).await {
                    Ok(acked) => {
                        metrics.record_request(true);
                        if let Err(e) = metrics.record_upload(acked, started.elapsed()) {
                            warn!("discarding upload sample for {size} bytes: {e}");
                        }
                    }
                    Err(e) => {
                        debug!("upload of {size} bytes failed: {e:#}");
                        metrics.record_request(false);
                    }
                }
            }

            for _ in 0..self.iterations {
                let started = Instant::now();
                match conn.download(size).await {
                    Ok(body) => {
                        metrics.record_request(true);
                        if let Err(e) = metrics.record_download(body.len(), started.elapsed()) {
                            warn!("discarding download sample for {size} bytes: {e}");
                        }
                    }
                    Err(e) => {
                        debug!("download of {size} bytes failed: {e:#}");
                        metrics.record_request(false);
                    }
                }
            }
        }
        metrics.end();

        if let Err(e) = conn.close().await {
            warn!("failed to close bandwidth benchmark connection: {e:#}");
        }

        Ok(metrics)
    }
}
