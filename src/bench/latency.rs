use super::ConnectionFactory;
use crate::metrics::BenchmarkMetrics;
use anyhow::{Context, Result};
use std::time::Instant;
use tracing::{debug, warn};

/// Measures per-request round-trip latency over a single persistent
/// connection.
///
/// Performs `warmup_requests` unmeasured calls first to avoid cold-cache
/// skew, then `num_requests` timed sequential calls. Connection creation
/// failure is fatal to the run; a per-call failure during the timed phase
/// is counted and skipped.
pub struct LatencyBenchmark {
    name: String,
    num_requests: usize,
    warmup_requests: usize,
}

impl LatencyBenchmark {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            num_requests: crate::defaults::NUM_REQUESTS,
            warmup_requests: crate::defaults::WARMUP_REQUESTS,
        }
    }

    pub fn with_requests(mut self, num_requests: usize) -> Self {
        self.num_requests = num_requests;
        self
    }

    pub fn with_warmup(mut self, warmup_requests: usize) -> Self {
        self.warmup_requests = warmup_requests;
        self
    }

    pub async fn run(&self, factory: &dyn ConnectionFactory) -> Result<BenchmarkMetrics> {
        let mut metrics = BenchmarkMetrics::new(&self.name);

        let mut conn = factory
            .connect()
            .await
            .context("latency benchmark setup: connection factory failed")?;

        // Warmup calls are excluded from statistics; failures here are
        // irrelevant to the measurement and only logged.
        for i in 0..self.warmup_requests {
            if let Err(e) = conn.request().await {
                debug!("warmup call {i} failed: {e:#}");
            }
        }

        metrics.start();
        for _ in 0..self.num_requests {
            let started = Instant::now();
            match conn.request().await {
                Ok(()) => {
                    metrics.record_latency(started.elapsed());
                    metrics.record_request(true);
                }
                Err(e) => {
                    debug!("timed request failed: {e:#}");
                    metrics.record_request(false);
                }
            }
        }
        metrics.end();

        if let Err(e) = conn.close().await {
            warn!("failed to close latency benchmark connection: {e:#}");
        }

        Ok(metrics)
    }
}
