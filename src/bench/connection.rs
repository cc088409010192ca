use super::{Connection, ConnectionFactory};
use crate::metrics::BenchmarkMetrics;
use anyhow::Result;
use std::time::Instant;
use tracing::{debug, warn};

/// Measures connection establishment time.
///
/// Sequentially invokes the connection factory `num_connections` times,
/// timing each invocation. Every created connection is retained until the
/// run ends and only then released, so the server's connection-slot limit
/// is genuinely exercised for large `num_connections`.
pub struct ConnectionBenchmark {
    name: String,
    num_connections: usize,
}

impl ConnectionBenchmark {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            num_connections: crate::defaults::NUM_CONNECTIONS,
        }
    }

    pub fn with_connections(mut self, num_connections: usize) -> Self {
        self.num_connections = num_connections;
        self
    }

    /// Run the benchmark and return its finalized metrics record.
    ///
    /// A factory failure here is a timed-trial failure, not a setup
    /// failure: it is counted and the loop continues. `num_connections == 0`
    /// yields a valid all-zero record.
    pub async fn run(&self, factory: &dyn ConnectionFactory) -> Result<BenchmarkMetrics> {
        let mut metrics = BenchmarkMetrics::new(&self.name);
        metrics.start();

        let mut connections: Vec<Box<dyn Connection>> = Vec::with_capacity(self.num_connections);
        for i in 0..self.num_connections {
            let started = Instant::now();
            match factory.connect().await {
                Ok(conn) => {
                    metrics.record_connection_time(started.elapsed());
                    metrics.record_request(true);
                    connections.push(conn);
                }
                Err(e) => {
                    debug!("connection {i} failed: {e:#}");
                    metrics.record_request(false);
                }
            }
        }

        // Held until here on purpose; release everything before returning.
        for mut conn in connections {
            if let Err(e) = conn.close().await {
                warn!("failed to close benchmark connection: {e:#}");
            }
        }

        metrics.end();
        Ok(metrics)
    }
}
