//! Sweep orchestration: runs the full benchmark battery against each
//! selected protocol configuration and assembles the comparison report.
//!
//! Each configuration gets a freshly started in-process server, the
//! battery runs against it over loopback, and the server is stopped
//! before the next configuration starts. A configuration that fails at
//! setup (bind failure, first connection refused) is recorded as
//! errored and the sweep moves on.

use crate::bench::{
    BandwidthBenchmark, BinaryTransferBenchmark, ConcurrentBenchmark, ConnectionBenchmark,
    LatencyBenchmark,
};
use crate::cli::{Args, ProtocolConfig};
use crate::metrics::{BenchmarkMetrics, SystemSampler};
use crate::report::ComparisonReport;
use crate::server::{HttpServer, RpcServer, ServerMode};
use crate::transport::{HttpConnectionFactory, RpcConnectionFactory};
use anyhow::Result;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Debug, Clone)]
pub struct SuiteConfig {
    pub configs: Vec<ProtocolConfig>,
    pub host: String,
    pub rpc_port: u16,
    pub http_port: u16,
    pub connections: usize,
    pub requests: usize,
    pub warmup: usize,
    pub bandwidth_iterations: usize,
    pub clients: usize,
    pub requests_per_client: usize,
    pub binary_transfer: bool,
    pub binary_sizes: Option<Vec<usize>>,
    pub chunk_size: usize,
    pub binary_iterations: usize,
}

impl From<&Args> for SuiteConfig {
    fn from(args: &Args) -> Self {
        Self {
            configs: ProtocolConfig::expand(&args.configs),
            host: args.host.clone(),
            rpc_port: args.rpc_port,
            http_port: args.http_port,
            connections: args.connections,
            requests: args.requests,
            warmup: args.warmup,
            bandwidth_iterations: args.bandwidth_iterations,
            clients: args.clients,
            requests_per_client: args.requests_per_client,
            binary_transfer: args.binary_transfer,
            binary_sizes: args.binary_sizes.clone(),
            chunk_size: args.chunk_size,
            binary_iterations: args.binary_iterations,
        }
    }
}

pub struct BenchmarkSuite {
    config: SuiteConfig,
}

impl BenchmarkSuite {
    pub fn new(config: SuiteConfig) -> Self {
        Self { config }
    }

    /// Run the sweep. Always returns a report; individual configuration
    /// failures are recorded in it rather than aborting the sweep.
    pub async fn run(&self) -> ComparisonReport {
        let mut report = ComparisonReport::new();

        for &config in &self.config.configs {
            info!("running configuration: {config}");
            match self.run_config(config).await {
                Ok(records) => report.add_completed(config.to_string(), &records),
                Err(e) => {
                    error!("configuration {config} failed: {e:#}");
                    report.add_errored(config.to_string(), format!("{e:#}"));
                }
            }
        }

        report
    }

    async fn run_config(&self, config: ProtocolConfig) -> Result<Vec<BenchmarkMetrics>> {
        let (mut server, factory): (_, Arc<dyn crate::bench::ConnectionFactory>) = match config {
            ProtocolConfig::RpcThread | ProtocolConfig::RpcRequest | ProtocolConfig::RpcFork => {
                let mode = match config {
                    ProtocolConfig::RpcThread => ServerMode::ThreadPerConnection,
                    ProtocolConfig::RpcRequest => ServerMode::ThreadPerRequest,
                    _ => ServerMode::ProcessPerConnection,
                };
                let server = RpcServer::start(&self.config.host, self.config.rpc_port, mode)?;
                let factory = Arc::new(RpcConnectionFactory::new(server.addr()));
                (server, factory as _)
            }
            ProtocolConfig::Http => {
                let server = HttpServer::start(&self.config.host, self.config.http_port).await?;
                let factory =
                    Arc::new(HttpConnectionFactory::new(format!("http://{}", server.addr())));
                (server, factory as _)
            }
            ProtocolConfig::All => unreachable!("expanded before the sweep"),
        };

        let result = self.run_battery(Arc::clone(&factory)).await;
        server.stop();
        result
    }

    async fn run_battery(
        &self,
        factory: Arc<dyn crate::bench::ConnectionFactory>,
    ) -> Result<Vec<BenchmarkMetrics>> {
        let mut sampler = SystemSampler::new();
        // Prime the CPU counters so the first benchmark's snapshot has a
        // real delta to report.
        let _ = sampler.cpu_percent();
        let mut records = Vec::new();

        let mut connection = ConnectionBenchmark::new("connection")
            .with_connections(self.config.connections)
            .run(factory.as_ref())
            .await?;
        connection.record_system_snapshot(&mut sampler);
        records.push(connection);

        let mut latency = LatencyBenchmark::new("latency")
            .with_requests(self.config.requests)
            .with_warmup(self.config.warmup)
            .run(factory.as_ref())
            .await?;
        latency.record_system_snapshot(&mut sampler);
        records.push(latency);

        let mut bandwidth = BandwidthBenchmark::new("bandwidth")
            .with_iterations(self.config.bandwidth_iterations)
            .run(factory.as_ref())
            .await?;
        bandwidth.record_system_snapshot(&mut sampler);
        records.push(bandwidth);

        if self.config.binary_transfer {
            let mut bench = BinaryTransferBenchmark::new("binary_transfer")
                .with_chunk_size(self.config.chunk_size)
                .with_iterations(self.config.binary_iterations);
            if let Some(sizes) = &self.config.binary_sizes {
                bench = bench.with_file_sizes(sizes.clone());
            }
            let outcome = bench.run(factory.as_ref()).await?;
            for mut metrics in [outcome.whole, outcome.chunked].into_iter().flatten() {
                metrics.record_system_snapshot(&mut sampler);
                records.push(metrics);
            }
        }

        let outcome = ConcurrentBenchmark::new("concurrent")
            .with_clients(self.config.clients)
            .with_requests_per_client(self.config.requests_per_client)
            .run(factory)
            .await?;
        let mut concurrent = outcome.aggregate;
        concurrent.record_system_snapshot(&mut sampler);
        records.push(concurrent);

        Ok(records)
    }
}
