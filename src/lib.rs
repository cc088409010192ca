//! # RPC vs REST Benchmark Suite Library
//!
//! Tools for comparing persistent-connection RPC against stateless
//! HTTP/REST on the axes that actually differ between the two styles:
//! connection setup cost, per-call latency, sustained bandwidth, large
//! binary transfers, and behavior under concurrent load.
//!
//! ## Protocol Configurations
//!
//! The suite benchmarks the following configurations over loopback:
//!
//! - **rpc-thread**: persistent framed-TCP RPC, one server thread per connection
//! - **rpc-request**: persistent framed-TCP RPC, requests dispatched to a shared worker pool
//! - **rpc-fork**: persistent framed-TCP RPC, one forked server process per connection (unix)
//! - **http**: stateless HTTP/REST served by axum, driven by reqwest
//!
//! ## Architecture Overview
//!
//! - `bench`: the benchmark primitives and the `Connection`/`ConnectionFactory` traits
//! - `metrics`: sample streams, statistics, and the host resource sampler
//! - `transport`: RPC wire codec plus the RPC and HTTP client implementations
//! - `server`: in-process benchmark servers with scoped lifetimes
//! - `suite`: sweep orchestration across protocol configurations
//! - `report`: comparison report assembly, JSON output, and the summary table
//! - `telemetry`: call-level instrumentation for persistent sessions
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use rpc_rest_bench::bench::LatencyBenchmark;
//! use rpc_rest_bench::server::{RpcServer, ServerMode};
//! use rpc_rest_bench::transport::RpcConnectionFactory;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let server = RpcServer::start("127.0.0.1", 0, ServerMode::ThreadPerConnection)?;
//!     let factory = RpcConnectionFactory::new(server.addr());
//!
//!     let metrics = LatencyBenchmark::new("latency")
//!         .with_requests(1000)
//!         .run(&factory)
//!         .await?;
//!
//!     println!("mean latency: {:.6}s", metrics.compute_statistics().latency.mean);
//!     Ok(())
//! }
//! ```

pub mod bench;
pub mod cli;
pub mod logging;
pub mod metrics;
pub mod report;
pub mod server;
pub mod suite;
pub mod telemetry;
pub mod transport;
pub mod utils;

pub use bench::{Connection, ConnectionFactory};
pub use metrics::{BenchmarkMetrics, MetricsStatistics, StreamStats};
pub use report::ComparisonReport;
pub use suite::{BenchmarkSuite, SuiteConfig};

/// Crate version, embedded in every report for reproducibility.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default values for every configurable parameter.
///
/// The trial counts mirror what is practical over loopback: enough
/// samples for stable percentiles, small enough that the full sweep
/// finishes in minutes.
pub mod defaults {
    use std::time::Duration;

    /// Connections established by the connection benchmark.
    pub const NUM_CONNECTIONS: usize = 100;

    /// Timed requests in the latency benchmark.
    pub const NUM_REQUESTS: usize = 1000;

    /// Unmeasured warmup requests before the latency benchmark.
    pub const WARMUP_REQUESTS: usize = 10;

    /// Upload/download repetitions per bandwidth payload size.
    pub const BANDWIDTH_ITERATIONS: usize = 10;

    /// Bandwidth payload sizes: 1 KiB through 1 MiB.
    pub const BANDWIDTH_SIZES: [usize; 4] = [1024, 10_240, 102_400, 1_048_576];

    /// Binary transfer payload sizes: 1.5 MiB, 128 MiB, 500 MB.
    pub const BINARY_SIZES: [usize; 3] = [1_572_864, 134_217_728, 524_288_000];

    /// Transfer repetitions per binary payload size.
    pub const BINARY_ITERATIONS: usize = 3;

    /// Chunk size for the chunked binary transfer strategy.
    pub const CHUNK_SIZE: usize = 65_536;

    /// Clients spawned by the concurrent load benchmark.
    pub const NUM_CLIENTS: usize = 128;

    /// Requests each concurrent client issues.
    pub const REQUESTS_PER_CLIENT: usize = 100;

    /// Ceiling on simultaneously running concurrent clients.
    pub const MAX_WORKERS: usize = 128;

    /// A remote call at or over this duration is flagged as slow.
    pub const SLOW_CALL_THRESHOLD: Duration = Duration::from_millis(100);

    /// Call nesting depth at which telemetry warns about compounding
    /// round trips.
    pub const DEEP_STACK_THRESHOLD: usize = 5;

    /// Default JSON report path.
    pub const OUTPUT_FILE: &str = "benchmark_results.json";

    /// Default bind/connect address.
    pub const HOST: &str = "127.0.0.1";

    /// Default RPC server port.
    pub const RPC_PORT: u16 = 18812;

    /// Default HTTP server port.
    pub const HTTP_PORT: u16 = 5000;
}
