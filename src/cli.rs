//! Command line interface.

use crate::defaults;
use clap::{Parser, ValueEnum};
use std::fmt;
use std::path::PathBuf;

/// One protocol configuration of the comparison sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ProtocolConfig {
    /// Persistent RPC, one server thread per connection.
    RpcThread,
    /// Persistent RPC, server requests dispatched to a worker pool.
    RpcRequest,
    /// Persistent RPC, one forked server process per connection.
    RpcFork,
    /// Stateless HTTP/REST.
    Http,
    /// Every configuration above.
    All,
}

impl ProtocolConfig {
    /// Expand `all` into the concrete configurations, preserving order
    /// and dropping duplicates.
    pub fn expand(selected: &[ProtocolConfig]) -> Vec<ProtocolConfig> {
        const EVERY: [ProtocolConfig; 4] = [
            ProtocolConfig::RpcThread,
            ProtocolConfig::RpcRequest,
            ProtocolConfig::RpcFork,
            ProtocolConfig::Http,
        ];

        let mut configs = Vec::new();
        let push = |c: ProtocolConfig, configs: &mut Vec<ProtocolConfig>| {
            if !configs.contains(&c) {
                configs.push(c);
            }
        };
        for &config in selected {
            match config {
                ProtocolConfig::All => {
                    for c in EVERY {
                        push(c, &mut configs);
                    }
                }
                other => push(other, &mut configs),
            }
        }
        configs
    }
}

impl fmt::Display for ProtocolConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProtocolConfig::RpcThread => "rpc-thread",
            ProtocolConfig::RpcRequest => "rpc-request",
            ProtocolConfig::RpcFork => "rpc-fork",
            ProtocolConfig::Http => "http",
            ProtocolConfig::All => "all",
        };
        write!(f, "{name}")
    }
}

/// Compare persistent-RPC and stateless-HTTP performance over a suite
/// of connection, latency, bandwidth and concurrency benchmarks.
#[derive(Debug, Parser)]
#[command(name = "rpc-rest-bench", version, about)]
pub struct Args {
    /// Protocol configurations to benchmark.
    #[arg(long, value_enum, value_delimiter = ',', default_value = "all")]
    pub configs: Vec<ProtocolConfig>,

    /// Connections to establish in the connection benchmark.
    #[arg(long, default_value_t = defaults::NUM_CONNECTIONS)]
    pub connections: usize,

    /// Timed requests in the latency benchmark.
    #[arg(long, default_value_t = defaults::NUM_REQUESTS)]
    pub requests: usize,

    /// Unmeasured warmup requests before the latency benchmark.
    #[arg(long, default_value_t = defaults::WARMUP_REQUESTS)]
    pub warmup: usize,

    /// Upload/download repetitions per payload size.
    #[arg(long, default_value_t = defaults::BANDWIDTH_ITERATIONS)]
    pub bandwidth_iterations: usize,

    /// Concurrent clients in the load benchmark.
    #[arg(long, default_value_t = defaults::NUM_CLIENTS)]
    pub clients: usize,

    /// Requests each concurrent client issues.
    #[arg(long, default_value_t = defaults::REQUESTS_PER_CLIENT)]
    pub requests_per_client: usize,

    /// Also run the large binary transfer benchmark.
    #[arg(long)]
    pub binary_transfer: bool,

    /// Binary transfer payload sizes in bytes.
    #[arg(long, value_delimiter = ',')]
    pub binary_sizes: Option<Vec<usize>>,

    /// Chunk size in bytes for the chunked transfer strategy.
    #[arg(long, default_value_t = defaults::CHUNK_SIZE)]
    pub chunk_size: usize,

    /// Transfer repetitions per binary payload size.
    #[arg(long, default_value_t = defaults::BINARY_ITERATIONS)]
    pub binary_iterations: usize,

    /// Where to write the JSON report.
    #[arg(long, default_value = defaults::OUTPUT_FILE)]
    pub output: PathBuf,

    /// Suppress the summary table; the JSON report is still written.
    #[arg(long)]
    pub quiet: bool,

    /// Address the benchmark servers bind and clients connect to.
    #[arg(long, default_value = defaults::HOST)]
    pub host: String,

    /// RPC server port; 0 picks an ephemeral port.
    #[arg(long, default_value_t = defaults::RPC_PORT)]
    pub rpc_port: u16,

    /// HTTP server port; 0 picks an ephemeral port.
    #[arg(long, default_value_t = defaults::HTTP_PORT)]
    pub http_port: u16,
}
