//! # RPC vs REST Benchmark Suite - Main Entry Point
//!
//! Starts an in-process server for each selected protocol
//! configuration, runs the benchmark battery against it over loopback,
//! and writes a JSON comparison report plus a colored summary table.
//!
//! ## Exit Behavior
//!
//! Individual configuration failures are recorded in the report and do
//! not abort the sweep. The process exits nonzero only when every
//! configuration failed at setup or the report cannot be written.

use anyhow::{bail, Result};
use clap::Parser;
use rpc_rest_bench::cli::Args;
use rpc_rest_bench::logging::ColorizedFormatter;
use rpc_rest_bench::suite::{BenchmarkSuite, SuiteConfig};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Log level is controlled via RUST_LOG, e.g.
    // RUST_LOG=debug rpc-rest-bench --configs http
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .event_format(ColorizedFormatter)
        .init();

    let args = Args::parse();
    let config = SuiteConfig::from(&args);

    info!("starting RPC vs REST benchmark sweep");
    info!(
        "configurations: {}",
        config
            .configs
            .iter()
            .map(|c| c.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    );

    let suite = BenchmarkSuite::new(config);
    let report = suite.run().await;

    report.write_to_file(&args.output)?;
    info!("report written to {}", args.output.display());

    if !args.quiet {
        report.print_summary();
    }

    if report.is_all_errored() {
        bail!("every configuration failed at setup; see the report for reasons");
    }
    Ok(())
}
