use anyhow::Result;
use rpc_rest_bench::cli::ProtocolConfig;
use rpc_rest_bench::report::ConfigOutcome;
use rpc_rest_bench::suite::{BenchmarkSuite, SuiteConfig};

fn tiny_config(configs: Vec<ProtocolConfig>) -> SuiteConfig {
    SuiteConfig {
        configs,
        host: "127.0.0.1".to_string(),
        rpc_port: 0,
        http_port: 0,
        connections: 4,
        requests: 10,
        warmup: 1,
        bandwidth_iterations: 2,
        clients: 3,
        requests_per_client: 5,
        binary_transfer: true,
        binary_sizes: Some(vec![65_536]),
        chunk_size: 16_384,
        binary_iterations: 1,
    }
}

/// Whole-sweep smoke test across both protocol families on ephemeral
/// ports, binary transfers included.
#[tokio::test(flavor = "multi_thread")]
async fn sweep_completes_for_rpc_and_http() -> Result<()> {
    let suite = BenchmarkSuite::new(tiny_config(vec![
        ProtocolConfig::RpcThread,
        ProtocolConfig::Http,
    ]));
    let report = suite.run().await;

    assert_eq!(report.entries.len(), 2);
    assert!(!report.is_all_errored());

    for entry in &report.entries {
        let ConfigOutcome::Completed { benchmarks } = &entry.outcome else {
            panic!("configuration {} errored", entry.config);
        };
        // connection, latency, bandwidth, binary whole+chunked, concurrent
        assert_eq!(benchmarks.len(), 6, "in {}", entry.config);
        for record in benchmarks {
            assert_eq!(record.stats.failed_requests, 0, "in {}", record.name);
        }
    }

    // The report must serialize and parse back.
    let json = report.to_json()?;
    let value: serde_json::Value = serde_json::from_str(&json)?;
    assert_eq!(value["entries"].as_array().unwrap().len(), 2);
    Ok(())
}

/// A configuration that cannot bind is recorded as errored while the
/// rest of the sweep proceeds.
#[tokio::test(flavor = "multi_thread")]
async fn sweep_records_setup_failures_and_continues() -> Result<()> {
    let mut config = tiny_config(vec![ProtocolConfig::RpcThread, ProtocolConfig::Http]);
    config.binary_transfer = false;
    // An unroutable bind address fails RPC setup immediately.
    config.host = "203.0.113.1".to_string();

    let suite = BenchmarkSuite::new(config);
    let report = suite.run().await;

    assert_eq!(report.entries.len(), 2);
    assert!(report.is_all_errored());
    for entry in &report.entries {
        assert!(matches!(entry.outcome, ConfigOutcome::Errored { .. }));
    }
    Ok(())
}
