use anyhow::Result;
use rpc_rest_bench::bench::{BandwidthBenchmark, ConnectionBenchmark, LatencyBenchmark};
use rpc_rest_bench::server::{RpcServer, ServerMode};
use rpc_rest_bench::transport::RpcConnectionFactory;

/// End-to-end smoke test of the persistent RPC path: real server,
/// real TCP, thread-per-connection dispatch.
#[tokio::test(flavor = "multi_thread")]
async fn rpc_thread_per_connection_round_trip() -> Result<()> {
    let mut server = RpcServer::start("127.0.0.1", 0, ServerMode::ThreadPerConnection)?;
    let factory = RpcConnectionFactory::new(server.addr());

    let connection = ConnectionBenchmark::new("connection")
        .with_connections(10)
        .run(&factory)
        .await?;
    assert_eq!(connection.total_requests, 10);
    assert_eq!(connection.failed_requests, 0);
    assert_eq!(connection.connection_times.len(), 10);

    let latency = LatencyBenchmark::new("latency")
        .with_requests(50)
        .with_warmup(5)
        .run(&factory)
        .await?;
    assert_eq!(latency.total_requests, 50);
    assert_eq!(latency.failed_requests, 0);
    assert_eq!(latency.latencies.len(), 50);
    assert!(latency.compute_statistics().latency.mean > 0.0);

    let bandwidth = BandwidthBenchmark::new("bandwidth")
        .with_payload_sizes(vec![1024, 65_536])
        .with_iterations(3)
        .run(&factory)
        .await?;
    assert_eq!(bandwidth.upload_bandwidth.len(), 6);
    assert_eq!(bandwidth.download_bandwidth.len(), 6);
    assert_eq!(bandwidth.failed_requests, 0);

    server.stop();
    Ok(())
}

/// A stopped server must refuse new connections, and the factory must
/// surface that as a connect error rather than hanging.
#[tokio::test(flavor = "multi_thread")]
async fn rpc_connect_fails_after_stop() -> Result<()> {
    let mut server = RpcServer::start("127.0.0.1", 0, ServerMode::ThreadPerConnection)?;
    let addr = server.addr();
    server.stop();

    let result = rpc_rest_bench::transport::RpcConnection::connect(addr).await;
    assert!(result.is_err());
    Ok(())
}
