use super::ConnectionFactory;
use crate::metrics::BenchmarkMetrics;
use anyhow::Result;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Results of a concurrent load run.
pub struct ConcurrentOutcome {
    /// All client records merged into one.
    pub aggregate: BenchmarkMetrics,
    /// Per-client records, present when tracking was requested.
    pub per_client: Option<Vec<BenchmarkMetrics>>,
}

/// Drives many concurrent clients against one server.
///
/// Spawns `num_clients` tasks, each of which connects, issues
/// `requests_per_client` sequential timed requests, and closes. A
/// semaphore caps how many clients run simultaneously. Each task owns a
/// private metrics record; records are merged only after all tasks have
/// completed, so the request hot path takes no shared lock.
///
/// A client whose connect fails (or whose task panics) is charged its
/// full request quota as failures, keeping `total_requests` equal to
/// `num_clients * requests_per_client` for every run.
pub struct ConcurrentBenchmark {
    name: String,
    num_clients: usize,
    requests_per_client: usize,
    max_workers: Option<usize>,
    track_per_client: bool,
}

impl ConcurrentBenchmark {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            num_clients: crate::defaults::NUM_CLIENTS,
            requests_per_client: crate::defaults::REQUESTS_PER_CLIENT,
            max_workers: None,
            track_per_client: false,
        }
    }

    pub fn with_clients(mut self, num_clients: usize) -> Self {
        self.num_clients = num_clients;
        self
    }

    pub fn with_requests_per_client(mut self, requests_per_client: usize) -> Self {
        self.requests_per_client = requests_per_client;
        self
    }

    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = Some(max_workers);
        self
    }

    pub fn with_per_client_tracking(mut self, track: bool) -> Self {
        self.track_per_client = track;
        self
    }

    fn worker_limit(&self) -> usize {
        let cap = self.max_workers.unwrap_or(crate::defaults::MAX_WORKERS);
        self.num_clients.min(cap).max(1)
    }

    pub async fn run(&self, factory: Arc<dyn ConnectionFactory>) -> Result<ConcurrentOutcome> {
        let mut aggregate = BenchmarkMetrics::new(&self.name);
        aggregate.concurrent_connections = self.num_clients;

        let limit = self.worker_limit();
        info!(
            "concurrent benchmark: {} clients x {} requests, {} in flight",
            self.num_clients, self.requests_per_client, limit
        );

        let semaphore = Arc::new(Semaphore::new(limit));
        let mut tasks = JoinSet::new();

        aggregate.start();
        for client_id in 0..self.num_clients {
            let factory = Arc::clone(&factory);
            let semaphore = Arc::clone(&semaphore);
            let requests = self.requests_per_client;

            tasks.spawn(async move {
                // Semaphore is never closed while tasks run.
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .expect("semaphore closed during run");
                run_client(client_id, factory.as_ref(), requests).await
            });
        }

        let mut per_client = self.track_per_client.then(Vec::new);
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(client_metrics) => {
                    aggregate.merge(&client_metrics);
                    if let Some(records) = per_client.as_mut() {
                        records.push(client_metrics);
                    }
                }
                Err(e) => {
                    warn!("client task failed to complete: {e}");
                    for _ in 0..self.requests_per_client {
                        aggregate.record_request(false);
                    }
                }
            }
        }
        aggregate.end();

        Ok(ConcurrentOutcome {
            aggregate,
            per_client,
        })
    }
}

async fn run_client(
    client_id: usize,
    factory: &dyn ConnectionFactory,
    requests: usize,
) -> BenchmarkMetrics {
    let mut metrics = BenchmarkMetrics::new(format!("client_{client_id}"));

    let connect_started = Instant::now();
    let mut conn = match factory.connect().await {
        Ok(conn) => {
            metrics.record_connection_time(connect_started.elapsed());
            conn
        }
        Err(e) => {
            warn!("client {client_id} failed to connect: {e:#}");
            for _ in 0..requests {
                metrics.record_request(false);
            }
            return metrics;
        }
    };

    for _ in 0..requests {
        let started = Instant::now();
        match conn.request().await {
            Ok(()) => {
                metrics.record_latency(started.elapsed());
                metrics.record_request(true);
            }
            Err(e) => {
                debug!("client {client_id} request failed: {e:#}");
                metrics.record_request(false);
            }
        }
    }

    if let Err(e) = conn.close().await {
        warn!("client {client_id} failed to close: {e:#}");
    }

    metrics
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bench::testing::FakeFactory;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    #[tokio::test]
    async fn test_every_request_is_accounted_for() {
        let factory = Arc::new(FakeFactory::new(Duration::ZERO));
        let bench = ConcurrentBenchmark::new("conc")
            .with_clients(10)
            .with_requests_per_client(100);

        let outcome = bench
            .run(Arc::clone(&factory) as Arc<dyn ConnectionFactory>)
            .await
            .unwrap();
        assert_eq!(outcome.aggregate.total_requests, 1000);
        assert_eq!(outcome.aggregate.failed_requests, 0);
        assert_eq!(outcome.aggregate.latencies.len(), 1000);
        assert_eq!(outcome.aggregate.connection_times.len(), 10);
        assert_eq!(outcome.aggregate.concurrent_connections, 10);
        assert_eq!(factory.connects.load(Ordering::SeqCst), 10);
    }

    #[tokio::test]
    async fn test_injected_failures_show_up_in_aggregate() {
        let mut factory = FakeFactory::new(Duration::ZERO);
        factory.fail_every = Some(5);
        let factory = Arc::new(factory);
        let bench = ConcurrentBenchmark::new("conc")
            .with_clients(4)
            .with_requests_per_client(50);

        let outcome = bench.run(factory as Arc<dyn ConnectionFactory>).await.unwrap();
        // 200 calls through a shared counter, every 5th fails.
        assert_eq!(outcome.aggregate.total_requests, 200);
        assert_eq!(outcome.aggregate.failed_requests, 40);
        assert_eq!(outcome.aggregate.latencies.len(), 160);
    }

    #[tokio::test]
    async fn test_failed_connect_charges_the_full_quota() {
        let mut factory = FakeFactory::new(Duration::ZERO);
        factory.fail_connect = true;
        let factory = Arc::new(factory);
        let bench = ConcurrentBenchmark::new("conc")
            .with_clients(3)
            .with_requests_per_client(20);

        let outcome = bench.run(factory as Arc<dyn ConnectionFactory>).await.unwrap();
        assert_eq!(outcome.aggregate.total_requests, 60);
        assert_eq!(outcome.aggregate.failed_requests, 60);
        assert!(outcome.aggregate.connection_times.is_empty());
    }

    #[tokio::test]
    async fn test_per_client_tracking_keeps_individual_records() {
        let factory = Arc::new(FakeFactory::new(Duration::ZERO));
        let bench = ConcurrentBenchmark::new("conc")
            .with_clients(5)
            .with_requests_per_client(10)
            .with_per_client_tracking(true);

        let outcome = bench.run(factory as Arc<dyn ConnectionFactory>).await.unwrap();
        let records = outcome.per_client.unwrap();
        assert_eq!(records.len(), 5);
        for record in &records {
            assert_eq!(record.total_requests, 10);
        }
    }

    #[tokio::test]
    async fn test_worker_limit_caps_in_flight_clients() {
        let bench = ConcurrentBenchmark::new("conc")
            .with_clients(500)
            .with_requests_per_client(1);
        assert_eq!(bench.worker_limit(), crate::defaults::MAX_WORKERS);

        let bench = bench.with_max_workers(8);
        assert_eq!(bench.worker_limit(), 8);
    }
}
