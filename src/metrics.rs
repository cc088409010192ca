use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::debug;

/// Errors surfaced by the metrics layer.
///
/// Recording is deliberately hard to get wrong; the one rejected input is a
/// bandwidth sample with a zero duration, which would otherwise divide to
/// infinity and silently poison every downstream statistic.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MetricsError {
    #[error("bandwidth sample requires a positive duration")]
    NonPositiveDuration,
}

/// Descriptive statistics for one sample stream.
///
/// Every field is `0.0` for an empty stream; `compute` never fails. The
/// percentiles (including the median) use nearest-rank selection with
/// round-half-up on the `(n - 1)`-scaled rank, so small samples stay
/// deterministic and a single-sample stream reports that sample for every
/// percentile.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamStats {
    pub mean: f64,
    pub median: f64,
    pub min: f64,
    pub max: f64,
    pub std_dev: f64,
    pub p95: f64,
    pub p99: f64,
    pub count: usize,
}

impl StreamStats {
    /// Compute statistics over a sample stream.
    ///
    /// The standard deviation is the population standard deviation, so a
    /// single sample yields exactly `0.0`.
    pub fn compute(samples: &[f64]) -> Self {
        if samples.is_empty() {
            return Self::default();
        }

        let count = samples.len();
        let mean = samples.iter().sum::<f64>() / count as f64;
        let min = samples.iter().cloned().fold(f64::INFINITY, f64::min);
        let max = samples.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let variance = samples.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / count as f64;

        let mut sorted = samples.to_vec();
        sorted.sort_by(|a, b| a.partial_cmp(b).expect("samples must not contain NaN"));

        Self {
            mean,
            median: Self::nearest_rank(&sorted, 50.0),
            min,
            max,
            std_dev: variance.sqrt(),
            p95: Self::nearest_rank(&sorted, 95.0),
            p99: Self::nearest_rank(&sorted, 99.0),
            count,
        }
    }

    /// Nearest-rank percentile over pre-sorted samples.
    ///
    /// `rank = round(p / 100 * (n - 1))` with ties rounding half up, clamped
    /// to the last index. Applied uniformly to the median, p95 and p99.
    fn nearest_rank(sorted: &[f64], percentile: f64) -> f64 {
        if sorted.is_empty() {
            return 0.0;
        }
        let rank = ((percentile / 100.0) * (sorted.len() - 1) as f64).round() as usize;
        sorted[rank.min(sorted.len() - 1)]
    }
}

/// Full statistics dictionary for one benchmark run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsStatistics {
    pub connection_time: StreamStats,
    pub latency: StreamStats,
    pub upload_bandwidth: StreamStats,
    pub download_bandwidth: StreamStats,
    pub cpu_usage: StreamStats,
    pub memory_usage: StreamStats,
    pub total_requests: u64,
    pub failed_requests: u64,
    /// Fraction of attempted requests that succeeded; `0.0` when nothing ran.
    pub success_rate: f64,
    /// Wall-clock duration of the run in seconds, if the run was timed.
    pub duration_secs: Option<f64>,
}

/// Raw measurement record for one benchmark primitive's run.
///
/// Owns four independent sample streams plus two auxiliary system-resource
/// streams and the request counters. Created by a primitive, mutated only by
/// that primitive's trial loop (concurrent workers build their own
/// task-local record and merge after completion), and read-only once the
/// primitive returns.
#[derive(Debug, Clone, Default)]
pub struct BenchmarkMetrics {
    pub name: String,

    /// Connection establishment times in seconds.
    pub connection_times: Vec<f64>,
    /// Per-request round-trip latencies in seconds.
    pub latencies: Vec<f64>,
    /// Upload bandwidth samples in bytes per second.
    pub upload_bandwidth: Vec<f64>,
    /// Download bandwidth samples in bytes per second.
    pub download_bandwidth: Vec<f64>,

    /// CPU utilisation snapshots in percent.
    pub cpu_usage: Vec<f64>,
    /// Memory utilisation snapshots in percent.
    pub memory_usage: Vec<f64>,

    pub concurrent_connections: usize,
    pub total_requests: u64,
    pub failed_requests: u64,

    started_at: Option<Instant>,
    finished_at: Option<Instant>,
}

impl BenchmarkMetrics {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Mark the start of the owning primitive's run.
    pub fn start(&mut self) {
        self.started_at = Some(Instant::now());
    }

    /// Mark the end of the owning primitive's run.
    pub fn end(&mut self) {
        self.finished_at = Some(Instant::now());
    }

    /// Wall-clock duration between `start` and `end`, if both were called.
    pub fn duration(&self) -> Option<Duration> {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => Some(end.duration_since(start)),
            _ => None,
        }
    }

    pub fn record_connection_time(&mut self, duration: Duration) {
        self.connection_times.push(duration.as_secs_f64());
    }

    pub fn record_latency(&mut self, duration: Duration) {
        self.latencies.push(duration.as_secs_f64());
    }

    /// Record an upload bandwidth sample as `bytes / duration`.
    pub fn record_upload(&mut self, bytes: usize, duration: Duration) -> Result<(), MetricsError> {
        let secs = duration.as_secs_f64();
        if secs <= 0.0 {
            return Err(MetricsError::NonPositiveDuration);
        }
        self.upload_bandwidth.push(bytes as f64 / secs);
        Ok(())
    }

    /// Record a download bandwidth sample as `bytes / duration`.
    pub fn record_download(
        &mut self,
        bytes: usize,
        duration: Duration,
    ) -> Result<(), MetricsError> {
        let secs = duration.as_secs_f64();
        if secs <= 0.0 {
            return Err(MetricsError::NonPositiveDuration);
        }
        self.download_bandwidth.push(bytes as f64 / secs);
        Ok(())
    }

    /// Count one attempted request, failed or successful.
    ///
    /// Keeps the `failed_requests <= total_requests` invariant by
    /// construction: a failure always counts as an attempt too.
    pub fn record_request(&mut self, success: bool) {
        self.total_requests += 1;
        if !success {
            self.failed_requests += 1;
        }
    }

    /// Append one CPU% and one memory% snapshot from the host.
    ///
    /// Sampling failure (no `/proc`, parse error) is tolerated; the snapshot
    /// is simply absent.
    pub fn record_system_snapshot(&mut self, sampler: &mut SystemSampler) {
        if let Some(cpu) = sampler.cpu_percent() {
            self.cpu_usage.push(cpu);
        }
        if let Some(mem) = sampler.memory_percent() {
            self.memory_usage.push(mem);
        }
    }

    /// Fold another record into this one.
    ///
    /// Appends every sample stream and adds the counters. Commutative and
    /// associative over the resulting statistics: `compute_statistics` sorts
    /// each stream, so merge order never shows up in the output.
    pub fn merge(&mut self, other: &BenchmarkMetrics) {
        self.connection_times.extend(&other.connection_times);
        self.latencies.extend(&other.latencies);
        self.upload_bandwidth.extend(&other.upload_bandwidth);
        self.download_bandwidth.extend(&other.download_bandwidth);
        self.cpu_usage.extend(&other.cpu_usage);
        self.memory_usage.extend(&other.memory_usage);
        self.total_requests += other.total_requests;
        self.failed_requests += other.failed_requests;
    }

    /// Compute the statistics dictionary over the current streams.
    ///
    /// Pure with respect to the samples; never fails, and empty streams
    /// produce all-zero statistics rather than an error.
    pub fn compute_statistics(&self) -> MetricsStatistics {
        debug_assert!(self.failed_requests <= self.total_requests);

        let success_rate = if self.total_requests > 0 {
            (self.total_requests - self.failed_requests) as f64 / self.total_requests as f64
        } else {
            0.0
        };

        MetricsStatistics {
            connection_time: StreamStats::compute(&self.connection_times),
            latency: StreamStats::compute(&self.latencies),
            upload_bandwidth: StreamStats::compute(&self.upload_bandwidth),
            download_bandwidth: StreamStats::compute(&self.download_bandwidth),
            cpu_usage: StreamStats::compute(&self.cpu_usage),
            memory_usage: StreamStats::compute(&self.memory_usage),
            total_requests: self.total_requests,
            failed_requests: self.failed_requests,
            success_rate,
            duration_secs: self.duration().map(|d| d.as_secs_f64()),
        }
    }
}

/// Host CPU/memory sampler backed by `/proc` on Linux.
///
/// CPU utilisation is derived from the delta between consecutive
/// `/proc/stat` reads, so the very first call primes the counters and
/// reports no CPU sample. No call ever blocks beyond a single bounded file
/// read; on platforms without `/proc` every probe returns `None`.
#[derive(Debug, Default)]
pub struct SystemSampler {
    last_cpu: Option<(u64, u64)>, // (idle, total)
}

impl SystemSampler {
    pub fn new() -> Self {
        Self::default()
    }

    /// CPU utilisation in percent since the previous call, if available.
    pub fn cpu_percent(&mut self) -> Option<f64> {
        let (idle, total) = Self::read_cpu_counters()?;
        let sample = match self.last_cpu {
            Some((last_idle, last_total)) if total > last_total => {
                let idle_delta = idle.saturating_sub(last_idle) as f64;
                let total_delta = (total - last_total) as f64;
                Some(((1.0 - idle_delta / total_delta) * 100.0).clamp(0.0, 100.0))
            }
            Some(_) => None,
            None => {
                debug!("priming CPU counters; first snapshot carries no CPU sample");
                None
            }
        };
        self.last_cpu = Some((idle, total));
        sample
    }

    /// Memory utilisation in percent, if available.
    pub fn memory_percent(&mut self) -> Option<f64> {
        let meminfo = std::fs::read_to_string("/proc/meminfo").ok()?;
        let mut total = None;
        let mut available = None;
        for line in meminfo.lines() {
            if let Some(rest) = line.strip_prefix("MemTotal:") {
                total = rest.split_whitespace().next()?.parse::<f64>().ok();
            } else if let Some(rest) = line.strip_prefix("MemAvailable:") {
                available = rest.split_whitespace().next()?.parse::<f64>().ok();
            }
        }
        match (total, available) {
            (Some(total), Some(available)) if total > 0.0 => {
                Some(((1.0 - available / total) * 100.0).clamp(0.0, 100.0))
            }
            _ => None,
        }
    }

    fn read_cpu_counters() -> Option<(u64, u64)> {
        let stat = std::fs::read_to_string("/proc/stat").ok()?;
        let line = stat.lines().next()?;
        let fields: Vec<u64> = line
            .split_whitespace()
            .skip(1)
            .filter_map(|f| f.parse().ok())
            .collect();
        if fields.len() < 4 {
            return None;
        }
        // idle + iowait, when present
        let idle = fields[3] + fields.get(4).copied().unwrap_or(0);
        let total: u64 = fields.iter().sum();
        Some((idle, total))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(s: f64) -> Duration {
        Duration::from_secs_f64(s)
    }

    #[test]
    fn test_empty_streams_are_all_zero() {
        let metrics = BenchmarkMetrics::new("empty");
        let stats = metrics.compute_statistics();

        assert_eq!(stats.latency, StreamStats::default());
        assert_eq!(stats.connection_time, StreamStats::default());
        assert_eq!(stats.upload_bandwidth, StreamStats::default());
        assert_eq!(stats.latency.count, 0);
        assert_eq!(stats.success_rate, 0.0);
    }

    #[test]
    fn test_statistics_ordering_invariants() {
        let mut metrics = BenchmarkMetrics::new("ordering");
        for ms in [5.0, 1.0, 42.0, 7.0, 3.0, 19.0, 2.0, 11.0] {
            metrics.record_latency(secs(ms / 1000.0));
        }
        let lat = metrics.compute_statistics().latency;

        assert!(lat.min <= lat.median);
        assert!(lat.median <= lat.max);
        assert!(lat.p95 <= lat.max);
        assert!(lat.p99 >= lat.p95);
        assert!(lat.mean >= lat.min && lat.mean <= lat.max);
    }

    #[test]
    fn test_single_sample_stream() {
        let mut metrics = BenchmarkMetrics::new("single");
        metrics.record_latency(secs(0.010));
        let lat = metrics.compute_statistics().latency;

        assert_eq!(lat.count, 1);
        assert_eq!(lat.std_dev, 0.0);
        assert_eq!(lat.median, 0.010);
        assert_eq!(lat.p95, 0.010);
        assert_eq!(lat.p99, 0.010);
        assert_eq!(lat.min, lat.max);
    }

    #[test]
    fn test_nearest_rank_percentiles() {
        // 1..=100 ms: the rank arithmetic is exact and checkable by hand.
        let mut metrics = BenchmarkMetrics::new("ranks");
        for ms in 1..=100u64 {
            metrics.record_latency(Duration::from_millis(ms));
        }
        let lat = metrics.compute_statistics().latency;

        // round(0.50 * 99) = 50 -> 51ms, round(0.95 * 99) = 94 -> 95ms,
        // round(0.99 * 99) = 98 -> 99ms.
        assert!((lat.median - 0.051).abs() < 1e-9);
        assert!((lat.p95 - 0.095).abs() < 1e-9);
        assert!((lat.p99 - 0.099).abs() < 1e-9);
    }

    #[test]
    fn test_bandwidth_sample_is_exact_division() {
        let mut metrics = BenchmarkMetrics::new("bw");
        metrics.record_upload(1_048_576, secs(0.5)).unwrap();
        let stats = metrics.compute_statistics();

        assert_eq!(stats.upload_bandwidth.mean, 2_097_152.0);
        assert_eq!(stats.upload_bandwidth.min, stats.upload_bandwidth.max);
    }

    #[test]
    fn test_zero_duration_bandwidth_rejected() {
        let mut metrics = BenchmarkMetrics::new("bw");
        assert_eq!(
            metrics.record_upload(1024, Duration::ZERO),
            Err(MetricsError::NonPositiveDuration)
        );
        assert_eq!(
            metrics.record_download(1024, Duration::ZERO),
            Err(MetricsError::NonPositiveDuration)
        );
        assert!(metrics.upload_bandwidth.is_empty());
        assert!(metrics.download_bandwidth.is_empty());
    }

    #[test]
    fn test_request_counters_invariant() {
        let mut metrics = BenchmarkMetrics::new("counters");
        for i in 0..10 {
            metrics.record_request(i % 3 != 0);
        }
        assert_eq!(metrics.total_requests, 10);
        assert_eq!(metrics.failed_requests, 4);
        assert!(metrics.failed_requests <= metrics.total_requests);
    }

    #[test]
    fn test_merge_is_order_insensitive() {
        let mut a = BenchmarkMetrics::new("a");
        let mut b = BenchmarkMetrics::new("b");
        let mut c = BenchmarkMetrics::new("c");
        for (m, base) in [(&mut a, 1.0), (&mut b, 10.0), (&mut c, 100.0)] {
            for i in 0..5 {
                m.record_latency(secs((base + i as f64) / 1000.0));
                m.record_request(i != 4);
            }
        }

        let mut forward = BenchmarkMetrics::new("agg");
        forward.merge(&a);
        forward.merge(&b);
        forward.merge(&c);

        let mut reverse = BenchmarkMetrics::new("agg");
        reverse.merge(&c);
        reverse.merge(&a);
        reverse.merge(&b);

        let f = forward.compute_statistics();
        let r = reverse.compute_statistics();
        assert_eq!(f.latency, r.latency);
        assert_eq!(f.total_requests, r.total_requests);
        assert_eq!(f.failed_requests, r.failed_requests);
        assert_eq!(f.total_requests, 15);
        assert_eq!(f.failed_requests, 3);
    }

    #[test]
    fn test_system_sampler_never_panics() {
        let mut sampler = SystemSampler::new();
        // The first CPU probe only primes the counters; every probe may
        // legitimately return None on hosts without /proc.
        let _ = sampler.cpu_percent();
        let _ = sampler.cpu_percent();
        let _ = sampler.memory_percent();
    }

    #[test]
    fn test_run_duration_tracking() {
        let mut metrics = BenchmarkMetrics::new("timed");
        assert!(metrics.duration().is_none());
        metrics.start();
        metrics.end();
        assert!(metrics.duration().is_some());
    }
}
