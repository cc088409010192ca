//! Comparison report assembly and rendering.
//!
//! The sweep produces one [`ReportEntry`] per protocol configuration.
//! A configuration that failed at setup is recorded as
//! [`ConfigOutcome::Errored`] with its reason; in every rendering that
//! state is kept visibly distinct from a configuration that ran and
//! merely failed all of its requests.

use crate::metrics::{BenchmarkMetrics, MetricsStatistics, StreamStats};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use colored::Colorize;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemInfo {
    pub os: String,
    pub architecture: String,
    pub cpu_cores: usize,
    pub version: String,
}

impl SystemInfo {
    pub fn collect() -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            architecture: std::env::consts::ARCH.to_string(),
            cpu_cores: num_cpus::get(),
            version: crate::VERSION.to_string(),
        }
    }
}

/// Finalized statistics for one benchmark primitive's run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkRecord {
    pub name: String,
    pub stats: MetricsStatistics,
}

impl From<&BenchmarkMetrics> for BenchmarkRecord {
    fn from(metrics: &BenchmarkMetrics) -> Self {
        Self {
            name: metrics.name.clone(),
            stats: metrics.compute_statistics(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ConfigOutcome {
    Completed { benchmarks: Vec<BenchmarkRecord> },
    Errored { reason: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportEntry {
    pub config: String,
    #[serde(flatten)]
    pub outcome: ConfigOutcome,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComparisonReport {
    pub generated_at: DateTime<Utc>,
    pub system: SystemInfo,
    pub entries: Vec<ReportEntry>,
}

impl Default for ComparisonReport {
    fn default() -> Self {
        Self::new()
    }
}

impl ComparisonReport {
    pub fn new() -> Self {
        Self {
            generated_at: Utc::now(),
            system: SystemInfo::collect(),
            entries: Vec::new(),
        }
    }

    pub fn add_completed(&mut self, config: impl Into<String>, runs: &[BenchmarkMetrics]) {
        self.entries.push(ReportEntry {
            config: config.into(),
            outcome: ConfigOutcome::Completed {
                benchmarks: runs.iter().map(BenchmarkRecord::from).collect(),
            },
        });
    }

    pub fn add_errored(&mut self, config: impl Into<String>, reason: impl Into<String>) {
        self.entries.push(ReportEntry {
            config: config.into(),
            outcome: ConfigOutcome::Errored {
                reason: reason.into(),
            },
        });
    }

    pub fn is_all_errored(&self) -> bool {
        !self.entries.is_empty()
            && self
                .entries
                .iter()
                .all(|e| matches!(e.outcome, ConfigOutcome::Errored { .. }))
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("failed to serialize report")
    }

    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        let json = self.to_json()?;
        std::fs::write(path, json)
            .with_context(|| format!("failed to write report to {}", path.display()))
    }

    /// Flatten every numeric statistic into `config.benchmark.stream.stat`
    /// keys, for diffing runs or feeding a plotter.
    pub fn to_flat_kv(&self) -> BTreeMap<String, f64> {
        let mut flat = BTreeMap::new();
        for entry in &self.entries {
            let ConfigOutcome::Completed { benchmarks } = &entry.outcome else {
                continue;
            };
            for record in benchmarks {
                let prefix = format!("{}.{}", entry.config, record.name);
                let stats = &record.stats;
                flatten_stream(&mut flat, &prefix, "connection_time", &stats.connection_time);
                flatten_stream(&mut flat, &prefix, "latency", &stats.latency);
                flatten_stream(&mut flat, &prefix, "upload_bandwidth", &stats.upload_bandwidth);
                flatten_stream(&mut flat, &prefix, "download_bandwidth", &stats.download_bandwidth);
                flat.insert(format!("{prefix}.total_requests"), stats.total_requests as f64);
                flat.insert(format!("{prefix}.failed_requests"), stats.failed_requests as f64);
                flat.insert(format!("{prefix}.success_rate"), stats.success_rate);
            }
        }
        flat
    }

    /// Human-readable comparison table on stdout.
    pub fn print_summary(&self) {
        println!();
        println!("{}", "=== RPC vs REST benchmark results ===".bold());
        println!(
            "generated {} on {}/{} ({} cores)",
            self.generated_at.format("%Y-%m-%d %H:%M:%S UTC"),
            self.system.os,
            self.system.architecture,
            self.system.cpu_cores
        );

        for entry in &self.entries {
            println!();
            match &entry.outcome {
                ConfigOutcome::Errored { reason } => {
                    println!("{}  {}", entry.config.bold(), "SETUP FAILED".red().bold());
                    println!("  {}", reason.red());
                }
                ConfigOutcome::Completed { benchmarks } => {
                    println!("{}", entry.config.bold().green());
                    for record in benchmarks {
                        print_record(record);
                    }
                }
            }
        }
        println!();
    }
}

fn flatten_stream(flat: &mut BTreeMap<String, f64>, prefix: &str, stream: &str, stats: &StreamStats) {
    if stats.count == 0 {
        return;
    }
    flat.insert(format!("{prefix}.{stream}.mean"), stats.mean);
    flat.insert(format!("{prefix}.{stream}.median"), stats.median);
    flat.insert(format!("{prefix}.{stream}.min"), stats.min);
    flat.insert(format!("{prefix}.{stream}.max"), stats.max);
    flat.insert(format!("{prefix}.{stream}.std_dev"), stats.std_dev);
    flat.insert(format!("{prefix}.{stream}.p95"), stats.p95);
    flat.insert(format!("{prefix}.{stream}.p99"), stats.p99);
}

fn print_record(record: &BenchmarkRecord) {
    let stats = &record.stats;
    let success = if stats.failed_requests == 0 {
        format!("{:.1}%", stats.success_rate * 100.0).green()
    } else {
        format!("{:.1}%", stats.success_rate * 100.0).yellow()
    };
    println!(
        "  {:<28} {:>6} requests, {} ok",
        record.name, stats.total_requests, success
    );

    if stats.connection_time.count > 0 {
        println!(
            "    connect   mean {:>10}  p95 {:>10}",
            crate::utils::format_duration(stats.connection_time.mean),
            crate::utils::format_duration(stats.connection_time.p95),
        );
    }
    if stats.latency.count > 0 {
        println!(
            "    latency   mean {:>10}  p95 {:>10}  p99 {:>10}",
            crate::utils::format_duration(stats.latency.mean),
            crate::utils::format_duration(stats.latency.p95),
            crate::utils::format_duration(stats.latency.p99),
        );
    }
    if stats.upload_bandwidth.count > 0 {
        println!(
            "    upload    mean {:>12}  max {:>12}",
            crate::utils::format_rate(stats.upload_bandwidth.mean),
            crate::utils::format_rate(stats.upload_bandwidth.max),
        );
    }
    if stats.download_bandwidth.count > 0 {
        println!(
            "    download  mean {:>12}  max {:>12}",
            crate::utils::format_rate(stats.download_bandwidth.mean),
            crate::utils::format_rate(stats.download_bandwidth.max),
        );
    }
}
