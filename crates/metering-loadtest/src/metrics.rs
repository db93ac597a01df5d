//! Run metrics
//!
//! Aggregates the "write" check outcomes and write latencies that the SLA
//! evaluation runs against. Every iteration, failed or not, passes through
//! here before its result is surfaced.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use hdrhistogram::Histogram;
use parking_lot::RwLock;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::error::{ConfigError, Result, WriteError};

/// Tag of the check recorded for every write iteration
pub const CHECK_TYPE_WRITE: &str = "write";

/// Highest trackable latency: 120s in microseconds
const MAX_LATENCY_US: u64 = 120_000_000;

/// Prometheus mirror of the run metrics
struct Exporter {
    registry: Registry,
    checks: IntCounterVec,
    latency: HistogramVec,
    dropped: IntCounter,
}

impl Exporter {
    fn new() -> std::result::Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let checks = IntCounterVec::new(
            Opts::new("checks_total", "Load test checks by type and result"),
            &["type", "result"],
        )?;
        let latency = HistogramVec::new(
            HistogramOpts::new(
                "write_request_duration_seconds",
                "Remote write request latency",
            )
            .buckets(vec![
                0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 70.0,
            ]),
            &["status"],
        )?;
        let dropped = IntCounter::new(
            "dropped_iterations_total",
            "Arrivals skipped because every worker was busy",
        )?;

        registry.register(Box::new(checks.clone()))?;
        registry.register(Box::new(latency.clone()))?;
        registry.register(Box::new(dropped.clone()))?;

        Ok(Self {
            registry,
            checks,
            latency,
            dropped,
        })
    }
}

/// Shared run metrics
pub struct RunMetrics {
    checks_passed: AtomicU64,
    checks_failed: AtomicU64,
    dropped_iterations: AtomicU64,

    /// Write latency histogram (microseconds)
    latency_histogram: RwLock<Histogram<u64>>,

    /// Failure counts by kind
    error_counts: RwLock<HashMap<String, u64>>,

    start_time: RwLock<Option<Instant>>,

    exporter: Exporter,
}

impl RunMetrics {
    pub fn new() -> Result<Self> {
        let histogram = Histogram::new_with_bounds(1, MAX_LATENCY_US, 3)
            .map_err(|e| ConfigError::Metrics(e.to_string()))?;
        let exporter = Exporter::new().map_err(|e| ConfigError::Metrics(e.to_string()))?;

        Ok(Self {
            checks_passed: AtomicU64::new(0),
            checks_failed: AtomicU64::new(0),
            dropped_iterations: AtomicU64::new(0),
            latency_histogram: RwLock::new(histogram),
            error_counts: RwLock::new(HashMap::new()),
            start_time: RwLock::new(None),
            exporter,
        })
    }

    /// Mark the start of the measurement window
    pub fn mark_started(&self) {
        *self.start_time.write() = Some(Instant::now());
    }

    /// Record an accepted write
    pub fn record_success(&self, status: u16, latency: Duration) {
        self.checks_passed.fetch_add(1, Ordering::Relaxed);
        self.exporter
            .checks
            .with_label_values(&[CHECK_TYPE_WRITE, "pass"])
            .inc();
        self.record_latency(status, latency);
    }

    /// Record a failed write. `latency` is present when a response arrived.
    pub fn record_failure(&self, error: &WriteError, latency: Option<Duration>) {
        self.checks_failed.fetch_add(1, Ordering::Relaxed);
        self.exporter
            .checks
            .with_label_values(&[CHECK_TYPE_WRITE, "fail"])
            .inc();

        *self.error_counts.write().entry(error.kind()).or_insert(0) += 1;

        if let (Some(latency), WriteError::Rejected { status, .. }) = (latency, error) {
            self.record_latency(*status, latency);
        }
    }

    /// Record an arrival no worker was free to execute
    pub fn record_dropped(&self) {
        self.dropped_iterations.fetch_add(1, Ordering::Relaxed);
        self.exporter.dropped.inc();
    }

    fn record_latency(&self, status: u16, latency: Duration) {
        let micros = latency.as_micros().min(MAX_LATENCY_US as u128) as u64;
        self.latency_histogram.write().saturating_record(micros);
        self.exporter
            .latency
            .with_label_values(&[&status.to_string()])
            .observe(latency.as_secs_f64());
    }

    /// Get summary statistics
    pub fn summary(&self) -> MetricsSummary {
        let hist = self.latency_histogram.read();
        let duration = self
            .start_time
            .read()
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0);

        let passed = self.checks_passed.load(Ordering::Relaxed);
        let failed = self.checks_failed.load(Ordering::Relaxed);
        let total = passed + failed;

        MetricsSummary {
            checks_total: total,
            checks_passed: passed,
            checks_failed: failed,
            check_rate: if total > 0 {
                passed as f64 / total as f64
            } else {
                0.0
            },
            dropped_iterations: self.dropped_iterations.load(Ordering::Relaxed),
            avg_rps: if duration > 0.0 {
                total as f64 / duration
            } else {
                0.0
            },
            latency_samples: hist.len(),
            latency_p50_us: quantile(&hist, 0.50),
            latency_p90_us: quantile(&hist, 0.90),
            latency_p99_us: quantile(&hist, 0.99),
            latency_max_us: hist.max(),
            latency_mean_us: hist.mean() as u64,
            duration_secs: duration,
            error_counts: self.error_counts.read().clone(),
        }
    }

    /// Render the metrics in the Prometheus text exposition format
    pub fn render_prometheus(&self) -> std::result::Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.exporter.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

/// Lower bound of the histogram bucket holding quantile `q`, so a recorded
/// value never reads back larger than it was
fn quantile(hist: &Histogram<u64>, q: f64) -> u64 {
    hist.lowest_equivalent(hist.value_at_quantile(q))
}

/// Metrics summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSummary {
    pub checks_total: u64,
    pub checks_passed: u64,
    pub checks_failed: u64,
    /// Fraction of passed write checks, zero when none ran
    pub check_rate: f64,
    pub dropped_iterations: u64,
    pub avg_rps: f64,
    pub latency_samples: u64,
    pub latency_p50_us: u64,
    pub latency_p90_us: u64,
    pub latency_p99_us: u64,
    pub latency_max_us: u64,
    pub latency_mean_us: u64,
    pub duration_secs: f64,
    pub error_counts: HashMap<String, u64>,
}

impl MetricsSummary {
    /// Print formatted report
    pub fn print_report(&self) {
        println!("\n╔══════════════════════════════════════════════════════════════╗");
        println!("║              HOST METERING LOAD TEST RESULTS                 ║");
        println!("╠══════════════════════════════════════════════════════════════╣");
        println!(
            "║ Duration:          {:>10.2} seconds                        ║",
            self.duration_secs
        );
        println!(
            "║ Write Checks:      {:>10}                                 ║",
            self.checks_total
        );
        println!(
            "║ Passed:            {:>10}                                 ║",
            self.checks_passed
        );
        println!(
            "║ Failed:            {:>10}                                 ║",
            self.checks_failed
        );
        println!(
            "║ Check Rate:        {:>10.4}                                 ║",
            self.check_rate
        );
        println!(
            "║ Dropped:           {:>10}                                 ║",
            self.dropped_iterations
        );
        println!(
            "║ Avg RPS:           {:>10.2}                                ║",
            self.avg_rps
        );
        println!("╠══════════════════════════════════════════════════════════════╣");
        println!("║ WRITE LATENCY (microseconds)                                 ║");
        println!(
            "║   p50:             {:>10}                                 ║",
            self.latency_p50_us
        );
        println!(
            "║   p90:             {:>10}                                 ║",
            self.latency_p90_us
        );
        println!(
            "║   p99:             {:>10}                                 ║",
            self.latency_p99_us
        );
        println!(
            "║   max:             {:>10}                                 ║",
            self.latency_max_us
        );
        println!(
            "║   mean:            {:>10}                                 ║",
            self.latency_mean_us
        );

        if !self.error_counts.is_empty() {
            println!("╠══════════════════════════════════════════════════════════════╣");
            println!("║ ERRORS                                                       ║");
            let mut errors = self.error_counts.iter().collect::<Vec<_>>();
            errors.sort();
            for (error_type, count) in errors {
                println!("║   {:20}: {:>10}                         ║", error_type, count);
            }
        }

        println!("╚══════════════════════════════════════════════════════════════╝\n");
    }
}
