//! SLA threshold evaluation

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::metrics::MetricsSummary;

/// Pass/fail thresholds of a run
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SlaThresholds {
    /// Fraction of write checks that must pass (strictly greater than)
    pub min_check_rate: f64,
    /// p90 write latency must stay strictly below this bound
    pub max_p90_latency: Duration,
}

impl Default for SlaThresholds {
    fn default() -> Self {
        Self {
            min_check_rate: 0.95,
            max_p90_latency: Duration::from_millis(5000),
        }
    }
}

impl SlaThresholds {
    /// Evaluate a metrics summary against the thresholds
    pub fn evaluate(&self, summary: &MetricsSummary) -> SlaReport {
        let mut report = SlaReport {
            passes: true,
            checks: Vec::new(),
        };

        // No writes at all is not evidence of a healthy endpoint.
        let rate_check = summary.checks_total > 0 && summary.check_rate > self.min_check_rate;
        report.push(ThresholdCheck {
            name: "checks{type:write}".to_string(),
            passed: rate_check,
            actual: format!("rate={:.4} ({} checks)", summary.check_rate, summary.checks_total),
            expected: format!("rate > {}", self.min_check_rate),
        });

        let bound_us = self.max_p90_latency.as_micros() as u64;
        let latency_check = summary.latency_p90_us < bound_us;
        report.push(ThresholdCheck {
            name: "write_request_duration".to_string(),
            passed: latency_check,
            actual: format!("p(90)={:.1}ms", summary.latency_p90_us as f64 / 1000.0),
            expected: format!("p(90) < {}ms", self.max_p90_latency.as_millis()),
        });

        report
    }
}

/// Outcome of one threshold
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdCheck {
    pub name: String,
    pub passed: bool,
    pub actual: String,
    pub expected: String,
}

/// Outcome of all thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlaReport {
    pub passes: bool,
    pub checks: Vec<ThresholdCheck>,
}

impl SlaReport {
    fn push(&mut self, check: ThresholdCheck) {
        self.passes &= check.passed;
        self.checks.push(check);
    }

    /// Names of the violated thresholds
    pub fn violations(&self) -> Vec<&str> {
        self.checks
            .iter()
            .filter(|check| !check.passed)
            .map(|check| check.name.as_str())
            .collect()
    }

    pub fn print_report(&self) {
        println!("\n═══════════════════════════════════════════════════════════════");
        println!("                     SLA THRESHOLDS");
        println!("═══════════════════════════════════════════════════════════════");

        for check in &self.checks {
            let status = if check.passed { "✅ PASS" } else { "❌ FAIL" };
            println!("\n  {} - {}", check.name, status);
            println!("    Actual:   {}", check.actual);
            println!("    Expected: {}", check.expected);
        }

        println!("\n═══════════════════════════════════════════════════════════════");
        if self.passes {
            println!("  OVERALL: ✅ SLA MET");
        } else {
            println!("  OVERALL: ❌ SLA VIOLATED");
        }
        println!("═══════════════════════════════════════════════════════════════\n");
    }
}
