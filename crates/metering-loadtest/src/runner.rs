//! Load test runner
//!
//! Drives one worker per simulated host at the rate of the arrival curve.
//! A dispatcher sleeps until each arrival is due and hands it to an idle
//! worker; when every worker is busy the arrival is dropped and counted.

use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::{sleep_until, timeout, Instant};
use tracing::{debug, info, warn};

use crate::config::LoadTestConfig;
use crate::error::Result;
use crate::executor::{RequestExecutor, RunContext};
use crate::identity::{HostId, HostIdentityCache, IdentityRegistry};
use crate::metrics::{MetricsSummary, RunMetrics};
use crate::remote_write::WriteTransport;
use crate::sample::SampleBuilder;
use crate::schedule::ArrivalSchedule;
use crate::sla::{SlaReport, SlaThresholds};

const STAGE_NAMES: [&str; 3] = ["ramp-up", "steady", "ramp-down"];

/// Final outcome of a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub metrics: MetricsSummary,
    pub sla: SlaReport,
}

impl RunSummary {
    pub fn passes(&self) -> bool {
        self.sla.passes
    }

    pub fn print_report(&self) {
        self.metrics.print_report();
        self.sla.print_report();
    }
}

/// Main load test runner
pub struct LoadTestRunner {
    config: LoadTestConfig,
    schedule: ArrivalSchedule,
    thresholds: SlaThresholds,
    executor: Arc<RequestExecutor>,
}

impl LoadTestRunner {
    /// Validate the configuration and build the run context.
    ///
    /// The identity registry is generated here, once, before any worker
    /// starts.
    pub fn new(config: LoadTestConfig, transport: Arc<dyn WriteTransport>) -> Result<Self> {
        config.validate()?;

        let (registry, identities) = match config.seed {
            Some(seed) => (
                IdentityRegistry::generate_with_rng(
                    config.org_count,
                    config.accounts_per_org,
                    &mut StdRng::seed_from_u64(seed),
                )?,
                HostIdentityCache::seeded(seed),
            ),
            None => (
                IdentityRegistry::generate(config.org_count, config.accounts_per_org)?,
                HostIdentityCache::new(),
            ),
        };

        let context = RunContext {
            registry: Arc::new(registry),
            identities: Arc::new(identities),
            metrics: Arc::new(RunMetrics::new()?),
        };
        let executor = RequestExecutor::new(
            transport,
            context,
            SampleBuilder::new(config.host_id_min, config.host_id_max),
            config.proxy_secret.clone(),
        );

        Ok(Self {
            schedule: config.schedule(),
            thresholds: config.sla_thresholds(),
            executor: Arc::new(executor),
            config,
        })
    }

    pub fn schedule(&self) -> &ArrivalSchedule {
        &self.schedule
    }

    pub fn context(&self) -> &RunContext {
        self.executor.context()
    }

    /// Run the load test to completion
    pub async fn run(&self) -> RunSummary {
        let metrics = self.context().metrics.clone();
        let total_arrivals = self.schedule.total_arrivals();

        info!(
            url = %self.config.remote_write_url,
            hosts = self.config.host_count(),
            peak_rate = self.schedule.peak_rate(),
            time_unit = ?self.schedule.time_unit(),
            duration = ?self.schedule.total_duration(),
            total_arrivals,
            "Starting load test"
        );

        let (idle_tx, mut idle_rx) = mpsc::unbounded_channel();
        let mut workers = JoinSet::new();
        let mut slots = Vec::with_capacity(self.config.host_count());

        for (index, host_id) in self.config.host_ids().enumerate() {
            let (arrival_tx, arrival_rx) = mpsc::channel(1);
            slots.push(arrival_tx);
            // Every worker starts idle.
            let _ = idle_tx.send(index);
            workers.spawn(worker(
                index,
                host_id,
                arrival_rx,
                idle_tx.clone(),
                self.executor.clone(),
            ));
        }
        drop(idle_tx);

        let progress = tokio::spawn(report_progress(
            metrics.clone(),
            self.thresholds,
            self.config.report_interval(),
        ));

        metrics.mark_started();
        let start = Instant::now();
        let mut current_stage = None;

        for n in 1..=total_arrivals {
            let Some(offset) = self.schedule.arrival_offset(n) else {
                break;
            };
            sleep_until(start + offset).await;

            let stage = self.schedule.stage_at(offset);
            if stage != current_stage {
                if let Some(index) = stage {
                    info!(
                        stage = STAGE_NAMES.get(index).copied().unwrap_or("custom"),
                        rate = self.schedule.rate_at(offset),
                        "Entering stage"
                    );
                }
                current_stage = stage;
            }

            let dispatched = match idle_rx.try_recv() {
                Ok(index) => slots[index].try_send(n).is_ok(),
                Err(_) => false,
            };
            if !dispatched {
                debug!(iteration = n, "No idle worker, dropping iteration");
                metrics.record_dropped();
            }
        }

        sleep_until(start + self.schedule.total_duration()).await;
        drop(slots);

        // In-flight writes get one request timeout to finish.
        let drained = timeout(self.config.request_timeout(), async {
            while workers.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!(
                in_flight = workers.len(),
                "Abandoning in-flight writes after graceful stop"
            );
            workers.abort_all();
        }
        progress.abort();

        let summary = metrics.summary();
        let sla = self.thresholds.evaluate(&summary);

        info!(
            checks = summary.checks_total,
            check_rate = summary.check_rate,
            p90_us = summary.latency_p90_us,
            dropped = summary.dropped_iterations,
            passes = sla.passes,
            "Load test complete"
        );

        RunSummary {
            metrics: summary,
            sla,
        }
    }
}

/// Executes the arrivals handed to one host until the dispatcher hangs up
async fn worker(
    index: usize,
    host_id: HostId,
    mut arrivals: mpsc::Receiver<u64>,
    idle: mpsc::UnboundedSender<usize>,
    executor: Arc<RequestExecutor>,
) {
    while let Some(iteration) = arrivals.recv().await {
        if let Err(e) = executor.write(host_id).await {
            warn!(host_id, iteration, error = %e, "Write iteration failed");
        }
        if idle.send(index).is_err() {
            break;
        }
    }
}

/// Periodically evaluates the thresholds against the metrics so far
async fn report_progress(metrics: Arc<RunMetrics>, thresholds: SlaThresholds, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    ticker.tick().await;

    loop {
        ticker.tick().await;

        let summary = metrics.summary();
        let report = thresholds.evaluate(&summary);
        if summary.checks_total > 0 && !report.passes {
            warn!(
                checks = summary.checks_total,
                check_rate = summary.check_rate,
                p90_us = summary.latency_p90_us,
                violations = ?report.violations(),
                "SLA currently violated"
            );
        } else {
            info!(
                checks = summary.checks_total,
                check_rate = summary.check_rate,
                p90_us = summary.latency_p90_us,
                dropped = summary.dropped_iterations,
                "Progress"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ConfigError, WriteError};
    use crate::remote_write::{WriteCall, WriteResponse};
    use async_trait::async_trait;

    struct Accepting;

    #[async_trait]
    impl WriteTransport for Accepting {
        async fn send(&self, _call: WriteCall) -> std::result::Result<WriteResponse, WriteError> {
            Ok(WriteResponse {
                status: 204,
                body: String::new(),
            })
        }
    }

    /// Holds every request far longer than the arrival interval
    struct Stalling;

    #[async_trait]
    impl WriteTransport for Stalling {
        async fn send(&self, _call: WriteCall) -> std::result::Result<WriteResponse, WriteError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(WriteResponse {
                status: 200,
                body: String::new(),
            })
        }
    }

    fn config() -> LoadTestConfig {
        LoadTestConfig {
            duration_minutes: 1,
            scrape_interval_secs: 1,
            host_id_min: 0,
            host_id_max: 4,
            org_count: 2,
            accounts_per_org: 2,
            ..Default::default()
        }
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let config = LoadTestConfig {
            accounts_per_org: 0,
            ..config()
        };
        assert!(matches!(
            LoadTestRunner::new(config, Arc::new(Accepting)),
            Err(ConfigError::EmptyRegistry { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_every_arrival_executed() {
        let runner = LoadTestRunner::new(config(), Arc::new(Accepting)).unwrap();
        assert_eq!(runner.schedule().total_arrivals(), 240);

        let summary = runner.run().await;
        assert_eq!(summary.metrics.checks_total, 240);
        assert_eq!(summary.metrics.dropped_iterations, 0);
        assert!(summary.passes());

        // Every host got exactly one identity.
        assert_eq!(runner.context().identities.len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_busy_pool_drops_arrivals_and_abandons_stragglers() {
        let config = LoadTestConfig {
            request_timeout_secs: 5,
            ..config()
        };
        let runner = LoadTestRunner::new(config, Arc::new(Stalling)).unwrap();

        let summary = runner.run().await;
        // Each of the four workers takes one arrival and never comes back.
        assert_eq!(summary.metrics.dropped_iterations, 236);
        assert_eq!(summary.metrics.checks_total, 0);
        assert!(!summary.passes());
    }

    #[tokio::test(start_paused = true)]
    async fn test_seeded_runs_share_host_mapping() {
        let config = LoadTestConfig {
            seed: Some(42),
            ..config()
        };
        let a = LoadTestRunner::new(config.clone(), Arc::new(Accepting)).unwrap();
        let b = LoadTestRunner::new(config, Arc::new(Accepting)).unwrap();
        a.run().await;
        b.run().await;

        for host_id in 0..4 {
            assert!(a.context().identities.get(host_id).is_some());
            assert_eq!(
                a.context().identities.get(host_id),
                b.context().identities.get(host_id)
            );
        }
    }
}
