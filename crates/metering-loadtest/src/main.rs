//! # Host Metering Load Test CLI
//!
//! Every option can also be set through the environment variable named in
//! its help text.
//!
//! ## Usage
//!
//! ```bash
//! # One hour against a local gateway, 1000 hosts, 5 minute ramps
//! metering-loadtest --url http://localhost:8080/api/v1/write \
//!     --host-id-max 1000 --duration 60 --ramp-up 5 --ramp-down 5
//!
//! # Same, configured from the environment
//! REMOTE_WRITE_URL=http://localhost:8080/api/v1/write HOST_ID_MAX=1000 metering-loadtest
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use metering_loadtest::{HttpTransport, LoadTestConfig, LoadTestRunner};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Exit code for a completed run that violated its SLA
const EXIT_SLA_VIOLATED: i32 = 99;

#[derive(Parser)]
#[command(name = "metering-loadtest")]
#[command(version)]
#[command(about = "Remote-write load generator for host metering ingestion", long_about = None)]
struct Cli {
    /// Remote-write endpoint
    #[arg(long, env = "REMOTE_WRITE_URL", default_value = "http://localhost:9090/api/v1/write")]
    url: String,

    /// Write requests per host per scrape interval
    #[arg(long, env = "WRITE_REQUEST_RATE", default_value = "1")]
    rate: u64,

    /// Total duration in minutes, ramps included
    #[arg(long, env = "DURATION_MINUTES", default_value = "720")]
    duration: u64,

    /// Ramp-up duration in minutes
    #[arg(long, env = "RAMP_UP_MINUTES", default_value = "0")]
    ramp_up: u64,

    /// Ramp-down duration in minutes
    #[arg(long, env = "RAMP_DOWN_MINUTES", default_value = "0")]
    ramp_down: u64,

    /// Simulated scrape interval in seconds
    #[arg(long, env = "SCRAPE_INTERVAL_SECONDS", default_value = "30")]
    scrape_interval: u64,

    /// First simulated host id
    #[arg(long, env = "HOST_ID_MIN", default_value = "0")]
    host_id_min: u64,

    /// Simulated host ids stop before this one
    #[arg(long, env = "HOST_ID_MAX", default_value = "100")]
    host_id_max: u64,

    /// Gateway shared secret
    #[arg(long, env = "PROXY_SECRET", default_value = "abc", hide_env_values = true)]
    secret: String,

    /// Number of simulated organizations
    #[arg(long, env = "VIRTUAL_ORGANISATIONS_COUNT", default_value = "100")]
    organizations: usize,

    /// Cloud accounts per simulated organization
    #[arg(long, env = "VIRTUAL_ORGANISATIONS_CLOUD_ACCOUNTS_COUNT", default_value = "5")]
    accounts_per_org: usize,

    /// Request timeout in seconds
    #[arg(long, env = "REQUEST_TIMEOUT_SECONDS", default_value = "70")]
    timeout: u64,

    /// Fraction of writes that must succeed
    #[arg(long, env = "SLA_MIN_CHECK_RATE", default_value = "0.95")]
    sla_check_rate: f64,

    /// Upper bound for p90 write latency in milliseconds
    #[arg(long, env = "SLA_MAX_P90_LATENCY_MS", default_value = "5000")]
    sla_p90_ms: u64,

    /// Seconds between progress reports
    #[arg(long, env = "REPORT_INTERVAL_SECONDS", default_value = "60")]
    report_interval: u64,

    /// Seed for a reproducible host to identity mapping
    #[arg(long, env = "LOADTEST_SEED")]
    seed: Option<u64>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,

    /// Write the run summary as JSON to this file
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Write the final metrics in Prometheus text format to this file
    #[arg(long)]
    metrics_output: Option<PathBuf>,
}

impl From<&Cli> for LoadTestConfig {
    fn from(cli: &Cli) -> Self {
        Self {
            remote_write_url: cli.url.clone(),
            write_request_rate: cli.rate,
            duration_minutes: cli.duration,
            ramp_up_minutes: cli.ramp_up,
            ramp_down_minutes: cli.ramp_down,
            scrape_interval_secs: cli.scrape_interval,
            host_id_min: cli.host_id_min,
            host_id_max: cli.host_id_max,
            proxy_secret: cli.secret.clone(),
            org_count: cli.organizations,
            accounts_per_org: cli.accounts_per_org,
            request_timeout_secs: cli.timeout,
            sla_min_check_rate: cli.sla_check_rate,
            sla_max_p90_latency_ms: cli.sla_p90_ms,
            report_interval_secs: cli.report_interval,
            seed: cli.seed,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });

    tracing_subscriber::registry()
        .with(cli.json_logs.then(|| fmt::layer().json()))
        .with((!cli.json_logs).then(|| fmt::layer()))
        .with(filter)
        .init();

    info!("Host Metering Load Test v{}", env!("CARGO_PKG_VERSION"));

    let config = LoadTestConfig::from(&cli);
    config.validate().context("invalid configuration")?;

    let transport = HttpTransport::new(
        &config.remote_write_url,
        config.request_timeout(),
        config.host_count(),
    )
    .context("failed to set up remote-write transport")?;

    let runner = LoadTestRunner::new(config, Arc::new(transport))
        .context("failed to prepare load test")?;

    let summary = runner.run().await;
    summary.print_report();

    if let Some(path) = &cli.output {
        let json = serde_json::to_string_pretty(&summary).context("failed to serialize summary")?;
        std::fs::write(path, json)
            .with_context(|| format!("failed to write {}", path.display()))?;
        info!("Results saved to {}", path.display());
    }

    if let Some(path) = &cli.metrics_output {
        let text = runner
            .context()
            .metrics
            .render_prometheus()
            .context("failed to render metrics")?;
        std::fs::write(path, text)
            .with_context(|| format!("failed to write {}", path.display()))?;
        info!("Metrics saved to {}", path.display());
    }

    if !summary.passes() {
        std::process::exit(EXIT_SLA_VIOLATED);
    }

    Ok(())
}
