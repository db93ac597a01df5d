//! # Host Metering Load Testing
//!
//! Generates sustained, high-cardinality Prometheus remote-write traffic
//! against a metering ingestion gateway and checks the run against its
//! throughput and latency SLA.
//!
//! ## Features
//!
//! - **Stable billing identities**: every simulated host is bound to one
//!   organization and cloud account for the whole run
//! - **Label churn**: presentation labels change on every write so the
//!   receiver's de-duplication is exercised
//! - **Ramping arrival rate**: ramp-up, steady and ramp-down stages driven by
//!   a worker per simulated host
//! - **SLA evaluation**: write check rate and p90 latency thresholds
//! - **HDR Histograms**: High-precision latency distribution
//!
//! ## Usage
//!
//! ```bash
//! REMOTE_WRITE_URL=http://gateway:8080/api/v1/write \
//! HOST_ID_MAX=1000 DURATION_MINUTES=60 RAMP_UP_MINUTES=5 \
//!   cargo run --release --package metering-loadtest
//! ```

pub mod config;
pub mod error;
pub mod executor;
pub mod identity;
pub mod metrics;
pub mod remote_write;
pub mod runner;
pub mod sample;
pub mod schedule;
pub mod sla;

pub use config::LoadTestConfig;
pub use error::{ConfigError, WriteError};
pub use executor::{RequestExecutor, RunContext, WriteOutcome, ACCEPTED_STATUSES};
pub use identity::{
    AccountId, HostId, HostIdentity, HostIdentityCache, IdentityRegistry, OrganizationId,
};
pub use metrics::{MetricsSummary, RunMetrics};
pub use remote_write::{HttpTransport, WriteCall, WriteResponse, WriteTransport};
pub use runner::{LoadTestRunner, RunSummary};
pub use sample::{Sample, SampleBuilder};
pub use schedule::{ArrivalSchedule, Stage};
pub use sla::{SlaReport, SlaThresholds};
